use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::RtspError;

/// How a read loop ended.
pub type ReadOutcome = Result<(), Arc<RtspError>>;

/// Completion signal of one [`read_frames`](crate::ClientConn::read_frames)
/// loop.
///
/// Set exactly once. `Ok(())` when the loop was stopped by `pause` or
/// `close`; the error otherwise. Clones share the same signal and every
/// waiter sees the same outcome.
#[derive(Clone)]
pub struct ReadDone {
    shared: Arc<(Mutex<Option<ReadOutcome>>, Condvar)>,
}

impl ReadDone {
    pub(crate) fn new() -> Self {
        ReadDone {
            shared: Arc::new((Mutex::new(None), Condvar::new())),
        }
    }

    /// A signal that is already set; used when a loop is refused.
    pub(crate) fn resolved(outcome: std::result::Result<(), RtspError>) -> Self {
        let done = Self::new();
        done.complete(outcome);
        done
    }

    /// Set the outcome. Later calls are ignored.
    pub(crate) fn complete(&self, outcome: std::result::Result<(), RtspError>) {
        let (lock, cvar) = &*self.shared;
        let mut slot = lock.lock();
        if slot.is_none() {
            *slot = Some(outcome.map_err(Arc::new));
            cvar.notify_all();
        }
    }

    /// Block until the loop has ended.
    pub fn wait(&self) -> ReadOutcome {
        let (lock, cvar) = &*self.shared;
        let mut slot = lock.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            cvar.wait(&mut slot);
        }
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ReadOutcome> {
        let (lock, cvar) = &*self.shared;
        let mut slot = lock.lock();
        if slot.is_none() {
            cvar.wait_while_for(&mut slot, |s| s.is_none(), timeout);
        }
        slot.clone()
    }

    pub fn is_done(&self) -> bool {
        self.shared.0.lock().is_some()
    }
}

impl std::fmt::Debug for ReadDone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadDone")
            .field("outcome", &*self.shared.0.lock())
            .finish()
    }
}

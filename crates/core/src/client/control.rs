use std::sync::Arc;

use crate::error::{Result, RtspError};
use crate::protocol::auth::Authenticator;
use crate::protocol::{Credentials, Method, RtspRequest, RtspResponse};
use crate::session::SessionHeader;
use crate::transport::RtspConn;

/// Request side of the control connection: the headers every request
/// carries and the state learned from responses.
///
/// - `User-Agent` on every request.
/// - `Session` once the server has issued one. The first response that
///   carries a `Session` header fixes the id; responses without one are
///   taken to belong to the same session, since plenty of servers omit it.
/// - `Authorization` after a `401`: the request is repeated once with
///   credentials from the URL, and the scheme is kept for later requests.
pub(crate) struct ControlChannel {
    conn: Arc<RtspConn>,
    user_agent: String,
    credentials: Option<Credentials>,
    auth: Option<Authenticator>,
    session: Option<SessionHeader>,
}

impl ControlChannel {
    pub(crate) fn new(
        conn: Arc<RtspConn>,
        user_agent: &str,
        credentials: Option<Credentials>,
    ) -> Self {
        ControlChannel {
            conn,
            user_agent: user_agent.to_string(),
            credentials,
            auth: None,
            session: None,
        }
    }

    pub(crate) fn session(&self) -> Option<&SessionHeader> {
        self.session.as_ref()
    }

    /// Forget the session after it was torn down.
    pub(crate) fn clear_session(&mut self) {
        self.session = None;
    }

    /// Send a request and return the response, whatever its status.
    pub(crate) fn send(&mut self, method: Method, request: RtspRequest) -> Result<RtspResponse> {
        let mut response = self.conn.request(method, self.decorate(method, request.clone()))?;

        if response.status_code == 401 && self.auth.is_none() {
            if let Some(credentials) = &self.credentials {
                let challenges = response.get_all("WWW-Authenticate");
                let authenticator = Authenticator::from_challenges(credentials, &challenges)
                    .map_err(|e| e.in_method(method))?;
                tracing::debug!(%method, scheme = authenticator.scheme(), "retrying with credentials");
                self.auth = Some(authenticator);
                response = self.conn.request(method, self.decorate(method, request))?;
            }
        }

        if let Some(header) = response.get_header("Session").and_then(SessionHeader::parse) {
            if let Some(current) = &self.session {
                if current.id != header.id {
                    tracing::warn!(
                        current = %current.id,
                        received = %header.id,
                        "server changed session id mid-session, keeping the first"
                    );
                }
            } else {
                tracing::debug!(session_id = %header.id, timeout = header.timeout_secs, "session id assigned");
                self.session = Some(header);
            }
        }

        Ok(response)
    }

    /// Send a request; anything but 2xx becomes [`RtspError::BadStatus`].
    pub(crate) fn send_expect_success(
        &mut self,
        method: Method,
        request: RtspRequest,
    ) -> Result<RtspResponse> {
        let response = self.send(method, request)?;
        if !response.is_success() {
            return Err(bad_status(method, &response));
        }
        Ok(response)
    }

    fn decorate(&self, method: Method, mut request: RtspRequest) -> RtspRequest {
        request.set_header("User-Agent", &self.user_agent);
        if let Some(session) = &self.session {
            request.set_header("Session", &session.id);
        }
        if let Some(auth) = &self.auth {
            let value = auth.authorization(method, &request.uri);
            request.set_header("Authorization", &value);
        }
        request
    }
}

pub(crate) fn bad_status(method: Method, response: &RtspResponse) -> RtspError {
    RtspError::BadStatus {
        method,
        code: response.status_code,
        reason: response.status_text.clone(),
    }
}

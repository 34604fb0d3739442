//! `Authorization` headers for servers that answer `401 Unauthorized`
//! (RFC 2326 §12.5, RFC 2617).
//!
//! The server lists one or more `WWW-Authenticate` challenges. Digest is
//! preferred over Basic; Digest responses follow RFC 2617 without `qop`,
//! which is what RTSP cameras and servers expect:
//!
//! ```text
//! HA1      = MD5(username:realm:password)
//! HA2      = MD5(method:uri)
//! response = MD5(HA1:nonce:HA2)
//! ```

use base64::prelude::{BASE64_STANDARD, Engine as _};

use super::Method;
use super::url::Credentials;
use crate::error::{Result, RtspError};

/// Produces `Authorization` values for every request after a challenge.
#[derive(Debug, Clone)]
pub enum Authenticator {
    Basic {
        credentials: Credentials,
    },
    Digest {
        credentials: Credentials,
        realm: String,
        nonce: String,
        opaque: Option<String>,
    },
}

impl Authenticator {
    /// Pick a scheme from the server's `WWW-Authenticate` challenges.
    pub fn from_challenges(credentials: &Credentials, challenges: &[&str]) -> Result<Self> {
        let mut basic = None;

        for challenge in challenges {
            let challenge = challenge.trim();
            let (scheme, params) = challenge.split_once(' ').unwrap_or((challenge, ""));

            if scheme.eq_ignore_ascii_case("Digest") {
                let params = parse_params(params);
                let realm = param(&params, "realm")
                    .ok_or_else(|| RtspError::Auth("digest challenge without realm".into()))?;
                let nonce = param(&params, "nonce")
                    .ok_or_else(|| RtspError::Auth("digest challenge without nonce".into()))?;
                return Ok(Authenticator::Digest {
                    credentials: credentials.clone(),
                    realm,
                    nonce,
                    opaque: param(&params, "opaque"),
                });
            }

            if scheme.eq_ignore_ascii_case("Basic") {
                basic = Some(Authenticator::Basic {
                    credentials: credentials.clone(),
                });
            }
        }

        basic.ok_or_else(|| {
            RtspError::Auth(format!("no supported challenge in {:?}", challenges))
        })
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            Authenticator::Basic { .. } => "Basic",
            Authenticator::Digest { .. } => "Digest",
        }
    }

    /// `Authorization` header value for one request.
    pub fn authorization(&self, method: Method, uri: &str) -> String {
        match self {
            Authenticator::Basic { credentials } => {
                let token = format!("{}:{}", credentials.username, credentials.password);
                format!("Basic {}", BASE64_STANDARD.encode(token))
            }
            Authenticator::Digest {
                credentials,
                realm,
                nonce,
                opaque,
            } => {
                let ha1 = md5_hex(&format!(
                    "{}:{}:{}",
                    credentials.username, realm, credentials.password
                ));
                let ha2 = md5_hex(&format!("{}:{}", method, uri));
                let response = md5_hex(&format!("{}:{}:{}", ha1, nonce, ha2));

                let mut value = format!(
                    "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\"",
                    credentials.username, realm, nonce, uri, response
                );
                if let Some(opaque) = opaque {
                    value.push_str(&format!(", opaque=\"{}\"", opaque));
                }
                value
            }
        }
    }
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Split `key="value", key2=value2` into pairs, honouring quotes.
fn parse_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut rest = input.trim();

    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else { break };
        let key = rest[..eq].trim().trim_start_matches(',').trim().to_string();
        rest = rest[eq + 1..].trim_start();

        let value;
        if let Some(quoted) = rest.strip_prefix('"') {
            let end = quoted.find('"').unwrap_or(quoted.len());
            value = quoted[..end].to_string();
            rest = quoted.get(end + 1..).unwrap_or_default();
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            value = rest[..end].trim().to_string();
            rest = &rest[end..];
        }

        params.push((key, value));
        rest = rest.trim_start().trim_start_matches(',').trim_start();
    }

    params
}

fn param(params: &[(String, String)], name: &str) -> Option<String> {
    params
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.clone())
}

// Challenge-response login against login_sid.lua.
//
// The device hands out a challenge; the reply is the challenge plus the MD5
// of "challenge-password" encoded as UTF-16LE, where every code point above
// 0xFF is replaced by '.' before hashing. That lossy step has to be kept
// bit for bit, otherwise passwords with such characters never match.

use std::time::{Duration, Instant};

use md5::{Digest, Md5};
use reqwest::header::CONTENT_TYPE;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

// reported when no session exists
pub const INVALID_SID: &str = "0000000000000000";

const LOGIN_PATH: &str = "/login_sid.lua";
const REPLACEMENT_BYTE: u8 = 0x2e;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    sid: String,
    obtained_at: Instant,
}

impl Session {
    pub fn new(sid: impl Into<String>, obtained_at: Instant) -> Self {
        Self {
            sid: sid.into(),
            obtained_at,
        }
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    pub fn is_valid_at(&self, now: Instant, validity: Duration) -> bool {
        !self.sid.is_empty()
            && self.sid != INVALID_SID
            && now.saturating_duration_since(self.obtained_at) < validity
    }
}

#[derive(Debug, Deserialize)]
struct SessionInfo {
    #[serde(rename = "SID", default)]
    sid: String,
    #[serde(rename = "Challenge", default)]
    challenge: String,
    #[serde(rename = "BlockTime", default)]
    block_time: u32,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("login to {host} blocked for {seconds}s")]
    Blocked { host: String, seconds: u32 },
    #[error("login request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("login request to {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("undecodable login response from {url}: {source}")]
    Malformed {
        url: String,
        #[source]
        source: quick_xml::DeError,
    },
    #[error("login to {host} rejected")]
    Rejected { host: String },
}

impl AuthError {
    /// Blocked logins must not be retried right away.
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }
}

/// UTF-16LE of the input with every code point above 0xFF replaced by '.'.
fn mangle(input: &str) -> Vec<u8> {
    input
        .chars()
        .flat_map(|c| [u8::try_from(u32::from(c)).unwrap_or(REPLACEMENT_BYTE), 0])
        .collect()
}

pub fn compute_response(challenge: &str, password: &str) -> String {
    let digest = Md5::digest(mangle(&format!("{challenge}-{password}")));
    format!("{challenge}-{}", hex::encode(digest))
}

pub struct Authenticator {
    http: reqwest::Client,
    host: String,
    login_url: Url,
    password: SecretString,
    validity: Duration,
}

impl Authenticator {
    pub fn new(
        http: reqwest::Client,
        base_url: &Url,
        password: SecretString,
        validity: Duration,
    ) -> Result<Self, url::ParseError> {
        Ok(Self {
            http,
            host: base_url.host_str().unwrap_or_default().to_string(),
            login_url: base_url.join(LOGIN_PATH)?,
            password,
            validity,
        })
    }

    /// Returns `existing` untouched while it is valid, otherwise logs in.
    pub async fn ensure_session(&self, existing: Option<&Session>) -> Result<Session, AuthError> {
        if let Some(session) = existing {
            if session.is_valid_at(Instant::now(), self.validity) {
                return Ok(session.clone());
            }
        }

        debug!(host = %self.host, "requesting login challenge");
        let challenge = self.exchange(self.http.get(self.login_url.clone())).await?.challenge;

        let response = compute_response(&challenge, self.password.expose_secret());
        let login = self
            .http
            .post(self.login_url.clone())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(format!("response={response}"));
        let info = self.exchange(login).await?;

        if info.sid.is_empty() || info.sid == INVALID_SID {
            warn!(host = %self.host, "login rejected, check the gateway password");
            return Err(AuthError::Rejected {
                host: self.host.clone(),
            });
        }

        info!(host = %self.host, "authenticated");
        Ok(Session::new(info.sid, Instant::now()))
    }

    async fn exchange(&self, request: reqwest::RequestBuilder) -> Result<SessionInfo, AuthError> {
        let url = self.login_url.path().to_string();

        let resp = request.send().await.map_err(|source| AuthError::Transport {
            url: url.clone(),
            source,
        })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AuthError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body = resp.text().await.map_err(|source| AuthError::Transport {
            url: url.clone(),
            source,
        })?;
        let info: SessionInfo =
            quick_xml::de::from_str(&body).map_err(|source| AuthError::Malformed {
                url: url.clone(),
                source,
            })?;

        if info.block_time > 0 {
            warn!(host = %self.host, seconds = info.block_time, "login blocked by gateway");
            return Err(AuthError::Blocked {
                host: self.host.clone(),
                seconds: info.block_time,
            });
        }

        Ok(info)
    }
}

//! Request gate: decides whether an inbound webhook call reaches the
//! command router. Performs no outbound I/O.

use axum::http::{Method, StatusCode};
use tracing::{debug, warn};

use crate::config::Config;
use crate::platform::telegram::RawUpdate;
use crate::platform::Update;

/// Why a request stopped at the gate.
#[derive(Debug)]
pub enum Rejection {
    /// Anything other than POST, e.g. health checks or browsers.
    NotPost,
    /// Path secret missing or wrong.
    Forbidden,
    /// Body is not an update object.
    BadJson(serde_json::Error),
    /// No message or edited message with text.
    NoText,
    /// Sent by a bot account, possibly this one.
    FromBot,
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::Forbidden => StatusCode::FORBIDDEN,
            Rejection::BadJson(_) => StatusCode::BAD_REQUEST,
            Rejection::NotPost | Rejection::NoText | Rejection::FromBot => StatusCode::OK,
        }
    }

    pub fn body(&self) -> &'static str {
        match self {
            Rejection::NotPost => "OK",
            Rejection::Forbidden => "Forbidden",
            Rejection::BadJson(_) => "Bad JSON",
            Rejection::NoText => "No text",
            Rejection::FromBot => "Ignore bot",
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::BadJson(e) => write!(f, "bad JSON: {}", e),
            other => f.write_str(other.body()),
        }
    }
}

/// The second non-empty segment of the request path, if any.
fn path_secret(path: &str) -> Option<&str> {
    path.split('/').filter(|s| !s.is_empty()).nth(1)
}

pub fn validate(
    config: &Config,
    method: &Method,
    path: &str,
    body: &[u8],
) -> Result<Update, Rejection> {
    if method != Method::POST {
        return Err(Rejection::NotPost);
    }

    // Without a configured secret every path is accepted.
    if let Some(secret) = config.webhook_secret() {
        if path_secret(path) != Some(secret) {
            warn!("Rejected webhook call with wrong path secret");
            return Err(Rejection::Forbidden);
        }
    }

    let raw = RawUpdate::parse(body).map_err(Rejection::BadJson)?;

    let update_id = raw.update_id;
    let update = raw.into_update().ok_or_else(|| {
        debug!("Update {:?} carries no text, ignoring", update_id);
        Rejection::NoText
    })?;

    if update.sender_is_bot {
        debug!("Ignoring bot message in chat {}", update.chat_id);
        return Err(Rejection::FromBot);
    }

    Ok(update)
}

//! Error taxonomy for calls against the remote catalog.
//!
//! Everything a caller of the navigator can observe collapses to a single
//! message through [`ApiError::user_message`]. Storage failures never reach
//! this type; they are swallowed by the cache (see [`crate::storage`]).

use crate::pagination::Direction;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Non-2xx status other than 429 (304 included).
    #[error("API request failed with status {status}")]
    Transport { status: u16, body: String },

    /// HTTP 429 from the provider.
    #[error("{message}")]
    RateLimited {
        status: u16,
        body: String,
        message: String,
    },

    /// The local limiter refused the call because today's cap is used up.
    #[error("daily request quota of {limit} exhausted")]
    QuotaExhausted { limit: u32 },

    #[error("no {0} page available")]
    PaginationExhausted(Direction),

    /// Body was not the JSON shape we expected.
    #[error("failed to parse response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(reqwest::Error),

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("page {requested} is past the last page ({last})")]
    PageOutOfRange { requested: u32, last: u32 },
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else if err.is_decode() {
            ApiError::Transport {
                status: err.status().map(|s| s.as_u16()).unwrap_or(200),
                body: err.to_string(),
            }
        } else {
            ApiError::Network(err)
        }
    }
}

impl ApiError {
    pub(crate) fn rate_limited(status: u16, body: String) -> Self {
        let message = match extract_detail(&body) {
            Some(detail) => format!("Rate limit exceeded: {}", detail),
            None => "Rate limit exceeded. Please try again later.".to_string(),
        };
        ApiError::RateLimited {
            status,
            body,
            message,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Transport { status, .. } | ApiError::RateLimited { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// The one-line message shown to the user, falling back to `default`
    /// when nothing more specific can be said.
    pub fn user_message(&self, default: &str) -> String {
        match self {
            ApiError::RateLimited { message, .. } => message.clone(),
            ApiError::Transport { status: 401, .. } => {
                "Authentication failed. The API requires a valid OAuth2 token. Please check your credentials or authenticate via OAuth2.".to_string()
            }
            ApiError::Transport { status: 400, .. } => {
                "Invalid request. Please check your API credentials.".to_string()
            }
            ApiError::Transport { body, .. } => match extract_detail(body) {
                Some(detail) => format!("API Error: {}", detail),
                None => default.to_string(),
            },
            ApiError::QuotaExhausted { limit } => format!(
                "Daily request quota of {} reached. Please try again tomorrow.",
                limit
            ),
            ApiError::Timeout => "The request timed out. Please try again.".to_string(),
            ApiError::PageOutOfRange { last, .. } => {
                format!("There are only {} pages of results.", last)
            }
            _ => default.to_string(),
        }
    }
}

/// Pulls `detail` out of a JSON error body, if there is one.
pub fn extract_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

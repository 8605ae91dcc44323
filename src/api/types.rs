//! API request and response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed response messages.
pub mod messages {
    pub const NOT_FOUND: &str =
        "Sorry, we can't find a secret, it has expired, been deleted or has already been read.";
    pub const EXCEEDED: &str =
        "The passphrase is not valid. You've exceeded the number of tries and the secret has been deleted.";
    pub const CREATED: &str = "Secret successfully created.";
    pub const UNEXPECTED: &str = "An unexpected error has occurred, please try again.";

    pub fn invalid(remaining: u32) -> String {
        format!(
            "Sorry the passphrase is not valid. Number of tries remaining: {}.",
            remaining
        )
    }
}

/// Request to create a new secret.
///
/// Missing `secret` or `passphrase` deserialize as empty and are reported by
/// validation, so every rejection uses the same response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSecretRequest {
    #[serde(default)]
    pub secret: String,

    #[serde(default)]
    pub passphrase: String,

    /// Expiration code such as `1d`. Server default when omitted.
    #[serde(default)]
    pub expire: Option<String>,

    /// Wrong-passphrase attempts allowed. Server default when omitted.
    #[serde(default)]
    pub tries: Option<u32>,

    /// Check the passphrase against Pwned Passwords.
    #[serde(default)]
    pub haveibeenpwned: bool,
}

/// Request to read (and consume) a secret.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadSecretRequest {
    #[serde(default)]
    pub external_id: String,

    #[serde(default)]
    pub passphrase: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Created,
    Success,
    Expired,
    Invalid,
    Error,
}

/// Every body is wrapped as `{"response": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope<T> {
    pub response: T,
}

impl<T> ResponseEnvelope<T> {
    pub fn new(response: T) -> Self {
        Self { response }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedBody {
    pub status: Status,
    pub details: String,
    pub external_id: String,
    /// Page the recipient opens to read the secret
    pub link: String,
    pub expires_at: DateTime<Utc>,
    pub expires_on: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadBody {
    pub status: Status,
    pub msg: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: Status,
    pub details: String,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `ok` or `unavailable`
    pub status: String,

    /// Service version
    pub version: String,

    /// Whether secrets survive a restart
    pub persistent: bool,
}

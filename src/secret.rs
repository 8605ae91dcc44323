//! The persisted secret record and its creation-time parameters.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;

/// Random bytes behind every external id (20 base64url characters).
pub const EXTERNAL_ID_BYTES: usize = 15;

/// Expiration codes a client may pick, shortest first.
pub const EXPIRATION_CODES: [&str; 10] = [
    "10m", "30m", "1h", "3h", "6h", "1d", "2d", "3d", "5d", "7d",
];

pub const DEFAULT_EXPIRATION: &str = "3d";

/// Keeps `created_at + ttl` far from chrono's representable range.
const MAX_EXPIRATION_AMOUNT: u32 = 100_000;

/// Allowed values for the number of read attempts.
pub const READ_TRIES_VALUES: [u32; 3] = [3, 5, 10];

pub const DEFAULT_READ_TRIES: u32 = 5;

/// A relative time-to-live such as `10m`, `3h` or `7d`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirationCode {
    amount: u32,
    unit: ExpirationUnit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpirationUnit {
    Minutes,
    Hours,
    Days,
}

impl ExpirationUnit {
    fn suffix(self) -> char {
        match self {
            Self::Minutes => 'm',
            Self::Hours => 'h',
            Self::Days => 'd',
        }
    }
}

impl ExpirationCode {
    /// The time-to-live as a duration.
    pub fn duration(&self) -> Duration {
        let amount = i64::from(self.amount);
        match self.unit {
            ExpirationUnit::Minutes => Duration::minutes(amount),
            ExpirationUnit::Hours => Duration::hours(amount),
            ExpirationUnit::Days => Duration::days(amount),
        }
    }

    /// Whether this code is one of [`EXPIRATION_CODES`].
    pub fn is_allowed(&self) -> bool {
        let code = self.to_string();
        EXPIRATION_CODES.contains(&code.as_str())
    }

    /// Absolute expiry for a secret created at `from`.
    pub fn expires_at(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        from + self.duration()
    }
}

impl Default for ExpirationCode {
    fn default() -> Self {
        Self {
            amount: 3,
            unit: ExpirationUnit::Days,
        }
    }
}

impl FromStr for ExpirationCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || format!("Invalid expiration code: {:?}", s);

        let unit = match s.chars().last() {
            Some('m') => ExpirationUnit::Minutes,
            Some('h') => ExpirationUnit::Hours,
            Some('d') => ExpirationUnit::Days,
            _ => return Err(invalid()),
        };
        let digits = &s[..s.len() - 1];
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let amount: u32 = digits.parse().map_err(|_| invalid())?;
        if amount == 0 || amount > MAX_EXPIRATION_AMOUNT {
            return Err(invalid());
        }
        Ok(Self { amount, unit })
    }
}

impl fmt::Display for ExpirationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.unit.suffix())
    }
}

/// Whether `tries` is one of [`READ_TRIES_VALUES`].
pub fn is_allowed_tries(tries: u32) -> bool {
    READ_TRIES_VALUES.contains(&tries)
}

/// Generate a fresh URL-safe external id.
pub fn generate_external_id() -> String {
    let mut bytes = [0u8; EXTERNAL_ID_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Human-readable expiry, e.g. `March 04, 2025 at 17:30 UTC`.
pub fn expires_on_text(expires_at: DateTime<Utc>) -> String {
    expires_at.format("%B %d, %Y at %H:%M UTC").to_string()
}

/// A secret about to be inserted; the store assigns its internal id.
#[derive(Clone)]
pub struct NewSecret {
    pub external_id: String,
    pub envelope: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub tries_remaining: u32,
}

/// A stored secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret {
    /// Storage-internal id, never exposed to clients.
    pub id: i64,
    pub external_id: String,
    pub envelope: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub tries_remaining: u32,
}

impl Secret {
    pub fn from_new(id: i64, new: NewSecret) -> Self {
        Self {
            id,
            external_id: new.external_id,
            envelope: new.envelope,
            created_at: new.created_at,
            expires_at: new.expires_at,
            tries_remaining: new.tries_remaining,
        }
    }

    pub fn has_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

// The envelope is opaque and never printed, not even in debug output.
impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("id", &self.id)
            .field("external_id", &self.external_id)
            .field("envelope", &format_args!("<{} bytes>", self.envelope.len()))
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .field("tries_remaining", &self.tries_remaining)
            .finish()
    }
}

impl fmt::Debug for NewSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewSecret")
            .field("external_id", &self.external_id)
            .field("envelope", &format_args!("<{} bytes>", self.envelope.len()))
            .field("expires_at", &self.expires_at)
            .field("tries_remaining", &self.tries_remaining)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_expiration_codes() {
        let code: ExpirationCode = "10m".parse().unwrap();
        assert_eq!(code.duration(), Duration::minutes(10));
        assert_eq!("6h".parse::<ExpirationCode>().unwrap().duration(), Duration::hours(6));
        assert_eq!("7d".parse::<ExpirationCode>().unwrap().duration(), Duration::days(7));
        assert_eq!(code.to_string(), "10m");
    }

    #[test]
    fn test_reject_malformed_codes() {
        for bad in ["", "m", "10", "10s", "-1d", "1.5h", "0d", "d3", "100001d", "99999999999d"] {
            assert!(bad.parse::<ExpirationCode>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn test_allow_list() {
        for code in EXPIRATION_CODES {
            assert!(code.parse::<ExpirationCode>().unwrap().is_allowed());
        }
        assert!(!"4d".parse::<ExpirationCode>().unwrap().is_allowed());
        assert_eq!(DEFAULT_EXPIRATION.parse::<ExpirationCode>().unwrap(), ExpirationCode::default());

        assert!(is_allowed_tries(DEFAULT_READ_TRIES));
        assert!(!is_allowed_tries(4));
        assert!(!is_allowed_tries(0));
    }

    #[test]
    fn test_expires_at() {
        let created = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let code: ExpirationCode = "1d".parse().unwrap();
        let expires = code.expires_at(created);
        assert_eq!(expires, Utc.with_ymd_and_hms(2025, 3, 2, 12, 0, 0).unwrap());
        assert_eq!(expires_on_text(expires), "March 02, 2025 at 12:00 UTC");
    }

    #[test]
    fn test_external_id_shape() {
        let id = generate_external_id();
        assert_eq!(id.len(), 20);
        assert!(id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(id, generate_external_id());
    }

    #[test]
    fn test_debug_hides_envelope() {
        let secret = Secret {
            id: 1,
            external_id: "abc".to_string(),
            envelope: b"opaque-bytes".to_vec(),
            created_at: Utc::now(),
            expires_at: Utc::now(),
            tries_remaining: 3,
        };
        let debug = format!("{:?}", secret);
        assert!(debug.contains("<12 bytes>"));
        assert!(!debug.contains("opaque"));
    }
}

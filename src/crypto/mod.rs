//! Passphrase-based envelope encryption for stored secrets.
//!
//! ## Envelope layout
//!
//! ```text
//! ┌──────────────┬──────────────────────┬──────────────────────────────┐
//! │ salt (16 B)  │ iterations (u32 BE)  │ fernet token (variable)      │
//! └──────────────┴──────────────────────┴──────────────────────────────┘
//! ```
//!
//! The PBKDF2 iteration count travels with the envelope, so the cost of new
//! secrets can be raised without breaking secrets that are already stored.
//! The text form stored by the sqlite backend is the whole blob in padded
//! base64url.

mod envelope;
mod fernet;

pub use envelope::{
    decode_text, derive_key, encode_text, EnvelopeCodec, DEFAULT_ITERATIONS, HEADER_LENGTH,
    SALT_LENGTH,
};

use thiserror::Error;

/// Errors produced by the envelope codec.
///
/// Every failure on the decrypt side collapses into [`CryptoError::InvalidCredential`]:
/// a wrong passphrase, a truncated blob, a bad iteration count and a MAC
/// mismatch are indistinguishable to the caller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid passphrase or corrupted secret")]
    InvalidCredential,

    #[error("Encryption failed: {0}")]
    Encryption(String),
}

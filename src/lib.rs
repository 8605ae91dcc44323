//! # shhh
//!
//! Share secrets through one-time links.
//!
//! A sender encrypts a short message under a passphrase and gets back an
//! opaque external id. The recipient supplies the same passphrase to decrypt
//! it. The secret is deleted after a successful read, after the allowed
//! number of wrong passphrases, or when it expires, whichever comes first.
//!
//! ## Architecture
//!
//! ```text
//!   HTTP (api) ──▶ SecretService (lifecycle) ──▶ SecretStore (store)
//!                        │                             ▲
//!                        ▼                             │
//!                 EnvelopeCodec (crypto)        ExpirySweeper (sweeper)
//! ```
//!
//! ## Modules
//! - `crypto`: PBKDF2 + Fernet envelope codec
//! - `secret`: secret entities, expiration codes and external ids
//! - `store`: repository trait with in-memory and SQLite backends
//! - `lifecycle`: write and read-at-most-once engine
//! - `sweeper`: periodic removal of expired secrets
//! - `validation`: request checks and the breached-password lookup
//! - `api`: HTTP surface

pub mod api;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod lifecycle;
pub mod secret;
pub mod store;
pub mod sweeper;
pub mod util;
pub mod validation;

pub use config::Config;
pub use lifecycle::{ReadOutcome, SecretService, ServiceError, WriteRequest, WriteResult};

//! PBKDF2 key derivation and the self-describing envelope format.

use base64::{engine::general_purpose::URL_SAFE, Engine};
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use super::fernet::{self, KEY_LENGTH};
use super::CryptoError;

/// Salt length in bytes.
pub const SALT_LENGTH: usize = 16;

/// Length of the big-endian iteration count.
const ITERATIONS_LENGTH: usize = 4;

/// Bytes preceding the Fernet token in every envelope.
pub const HEADER_LENGTH: usize = SALT_LENGTH + ITERATIONS_LENGTH;

/// PBKDF2 iterations used for new envelopes unless configured otherwise.
pub const DEFAULT_ITERATIONS: u32 = 100_000;

/// Upper bound accepted when opening; a corrupted header must not pin a
/// blocking thread for minutes.
const MAX_ITERATIONS: u32 = 10_000_000;

/// Derive a Fernet key from a passphrase with PBKDF2-HMAC-SHA256.
pub fn derive_key(passphrase: &str, salt: &[u8], iterations: u32) -> Zeroizing<[u8; KEY_LENGTH]> {
    let mut key = Zeroizing::new([0u8; KEY_LENGTH]);
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, iterations, &mut key[..]);
    key
}

/// Stateless codec turning `(plaintext, passphrase)` into an envelope and back.
///
/// The configured iteration count only affects [`EnvelopeCodec::seal`];
/// [`EnvelopeCodec::open`] always uses the count stored in the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeCodec {
    iterations: u32,
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new(DEFAULT_ITERATIONS)
    }
}

impl EnvelopeCodec {
    pub fn new(iterations: u32) -> Self {
        Self {
            iterations: iterations.clamp(1, MAX_ITERATIONS),
        }
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Encrypt `plaintext` under a key derived from `passphrase` with a fresh salt.
    pub fn seal(&self, plaintext: &[u8], passphrase: &str) -> Result<Vec<u8>, CryptoError> {
        let mut salt = [0u8; SALT_LENGTH];
        rand::thread_rng().fill_bytes(&mut salt);

        let key = derive_key(passphrase, &salt, self.iterations);
        let token = fernet::seal(&key, plaintext)?;

        let mut envelope = Vec::with_capacity(HEADER_LENGTH + token.len());
        envelope.extend_from_slice(&salt);
        envelope.extend_from_slice(&self.iterations.to_be_bytes());
        envelope.extend_from_slice(&token);
        Ok(envelope)
    }

    /// Decrypt an envelope. Every failure is [`CryptoError::InvalidCredential`].
    pub fn open(&self, envelope: &[u8], passphrase: &str) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        if envelope.len() <= HEADER_LENGTH {
            return Err(CryptoError::InvalidCredential);
        }
        let (salt, rest) = envelope.split_at(SALT_LENGTH);
        let (iterations, token) = rest.split_at(ITERATIONS_LENGTH);

        let mut count = [0u8; ITERATIONS_LENGTH];
        count.copy_from_slice(iterations);
        let iterations = u32::from_be_bytes(count);
        if iterations == 0 || iterations > MAX_ITERATIONS {
            return Err(CryptoError::InvalidCredential);
        }

        let key = derive_key(passphrase, salt, iterations);
        fernet::open(&key, token).map(Zeroizing::new)
    }

    /// Decrypt an envelope holding UTF-8 text.
    pub fn open_text(&self, envelope: &[u8], passphrase: &str) -> Result<String, CryptoError> {
        let plaintext = self.open(envelope, passphrase)?;
        String::from_utf8(plaintext.to_vec()).map_err(|_| CryptoError::InvalidCredential)
    }
}

/// Encode an envelope as padded base64url text.
pub fn encode_text(envelope: &[u8]) -> String {
    URL_SAFE.encode(envelope)
}

/// Decode the text form of an envelope.
pub fn decode_text(text: &str) -> Result<Vec<u8>, CryptoError> {
    URL_SAFE
        .decode(text.trim())
        .map_err(|_| CryptoError::InvalidCredential)
}

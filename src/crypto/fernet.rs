//! Fernet tokens (AES-128-CBC + HMAC-SHA-256).
//!
//! Token layout: `0x80 || timestamp (u64 BE) || iv (16) || ciphertext || hmac (32)`.
//! The 32-byte key is split into a signing half and an encryption half.
//!
//! The embedded timestamp is written for format compatibility only and is
//! never checked on open; secret expiry is tracked by the store.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use super::CryptoError;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type HmacSha256 = Hmac<Sha256>;

/// Fernet key length (signing half + encryption half).
pub const KEY_LENGTH: usize = 32;

const VERSION: u8 = 0x80;
const TIMESTAMP_LENGTH: usize = 8;
const IV_LENGTH: usize = 16;
const BLOCK_LENGTH: usize = 16;
const MAC_LENGTH: usize = 32;
const PREFIX_LENGTH: usize = 1 + TIMESTAMP_LENGTH + IV_LENGTH;

/// Smallest well-formed token: prefix, one cipher block, MAC.
const MIN_TOKEN_LENGTH: usize = PREFIX_LENGTH + BLOCK_LENGTH + MAC_LENGTH;

fn split_key(key: &[u8; KEY_LENGTH]) -> (&[u8], &[u8]) {
    key.split_at(KEY_LENGTH / 2)
}

/// Seal `plaintext` into a raw (not base64) Fernet token.
pub fn seal(key: &[u8; KEY_LENGTH], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut iv = [0u8; IV_LENGTH];
    rand::thread_rng().fill_bytes(&mut iv);
    let timestamp = chrono::Utc::now().timestamp().max(0) as u64;
    seal_with(key, plaintext, timestamp, &iv)
}

fn seal_with(
    key: &[u8; KEY_LENGTH],
    plaintext: &[u8],
    timestamp: u64,
    iv: &[u8; IV_LENGTH],
) -> Result<Vec<u8>, CryptoError> {
    let (signing_key, encryption_key) = split_key(key);

    let ciphertext = Aes128CbcEnc::new_from_slices(encryption_key, iv)
        .map_err(|e| CryptoError::Encryption(format!("Failed to create cipher: {}", e)))?
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut token = Vec::with_capacity(PREFIX_LENGTH + ciphertext.len() + MAC_LENGTH);
    token.push(VERSION);
    token.extend_from_slice(&timestamp.to_be_bytes());
    token.extend_from_slice(iv);
    token.extend_from_slice(&ciphertext);

    let mut mac = <HmacSha256 as Mac>::new_from_slice(signing_key)
        .map_err(|e| CryptoError::Encryption(format!("Failed to create MAC: {}", e)))?;
    mac.update(&token);
    token.extend_from_slice(&mac.finalize().into_bytes());

    Ok(token)
}

/// Open a raw Fernet token. The MAC is verified before any decryption.
pub fn open(key: &[u8; KEY_LENGTH], token: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if token.len() < MIN_TOKEN_LENGTH || token[0] != VERSION {
        return Err(CryptoError::InvalidCredential);
    }
    let (signed, tag) = token.split_at(token.len() - MAC_LENGTH);
    let ciphertext = &signed[PREFIX_LENGTH..];
    if ciphertext.len() % BLOCK_LENGTH != 0 {
        return Err(CryptoError::InvalidCredential);
    }

    let (signing_key, encryption_key) = split_key(key);

    let mut mac = <HmacSha256 as Mac>::new_from_slice(signing_key)
        .map_err(|_| CryptoError::InvalidCredential)?;
    mac.update(signed);
    mac.verify_slice(tag)
        .map_err(|_| CryptoError::InvalidCredential)?;

    let iv = &signed[1 + TIMESTAMP_LENGTH..PREFIX_LENGTH];
    Aes128CbcDec::new_from_slices(encryption_key, iv)
        .map_err(|_| CryptoError::InvalidCredential)?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::InvalidCredential)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(fill: u8) -> [u8; KEY_LENGTH] {
        [fill; KEY_LENGTH]
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let token = seal(&key(7), b"hello fernet").unwrap();
        assert_eq!(open(&key(7), &token).unwrap(), b"hello fernet");
    }

    #[test]
    fn test_token_layout() {
        let iv = [9u8; IV_LENGTH];
        let token = seal_with(&key(1), b"0123456789abcdef", 1_500_000_000, &iv).unwrap();

        assert_eq!(token[0], VERSION);
        assert_eq!(&token[1..9], &1_500_000_000u64.to_be_bytes());
        assert_eq!(&token[9..25], &iv);
        // A full block of plaintext gains a full block of PKCS7 padding.
        assert_eq!(token.len(), PREFIX_LENGTH + 32 + MAC_LENGTH);
    }

    #[test]
    fn test_old_timestamp_still_opens() {
        let token = seal_with(&key(2), b"stale", 0, &[0u8; IV_LENGTH]).unwrap();
        assert_eq!(open(&key(2), &token).unwrap(), b"stale");
    }

    #[test]
    fn test_wrong_key_rejected() {
        let token = seal(&key(3), b"payload").unwrap();
        assert_eq!(open(&key(4), &token), Err(CryptoError::InvalidCredential));
    }

    #[test]
    fn test_tampered_token_rejected() {
        let mut token = seal(&key(5), b"payload").unwrap();
        let middle = token.len() / 2;
        token[middle] ^= 0x01;
        assert_eq!(open(&key(5), &token), Err(CryptoError::InvalidCredential));
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        assert_eq!(open(&key(6), &[]), Err(CryptoError::InvalidCredential));

        let mut token = seal(&key(6), b"payload").unwrap();
        token[0] = 0x81;
        assert_eq!(open(&key(6), &token), Err(CryptoError::InvalidCredential));

        let token = seal(&key(6), b"payload").unwrap();
        assert_eq!(
            open(&key(6), &token[..MIN_TOKEN_LENGTH - 1]),
            Err(CryptoError::InvalidCredential)
        );
    }
}

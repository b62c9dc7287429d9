//! Fernet tokens: AES-128-CBC encryption with an HMAC-SHA256 tag and a
//! creation timestamp, carried as url-safe base64 text.
//!
//! Token layout before encoding:
//!
//! ```text
//! 0x80 | timestamp (u64 BE) | iv (16) | ciphertext (n * 16) | hmac (32)
//! ```

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ::aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{Error, Result};

type Aes128CbcEnc = cbc::Encryptor<::aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<::aes::Aes128>;
type HmacSha256 = Hmac<Sha256>;

pub type Key = [u8; 16];
pub type IV = [u8; 16];

const VERSION: u8 = 0x80;
const HEADER_LEN: usize = 1 + 8 + 16;
const TAG_LEN: usize = 32;
const BLOCK_LEN: usize = 16;

/// Tokens stamped further than this into the future are rejected.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(60);

/// Default freshness window for decrypted tokens.
pub const DEFAULT_TTL: Duration = Duration::from_secs(120);

/// Pre-shared symmetric key, shared read-only by every session.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Fernet {
    signing_key: Key,
    encryption_key: Key,
    #[zeroize(skip)]
    ttl: Option<Duration>,
}

impl Fernet {
    /// Build from a url-safe base64 encoded 32-byte key.
    pub fn new(key: &str) -> Result<Self> {
        let mut raw = URL_SAFE
            .decode(key.trim())
            .map_err(|_| Error::config("key is not url-safe base64"))?;
        if raw.len() != 32 {
            let len = raw.len();
            raw.zeroize();
            return Err(Error::config(format!("key must be 32 bytes, got {len}")));
        }

        let mut signing_key = [0u8; 16];
        let mut encryption_key = [0u8; 16];
        signing_key.copy_from_slice(&raw[..16]);
        encryption_key.copy_from_slice(&raw[16..]);
        raw.zeroize();

        Ok(Self {
            signing_key,
            encryption_key,
            ttl: Some(DEFAULT_TTL),
        })
    }

    /// A fresh random key in the textual form accepted by [`Fernet::new`].
    pub fn generate_key() -> String {
        let mut key = [0u8; 32];
        rand::thread_rng().fill(&mut key[..]);
        let encoded = URL_SAFE.encode(key);
        key.zeroize();
        encoded
    }

    /// Set the freshness window; `None` accepts tokens of any age.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut iv = [0u8; 16];
        rand::thread_rng().fill(&mut iv[..]);
        self.encrypt_with(data, unix_now(), iv)
    }

    pub fn decrypt(&self, token: &[u8]) -> Result<Vec<u8>> {
        self.decrypt_at(token, unix_now())
    }

    /// Encrypt as if the current unix time were `now`.
    pub fn encrypt_at(&self, data: &[u8], now: u64) -> Result<Vec<u8>> {
        let mut iv = [0u8; 16];
        rand::thread_rng().fill(&mut iv[..]);
        self.encrypt_with(data, now, iv)
    }

    /// Decrypt as if the current unix time were `now`.
    pub fn decrypt_at(&self, token: &[u8], now: u64) -> Result<Vec<u8>> {
        let raw = URL_SAFE
            .decode(token)
            .map_err(|_| Error::crypto("token is not url-safe base64"))?;

        if raw.len() < HEADER_LEN + BLOCK_LEN + TAG_LEN
            || (raw.len() - HEADER_LEN - TAG_LEN) % BLOCK_LEN != 0
        {
            return Err(Error::crypto("token has an invalid length"));
        }
        if raw[0] != VERSION {
            return Err(Error::crypto("unknown token version"));
        }

        let mut stamp = [0u8; 8];
        stamp.copy_from_slice(&raw[1..9]);
        let timestamp = u64::from_be_bytes(stamp);

        if let Some(ttl) = self.ttl {
            if timestamp.saturating_add(ttl.as_secs()) < now {
                return Err(Error::crypto("token has expired"));
            }
        }
        if now.saturating_add(MAX_CLOCK_SKEW.as_secs()) < timestamp {
            return Err(Error::crypto("token timestamp is in the future"));
        }

        let (signed, tag) = raw.split_at(raw.len() - TAG_LEN);
        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .map_err(|_| Error::crypto("invalid signing key"))?;
        mac.update(signed);
        mac.verify_slice(tag)
            .map_err(|_| Error::crypto("token signature mismatch"))?;

        let iv: &IV = signed[9..HEADER_LEN]
            .try_into()
            .map_err(|_| Error::crypto("token has an invalid iv"))?;
        let ciphertext = &signed[HEADER_LEN..];

        let dec = Aes128CbcDec::new((&self.encryption_key).into(), iv.into());
        let mut buf = vec![0; ciphertext.len()];
        let len = dec
            .decrypt_padded_b2b_mut::<Pkcs7>(ciphertext, &mut buf)
            .map_err(|_| Error::crypto("token has invalid padding"))?
            .len();
        buf.truncate(len);
        Ok(buf)
    }

    fn encrypt_with(&self, data: &[u8], now: u64, iv: IV) -> Result<Vec<u8>> {
        let enc = Aes128CbcEnc::new((&self.encryption_key).into(), (&iv).into());

        let mut buf = vec![0; data.len() + BLOCK_LEN];
        let ciphertext = enc
            .encrypt_padded_b2b_mut::<Pkcs7>(data, &mut buf)
            .map_err(|_| Error::crypto("padding buffer too small"))?;

        let mut raw = Vec::with_capacity(HEADER_LEN + ciphertext.len() + TAG_LEN);
        raw.push(VERSION);
        raw.extend_from_slice(&now.to_be_bytes());
        raw.extend_from_slice(&iv);
        raw.extend_from_slice(ciphertext);

        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .map_err(|_| Error::crypto("invalid signing key"))?;
        mac.update(&raw);
        raw.extend_from_slice(&mac.finalize().into_bytes());

        Ok(URL_SAFE.encode(raw).into_bytes())
    }
}

impl std::fmt::Debug for Fernet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fernet")
            .field("key", &"<redacted>")
            .field("ttl", &self.ttl)
            .finish()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

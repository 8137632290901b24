//! Authenticated encryption of configuration values.
//!
//! Uses ChaCha20-Poly1305 with a fresh random 96-bit nonce per value. A token
//! is URL-safe base64 (no padding) of `nonce || ciphertext || tag`, so any
//! modification of the stored string fails authentication on decrypt.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as TOKEN_B64, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use serde::Serialize;
use thiserror::Error;
use zeroize::Zeroizing;

/// Length of the symmetric key in bytes.
pub const KEY_LEN: usize = 32;

/// Length of the ChaCha20-Poly1305 nonce in bytes.
pub const NONCE_LEN: usize = 12;

/// Characters left visible by [`mask_default`].
pub const DEFAULT_VISIBLE_CHARS: usize = 4;

const SELF_TEST_SENTINEL: &str = "security_validation_test";

/// Cipher errors
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("Encryption system unavailable - no key was provisioned")]
    Unavailable,

    #[error("Encryption failed")]
    EncryptFailed,

    #[error("Decryption failed - invalid ciphertext or wrong key")]
    DecryptFailed,

    #[error("Invalid ciphertext encoding: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("Ciphertext too short")]
    Truncated,

    #[error("Decrypted value is not valid UTF-8")]
    Utf8,
}

impl CipherError {
    /// True when no key exists at all, as opposed to an operation failing.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable)
    }
}

/// Result type for cipher operations
pub type CipherResult<T> = Result<T, CipherError>;

/// A 32-byte symmetric key.
///
/// Lives only in process memory and is zeroized on drop.
#[derive(Clone)]
pub struct EncryptionKey(Zeroizing<[u8; KEY_LEN]>);

impl EncryptionKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Returns `None` unless `bytes` is exactly [`KEY_LEN`] long.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; KEY_LEN] = bytes.try_into().ok()?;
        Some(Self::from_bytes(arr))
    }

    /// Fresh key from the OS RNG.
    pub fn generate() -> Self {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(key.as_mut());
        Self(key)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// How the process key was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    Base64,
    Hex,
    Pbkdf2,
    /// Random key generated for this process only.
    Ephemeral,
    Unavailable,
}

impl KeySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Base64 => "base64",
            Self::Hex => "hex",
            Self::Pbkdf2 => "pbkdf2",
            Self::Ephemeral => "ephemeral",
            Self::Unavailable => "unavailable",
        }
    }

    pub fn is_ephemeral(&self) -> bool {
        matches!(self, Self::Ephemeral)
    }
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Encrypts and decrypts configuration values with the process key.
///
/// Constructed once at startup and shared read-only. A box built with
/// [`CipherBox::unavailable`] refuses every operation.
#[derive(Clone)]
pub struct CipherBox {
    cipher: Option<ChaCha20Poly1305>,
    source: KeySource,
}

impl CipherBox {
    pub fn new(key: &EncryptionKey, source: KeySource) -> Self {
        Self {
            cipher: Some(ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()))),
            source,
        }
    }

    /// A cipher with no key. Every encrypt/decrypt returns [`CipherError::Unavailable`].
    pub fn unavailable() -> Self {
        Self {
            cipher: None,
            source: KeySource::Unavailable,
        }
    }

    pub fn is_available(&self) -> bool {
        self.cipher.is_some()
    }

    pub fn key_source(&self) -> KeySource {
        self.source
    }

    /// Encrypt a UTF-8 string into a token.
    ///
    /// The empty string maps to the empty string without touching the cipher.
    pub fn encrypt(&self, plaintext: &str) -> CipherResult<String> {
        let cipher = self.cipher.as_ref().ok_or(CipherError::Unavailable)?;
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::EncryptFailed)?;

        let mut token = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        token.extend_from_slice(&nonce_bytes);
        token.extend_from_slice(&ciphertext);
        Ok(TOKEN_B64.encode(token))
    }

    /// Decrypt a token produced by [`CipherBox::encrypt`].
    pub fn decrypt(&self, token: &str) -> CipherResult<String> {
        let cipher = self.cipher.as_ref().ok_or(CipherError::Unavailable)?;
        if token.is_empty() {
            return Ok(String::new());
        }

        let raw = TOKEN_B64.decode(token)?;
        if raw.len() <= NONCE_LEN {
            return Err(CipherError::Truncated);
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);

        let plaintext = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
                .map_err(|_| CipherError::DecryptFailed)?,
        );

        String::from_utf8(plaintext.to_vec()).map_err(|_| CipherError::Utf8)
    }

    /// Encrypt a fixed sentinel and check it decrypts back unchanged.
    pub fn self_test(&self) -> bool {
        match self.encrypt(SELF_TEST_SENTINEL) {
            Ok(token) if token != SELF_TEST_SENTINEL => {
                matches!(self.decrypt(&token), Ok(ref p) if p == SELF_TEST_SENTINEL)
            }
            _ => false,
        }
    }
}

impl std::fmt::Debug for CipherBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherBox")
            .field("available", &self.is_available())
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Mask a secret for display.
///
/// Keeps the first `visible` characters and replaces the rest with `*`. Values
/// of `visible` characters or fewer are masked entirely. The asterisk count
/// still reveals the length.
pub fn mask(value: &str, visible: usize) -> String {
    let len = value.chars().count();
    if len <= visible {
        return "*".repeat(len);
    }
    let mut masked: String = value.chars().take(visible).collect();
    masked.push_str(&"*".repeat(len - visible));
    masked
}

/// [`mask`] with [`DEFAULT_VISIBLE_CHARS`].
pub fn mask_default(value: &str) -> String {
    mask(value, DEFAULT_VISIBLE_CHARS)
}

//! Resolution of the process encryption key.
//!
//! Runs once at startup. The raw key material comes from `ENCRYPTION_KEY`; it
//! is checked for strength and then offered to each decoder in [`DECODERS`].
//! The first decoder whose key passes [`CipherBox::self_test`] wins.
//!
//! Failure handling depends on the environment:
//! - production: any failure is fatal ([`KeyError`]), nothing may start
//! - elsewhere: a random per-process key is substituted when the ephemeral
//!   fallback is allowed, otherwise the cipher is left unavailable and every
//!   sensitive write is refused

use base64::{
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD},
    Engine,
};
use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use thiserror::Error;
use tracing::{error, info, warn};
use zeroize::Zeroizing;

use super::cipher::{CipherBox, EncryptionKey, KeySource, KEY_LEN};
use crate::config::SecurityConfig;

/// Minimum accepted length of the key material, in characters.
pub const MIN_KEY_MATERIAL_LEN: usize = 32;

/// PBKDF2-HMAC-SHA256 iteration count for password-style material.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

const PBKDF2_SALT_LEN: usize = 16;

/// Longest tolerated run of one repeated character or of consecutive digits.
const MAX_RUN: usize = 5;

const WEAK_SUBSTRINGS: &[&str] = &[
    "password", "changeme", "secret", "qwerty", "letmein", "default",
];

/// Startup key errors
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("ENCRYPTION_KEY is required in production but was not configured")]
    Missing,

    #[error("ENCRYPTION_KEY rejected: {0}")]
    Weak(#[from] StrengthError),

    #[error("ENCRYPTION_KEY could not be interpreted as a working key")]
    Undecodable,
}

/// Reasons key material fails the strength policy.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StrengthError {
    #[error("too short ({len} characters, minimum {min})")]
    TooShort { len: usize, min: usize },

    #[error("only alphabetic characters")]
    AllAlphabetic,

    #[error("more than 25% padding characters")]
    TooMuchPadding,

    #[error("contains a long run of a repeated character")]
    RepeatedRun,

    #[error("contains a long run of sequential digits")]
    SequentialDigits,

    #[error("contains a common weak pattern")]
    WeakSubstring,
}

/// Everything the provisioner needs, lifted out of the loaded configuration.
#[derive(Clone)]
pub struct KeyInput {
    pub material: Option<String>,
    pub production: bool,
    pub allow_ephemeral: bool,
}

impl KeyInput {
    pub fn from_config(security: &SecurityConfig) -> Self {
        Self {
            material: security.encryption_key.clone(),
            production: security.is_production(),
            allow_ephemeral: security.ephemeral_fallback_allowed(),
        }
    }
}

impl std::fmt::Debug for KeyInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyInput")
            .field("material", &self.material.as_ref().map(|_| "<redacted>"))
            .field("production", &self.production)
            .field("allow_ephemeral", &self.allow_ephemeral)
            .finish()
    }
}

/// A pure interpretation of key material.
pub type Decoder = fn(&str) -> Option<EncryptionKey>;

/// Decoders in the order they are tried.
pub const DECODERS: [(KeySource, Decoder); 3] = [
    (KeySource::Base64, decode_base64),
    (KeySource::Hex, decode_hex),
    (KeySource::Pbkdf2, derive_pbkdf2),
];

/// Base64 (URL-safe or standard, padded or not) of exactly 32 bytes.
pub fn decode_base64(material: &str) -> Option<EncryptionKey> {
    [&URL_SAFE, &STANDARD, &URL_SAFE_NO_PAD, &STANDARD_NO_PAD]
        .iter()
        .filter_map(|engine| engine.decode(material).ok())
        .find_map(|bytes| {
            let bytes = Zeroizing::new(bytes);
            EncryptionKey::from_slice(&bytes)
        })
}

/// Hex, optionally `0x`-prefixed and space separated; the first 64 digits are used.
pub fn decode_hex(material: &str) -> Option<EncryptionKey> {
    let cleaned: Zeroizing<String> = Zeroizing::new(
        material
            .trim_start_matches("0x")
            .chars()
            .filter(|c| *c != ' ')
            .collect(),
    );
    if cleaned.len() < KEY_LEN * 2 || !cleaned.is_char_boundary(KEY_LEN * 2) {
        return None;
    }
    let bytes = Zeroizing::new(hex::decode(&cleaned[..KEY_LEN * 2]).ok()?);
    EncryptionKey::from_slice(&bytes)
}

/// PBKDF2-HMAC-SHA256 over the material.
///
/// The salt is the first 16 bytes of the material, right-padded with `'0'`, so
/// the same material always yields the same key.
pub fn derive_pbkdf2(material: &str) -> Option<EncryptionKey> {
    let mut salt = [b'0'; PBKDF2_SALT_LEN];
    let prefix = &material.as_bytes()[..material.len().min(PBKDF2_SALT_LEN)];
    salt[..prefix.len()].copy_from_slice(prefix);

    let mut out = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2_hmac::<Sha256>(material.as_bytes(), &salt, PBKDF2_ITERATIONS, out.as_mut());
    Some(EncryptionKey::from_bytes(*out))
}

/// Strength policy applied to key material before any decoding.
pub fn check_strength(material: &str) -> Result<(), StrengthError> {
    let chars: Vec<char> = material.chars().collect();
    if chars.len() < MIN_KEY_MATERIAL_LEN {
        return Err(StrengthError::TooShort {
            len: chars.len(),
            min: MIN_KEY_MATERIAL_LEN,
        });
    }
    if chars.iter().all(|c| c.is_alphabetic()) {
        return Err(StrengthError::AllAlphabetic);
    }
    let padding = chars.iter().filter(|c| **c == '=').count();
    if padding * 4 > chars.len() {
        return Err(StrengthError::TooMuchPadding);
    }
    if longest_run(&chars, |a, b| a == b) > MAX_RUN {
        return Err(StrengthError::RepeatedRun);
    }
    let ascending = |a: char, b: char| {
        a.is_ascii_digit() && b.is_ascii_digit() && b as u8 == a as u8 + 1
    };
    let descending = |a: char, b: char| {
        a.is_ascii_digit() && b.is_ascii_digit() && a as u8 == b as u8 + 1
    };
    if longest_run(&chars, ascending) > MAX_RUN || longest_run(&chars, descending) > MAX_RUN {
        return Err(StrengthError::SequentialDigits);
    }
    let lowered = material.to_lowercase();
    if WEAK_SUBSTRINGS.iter().any(|weak| lowered.contains(weak)) {
        return Err(StrengthError::WeakSubstring);
    }
    Ok(())
}

/// Length of the longest stretch where every adjacent pair satisfies `linked`.
fn longest_run(chars: &[char], linked: impl Fn(char, char) -> bool) -> usize {
    if chars.is_empty() {
        return 0;
    }
    let mut best = 1;
    let mut current = 1;
    for pair in chars.windows(2) {
        if linked(pair[0], pair[1]) {
            current += 1;
            best = best.max(current);
        } else {
            current = 1;
        }
    }
    best
}

/// Check strength, then try each decoder until one yields a working cipher.
pub fn interpret(material: &str) -> Result<CipherBox, KeyError> {
    check_strength(material)?;
    DECODERS
        .iter()
        .filter_map(|(source, decode)| decode(material).map(|key| CipherBox::new(&key, *source)))
        .find(CipherBox::self_test)
        .ok_or(KeyError::Undecodable)
}

/// Turns configured key material into the process [`CipherBox`].
pub struct KeyProvisioner;

impl KeyProvisioner {
    /// Resolve the process cipher. Logs exactly one initialization line.
    ///
    /// Returns `Err` only in production; outside production failures degrade
    /// to an ephemeral key or an unavailable cipher.
    pub fn resolve(input: &KeyInput) -> Result<CipherBox, KeyError> {
        let material = input
            .material
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty());

        let outcome = match material {
            Some(material) => interpret(material),
            None => Err(KeyError::Missing),
        };

        match outcome {
            Ok(cipher) => {
                info!(
                    key_source = cipher.key_source().as_str(),
                    production = input.production,
                    "Encryption initialized"
                );
                Ok(cipher)
            }
            Err(e) if input.production => {
                error!(error = %e, production = true, "Encryption initialization failed, refusing to start");
                Err(e)
            }
            Err(e) if input.allow_ephemeral => {
                let cipher = CipherBox::new(&EncryptionKey::generate(), KeySource::Ephemeral);
                if cipher.self_test() {
                    warn!(
                        key_source = KeySource::Ephemeral.as_str(),
                        error = %e,
                        "EPHEMERAL KEY in use: values encrypted now are unreadable after restart. Configure ENCRYPTION_KEY"
                    );
                    Ok(cipher)
                } else {
                    error!(
                        key_source = KeySource::Unavailable.as_str(),
                        error = %e,
                        "Ephemeral key failed self-test, encryption unavailable"
                    );
                    Ok(CipherBox::unavailable())
                }
            }
            Err(e) => {
                warn!(
                    key_source = KeySource::Unavailable.as_str(),
                    error = %e,
                    "Encryption unavailable: sensitive settings cannot be saved"
                );
                Ok(CipherBox::unavailable())
            }
        }
    }
}

/// Fresh key material for operators: URL-safe base64 of 32 random bytes.
///
/// The result always passes [`check_strength`] and decodes via [`decode_base64`].
pub fn generate_key_material() -> String {
    loop {
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(bytes.as_mut());
        let material = URL_SAFE.encode(&bytes[..]);
        if check_strength(&material).is_ok() {
            return material;
        }
    }
}

//! Encryption of sensitive settings.
//!
//! - [`key`] resolves the single process key from `ENCRYPTION_KEY`
//! - [`cipher`] wraps it in a [`CipherBox`] for authenticated encryption
//!   (ChaCha20-Poly1305) and provides display masking
//!
//! The key is resolved once by the bootstrap and the resulting `CipherBox` is
//! passed explicitly to whatever needs it. There is no global cipher.

pub mod cipher;
pub mod key;

pub use cipher::{
    mask, mask_default, CipherBox, CipherError, CipherResult, EncryptionKey, KeySource,
};
pub use key::{generate_key_material, KeyError, KeyInput, KeyProvisioner, StrengthError};

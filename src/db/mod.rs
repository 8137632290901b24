pub mod error;
pub mod models;
pub mod queries;

pub use error::{StoreError, StoreResult, PLAINTEXT_BLOCK_MARKER};
pub use models::*;
pub use queries::*;

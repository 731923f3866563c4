//! Storage abstraction for portier.
//!
//! Backend crates (e.g., portier-store-sqlite) implement [`Store`] so the server and the
//! queue workers don't depend on any specific database engine or schema details.

mod clock;
mod store;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
#[cfg(feature = "test-support")]
pub use store::MockStore;
pub use store::Store;
pub use types::*;

use thiserror::Error;

/// Uniform error type for all storage backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("conflict")]
    Conflict,
    #[error("backend error: {0}")]
    Backend(String),
}

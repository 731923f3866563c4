//! Type definitions for portier storage.

mod ids;
mod sessions;
mod tokens;
mod users;

pub use ids::*;
pub use sessions::*;
pub use tokens::*;
pub use users::*;

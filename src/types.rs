//! Re-exported types from external crates for convenience.
//!
//! These types appear in public signatures of this crate and are re-exported here
//! so users don't need to add these dependencies to their `Cargo.toml`.

/// Date and time types for message timestamps and REST responses.
pub use chrono::{DateTime, Utc};
/// Parsed endpoint URLs.
pub use url::Url;
/// Message identifiers.
pub use uuid::Uuid;

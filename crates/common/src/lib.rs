//! Traffic Color Common Library
//!
//! Shared domain types and the vector tile decoder used by the
//! traffic color E2E suite.

pub mod error;
pub mod tile;
pub mod types;

pub use error::{Error, Result};
pub use tile::{decode_colors, decode_tile, VectorTile};
pub use types::*;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

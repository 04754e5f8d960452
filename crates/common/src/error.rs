//! Error types for the traffic color suite

use thiserror::Error;

/// Result type alias using the common Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by shared types and the tile decoder
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tile decode error: {0}")]
    TileDecode(#[from] prost::DecodeError),

    #[error("Invalid zoom level {0} (expected 0..={max})", max = crate::types::MAX_ZOOM)]
    InvalidZoom(i64),

    #[error("Invalid map center: {0}")]
    InvalidCenter(String),

    #[error("Unknown traffic color code: {0}")]
    UnknownColor(i64),
}

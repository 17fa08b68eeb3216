use thiserror::Error;

use crate::LayerId;

/// Why a tile ended in the `Failed` state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ImageryError {
    #[error("imagery fetch failed: {0}")]
    Fetch(String),
    #[error("imagery decode failed: {0}")]
    Decode(String),
    #[error("imagery texture upload failed: {0}")]
    Upload(String),
    #[error("provider has no image for tile {level}/{x}/{y}")]
    NotAvailable { level: u32, x: u32, y: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum LayerCollectionError {
    #[error("index {index} is out of bounds for a collection of {len} layers")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error("layer {0:?} is not in the collection")]
    NotFound(LayerId),
}

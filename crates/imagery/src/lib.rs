//! Imagery tiles: the per-layer tile cache, its load pipeline and the ordered layer collection.
//!
//! The render thread owns every type here. Slow work (fetch, decode, upload, GPU passes) happens in
//! an [`ImageryBackend`], which reports back through a [`CompletionSink`]; completions are applied
//! at the start of [`LayerCollection::update_imagery`].

mod backend;
mod collection;
mod error;
mod imagery;
mod layer;
mod provider;
mod tiling;

pub use backend::{
    CompletionSink, Dispatch, ImageryBackend, ImageryCompletion, ImageryTicket, QueuedReprojection,
    StepOutput,
};
pub use collection::{CollectionEvent, LayerCollection, ShowChange};
pub use error::{ImageryError, LayerCollectionError};
pub use imagery::{Imagery, ImageryId, ImageryState, ImageryStep, TileKey};
pub use layer::{ImageryLayer, LayerId};
pub use provider::{ImageryProvider, ImageryRequest, ReadyFlag, UrlTemplateImageryProvider};
pub use tiling::{GeographicTilingScheme, MAXIMUM_LEVEL, TilingScheme, WebMercatorTilingScheme};

#[cfg(test)]
mod tests;

use thiserror::Error;

use crate::ConfigError;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GlobeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("http transport setup failed: {0}")]
    Transport(#[from] fetch::FetchError),
    #[error("fetch queue setup failed: {0}")]
    Queue(#[from] fetch::QueueError),
    #[error("failed to spawn imagery decode worker")]
    DecodeWorker(#[source] std::io::Error),
    #[error(transparent)]
    Layers(#[from] imagery::LayerCollectionError),
    #[error("graphics device was lost")]
    DeviceLost,
}

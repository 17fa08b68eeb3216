use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum FetchError {
    #[error("invalid url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("invalid header `{name}`: {reason}")]
    InvalidHeader { name: String, reason: String },
    #[error("request to `{url}` timed out")]
    Timeout { url: String },
    #[error("request to `{url}` returned status {status}")]
    Status { url: String, status: u16 },
    #[error("transfer from `{url}` failed: {message}")]
    Transport { url: String, message: String },
    #[error("http client setup failed: {message}")]
    ClientSetup { message: String },
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QueueError {
    #[error("fetch queue needs at least one worker")]
    ZeroWorkers,
    #[error("fetch queue capacity must be positive")]
    ZeroCapacity,
    #[error("fetch queue is full")]
    Full,
    #[error("fetch queue is shut down")]
    Closed,
    #[error("failed to spawn fetch worker")]
    Spawn(#[source] std::io::Error),
}

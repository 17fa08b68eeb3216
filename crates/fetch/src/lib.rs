//! Cancellable byte fetches run on a bounded worker pool.
//!
//! A [`FetchOperation`] is a shared handle: the submitting thread keeps one copy to cancel or wait,
//! the worker that picks it up runs [`FetchOperation::start`] against a [`Transport`].

mod error;
mod http;
mod operation;
mod queue;
mod transport;

pub use error::{FetchError, QueueError};
pub use http::{HttpTransport, HttpTransportConfig};
pub use operation::{FetchOperation, FetchOutcome};
pub use queue::{FetchQueue, FetchQueueConfig};
pub use transport::{FetchRequest, TransferStream, Transport};

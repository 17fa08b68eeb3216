use reqwest::Url;
use reqwest::header::HeaderMap;

use crate::FetchError;

/// A fully resolved request: query parameters already encoded into `url`.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: Url,
    pub headers: HeaderMap,
}

/// Opens one streaming transfer per request.
pub trait Transport: Send + Sync {
    fn open(&self, request: &FetchRequest) -> Result<Box<dyn TransferStream>, FetchError>;
}

pub trait TransferStream: Send {
    /// Declared body length, if the server sent one.
    fn content_length(&self) -> Option<u64>;

    /// Fills `buffer` with the next chunk and returns its length; `Ok(0)` ends the transfer.
    fn read_chunk(&mut self, buffer: &mut [u8]) -> Result<usize, FetchError>;
}

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use reqwest::Url;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::{FetchError, FetchQueue, FetchRequest, QueueError, Transport};

const CHUNK_SIZE: usize = 16 * 1024;
// Declared lengths beyond this are not trusted for pre-sizing.
const MAX_PRESIZE: u64 = 64 * 1024 * 1024;

/// How an operation finished, handed to the completion callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Completed(Vec<u8>),
    Cancelled,
    Failed { error: FetchError, partial: Vec<u8> },
}

type DataCallback = Box<dyn FnMut(&[u8]) + Send>;
type CompleteCallback = Box<dyn FnOnce(FetchOutcome) + Send>;

#[derive(Default)]
struct TransferState {
    data: Vec<u8>,
    error: Option<FetchError>,
    started: bool,
    finished: bool,
}

#[derive(Default)]
struct Callbacks {
    on_data: Option<DataCallback>,
    on_complete: Option<CompleteCallback>,
}

struct Shared {
    url: String,
    headers: BTreeMap<String, String>,
    params: BTreeMap<String, String>,
    cancelled: AtomicBool,
    state: Mutex<TransferState>,
    finished: Condvar,
    callbacks: Mutex<Callbacks>,
}

/// Shared handle to one fetch. Clones observe and control the same transfer.
#[derive(Clone)]
pub struct FetchOperation {
    shared: Arc<Shared>,
}

impl fmt::Debug for FetchOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchOperation")
            .field("url", &self.shared.url)
            .field("cancelled", &self.is_cancelled())
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl FetchOperation {
    pub fn new(
        url: impl Into<String>,
        headers: Option<BTreeMap<String, String>>,
        params: Option<BTreeMap<String, String>>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                url: url.into(),
                headers: headers.unwrap_or_default(),
                params: params.unwrap_or_default(),
                cancelled: AtomicBool::new(false),
                state: Mutex::new(TransferState::default()),
                finished: Condvar::new(),
                callbacks: Mutex::new(Callbacks::default()),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// Called with every chunk appended to the buffer, on the worker thread.
    pub fn on_data(&self, callback: impl FnMut(&[u8]) + Send + 'static) {
        lock(&self.shared.callbacks).on_data = Some(Box::new(callback));
    }

    /// Called once after the operation finishes. Fires immediately if it already has.
    pub fn on_complete(&self, callback: impl FnOnce(FetchOutcome) + Send + 'static) {
        let state = lock(&self.shared.state);
        if state.finished {
            let outcome = self.outcome(&state);
            drop(state);
            callback(outcome);
            return;
        }
        lock(&self.shared.callbacks).on_complete = Some(Box::new(callback));
    }

    pub fn enqueue(&self, queue: &FetchQueue) -> Result<(), QueueError> {
        queue.submit(self.clone())
    }

    /// Stops the transfer at the next chunk boundary and drops the bytes received so far.
    /// A finished operation keeps its data.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::Release);
        let mut state = lock(&self.shared.state);
        if !state.finished {
            state.data = Vec::new();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        lock(&self.shared.state).finished
    }

    pub fn error(&self) -> Option<FetchError> {
        lock(&self.shared.state).error.clone()
    }

    /// Snapshot of the bytes received so far.
    pub fn data(&self) -> Vec<u8> {
        lock(&self.shared.state).data.clone()
    }

    /// Blocks until the operation finishes.
    pub fn wait(&self) {
        let mut state = lock(&self.shared.state);
        while !state.finished {
            state = self
                .shared
                .finished
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Returns whether the operation finished within `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let state = lock(&self.shared.state);
        let (state, _) = self
            .shared
            .finished
            .wait_timeout_while(state, timeout, |state| !state.finished)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.finished
    }

    /// Runs the transfer to completion on the calling thread.
    pub fn start(&self, transport: &dyn Transport) {
        {
            let mut state = lock(&self.shared.state);
            if state.started || state.finished {
                tracing::debug!(url = %self.shared.url, "fetch already started, ignoring start");
                return;
            }
            state.started = true;
        }

        if self.is_cancelled() {
            tracing::trace!(url = %self.shared.url, "fetch cancelled before start");
            self.finish(None);
            return;
        }

        let request = match self.build_request() {
            Ok(request) => request,
            Err(error) => {
                self.finish(Some(error));
                return;
            }
        };

        let mut stream = match transport.open(&request) {
            Ok(stream) => stream,
            Err(error) => {
                self.finish(Some(error));
                return;
            }
        };

        if let Some(length) = stream.content_length() {
            lock(&self.shared.state)
                .data
                .reserve(length.min(MAX_PRESIZE) as usize);
        }

        let mut chunk = vec![0; CHUNK_SIZE];
        loop {
            if self.is_cancelled() {
                tracing::debug!(url = %self.shared.url, "fetch cancelled mid-transfer");
                self.finish(None);
                return;
            }
            match stream.read_chunk(&mut chunk) {
                Ok(0) => break,
                Ok(read) => {
                    {
                        // `cancel` clears the buffer under this lock.
                        let mut state = lock(&self.shared.state);
                        if self.is_cancelled() {
                            continue;
                        }
                        state.data.extend_from_slice(&chunk[..read]);
                    }
                    if let Some(on_data) = lock(&self.shared.callbacks).on_data.as_mut() {
                        on_data(&chunk[..read]);
                    }
                }
                Err(error) => {
                    self.finish(Some(error));
                    return;
                }
            }
        }
        self.finish(None);
    }

    fn build_request(&self) -> Result<FetchRequest, FetchError> {
        let invalid_url = |reason: String| FetchError::InvalidUrl {
            url: self.shared.url.clone(),
            reason,
        };
        let mut url = Url::parse(&self.shared.url).map_err(|error| invalid_url(error.to_string()))?;
        if !self.shared.params.is_empty() {
            if url.cannot_be_a_base() {
                return Err(invalid_url("url cannot carry query parameters".to_owned()));
            }
            url.query_pairs_mut().extend_pairs(&self.shared.params);
        }

        let mut headers = HeaderMap::with_capacity(self.shared.headers.len());
        for (name, value) in &self.shared.headers {
            let invalid_header = |reason: String| FetchError::InvalidHeader {
                name: name.clone(),
                reason,
            };
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|error| invalid_header(error.to_string()))?;
            let header_value =
                HeaderValue::from_str(value).map_err(|error| invalid_header(error.to_string()))?;
            headers.insert(header_name, header_value);
        }
        Ok(FetchRequest { url, headers })
    }

    fn finish(&self, error: Option<FetchError>) {
        let outcome = {
            let mut state = lock(&self.shared.state);
            if state.finished {
                return;
            }
            if let Some(error) = &error {
                tracing::warn!(url = %self.shared.url, %error, received = state.data.len(), "fetch failed");
            }
            state.error = error;
            state.finished = true;
            self.outcome(&state)
        };
        self.shared.finished.notify_all();

        let on_complete = {
            let mut callbacks = lock(&self.shared.callbacks);
            callbacks.on_data = None;
            callbacks.on_complete.take()
        };
        if let Some(on_complete) = on_complete {
            on_complete(outcome);
        }
    }

    fn outcome(&self, state: &TransferState) -> FetchOutcome {
        match &state.error {
            Some(error) => FetchOutcome::Failed {
                error: error.clone(),
                partial: state.data.clone(),
            },
            None if self.is_cancelled() => FetchOutcome::Cancelled,
            None => FetchOutcome::Completed(state.data.clone()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

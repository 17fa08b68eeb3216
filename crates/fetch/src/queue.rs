use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::{FetchOperation, QueueError, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchQueueConfig {
    pub workers: usize,
    pub capacity: usize,
}

impl Default for FetchQueueConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            capacity: 256,
        }
    }
}

/// Bounded work queue; each worker runs one operation at a time to completion.
pub struct FetchQueue {
    sender: Option<Sender<FetchOperation>>,
    workers: Vec<JoinHandle<()>>,
    capacity: usize,
}

impl FetchQueue {
    pub fn new(config: FetchQueueConfig, transport: Arc<dyn Transport>) -> Result<Self, QueueError> {
        if config.workers == 0 {
            return Err(QueueError::ZeroWorkers);
        }
        if config.capacity == 0 {
            return Err(QueueError::ZeroCapacity);
        }
        let (sender, receiver) = crossbeam_channel::bounded(config.capacity);
        let mut workers = Vec::with_capacity(config.workers);
        for worker_index in 0..config.workers {
            let receiver = receiver.clone();
            let transport = Arc::clone(&transport);
            let handle = std::thread::Builder::new()
                .name(format!("fetch_worker_{worker_index}"))
                .spawn(move || fetch_worker_loop(receiver, transport))
                .map_err(QueueError::Spawn)?;
            workers.push(handle);
        }
        tracing::debug!(workers = config.workers, capacity = config.capacity, "fetch queue started");
        Ok(Self {
            sender: Some(sender),
            workers,
            capacity: config.capacity,
        })
    }

    /// Queues without blocking; a full queue hands the error back so the caller can retry later.
    pub fn submit(&self, operation: FetchOperation) -> Result<(), QueueError> {
        let Some(sender) = &self.sender else {
            return Err(QueueError::Closed);
        };
        match sender.try_send(operation) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(QueueError::Full),
            Err(TrySendError::Disconnected(_)) => Err(QueueError::Closed),
        }
    }

    pub fn pending(&self) -> usize {
        self.sender.as_ref().map_or(0, Sender::len)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stops accepting work, lets workers drain what is queued and joins them.
    pub fn shutdown(mut self) {
        self.close_and_join();
    }

    fn close_and_join(&mut self) {
        self.sender = None;
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!("fetch worker panicked");
            }
        }
    }
}

impl Drop for FetchQueue {
    fn drop(&mut self) {
        self.close_and_join();
    }
}

fn fetch_worker_loop(receiver: Receiver<FetchOperation>, transport: Arc<dyn Transport>) {
    for operation in receiver.iter() {
        let _span = tracing::trace_span!("fetch", url = operation.url()).entered();
        operation.start(transport.as_ref());
    }
}

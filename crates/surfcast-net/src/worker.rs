//! Worker threads and cooperative shutdown

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use thiserror::Error;
use tracing::{debug, error};

/// Errors raised while managing a worker thread
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker thread {name}: {source}")]
    Spawn { name: String, source: io::Error },

    #[error("Worker thread {0} panicked")]
    Panicked(String),
}

/// Why a network worker left its loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The owner triggered the shutdown signal
    Shutdown,
    /// A zero-length datagram arrived
    PeerClosed,
    /// The socket reported a closed or invalid descriptor
    DescriptorClosed,
}

/// Cancellation flag shared between a worker and its owner.
///
/// Workers check it once per loop iteration and release their socket only
/// after they have left the loop.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every holder of this signal to stop
    pub fn trigger(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A running worker thread and the signal that stops it
pub struct WorkerHandle<T> {
    name: String,
    shutdown: ShutdownSignal,
    handle: thread::JoinHandle<T>,
}

impl<T: Send + 'static> WorkerHandle<T> {
    /// Spawn a named thread running `body` with its own shutdown signal
    pub fn spawn<F>(name: &str, body: F) -> Result<Self, WorkerError>
    where
        F: FnOnce(ShutdownSignal) -> T + Send + 'static,
    {
        let shutdown = ShutdownSignal::new();
        let worker_signal = shutdown.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(worker_signal))
            .map_err(|source| WorkerError::Spawn {
                name: name.to_string(),
                source,
            })?;

        debug!("Spawned worker thread {}", name);

        Ok(Self {
            name: name.to_string(),
            shutdown,
            handle,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signal that stops this worker, for owners that stop several at once
    pub fn signal(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// True once the worker has left its loop on its own or after a signal
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the worker without signalling it
    pub fn join(self) -> Result<T, WorkerError> {
        self.handle.join().map_err(|_| {
            error!("Worker thread {} panicked", self.name);
            WorkerError::Panicked(self.name)
        })
    }

    /// Signal the worker and wait for it to exit
    pub fn shutdown(self) -> Result<T, WorkerError> {
        self.shutdown.trigger();
        self.join()
    }
}

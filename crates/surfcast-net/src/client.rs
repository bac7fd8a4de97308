//! Ingest client: the shared store plus both network workers

use crate::receiver::{DataReceiver, ReceiveError, ReceiverConfig, ReceiverStats};
use crate::sender::{HeartbeatError, HeartbeatSender, SenderConfig, SenderStats};
use crate::store::SharedStore;
use crate::worker::{ShutdownSignal, WorkerError, WorkerHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Errors raised while starting the client
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Data receiver: {0}")]
    Receive(#[from] ReceiveError),

    #[error("Heartbeat sender: {0}")]
    Heartbeat(#[from] HeartbeatError),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// Configuration for both workers
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub receiver: ReceiverConfig,
    pub sender: SenderConfig,
}

/// What the workers reported when they were stopped
#[derive(Debug)]
pub struct ClientReport {
    pub receiver: Result<ReceiverStats, ClientError>,
    pub sender: Result<SenderStats, ClientError>,
}

impl ClientReport {
    pub fn is_clean(&self) -> bool {
        self.receiver.is_ok() && self.sender.is_ok()
    }
}

/// Triggers the workers' signals when the client goes away
struct SignalOnDrop(Vec<ShutdownSignal>);

impl SignalOnDrop {
    fn trigger(&self) {
        for signal in &self.0 {
            signal.trigger();
        }
    }
}

impl Drop for SignalOnDrop {
    fn drop(&mut self) {
        self.trigger();
    }
}

/// A running client.
///
/// Dropping it without calling [`IngestClient::shutdown`] signals both
/// workers but does not wait for them.
pub struct IngestClient {
    store: Arc<SharedStore>,
    data_addr: SocketAddr,
    heartbeat_addr: SocketAddr,
    receiver: WorkerHandle<Result<ReceiverStats, ReceiveError>>,
    sender: WorkerHandle<SenderStats>,
    signals: SignalOnDrop,
}

impl IngestClient {
    /// Bind the data socket, open the heartbeat socket and start both workers.
    ///
    /// Nothing is spawned unless both sockets were set up.
    pub fn start(config: ClientConfig) -> Result<Self, ClientError> {
        let store = Arc::new(SharedStore::new());

        let receiver = DataReceiver::bind(config.receiver, store.clone())?;
        let sender = HeartbeatSender::connect(config.sender, store.clone())?;

        let data_addr = receiver.local_addr()?;
        let heartbeat_addr = sender.local_addr().map_err(HeartbeatError::Socket)?;
        let server_addr = sender.server_addr();

        let receiver = receiver.spawn()?;
        let sender = match sender.spawn() {
            Ok(handle) => handle,
            Err(e) => {
                let _ = receiver.shutdown();
                return Err(e.into());
            }
        };
        let signals = SignalOnDrop(vec![receiver.signal().clone(), sender.signal().clone()]);

        info!(
            "Ingest client started: data on {}, heartbeats {} -> {}",
            data_addr, heartbeat_addr, server_addr
        );

        Ok(Self {
            store,
            data_addr,
            heartbeat_addr,
            receiver,
            sender,
            signals,
        })
    }

    pub fn store(&self) -> &Arc<SharedStore> {
        &self.store
    }

    /// Address the data receiver is bound to
    pub fn data_addr(&self) -> SocketAddr {
        self.data_addr
    }

    /// Local address heartbeats are sent from
    pub fn heartbeat_addr(&self) -> SocketAddr {
        self.heartbeat_addr
    }

    /// True when either worker has left its loop on its own
    pub fn has_stopped_worker(&self) -> bool {
        self.receiver.is_finished() || self.sender.is_finished()
    }

    /// Signal both workers, then join them
    pub fn shutdown(self) -> ClientReport {
        let Self {
            receiver,
            sender,
            signals,
            ..
        } = self;
        signals.trigger();

        let receiver = receiver
            .join()
            .map_err(ClientError::from)
            .and_then(|stats| stats.map_err(ClientError::from));
        let sender = sender.join().map_err(ClientError::from);

        if let Err(e) = &receiver {
            warn!("Data receiver ended with error: {}", e);
        }
        if let Err(e) = &sender {
            warn!("Heartbeat sender ended with error: {}", e);
        }
        info!("Ingest client stopped");

        ClientReport { receiver, sender }
    }
}

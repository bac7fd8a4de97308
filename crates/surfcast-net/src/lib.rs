//! Live particle-state ingestion over UDP
//!
//! A simulation server streams fixed-size [`DataPacket`]s to this client for
//! as long as it keeps receiving [`Heartbeat`]s. [`IngestClient`] runs the two
//! network workers on their own threads and merges every accepted packet into
//! a [`SharedStore`] that a render loop can poll once per frame without ever
//! blocking on the network.
//!
//! ```no_run
//! use surfcast_net::{ClientConfig, IngestClient};
//!
//! let client = IngestClient::start(ClientConfig::default())?;
//! if let Some(view) = client.store().try_read() {
//!     println!("{} particles at t={}", view.populated_count(), view.most_recent_timestamp());
//! }
//! client.shutdown();
//! # Ok::<(), surfcast_net::ClientError>(())
//! ```

pub mod client;
pub mod protocol;
pub mod receiver;
pub mod sender;
mod socket;
pub mod store;
pub mod types;
pub mod worker;

// Re-export commonly used types
pub use client::{ClientConfig, ClientError, ClientReport, IngestClient};
pub use protocol::{
    layout_summary, DataPacket, Heartbeat, LayoutSummary, ParticleRecord, ProtocolError,
    PACKET_SIZE, PARTICLES_PER_PACKET,
};
pub use receiver::{DataReceiver, PollOutcome, ReceiveError, ReceiverConfig, ReceiverStats};
pub use sender::{HeartbeatError, HeartbeatSender, SenderConfig, SenderStats};
pub use store::{ApplyOutcome, ModelSummary, ParticleStore, SharedStore, StoreView};
pub use types::{ParticleType, WorldBounds, UNDEFINED_POSITION};
pub use worker::{ExitReason, ShutdownSignal, WorkerError, WorkerHandle};

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

//! Data receiver for streamed particle packets

use crate::protocol::{
    DataPacket, ProtocolError, DEFAULT_DATA_HOST, DEFAULT_DATA_PORT, PACKET_SIZE,
};
use crate::socket::{is_closed_descriptor, is_transient, resolve_ipv4};
use crate::store::{ApplyOutcome, SharedStore};
use crate::worker::{ExitReason, ShutdownSignal, WorkerError, WorkerHandle};

use socket2::{Domain, Protocol, SockAddr, SockRef, Socket, Type};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

/// Errors that can occur during receive operations
#[derive(Error, Debug)]
pub enum ReceiveError {
    #[error("Failed to resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        source: io::Error,
    },

    #[error("No IPv4 address found for {host}:{port}")]
    NoIpv4Address { host: String, port: u16 },

    #[error("Failed to set up data socket: {0}")]
    Socket(#[source] io::Error),

    #[error("Failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Configuration for the data receiver
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Local host to bind for incoming data
    pub host: String,
    /// Local port to bind for incoming data
    pub port: u16,
    /// `SO_RCVBUF` request; `None` keeps the OS default
    pub recv_buffer_size: Option<usize>,
    /// Grow `SO_RCVBUF` to the recommended size whenever a new model
    /// generation starts
    pub apply_recommended_buffer: bool,
    /// Sleep after a receive that found nothing; `None` spins
    pub idle_sleep: Option<Duration>,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_DATA_HOST.to_string(),
            port: DEFAULT_DATA_PORT,
            recv_buffer_size: None,
            apply_recommended_buffer: false,
            idle_sleep: Some(Duration::from_micros(200)),
        }
    }
}

/// Receiver statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct ReceiverStats {
    pub datagrams_received: u64,
    pub bytes_received: u64,
    pub packets_applied: u64,
    /// Well-sized packets with bad counts or ids
    pub packets_rejected: u64,
    /// Datagrams of the wrong size
    pub datagrams_dropped: u64,
    /// `SO_RCVBUF` as reported by the OS
    pub recv_buffer_size: Option<usize>,
    /// Buffer large enough to hold one full model
    pub recommended_recv_buffer: Option<usize>,
    /// Set once the loop has ended
    pub exit_reason: Option<ExitReason>,
}

/// Result of a single receive attempt
#[derive(Debug)]
pub enum PollOutcome {
    /// A packet was merged into the store
    Applied(ApplyOutcome),
    /// A datagram of the wrong size was discarded
    Dropped { len: usize },
    /// A well-sized packet failed validation
    Rejected(ProtocolError),
    /// Nothing was waiting
    Idle,
    /// The worker should stop
    Closed(ExitReason),
}

/// UDP particle data receiver
pub struct DataReceiver {
    socket: UdpSocket,
    config: ReceiverConfig,
    store: Arc<SharedStore>,
    // one byte over so oversized datagrams are not silently truncated to fit
    buffer: Box<[u8]>,
    packet: DataPacket,
    stats: ReceiverStats,
}

impl DataReceiver {
    /// Bind the data socket and prepare it for non-blocking receives
    pub fn bind(config: ReceiverConfig, store: Arc<SharedStore>) -> Result<Self, ReceiveError> {
        let addr = resolve_ipv4(&config.host, config.port)
            .map_err(|source| ReceiveError::Resolve {
                host: config.host.clone(),
                port: config.port,
                source,
            })?
            .ok_or_else(|| ReceiveError::NoIpv4Address {
                host: config.host.clone(),
                port: config.port,
            })?;

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(ReceiveError::Socket)?;
        socket
            .set_reuse_address(true)
            .map_err(ReceiveError::Socket)?;
        #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
        socket.set_reuse_port(true).map_err(ReceiveError::Socket)?;

        socket
            .bind(&SockAddr::from(addr))
            .map_err(|source| ReceiveError::Bind { addr, source })?;

        if let Some(size) = config.recv_buffer_size {
            match socket.set_recv_buffer_size(size) {
                Ok(()) => debug!("Requested {} byte receive buffer", size),
                Err(e) => warn!(
                    "Failed to set receive buffer to {} bytes, keeping OS default: {}",
                    size, e
                ),
            }
        }
        let recv_buffer_size = socket.recv_buffer_size().ok();

        socket.set_nonblocking(true).map_err(ReceiveError::Socket)?;
        let socket: UdpSocket = socket.into();

        info!(
            "Data receiver bound to {} (receive buffer {:?})",
            socket.local_addr()?,
            recv_buffer_size
        );

        Ok(Self {
            socket,
            config,
            store,
            buffer: vec![0u8; PACKET_SIZE + 1].into_boxed_slice(),
            packet: DataPacket::default(),
            stats: ReceiverStats {
                recv_buffer_size,
                ..Default::default()
            },
        })
    }

    /// Get the local address the receiver is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, ReceiveError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats
    }

    pub fn store(&self) -> &Arc<SharedStore> {
        &self.store
    }

    /// Attempt one non-blocking receive and handle whatever arrived
    pub fn poll_once(&mut self) -> Result<PollOutcome, ReceiveError> {
        match self.socket.recv_from(&mut self.buffer) {
            Ok((0, from)) => {
                debug!("Zero-length datagram from {}, closing", from);
                Ok(PollOutcome::Closed(ExitReason::PeerClosed))
            }
            Ok((len, from)) => {
                self.stats.datagrams_received += 1;
                self.stats.bytes_received += len as u64;
                Ok(self.handle_datagram(len, from))
            }
            Err(e) if is_transient(&e) => Ok(PollOutcome::Idle),
            Err(e) if is_closed_descriptor(&e) => {
                debug!("Data socket closed: {}", e);
                Ok(PollOutcome::Closed(ExitReason::DescriptorClosed))
            }
            Err(e) => Err(ReceiveError::Io(e)),
        }
    }

    fn handle_datagram(&mut self, len: usize, from: SocketAddr) -> PollOutcome {
        if let Err(e) = self.packet.decode_into(&self.buffer[..len]) {
            if e.is_noise() {
                self.stats.datagrams_dropped += 1;
                trace!("Dropped {} byte datagram from {}", len, from);
                return PollOutcome::Dropped { len };
            }
            self.stats.packets_rejected += 1;
            warn!("Rejected packet from {}: {}", from, e);
            return PollOutcome::Rejected(e);
        }

        match self.store.apply(&self.packet) {
            Ok(outcome) => {
                self.stats.packets_applied += 1;
                let recommended =
                    (self.packet.total_particle_count as usize).saturating_mul(PACKET_SIZE);
                self.stats.recommended_recv_buffer = Some(recommended);
                if outcome.new_generation {
                    self.on_new_generation(recommended);
                }
                trace!(
                    "Applied {} records from {} (t={})",
                    outcome.records_applied,
                    from,
                    self.packet.t
                );
                PollOutcome::Applied(outcome)
            }
            Err(e) => {
                self.stats.packets_rejected += 1;
                warn!("Rejected packet from {}: {}", from, e);
                PollOutcome::Rejected(e)
            }
        }
    }

    fn on_new_generation(&mut self, recommended: usize) {
        info!(
            "New model: {} particles, recommended receive buffer {} bytes",
            self.packet.total_particle_count, recommended
        );

        if !self.config.apply_recommended_buffer {
            return;
        }
        let sock = SockRef::from(&self.socket);
        if let Err(e) = sock.set_recv_buffer_size(recommended) {
            warn!("Failed to grow receive buffer to {} bytes: {}", recommended, e);
        }
        self.stats.recv_buffer_size = sock.recv_buffer_size().ok();
        debug!("Receive buffer now {:?}", self.stats.recv_buffer_size);
    }

    /// Run until shut down, closed, or a fatal receive error
    pub fn run(mut self, shutdown: &ShutdownSignal) -> Result<ReceiverStats, ReceiveError> {
        info!("Starting data receiver loop");

        let reason = loop {
            if shutdown.is_triggered() {
                break ExitReason::Shutdown;
            }
            match self.poll_once() {
                Ok(PollOutcome::Closed(reason)) => break reason,
                Ok(PollOutcome::Idle) => {
                    if let Some(pause) = self.config.idle_sleep {
                        thread::sleep(pause);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Data receiver failed: {}", e);
                    return Err(e);
                }
            }
        };

        self.stats.exit_reason = Some(reason);
        info!(
            "Data receiver stopped ({:?}). Total: {} datagrams, {} applied, {} rejected, {} dropped",
            reason,
            self.stats.datagrams_received,
            self.stats.packets_applied,
            self.stats.packets_rejected,
            self.stats.datagrams_dropped
        );

        Ok(self.stats)
    }

    /// Start the receiver on its own thread
    pub fn spawn(
        self,
    ) -> Result<WorkerHandle<Result<ReceiverStats, ReceiveError>>, WorkerError> {
        WorkerHandle::spawn("surfcast-data", move |shutdown| self.run(&shutdown))
    }
}

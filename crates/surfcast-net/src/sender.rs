//! Heartbeat sender
//!
//! Tells the simulation server that this client is alive and where to stream.
//! The server stops sending once heartbeats stop arriving.

use crate::protocol::{
    Heartbeat, DEFAULT_HEARTBEAT_TTL, DEFAULT_SERVER_HOST, DEFAULT_SERVER_PORT, HEARTBEAT_SIZE,
};
use crate::socket::{is_closed_descriptor, is_transient, resolve_ipv4};
use crate::store::SharedStore;
use crate::worker::{ExitReason, ShutdownSignal, WorkerError, WorkerHandle};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Errors that can occur while setting up the heartbeat sender
#[derive(Error, Debug)]
pub enum HeartbeatError {
    #[error("Failed to resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        source: io::Error,
    },

    #[error("No IPv4 address found for {host}:{port}")]
    NoIpv4Address { host: String, port: u16 },

    #[error("Socket error: {0}")]
    Socket(#[from] io::Error),
}

/// Configuration for the heartbeat sender
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Simulation server host name or address
    pub host: String,
    /// Simulation server port
    pub port: u16,
    /// Interval between heartbeats
    pub ttl: Duration,
    /// Sleep between loop iterations
    pub poll_interval: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_SERVER_HOST.to_string(),
            port: DEFAULT_SERVER_PORT,
            ttl: DEFAULT_HEARTBEAT_TTL,
            poll_interval: Duration::from_millis(10),
        }
    }
}

/// Statistics about sent heartbeats
#[derive(Debug, Clone, Copy)]
pub struct SenderStats {
    /// Resolved server address
    pub server_addr: SocketAddr,
    /// Number of heartbeats handed to the OS
    pub heartbeats_sent: u64,
    /// Sends that failed and were skipped
    pub send_failures: u64,
    /// Unexpected receive errors seen on the heartbeat socket
    pub recv_errors: u64,
    /// Set once the loop has ended
    pub exit_reason: Option<ExitReason>,
}

/// UDP heartbeat sender
pub struct HeartbeatSender {
    socket: UdpSocket,
    config: SenderConfig,
    store: Arc<SharedStore>,
    last_sent: Option<Instant>,
    stats: SenderStats,
}

impl HeartbeatSender {
    /// Resolve the server and open a non-blocking, unconnected socket
    pub fn connect(config: SenderConfig, store: Arc<SharedStore>) -> Result<Self, HeartbeatError> {
        let server_addr = resolve_ipv4(&config.host, config.port)
            .map_err(|source| HeartbeatError::Resolve {
                host: config.host.clone(),
                port: config.port,
                source,
            })?
            .ok_or_else(|| HeartbeatError::NoIpv4Address {
                host: config.host.clone(),
                port: config.port,
            })?;

        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.set_nonblocking(true)?;

        debug!(
            "Heartbeat socket {} targeting {}",
            socket.local_addr()?,
            server_addr
        );

        Ok(Self {
            socket,
            config,
            store,
            last_sent: None,
            stats: SenderStats {
                server_addr,
                heartbeats_sent: 0,
                send_failures: 0,
                recv_errors: 0,
                exit_reason: None,
            },
        })
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.stats.server_addr
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn stats(&self) -> SenderStats {
        self.stats
    }

    /// One loop iteration: send when the TTL has elapsed, then probe the
    /// socket for closure. Returns the reason to stop, if any.
    pub fn tick(&mut self) -> Option<ExitReason> {
        let due = self
            .last_sent
            .map_or(true, |at| at.elapsed() >= self.config.ttl);
        if due {
            if let Some(reason) = self.send_heartbeat() {
                return Some(reason);
            }
        }

        let mut probe = [0u8; HEARTBEAT_SIZE];
        match self.socket.recv_from(&mut probe) {
            Ok((0, _)) => Some(ExitReason::PeerClosed),
            Ok((len, from)) => {
                trace!("Ignoring {} byte datagram from {} on heartbeat socket", len, from);
                None
            }
            Err(e) if is_transient(&e) => None,
            Err(e) if is_closed_descriptor(&e) => Some(ExitReason::DescriptorClosed),
            Err(e) => {
                // e.g. ICMP port unreachable reported as a reset on some platforms
                self.note_recv_error(&e);
                None
            }
        }
    }

    /// Warn on the first unexpected receive error, then drop to debug
    fn note_recv_error(&mut self, e: &io::Error) {
        self.stats.recv_errors += 1;
        if self.stats.recv_errors == 1 {
            warn!(
                "Heartbeat socket receive error: {} (repeats logged at debug)",
                e
            );
        } else {
            debug!(
                "Heartbeat socket receive error #{}: {}",
                self.stats.recv_errors, e
            );
        }
    }

    fn send_heartbeat(&mut self) -> Option<ExitReason> {
        let heartbeat = Heartbeat::new(self.stats.heartbeats_sent as u32);

        match self.socket.send_to(&heartbeat.encode(), self.stats.server_addr) {
            Ok(_) => {
                self.stats.heartbeats_sent += 1;
                let total = self.store.record_heartbeat();
                trace!("Sent heartbeat {} ({} total)", heartbeat.count, total);
            }
            Err(e) if is_closed_descriptor(&e) => return Some(ExitReason::DescriptorClosed),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                debug!("Heartbeat send would block, retrying next period");
                self.stats.send_failures += 1;
            }
            Err(e) => {
                warn!(
                    "Failed to send heartbeat to {}: {}",
                    self.stats.server_addr, e
                );
                self.stats.send_failures += 1;
            }
        }

        // fixed cadence, a failed send waits for the next period too
        self.last_sent = Some(Instant::now());
        None
    }

    /// Run until shut down or the socket reports closure
    pub fn run(mut self, shutdown: &ShutdownSignal) -> SenderStats {
        info!(
            "Heartbeat sender started: {} every {:?}",
            self.stats.server_addr, self.config.ttl
        );

        let reason = loop {
            if shutdown.is_triggered() {
                break ExitReason::Shutdown;
            }
            if let Some(reason) = self.tick() {
                break reason;
            }
            if !self.config.poll_interval.is_zero() {
                thread::sleep(self.config.poll_interval);
            }
        };

        self.stats.exit_reason = Some(reason);
        info!(
            "Heartbeat sender stopped ({:?}). Sent {} heartbeats, {} failures",
            reason, self.stats.heartbeats_sent, self.stats.send_failures
        );

        self.stats
    }

    /// Start the sender on its own thread
    pub fn spawn(self) -> Result<WorkerHandle<SenderStats>, WorkerError> {
        WorkerHandle::spawn("surfcast-heartbeat", move |shutdown| self.run(&shutdown))
    }
}

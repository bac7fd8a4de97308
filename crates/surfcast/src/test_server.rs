//! Stand-in for the simulation server, for local testing
//!
//! Waits for heartbeats, then streams a synthetic wave tank to the
//! heartbeat's source address for as long as heartbeats keep arriving.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};
use surfcast_net::protocol::{DEFAULT_DATA_PORT, DEFAULT_SERVER_PORT, HEARTBEAT_SIZE};
use surfcast_net::{DataPacket, Heartbeat, ParticleRecord, ParticleType, ShutdownSignal, WorldBounds};
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone)]
pub struct TestServerConfig {
    pub host: String,
    /// Port heartbeats arrive on
    pub port: u16,
    /// Port the client receives data on
    pub client_port: u16,
    pub particles: u32,
    /// Timesteps per second
    pub rate: f64,
    /// Stop streaming when no heartbeat arrived for this long
    pub client_timeout: Duration,
    /// Fraction of packets to skip, for loss testing
    pub drop_rate: f64,
    pub seed: u64,
}

impl Default for TestServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_SERVER_PORT,
            client_port: DEFAULT_DATA_PORT,
            particles: 10_000,
            rate: 10.0,
            client_timeout: Duration::from_secs(15),
            drop_rate: 0.0,
            seed: 0,
        }
    }
}

/// Particles laid out on a grid in a tank, with a travelling wave on top
#[derive(Debug, Clone)]
pub struct WaveModel {
    particles: u32,
    per_axis: u32,
    bounds: WorldBounds,
}

impl WaveModel {
    const SPACING: f32 = 0.1;
    const AMPLITUDE: f32 = 0.05;

    pub fn new(particles: u32) -> Self {
        let mut per_axis = 1u32;
        while u64::from(per_axis).pow(3) < u64::from(particles) {
            per_axis += 1;
        }
        let extent = per_axis as f32 * Self::SPACING;
        let bounds = WorldBounds::new(
            [0.0, 0.0, 0.0],
            [extent, extent, extent + 2.0 * Self::AMPLITUDE],
        );
        Self {
            particles,
            per_axis,
            bounds,
        }
    }

    pub fn particles(&self) -> u32 {
        self.particles
    }

    pub fn bounds(&self) -> WorldBounds {
        self.bounds
    }

    /// Every particle's record at time `t`
    pub fn frame(&self, t: f32) -> Vec<ParticleRecord> {
        let n = self.per_axis;
        (0..self.particles)
            .map(|id| {
                let ix = id % n;
                let iy = (id / n) % n;
                let iz = id / (n * n);
                let x = ix as f32 * Self::SPACING;
                let y = iy as f32 * Self::SPACING;
                let mut z = iz as f32 * Self::SPACING;

                let kind = if iz == 0 {
                    ParticleType::Boundary
                } else if ix == 0 {
                    ParticleType::Paddle
                } else {
                    ParticleType::Fluid
                };
                if kind == ParticleType::Fluid {
                    // deeper particles move less
                    let depth = iz as f32 / n as f32;
                    z += Self::AMPLITUDE * depth * (x * 4.0 - t * 2.0).sin();
                }

                ParticleRecord::new(id, kind, [x, y, z])
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TestServerStats {
    pub heartbeats_received: u64,
    pub timesteps_sent: u64,
    pub packets_sent: u64,
    pub packets_skipped: u64,
}

pub struct TestServer {
    socket: UdpSocket,
    config: TestServerConfig,
    model: WaveModel,
    client: Option<(SocketAddr, Instant)>,
    rng: StdRng,
    stats: TestServerStats,
}

impl TestServer {
    pub fn bind(config: TestServerConfig) -> io::Result<Self> {
        let socket = UdpSocket::bind((config.host.as_str(), config.port))?;
        socket.set_nonblocking(true)?;
        info!(
            "Test server listening for heartbeats on {}, {} particles at {} steps/s",
            socket.local_addr()?,
            config.particles,
            config.rate
        );
        Ok(Self {
            model: WaveModel::new(config.particles),
            rng: StdRng::seed_from_u64(config.seed),
            socket,
            config,
            client: None,
            stats: TestServerStats::default(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn set_client_port(&mut self, port: u16) {
        self.config.client_port = port;
    }

    pub fn stats(&self) -> TestServerStats {
        self.stats
    }

    /// Drain pending heartbeats and refresh the client's deadline
    pub fn poll_heartbeats(&mut self) -> io::Result<()> {
        let mut buf = [0u8; HEARTBEAT_SIZE + 1];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) => match Heartbeat::decode(&buf[..len]) {
                    Ok(heartbeat) => {
                        self.stats.heartbeats_received += 1;
                        let target = SocketAddr::new(from.ip(), self.config.client_port);
                        if self.client.map(|(addr, _)| addr) != Some(target) {
                            info!("Streaming to {} (heartbeat {})", target, heartbeat.count);
                        } else {
                            trace!("Heartbeat {} from {}", heartbeat.count, from);
                        }
                        self.client = Some((target, Instant::now()));
                    }
                    Err(e) => debug!("Ignoring datagram from {}: {}", from, e),
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Current client, dropping it once its heartbeats have lapsed
    pub fn client(&mut self) -> Option<SocketAddr> {
        if let Some((addr, seen)) = self.client {
            if seen.elapsed() > self.config.client_timeout {
                info!("Client {} timed out", addr);
                self.client = None;
            }
        }
        self.client.map(|(addr, _)| addr)
    }

    /// Send one full timestep to `target`; returns packets sent
    pub fn send_timestep(&mut self, target: SocketAddr, t: f32) -> usize {
        let records = self.model.frame(t);
        let packets =
            DataPacket::chunk_model(self.model.particles(), t, self.model.bounds(), &records);

        let mut sent = 0;
        for packet in packets {
            if self.rng.gen::<f64>() < self.config.drop_rate {
                self.stats.packets_skipped += 1;
                continue;
            }
            let bytes = match packet.encode() {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Failed to encode packet: {}", e);
                    continue;
                }
            };
            match self.socket.send_to(&bytes, target) {
                Ok(_) => sent += 1,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.stats.packets_skipped += 1;
                }
                Err(e) => {
                    warn!("Failed to send to {}: {}", target, e);
                    self.stats.packets_skipped += 1;
                }
            }
        }

        self.stats.packets_sent += sent as u64;
        self.stats.timesteps_sent += 1;
        trace!("Sent timestep t={} as {} packets", t, sent);
        sent
    }

    /// Stream until `stop` fires
    pub fn run(&mut self, stop: &ShutdownSignal) -> io::Result<TestServerStats> {
        let step = Duration::from_secs_f64(1.0 / self.config.rate.max(0.001));
        let started = Instant::now();
        let mut next_step = Instant::now();

        while !stop.is_triggered() {
            self.poll_heartbeats()?;

            if Instant::now() >= next_step {
                if let Some(target) = self.client() {
                    let t = started.elapsed().as_secs_f32();
                    self.send_timestep(target, t);
                }
                next_step += step;
            }

            thread::sleep(Duration::from_millis(1));
        }

        info!(
            "Test server stopped: {} heartbeats, {} timesteps, {} packets sent, {} skipped",
            self.stats.heartbeats_received,
            self.stats.timesteps_sent,
            self.stats.packets_sent,
            self.stats.packets_skipped
        );
        Ok(self.stats)
    }
}

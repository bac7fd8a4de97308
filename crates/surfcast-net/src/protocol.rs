//! Wire protocol for particle streaming
//!
//! Two messages travel over UDP, one per datagram:
//!
//! * **Heartbeat** (client → server): a single little-endian `u32` counter.
//! * **DataPacket** (server → client): a fixed-size datagram of
//!   [`PACKET_SIZE`] bytes carrying a header and up to
//!   [`PARTICLES_PER_PACKET`] particle records.
//!
//! DataPacket layout, all fields little-endian:
//!
//! ```text
//! offset  width  field
//!      0      4  total_particle_count  u32
//!      4      4  particle_count        u32
//!      8      4  t                     f32
//!     12     12  world_origin          [f32; 3]
//!     24     12  world_size            [f32; 3]
//!     36   18*K  records
//!
//! record (18 bytes)
//!     +0      4  id                    u32
//!     +4      2  particle_type         u16
//!     +6     12  position              [f32; 3]
//! ```
//!
//! Record slots past `particle_count` are zero on the wire and ignored.

use crate::types::{ParticleType, WorldBounds};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::trace;

/// Largest UDP payload that fits a 1500-byte Ethernet frame
pub const MAX_DATAGRAM_SIZE: usize = 1472;

/// Size of the DataPacket header in bytes
pub const HEADER_SIZE: usize = 36;

/// Size of one particle record in bytes
pub const RECORD_SIZE: usize = 18;

/// Number of record slots in every DataPacket
pub const PARTICLES_PER_PACKET: usize = (MAX_DATAGRAM_SIZE - HEADER_SIZE) / RECORD_SIZE;

/// Exact length of every DataPacket datagram
pub const PACKET_SIZE: usize = HEADER_SIZE + PARTICLES_PER_PACKET * RECORD_SIZE;

/// Exact length of every Heartbeat datagram
pub const HEARTBEAT_SIZE: usize = 4;

/// Interval between heartbeats
pub const DEFAULT_HEARTBEAT_TTL: Duration = Duration::from_secs(5);

/// Local port the data receiver binds by default
pub const DEFAULT_DATA_PORT: u16 = 50000;

/// Local host the data receiver binds by default (all interfaces)
pub const DEFAULT_DATA_HOST: &str = "0.0.0.0";

/// Port of the simulation server heartbeats are sent to
pub const DEFAULT_SERVER_PORT: u16 = 50001;

/// Host of the simulation server heartbeats are sent to
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Protocol error types
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid datagram length: expected {expected} bytes, got {received}")]
    InvalidLength { expected: usize, received: usize },

    #[error("Too many records: {count} exceeds {max} per packet")]
    TooManyRecords { count: usize, max: usize },

    #[error("Packet carries {count} records but the model has only {total} particles")]
    CountExceedsTotal { count: usize, total: u32 },

    #[error("Particle id {id} out of range for a model of {total} particles")]
    ParticleIdOutOfRange { id: u32, total: u32 },
}

impl ProtocolError {
    /// True for datagrams that are simply not ours (wrong size), as opposed
    /// to packets that look like DataPackets but carry bad contents.
    pub fn is_noise(&self) -> bool {
        matches!(self, Self::InvalidLength { .. })
    }
}

/// One particle's state within a DataPacket
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ParticleRecord {
    /// Index into the model-wide particle set
    pub id: u32,
    /// Raw type discriminator, see [`ParticleType`]
    pub particle_type: u16,
    /// Position (x, y, z) in simulation axes
    pub position: [f32; 3],
}

impl ParticleRecord {
    pub fn new(id: u32, particle_type: ParticleType, position: [f32; 3]) -> Self {
        Self {
            id,
            particle_type: particle_type.as_raw(),
            position,
        }
    }

    /// Classified particle type
    pub fn kind(&self) -> ParticleType {
        ParticleType::from_raw(self.particle_type)
    }
}

/// A decoded DataPacket
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataPacket {
    /// Authoritative number of particles in the whole model
    pub total_particle_count: u32,
    /// Simulation time shared by every record in this packet
    pub t: f32,
    /// Bounds of the simulated domain
    pub bounds: WorldBounds,
    /// Records carried by this packet, at most [`PARTICLES_PER_PACKET`]
    pub records: Vec<ParticleRecord>,
}

impl DataPacket {
    /// Create an empty packet for a model
    pub fn new(total_particle_count: u32, t: f32, bounds: WorldBounds) -> Self {
        Self {
            total_particle_count,
            t,
            bounds,
            records: Vec::with_capacity(PARTICLES_PER_PACKET),
        }
    }

    /// Attach records to the packet
    pub fn with_records(mut self, records: impl IntoIterator<Item = ParticleRecord>) -> Self {
        self.records.extend(records);
        self
    }

    /// Number of records carried in this datagram
    pub fn particle_count(&self) -> usize {
        self.records.len()
    }

    /// Check counts and ids against the model size.
    ///
    /// Every record id must index into `0..total_particle_count`.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let count = self.records.len();
        if count > PARTICLES_PER_PACKET {
            return Err(ProtocolError::TooManyRecords {
                count,
                max: PARTICLES_PER_PACKET,
            });
        }
        if count > self.total_particle_count as usize {
            return Err(ProtocolError::CountExceedsTotal {
                count,
                total: self.total_particle_count,
            });
        }
        if let Some(bad) = self
            .records
            .iter()
            .find(|r| r.id >= self.total_particle_count)
        {
            return Err(ProtocolError::ParticleIdOutOfRange {
                id: bad.id,
                total: self.total_particle_count,
            });
        }
        Ok(())
    }

    /// Encode to exactly [`PACKET_SIZE`] bytes
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        if self.records.len() > PARTICLES_PER_PACKET {
            return Err(ProtocolError::TooManyRecords {
                count: self.records.len(),
                max: PARTICLES_PER_PACKET,
            });
        }

        let mut buf = Vec::with_capacity(PACKET_SIZE);
        buf.write_u32::<LittleEndian>(self.total_particle_count)?;
        buf.write_u32::<LittleEndian>(self.records.len() as u32)?;
        buf.write_f32::<LittleEndian>(self.t)?;
        for v in self.bounds.origin.iter().chain(self.bounds.size.iter()) {
            buf.write_f32::<LittleEndian>(*v)?;
        }

        for record in &self.records {
            buf.write_u32::<LittleEndian>(record.id)?;
            buf.write_u16::<LittleEndian>(record.particle_type)?;
            for v in &record.position {
                buf.write_f32::<LittleEndian>(*v)?;
            }
        }

        buf.resize(PACKET_SIZE, 0);
        Ok(buf)
    }

    /// Decode a datagram into a new packet
    pub fn decode(datagram: &[u8]) -> Result<Self, ProtocolError> {
        let mut packet = Self::default();
        packet.decode_into(datagram)?;
        Ok(packet)
    }

    /// Decode a datagram, reusing this packet's record storage.
    ///
    /// The length is checked before any field is read. On error the packet
    /// contents are unspecified and must not be applied.
    pub fn decode_into(&mut self, datagram: &[u8]) -> Result<(), ProtocolError> {
        if datagram.len() != PACKET_SIZE {
            return Err(ProtocolError::InvalidLength {
                expected: PACKET_SIZE,
                received: datagram.len(),
            });
        }

        let mut reader = datagram;
        self.total_particle_count = reader.read_u32::<LittleEndian>()?;
        let particle_count = reader.read_u32::<LittleEndian>()? as usize;
        self.t = reader.read_f32::<LittleEndian>()?;
        for v in self.bounds.origin.iter_mut() {
            *v = reader.read_f32::<LittleEndian>()?;
        }
        for v in self.bounds.size.iter_mut() {
            *v = reader.read_f32::<LittleEndian>()?;
        }

        if particle_count > PARTICLES_PER_PACKET {
            return Err(ProtocolError::TooManyRecords {
                count: particle_count,
                max: PARTICLES_PER_PACKET,
            });
        }

        self.records.clear();
        for _ in 0..particle_count {
            let id = reader.read_u32::<LittleEndian>()?;
            let particle_type = reader.read_u16::<LittleEndian>()?;
            let mut position = [0.0f32; 3];
            for v in position.iter_mut() {
                *v = reader.read_f32::<LittleEndian>()?;
            }
            self.records.push(ParticleRecord {
                id,
                particle_type,
                position,
            });
        }

        trace!(
            total = self.total_particle_count,
            count = particle_count,
            t = self.t,
            "Decoded data packet"
        );

        self.validate()
    }

    /// Split a full model into packets of at most [`PARTICLES_PER_PACKET`]
    /// records, all sharing one timestamp and bounding box.
    pub fn chunk_model<'a>(
        total_particle_count: u32,
        t: f32,
        bounds: WorldBounds,
        records: &'a [ParticleRecord],
    ) -> impl Iterator<Item = DataPacket> + 'a {
        records.chunks(PARTICLES_PER_PACKET).map(move |chunk| {
            DataPacket::new(total_particle_count, t, bounds).with_records(chunk.iter().copied())
        })
    }
}

/// Keep-alive message sent to the simulation server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Heartbeat {
    /// Sequence number of this heartbeat
    pub count: u32,
}

impl Heartbeat {
    pub fn new(count: u32) -> Self {
        Self { count }
    }

    pub fn encode(&self) -> [u8; HEARTBEAT_SIZE] {
        self.count.to_le_bytes()
    }

    pub fn decode(datagram: &[u8]) -> Result<Self, ProtocolError> {
        if datagram.len() != HEARTBEAT_SIZE {
            return Err(ProtocolError::InvalidLength {
                expected: HEARTBEAT_SIZE,
                received: datagram.len(),
            });
        }
        let mut reader = datagram;
        Ok(Self {
            count: reader.read_u32::<LittleEndian>()?,
        })
    }
}

/// Sizes that define the wire layout, for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LayoutSummary {
    pub max_datagram_size: usize,
    pub header_size: usize,
    pub record_size: usize,
    pub particles_per_packet: usize,
    pub packet_size: usize,
    pub heartbeat_size: usize,
}

impl fmt::Display for LayoutSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "udp_max_packet_size={} packet_hdr_size={} particle_data_size={} \
             particles_per_packet={} packet_size={} heartbeat_size={}",
            self.max_datagram_size,
            self.header_size,
            self.record_size,
            self.particles_per_packet,
            self.packet_size,
            self.heartbeat_size
        )
    }
}

/// Current wire layout
pub fn layout_summary() -> LayoutSummary {
    LayoutSummary {
        max_datagram_size: MAX_DATAGRAM_SIZE,
        header_size: HEADER_SIZE,
        record_size: RECORD_SIZE,
        particles_per_packet: PARTICLES_PER_PACKET,
        packet_size: PACKET_SIZE,
        heartbeat_size: HEARTBEAT_SIZE,
    }
}

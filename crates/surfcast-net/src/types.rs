//! Shared types for particle data

use serde::{Deserialize, Serialize};

/// Value held by a position slot that has not been written in the current
/// model generation.
pub const UNDEFINED_POSITION: f32 = f32::NAN;

/// Axis-aligned bounding box of the simulated domain, as sent by the server
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WorldBounds {
    /// Minimum corner (x, y, z)
    pub origin: [f32; 3],
    /// Extent along each axis
    pub size: [f32; 3],
}

impl WorldBounds {
    /// Create new world bounds
    pub fn new(origin: [f32; 3], size: [f32; 3]) -> Self {
        Self { origin, size }
    }

    /// Maximum corner (x, y, z)
    pub fn max(&self) -> [f32; 3] {
        [
            self.origin[0] + self.size[0],
            self.origin[1] + self.size[1],
            self.origin[2] + self.size[2],
        ]
    }

    /// Midpoint of the domain in simulation axes
    pub fn center(&self) -> [f32; 3] {
        [
            self.origin[0] + self.size[0] / 2.0,
            self.origin[1] + self.size[1] / 2.0,
            self.origin[2] + self.size[2] / 2.0,
        ]
    }

    /// Midpoint of the domain in the renderer's axes.
    ///
    /// The simulation is z-up while the renderer is y-up, so the second and
    /// third components are swapped.
    pub fn rotation_center(&self) -> [f32; 3] {
        let [cx, cy, cz] = self.center();
        [cx, cz, cy]
    }

    /// Check that the extent is non-negative on every axis
    pub fn is_valid(&self) -> bool {
        self.size.iter().all(|s| *s >= 0.0)
    }
}

/// Kind of particle, as tagged by the simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ParticleType {
    Fluid,
    Boundary,
    Piston,
    Paddle,
    Gate,
    Object,
    TestPoint,
    Surface,
    Unknown(u16),
}

impl ParticleType {
    /// Classify a raw wire discriminator
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            0 => Self::Fluid,
            16 => Self::Boundary,
            32 => Self::Piston,
            48 => Self::Paddle,
            64 => Self::Gate,
            80 => Self::Object,
            96 => Self::TestPoint,
            256 => Self::Surface,
            other => Self::Unknown(other),
        }
    }

    /// Raw wire discriminator
    pub fn as_raw(self) -> u16 {
        match self {
            Self::Fluid => 0,
            Self::Boundary => 16,
            Self::Piston => 32,
            Self::Paddle => 48,
            Self::Gate => 64,
            Self::Object => 80,
            Self::TestPoint => 96,
            Self::Surface => 256,
            Self::Unknown(raw) => raw,
        }
    }

    /// Short lowercase label for status output
    pub fn label(self) -> &'static str {
        match self {
            Self::Fluid => "fluid",
            Self::Boundary => "boundary",
            Self::Piston => "piston",
            Self::Paddle => "paddle",
            Self::Gate => "gate",
            Self::Object => "object",
            Self::TestPoint => "testpoint",
            Self::Surface => "surface",
            Self::Unknown(_) => "unknown",
        }
    }
}

impl From<u16> for ParticleType {
    fn from(raw: u16) -> Self {
        Self::from_raw(raw)
    }
}

//! Shared particle store
//!
//! [`ParticleStore`] holds one model's worth of per-particle arrays and the
//! scalar simulation summary. [`SharedStore`] wraps it in a single mutex with
//! an asymmetric contract:
//!
//! * the data receiver is the only writer and always waits for the lock, so
//!   no update is ever skipped;
//! * readers call [`SharedStore::try_read`] once per frame and skip the frame
//!   when the lock is busy, so a render loop is never paced by the network.
//!
//! The heartbeat counter is kept outside the mutex so the heartbeat sender
//! never contends with either side.

use crate::protocol::{DataPacket, ProtocolError};
use crate::types::{ParticleType, WorldBounds, UNDEFINED_POSITION};
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};
use tracing::{debug, warn};

/// What applying a packet changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApplyOutcome {
    /// The packet started a new model generation
    pub new_generation: bool,
    /// The packet advanced the most recent timestamp
    pub clock_advanced: bool,
    /// Number of particle records written
    pub records_applied: usize,
}

/// Scalar view of the model, used for status output
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModelSummary {
    pub total_particle_count: u32,
    /// Particles written at least once in this generation
    pub populated: usize,
    /// Particles whose last update carries the most recent timestamp
    pub current_timestep_particles: usize,
    /// `current_timestep_particles` as a share of the model, in percent
    pub current_coverage: f64,
    pub most_recent_timestamp: f32,
    pub total_timesteps: u64,
    pub generation: u64,
    pub packets_received: u64,
}

/// Per-particle arrays and simulation summary for one model
#[derive(Debug, Clone)]
pub struct ParticleStore {
    total_particle_count: u32,
    x: Vec<f32>,
    y: Vec<f32>,
    z: Vec<f32>,
    t_per_particle: Vec<f32>,
    particle_type: Vec<u16>,
    most_recent_timestamp: f32,
    total_timesteps: u64,
    bounds: WorldBounds,
    rotation_center: Option<[f32; 3]>,
    packets_received: u64,
    generation: u64,
}

impl Default for ParticleStore {
    fn default() -> Self {
        Self {
            total_particle_count: 0,
            x: Vec::new(),
            y: Vec::new(),
            z: Vec::new(),
            t_per_particle: Vec::new(),
            particle_type: Vec::new(),
            most_recent_timestamp: 0.0,
            total_timesteps: 0,
            bounds: WorldBounds::default(),
            rotation_center: None,
            packets_received: 0,
            generation: 0,
        }
    }
}

impl ParticleStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one packet into the store.
    ///
    /// The packet is validated before anything is touched; a rejected packet
    /// leaves the store exactly as it was.
    pub fn apply(&mut self, packet: &DataPacket) -> Result<ApplyOutcome, ProtocolError> {
        packet.validate()?;

        // latest wins for the clock, but every packet's records are written
        let clock_advanced = packet.t > self.most_recent_timestamp;
        if clock_advanced {
            self.most_recent_timestamp = packet.t;
            self.total_timesteps += 1;
        }

        let new_generation =
            self.generation == 0 || packet.total_particle_count != self.total_particle_count;
        if new_generation {
            self.begin_generation(packet.total_particle_count, packet.bounds);
        }

        for record in &packet.records {
            let id = record.id as usize;
            self.x[id] = record.position[0];
            self.y[id] = record.position[1];
            self.z[id] = record.position[2];
            self.t_per_particle[id] = packet.t;
            self.particle_type[id] = record.particle_type;
        }

        if self.rotation_center.is_none() {
            self.rotation_center = Some(self.bounds.rotation_center());
        }

        self.packets_received += 1;

        Ok(ApplyOutcome {
            new_generation,
            clock_advanced,
            records_applied: packet.records.len(),
        })
    }

    fn begin_generation(&mut self, total_particle_count: u32, bounds: WorldBounds) {
        let n = total_particle_count as usize;
        self.x = vec![UNDEFINED_POSITION; n];
        self.y = vec![UNDEFINED_POSITION; n];
        self.z = vec![UNDEFINED_POSITION; n];
        self.t_per_particle = vec![0.0; n];
        self.particle_type = vec![0; n];
        self.total_particle_count = total_particle_count;
        self.bounds = bounds;
        self.rotation_center = None;
        self.generation += 1;

        debug!(
            generation = self.generation,
            particles = total_particle_count,
            origin = ?bounds.origin,
            size = ?bounds.size,
            "New model generation"
        );
        if !bounds.is_valid() {
            warn!(size = ?bounds.size, "Model bounds have a negative extent");
        }
    }

    pub fn total_particle_count(&self) -> u32 {
        self.total_particle_count
    }

    pub fn x(&self) -> &[f32] {
        &self.x
    }

    pub fn y(&self) -> &[f32] {
        &self.y
    }

    pub fn z(&self) -> &[f32] {
        &self.z
    }

    /// Timestamp of the packet that last wrote each particle
    pub fn t_per_particle(&self) -> &[f32] {
        &self.t_per_particle
    }

    /// Raw type discriminator of each particle
    pub fn particle_type(&self) -> &[u16] {
        &self.particle_type
    }

    /// Position of one particle, or `None` if it is out of range or has not
    /// been written in this generation
    pub fn position(&self, id: usize) -> Option<[f32; 3]> {
        let x = *self.x.get(id)?;
        if x.is_nan() {
            return None;
        }
        Some([x, self.y[id], self.z[id]])
    }

    pub fn most_recent_timestamp(&self) -> f32 {
        self.most_recent_timestamp
    }

    /// Number of strict increases of the timestamp seen so far
    pub fn total_timesteps(&self) -> u64 {
        self.total_timesteps
    }

    pub fn world_bounds(&self) -> WorldBounds {
        self.bounds
    }

    pub fn world_origin(&self) -> [f32; 3] {
        self.bounds.origin
    }

    pub fn world_size(&self) -> [f32; 3] {
        self.bounds.size
    }

    /// Pivot derived from the bounds of the current generation's first packet
    pub fn rotation_center(&self) -> Option<[f32; 3]> {
        self.rotation_center
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received
    }

    /// Incremented on every model change; 0 until the first packet
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn populated_count(&self) -> usize {
        self.x.iter().filter(|x| !x.is_nan()).count()
    }

    /// Populated particles per type
    pub fn type_histogram(&self) -> BTreeMap<ParticleType, usize> {
        let mut histogram = BTreeMap::new();
        for (x, raw) in self.x.iter().zip(&self.particle_type) {
            if !x.is_nan() {
                *histogram.entry(ParticleType::from_raw(*raw)).or_insert(0) += 1;
            }
        }
        histogram
    }

    pub fn summary(&self) -> ModelSummary {
        let mut populated = 0;
        let mut current = 0;
        for (x, t) in self.x.iter().zip(&self.t_per_particle) {
            if !x.is_nan() {
                populated += 1;
                if *t == self.most_recent_timestamp {
                    current += 1;
                }
            }
        }

        let current_coverage = if self.total_particle_count == 0 {
            0.0
        } else {
            current as f64 / self.total_particle_count as f64 * 100.0
        };

        ModelSummary {
            total_particle_count: self.total_particle_count,
            populated,
            current_timestep_particles: current,
            current_coverage,
            most_recent_timestamp: self.most_recent_timestamp,
            total_timesteps: self.total_timesteps,
            generation: self.generation,
            packets_received: self.packets_received,
        }
    }
}

/// [`ParticleStore`] shared between the data receiver and its readers
#[derive(Debug, Default)]
pub struct SharedStore {
    state: Mutex<ParticleStore>,
    heartbeats_sent: AtomicU64,
}

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writer path: wait for the lock and merge the packet
    pub fn apply(&self, packet: &DataPacket) -> Result<ApplyOutcome, ProtocolError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.apply(packet)
    }

    /// Reader path: one non-blocking attempt.
    ///
    /// Returns `None` when the writer holds the lock; the caller should skip
    /// this frame rather than wait.
    pub fn try_read(&self) -> Option<StoreView<'_>> {
        let state = match self.state.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return None,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        Some(self.view(state))
    }

    /// Blocking read, for callers that are not frame-bound
    pub fn read(&self) -> StoreView<'_> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.view(state)
    }

    fn view<'a>(&self, state: MutexGuard<'a, ParticleStore>) -> StoreView<'a> {
        StoreView {
            state,
            heartbeats_sent: self.heartbeats_sent(),
        }
    }

    /// Count one heartbeat; returns the new total
    pub fn record_heartbeat(&self) -> u64 {
        self.heartbeats_sent.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn heartbeats_sent(&self) -> u64 {
        self.heartbeats_sent.load(Ordering::Relaxed)
    }
}

/// Lock-protected view of the store; the lock is released on drop
pub struct StoreView<'a> {
    state: MutexGuard<'a, ParticleStore>,
    heartbeats_sent: u64,
}

impl StoreView<'_> {
    pub fn heartbeats_sent(&self) -> u64 {
        self.heartbeats_sent
    }

    /// Copy the model out so the lock can be released early
    pub fn to_snapshot(&self) -> ParticleStore {
        (*self.state).clone()
    }
}

impl Deref for StoreView<'_> {
    type Target = ParticleStore;

    fn deref(&self) -> &ParticleStore {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ParticleRecord;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;

    fn bounds() -> WorldBounds {
        WorldBounds::new([0.0, 0.0, 0.0], [10.0, 20.0, 30.0])
    }

    fn packet(total: u32, t: f32, ids: std::ops::Range<u32>) -> DataPacket {
        DataPacket::new(total, t, bounds()).with_records(
            ids.map(|id| ParticleRecord::new(id, ParticleType::Fluid, [id as f32, 1.0, 2.0])),
        )
    }

    /// Apply a logical group of up to 79-record packets covering `ids`
    fn apply_ids(store: &mut ParticleStore, total: u32, t: f32, ids: std::ops::Range<u32>) -> u64 {
        let records: Vec<_> = ids
            .map(|id| ParticleRecord::new(id, ParticleType::Fluid, [id as f32, 1.0, 2.0]))
            .collect();
        let mut applied = 0;
        for p in DataPacket::chunk_model(total, t, bounds(), &records) {
            store.apply(&p).unwrap();
            applied += 1;
        }
        applied
    }

    #[test]
    fn test_empty_store() {
        let store = ParticleStore::new();
        assert_eq!(store.total_particle_count(), 0);
        assert!(store.x().is_empty());
        assert_eq!(store.generation(), 0);
        assert_eq!(store.rotation_center(), None);
        assert_eq!(store.position(0), None);
    }

    #[test]
    fn test_first_packet_populates_partial_model() {
        let mut store = ParticleStore::new();
        let outcome = store.apply(&packet(100, 1.0, 0..50)).unwrap();

        assert!(outcome.new_generation);
        assert!(outcome.clock_advanced);
        assert_eq!(outcome.records_applied, 50);

        assert_eq!(store.total_particle_count(), 100);
        assert_eq!(store.x().len(), 100);
        assert_eq!(store.position(49), Some([49.0, 1.0, 2.0]));
        assert_eq!(store.position(50), None);
        assert!(store.x()[99].is_nan());
        assert_eq!(store.most_recent_timestamp(), 1.0);
        assert_eq!(store.total_timesteps(), 1);
        assert_eq!(store.packets_received(), 1);
    }

    #[test]
    fn test_second_slice_completes_model() {
        let mut store = ParticleStore::new();
        store.apply(&packet(100, 1.0, 0..50)).unwrap();
        let outcome = store.apply(&packet(100, 1.0, 50..99)).unwrap();
        store.apply(&packet(100, 1.0, 99..100)).unwrap();

        assert!(!outcome.new_generation);
        assert!(!outcome.clock_advanced);
        assert_eq!(store.populated_count(), 100);
        assert_eq!(store.most_recent_timestamp(), 1.0);
        assert_eq!(store.total_timesteps(), 1);
        assert_eq!(store.packets_received(), 3);
        assert_eq!(store.generation(), 1);
    }

    #[test]
    fn test_model_change_reallocates_at_sentinel() {
        let mut store = ParticleStore::new();
        apply_ids(&mut store, 100, 1.0, 0..100);
        let first_center = store.rotation_center();

        let new_bounds = WorldBounds::new([-5.0, -5.0, -5.0], [10.0, 10.0, 40.0]);
        let next = DataPacket::new(200, 2.0, new_bounds)
            .with_records([ParticleRecord::new(150, ParticleType::Boundary, [3.0, 3.0, 3.0])]);
        let outcome = store.apply(&next).unwrap();

        assert!(outcome.new_generation);
        assert_eq!(store.total_particle_count(), 200);
        assert_eq!(store.x().len(), 200);
        assert_eq!(store.y().len(), 200);
        assert_eq!(store.z().len(), 200);
        assert_eq!(store.t_per_particle().len(), 200);
        assert_eq!(store.particle_type().len(), 200);

        // nothing carried over from the previous generation
        assert_eq!(store.populated_count(), 1);
        assert_eq!(store.position(0), None);
        assert_eq!(store.position(150), Some([3.0, 3.0, 3.0]));
        assert_eq!(store.particle_type()[150], 16);

        assert_eq!(store.world_origin(), [-5.0, -5.0, -5.0]);
        assert_eq!(store.world_size(), [10.0, 10.0, 40.0]);
        assert_eq!(store.rotation_center(), Some([0.0, 15.0, 0.0]));
        assert_ne!(store.rotation_center(), first_center);
        assert_eq!(store.generation(), 2);
    }

    #[test]
    fn test_timestamp_monotonicity() {
        let mut store = ParticleStore::new();
        for t in [5.0, 2.0, 8.0, 3.0] {
            store.apply(&packet(10, t, 0..1)).unwrap();
        }
        assert_eq!(store.most_recent_timestamp(), 8.0);
        assert_eq!(store.total_timesteps(), 2);
        assert_eq!(store.packets_received(), 4);
    }

    #[test]
    fn test_stale_packet_still_writes_positions() {
        let mut store = ParticleStore::new();
        store.apply(&packet(10, 5.0, 0..1)).unwrap();

        let stale = DataPacket::new(10, 1.0, bounds())
            .with_records([ParticleRecord::new(0, ParticleType::Fluid, [9.0, 9.0, 9.0])]);
        let outcome = store.apply(&stale).unwrap();

        assert!(!outcome.clock_advanced);
        assert_eq!(store.position(0), Some([9.0, 9.0, 9.0]));
        assert_eq!(store.t_per_particle()[0], 1.0);
        assert_eq!(store.most_recent_timestamp(), 5.0);
    }

    #[test]
    fn test_rotation_center_stable_within_generation() {
        let mut store = ParticleStore::new();
        store.apply(&packet(10, 1.0, 0..5)).unwrap();
        let center = store.rotation_center();
        assert_eq!(center, Some([5.0, 15.0, 10.0]));

        let moved = DataPacket::new(10, 2.0, WorldBounds::new([100.0; 3], [1.0; 3]))
            .with_records([ParticleRecord::new(5, ParticleType::Fluid, [0.0; 3])]);
        store.apply(&moved).unwrap();

        assert_eq!(store.rotation_center(), center);
        assert_eq!(store.world_origin(), [0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_rejected_packet_leaves_store_untouched() {
        let mut store = ParticleStore::new();
        store.apply(&packet(10, 1.0, 0..3)).unwrap();

        let bad = DataPacket::new(10, 9.0, bounds()).with_records([
            ParticleRecord::new(4, ParticleType::Fluid, [0.0; 3]),
            ParticleRecord::new(10, ParticleType::Fluid, [0.0; 3]),
        ]);
        assert!(matches!(
            store.apply(&bad),
            Err(ProtocolError::ParticleIdOutOfRange { id: 10, total: 10 })
        ));

        assert_eq!(store.most_recent_timestamp(), 1.0);
        assert_eq!(store.total_timesteps(), 1);
        assert_eq!(store.packets_received(), 1);
        assert_eq!(store.position(4), None);
    }

    #[test]
    fn test_summary_and_histogram() {
        let mut store = ParticleStore::new();
        store.apply(&packet(10, 1.0, 0..4)).unwrap();
        let boundary = DataPacket::new(10, 2.0, bounds()).with_records([
            ParticleRecord::new(8, ParticleType::Boundary, [0.0; 3]),
            ParticleRecord::new(9, ParticleType::Surface, [0.0; 3]),
        ]);
        store.apply(&boundary).unwrap();

        let summary = store.summary();
        assert_eq!(summary.total_particle_count, 10);
        assert_eq!(summary.populated, 6);
        assert_eq!(summary.current_timestep_particles, 2);
        assert!((summary.current_coverage - 20.0).abs() < 1e-9);
        assert_eq!(summary.total_timesteps, 2);

        let histogram = store.type_histogram();
        assert_eq!(histogram[&ParticleType::Fluid], 4);
        assert_eq!(histogram[&ParticleType::Boundary], 1);
        assert_eq!(histogram[&ParticleType::Surface], 1);
        assert!(!histogram.contains_key(&ParticleType::Gate));
    }

    #[test]
    fn test_try_read_skips_while_locked() {
        let shared = SharedStore::new();
        shared.apply(&packet(10, 1.0, 0..1)).unwrap();

        let held = shared.read();
        assert!(shared.try_read().is_none());
        drop(held);

        let view = shared.try_read().expect("lock should be free");
        assert_eq!(view.total_particle_count(), 10);
    }

    #[test]
    fn test_heartbeat_counter_visible_in_view() {
        let shared = SharedStore::new();
        assert_eq!(shared.record_heartbeat(), 1);
        assert_eq!(shared.record_heartbeat(), 2);
        assert_eq!(shared.read().heartbeats_sent(), 2);
    }

    #[test]
    fn test_poisoned_lock_is_recovered() {
        let shared = Arc::new(SharedStore::new());
        shared.apply(&packet(10, 1.0, 0..2)).unwrap();

        let reader = Arc::clone(&shared);
        let result = thread::spawn(move || {
            let _view = reader.read();
            panic!("reader died holding the store");
        })
        .join();
        assert!(result.is_err());
        assert!(shared.state.is_poisoned());

        let view = shared.try_read().expect("poisoned lock should still be usable");
        assert_eq!(view.populated_count(), 2);
        drop(view);

        let outcome = shared.apply(&packet(10, 2.0, 2..5)).unwrap();
        assert!(!outcome.new_generation);

        let view = shared.read();
        assert_eq!(view.populated_count(), 5);
        assert_eq!(view.most_recent_timestamp(), 2.0);
    }

    #[test]
    fn test_negative_extent_still_starts_generation() {
        let mut store = ParticleStore::new();
        let inverted = WorldBounds::new([0.0; 3], [1.0, -2.0, 1.0]);
        let outcome = store
            .apply(
                &DataPacket::new(3, 0.5, inverted)
                    .with_records([ParticleRecord::new(0, ParticleType::Fluid, [0.0; 3])]),
            )
            .unwrap();

        assert!(outcome.new_generation);
        assert_eq!(store.world_bounds(), inverted);
        assert_eq!(store.rotation_center(), Some([0.5, 0.5, -1.0]));
    }

    #[test]
    fn test_no_torn_reads_under_concurrency() {
        let shared = Arc::new(SharedStore::new());
        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                for i in 0..2_000u32 {
                    // alternate model sizes so every few packets reallocate
                    let total = if (i / 7) % 2 == 0 { 100 } else { 250 };
                    let p = packet(total, i as f32, (i % 20)..(i % 20 + 50));
                    shared.apply(&p).unwrap();
                }
            })
        };

        let reader = {
            let shared = Arc::clone(&shared);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut observed = 0u64;
                while !done.load(Ordering::Relaxed) {
                    if let Some(view) = shared.try_read() {
                        let n = view.total_particle_count() as usize;
                        assert_eq!(view.x().len(), n);
                        assert_eq!(view.y().len(), n);
                        assert_eq!(view.z().len(), n);
                        assert_eq!(view.t_per_particle().len(), n);
                        assert_eq!(view.particle_type().len(), n);
                        observed += 1;
                    }
                }
                observed
            })
        };

        writer.join().unwrap();
        done.store(true, Ordering::Relaxed);
        reader.join().unwrap();

        let view = shared.read();
        assert_eq!(view.packets_received(), 2_000);
        assert_eq!(view.most_recent_timestamp(), 1_999.0);
    }

    #[test]
    fn test_snapshot_outlives_view() {
        let shared = SharedStore::new();
        shared.apply(&packet(10, 1.0, 0..2)).unwrap();
        let snapshot = shared.read().to_snapshot();
        shared.apply(&packet(20, 2.0, 0..2)).unwrap();

        assert_eq!(snapshot.total_particle_count(), 10);
        assert_eq!(shared.read().total_particle_count(), 20);
    }
}

//! Frame-paced consumer loop

use crate::settings::ViewerSettings;
use crate::status::{status_lines, Endpoints, FrameCounter};
use std::thread;
use std::time::{Duration, Instant};
use surfcast_net::{IngestClient, ShutdownSignal};
use tracing::{debug, info, warn};

/// How the consumer loop paces itself and what it reports
#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    pub frame_interval: Duration,
    pub status_interval: Duration,
    /// Stop after this long; `None` runs until signalled
    pub run_for: Option<Duration>,
    pub viewer: ViewerSettings,
    pub endpoints: Endpoints,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Interrupted,
    DurationElapsed,
    /// A network worker left its loop on its own
    WorkerStopped,
}

#[derive(Debug, Clone, Copy)]
pub struct ConsumerReport {
    pub frames: FrameCounter,
    pub last_generation: u64,
    pub stopped_by: StopReason,
}

/// Poll the store each frame until `stop` fires, the run time is up, or a
/// worker exits.
pub fn run(client: &IngestClient, options: &ConsumerOptions, stop: &ShutdownSignal) -> ConsumerReport {
    let started = Instant::now();
    let mut last_status = started;
    let mut frames = FrameCounter::default();
    let mut generation = 0;

    let stopped_by = loop {
        if stop.is_triggered() {
            break StopReason::Interrupted;
        }
        if options.run_for.is_some_and(|limit| started.elapsed() >= limit) {
            break StopReason::DurationElapsed;
        }
        if client.has_stopped_worker() {
            warn!("A network worker stopped, shutting down");
            break StopReason::WorkerStopped;
        }

        match client.store().try_read() {
            Some(view) => {
                frames.record(true);

                let changed = (view.generation() != generation)
                    .then(|| (view.generation(), view.total_particle_count(), view.world_bounds()));
                let lines = (last_status.elapsed() >= options.status_interval)
                    .then(|| status_lines(&view, &options.endpoints, &options.viewer, &frames));
                // never log while holding the store
                drop(view);

                if let Some((new_generation, total, bounds)) = changed {
                    generation = new_generation;
                    info!(
                        "Model generation {}: {} particles, origin {:?}, size {:?}",
                        generation, total, bounds.origin, bounds.size
                    );
                }

                if let Some(lines) = lines {
                    for line in lines {
                        info!("{}", line);
                    }
                    last_status = Instant::now();
                }
            }
            None => {
                frames.record(false);
                debug!("Store busy, skipping frame {}", frames.frames);
            }
        }

        thread::sleep(options.frame_interval);
    };

    info!(
        "Consumer stopped ({:?}) after {} frames, {} skipped",
        stopped_by, frames.frames, frames.skipped
    );

    ConsumerReport {
        frames,
        last_generation: generation,
        stopped_by,
    }
}

//! Status lines, the text form of a renderer's heads-up display

use crate::settings::{ColorSettings, ViewerSettings};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::net::SocketAddr;
use surfcast_net::{ModelSummary, ParticleType, StoreView};

/// Frames polled and frames skipped because the store was busy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCounter {
    pub frames: u64,
    pub skipped: u64,
}

impl FrameCounter {
    pub fn record(&mut self, got_view: bool) {
        self.frames += 1;
        if !got_view {
            self.skipped += 1;
        }
    }

    pub fn skip_percent(&self) -> f64 {
        if self.frames == 0 {
            0.0
        } else {
            self.skipped as f64 / self.frames as f64 * 100.0
        }
    }
}

/// Endpoints shown on the network line
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub server_host: String,
    pub server_port: u16,
    pub data_addr: SocketAddr,
}

pub fn network_line(endpoints: &Endpoints, heartbeats_sent: u64, packets_received: u64) -> String {
    format!(
        "network: outgoing({}:{}:{}) incoming({}:{}:{})",
        endpoints.server_host,
        endpoints.server_port,
        heartbeats_sent,
        endpoints.data_addr.ip(),
        endpoints.data_addr.port(),
        packets_received
    )
}

pub fn model_line(summary: &ModelSummary) -> String {
    format!(
        "model: particles({}, {}, {:.2}%) time({:.3}s) steps({}) gen({})",
        summary.total_particle_count,
        summary.current_timestep_particles,
        summary.current_coverage,
        summary.most_recent_timestamp,
        summary.total_timesteps,
        summary.generation
    )
}

/// Eye and target come from the viewer settings. The renderer's y-up frame
/// swaps y and z, so they are printed in model order here.
pub fn camera_line(viewer: &ViewerSettings, rotation_center: Option<[f32; 3]>) -> String {
    let eye = viewer.eye();
    let target = viewer.target();
    let center = rotation_center.unwrap_or([0.0; 3]);
    format!(
        "camera: eye({:.2}, {:.2}, {:.2}) eye_ctr({:.2}, {:.2}, {:.2}) rot_ctr({:.2}, {:.2}, {:.2})",
        eye[0], eye[2], eye[1], target[0], target[2], target[1], center[0], center[2], center[1]
    )
}

pub fn types_line(histogram: &BTreeMap<ParticleType, usize>) -> String {
    let mut line = String::from("types:");
    if histogram.is_empty() {
        line.push_str(" none");
    }
    for (kind, count) in histogram {
        match kind {
            ParticleType::Unknown(raw) => {
                let _ = write!(line, " unknown[{raw}]={count}");
            }
            known => {
                let _ = write!(line, " {}={count}", known.label());
            }
        }
    }
    line
}

/// Draw colour of each type present in the model
pub fn colors_line(colors: &ColorSettings, histogram: &BTreeMap<ParticleType, usize>) -> String {
    let mut line = String::from("colors:");
    if histogram.is_empty() {
        line.push_str(" none");
    }
    for kind in histogram.keys() {
        let [r, g, b] = colors.color_for(*kind);
        let label = match kind {
            ParticleType::Unknown(raw) => format!("unknown[{raw}]"),
            known => known.label().to_string(),
        };
        let _ = write!(line, " {label}({r:.2}, {g:.2}, {b:.2})");
    }
    line
}

pub fn frames_line(frames: &FrameCounter) -> String {
    format!(
        "frames: polled({}) skipped({}, {:.1}%)",
        frames.frames,
        frames.skipped,
        frames.skip_percent()
    )
}

/// Every status line for one view of the store
pub fn status_lines(
    view: &StoreView<'_>,
    endpoints: &Endpoints,
    viewer: &ViewerSettings,
    frames: &FrameCounter,
) -> Vec<String> {
    let summary = view.summary();
    let histogram = view.type_histogram();
    vec![
        network_line(endpoints, view.heartbeats_sent(), summary.packets_received),
        model_line(&summary),
        camera_line(viewer, view.rotation_center()),
        types_line(&histogram),
        colors_line(&viewer.colors(), &histogram),
        frames_line(frames),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use surfcast_net::{DataPacket, ParticleRecord, SharedStore, WorldBounds};

    fn endpoints() -> Endpoints {
        Endpoints {
            server_host: "127.0.0.1".to_string(),
            server_port: 50001,
            data_addr: "0.0.0.0:50000".parse().unwrap(),
        }
    }

    #[test]
    fn test_network_line() {
        assert_eq!(
            network_line(&endpoints(), 3, 42),
            "network: outgoing(127.0.0.1:50001:3) incoming(0.0.0.0:50000:42)"
        );
    }

    #[test]
    fn test_model_line_with_partial_timestep() {
        let store = SharedStore::new();
        let bounds = WorldBounds::new([0.0; 3], [2.0, 4.0, 6.0]);
        store
            .apply(&DataPacket::new(4, 1.0, bounds).with_records(
                (0..4).map(|id| ParticleRecord::new(id, ParticleType::Fluid, [0.0; 3])),
            ))
            .unwrap();
        store
            .apply(
                &DataPacket::new(4, 2.0, bounds)
                    .with_records([ParticleRecord::new(1, ParticleType::Gate, [1.0; 3])]),
            )
            .unwrap();

        let view = store.read();
        assert_eq!(
            model_line(&view.summary()),
            "model: particles(4, 1, 25.00%) time(2.000s) steps(2) gen(1)"
        );
        assert_eq!(types_line(&view.type_histogram()), "types: fluid=3 gate=1");
    }

    #[test]
    fn test_camera_line_swaps_axes() {
        let viewer = Settings::default().viewer();
        let line = camera_line(&viewer, Some([1.0, 2.0, 3.0]));
        assert_eq!(
            line,
            "camera: eye(1.00, 1.00, 1.00) eye_ctr(0.00, 0.00, 0.00) rot_ctr(1.00, 3.00, 2.00)"
        );
    }

    #[test]
    fn test_types_line_unknown_and_empty() {
        assert_eq!(types_line(&BTreeMap::new()), "types: none");

        let mut histogram = BTreeMap::new();
        histogram.insert(ParticleType::Unknown(7), 2);
        assert_eq!(types_line(&histogram), "types: unknown[7]=2");
    }

    #[test]
    fn test_colors_line_uses_viewer_palette() {
        let settings: Settings =
            toml::from_str("[viewer.colors]\ngate = [0.25, 0.5, 0.75]\n").unwrap();
        let mut histogram = BTreeMap::new();
        histogram.insert(ParticleType::Fluid, 3);
        histogram.insert(ParticleType::Gate, 1);
        histogram.insert(ParticleType::Unknown(7), 1);

        assert_eq!(
            colors_line(&settings.viewer().colors(), &histogram),
            "colors: fluid(0.00, 0.00, 1.00) gate(0.25, 0.50, 0.75) unknown[7](1.00, 1.00, 1.00)"
        );
    }

    #[test]
    fn test_frame_counter() {
        let mut frames = FrameCounter::default();
        frames.record(true);
        frames.record(false);
        frames.record(true);
        frames.record(true);
        assert_eq!(frames.skipped, 1);
        assert_eq!(frames_line(&frames), "frames: polled(4) skipped(1, 25.0%)");
    }

    #[test]
    fn test_status_lines_for_empty_store() {
        let store = SharedStore::new();
        let lines = status_lines(
            &store.read(),
            &endpoints(),
            &Settings::default().viewer(),
            &FrameCounter::default(),
        );
        assert_eq!(lines.len(), 6);
        assert!(lines[1].starts_with("model: particles(0, 0, 0.00%)"));
        assert_eq!(lines[4], "colors: none");
    }
}

use crate::settings::{NetworkSettings, Settings};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "surfcast")]
#[command(version, about = "Live particle stream client", long_about = None)]
pub struct Args {
    /// Simulation server host
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// Simulation server port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Local host to bind for incoming data
    #[arg(short = 't', long)]
    pub in_host: Option<String>,

    /// Local port to bind for incoming data
    #[arg(short = 'r', long)]
    pub in_port: Option<u16>,

    /// UDP receive buffer size in bytes
    #[arg(short, long)]
    pub udp_size: Option<usize>,

    /// Seconds between heartbeats
    #[arg(long)]
    pub ttl: Option<f64>,

    /// Grow the receive buffer to fit each new model
    #[arg(long)]
    pub apply_recommended_buffer: bool,

    /// Stop after this many seconds
    #[arg(long)]
    pub duration: Option<f64>,

    /// Milliseconds between status reports
    #[arg(long, default_value = "1000")]
    pub status_interval: u64,

    /// Milliseconds between store polls
    #[arg(long, default_value = "16")]
    pub frame_interval: u64,

    /// Extra settings file, applied after the user and local files
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Write default settings to the user settings file and exit
    #[arg(long)]
    pub write_config: bool,

    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    pub fn parse_args() -> Self {
        Args::parse()
    }

    /// Flags as the topmost settings layer
    pub fn settings_layer(&self) -> Settings {
        Settings {
            network: Some(NetworkSettings {
                host: self.host.clone(),
                port: self.port,
                in_host: self.in_host.clone(),
                in_port: self.in_port,
                udp_size: self.udp_size,
                heartbeat_ttl: self.ttl,
                apply_recommended_buffer: self.apply_recommended_buffer.then_some(true),
            }),
            viewer: None,
        }
    }

    /// Default tracing filter for the verbosity count
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    pub fn run_for(&self) -> Option<Duration> {
        self.duration
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval)
    }
}

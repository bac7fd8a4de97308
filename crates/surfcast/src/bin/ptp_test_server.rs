use clap::Parser;
use std::process::ExitCode;
use std::time::Duration;
use surfcast::test_server::{TestServer, TestServerConfig};
use surfcast_net::ShutdownSignal;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Test server - streams a synthetic particle model to whoever sends heartbeats"
)]
struct Args {
    /// Local host to listen on
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to receive heartbeats on
    #[arg(short, long, default_value = "50001")]
    port: u16,

    /// Client data port to stream to
    #[arg(short = 'c', long, default_value = "50000")]
    client_port: u16,

    /// Number of particles in the model
    #[arg(short = 'n', long, default_value = "10000")]
    particles: u32,

    /// Timesteps per second
    #[arg(short, long, default_value = "10")]
    rate: f64,

    /// Seconds without a heartbeat before streaming stops
    #[arg(long, default_value = "15")]
    client_timeout: u64,

    /// Fraction of packets to skip, 0.0 to 1.0
    #[arg(long, default_value = "0.0")]
    drop_rate: f64,

    /// Verbose output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if !(0.0..=1.0).contains(&args.drop_rate) {
        error!("--drop-rate must be between 0.0 and 1.0");
        return ExitCode::FAILURE;
    }
    if args.rate <= 0.0 {
        error!("--rate must be positive");
        return ExitCode::FAILURE;
    }

    let config = TestServerConfig {
        host: args.host,
        port: args.port,
        client_port: args.client_port,
        particles: args.particles,
        rate: args.rate,
        client_timeout: Duration::from_secs(args.client_timeout),
        drop_rate: args.drop_rate,
        ..Default::default()
    };

    let mut server = match TestServer::bind(config) {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to bind: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let stop = ShutdownSignal::new();
    let handler_signal = stop.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_signal.trigger()) {
        warn!("Failed to install Ctrl-C handler: {}", e);
    }

    match server.run(&stop) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Test server failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

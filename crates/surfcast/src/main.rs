use std::path::Path;
use std::process::ExitCode;
use surfcast::cli::Args;
use surfcast::consumer::{self, ConsumerOptions};
use surfcast::settings::{self, Settings};
use surfcast::status::Endpoints;
use surfcast_net::{layout_summary, IngestClient, ShutdownSignal};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let args = Args::parse_args();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_level()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if args.write_config {
        return match settings::write_user_defaults() {
            Ok(path) => {
                info!("Wrote default settings to {:?}", path);
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("{}", e);
                ExitCode::FAILURE
            }
        };
    }

    let user_dir = settings::user_settings_dir();
    let file_settings =
        match Settings::load_layered(user_dir.as_deref(), Path::new("."), args.config.as_deref()) {
            Ok(settings) => settings,
            Err(e) => {
                error!("{}", e);
                return ExitCode::FAILURE;
            }
        };
    let settings = file_settings.merge(args.settings_layer());
    let config = settings.client_config();

    debug!("Wire layout: {}", layout_summary());
    debug!("Client configuration: {:?}", config);
    debug!("Viewer settings: {:?}", settings.viewer());

    let server_host = config.sender.host.clone();
    let server_port = config.sender.port;

    let client = match IngestClient::start(config) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to start: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let stop = ShutdownSignal::new();
    let handler_signal = stop.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_signal.trigger()) {
        warn!("Failed to install Ctrl-C handler: {}", e);
    }

    let options = ConsumerOptions {
        frame_interval: args.frame_interval(),
        status_interval: args.status_interval(),
        run_for: args.run_for(),
        viewer: settings.viewer(),
        endpoints: Endpoints {
            server_host,
            server_port,
            data_addr: client.data_addr(),
        },
    };

    let consumer_report = consumer::run(&client, &options, &stop);

    let summary = client.store().read().summary();
    let report = client.shutdown();

    info!(
        "Final model: {} particles, {} populated, t={:.3}s, {} timesteps, {} packets",
        summary.total_particle_count,
        summary.populated,
        summary.most_recent_timestamp,
        summary.total_timesteps,
        summary.packets_received
    );
    match &report.receiver {
        Ok(stats) => info!(
            "Receiver: {} datagrams, {} bytes, {} applied, {} rejected, {} dropped, buffer {:?} (recommended {:?})",
            stats.datagrams_received,
            stats.bytes_received,
            stats.packets_applied,
            stats.packets_rejected,
            stats.datagrams_dropped,
            stats.recv_buffer_size,
            stats.recommended_recv_buffer
        ),
        Err(e) => error!("Receiver: {}", e),
    }
    match &report.sender {
        Ok(stats) => info!(
            "Heartbeats: {} sent to {}, {} failed",
            stats.heartbeats_sent, stats.server_addr, stats.send_failures
        ),
        Err(e) => error!("Heartbeat sender: {}", e),
    }
    debug!("Consumer: {:?}", consumer_report);

    if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

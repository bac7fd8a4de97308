//! End-to-end tests: test server, ingest client and consumer loop on loopback

use std::io;
use std::thread;
use std::time::{Duration, Instant};
use surfcast::consumer::{self, ConsumerOptions, StopReason};
use surfcast::settings::Settings;
use surfcast::status::Endpoints;
use surfcast::test_server::{TestServer, TestServerConfig};
use surfcast_net::{
    ClientConfig, DataPacket, IngestClient, ParticleRecord, ParticleType, ShutdownSignal,
    WorkerHandle, WorldBounds,
};

fn loopback_settings(server_port: u16) -> ClientConfig {
    let settings: Settings = toml::from_str(&format!(
        "[network]\nhost = \"127.0.0.1\"\nport = {server_port}\nin_host = \"127.0.0.1\"\nin_port = 0\nudp_size = 1048576\nheartbeat_ttl = 0.05\n"
    ))
    .unwrap();
    settings.client_config()
}

fn start_server(
    particles: u32,
    drop_rate: f64,
) -> (TestServer, u16) {
    let server = TestServer::bind(TestServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        particles,
        rate: 50.0,
        client_timeout: Duration::from_secs(2),
        drop_rate,
        seed: 7,
        ..Default::default()
    })
    .unwrap();
    let port = server.local_addr().unwrap().port();
    (server, port)
}

fn spawn_server(mut server: TestServer) -> WorkerHandle<std::io::Result<surfcast::test_server::TestServerStats>> {
    WorkerHandle::spawn("test-server", move |stop| server.run(&stop)).unwrap()
}

fn wait_until(mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "Timed out");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_client_receives_full_model_from_test_server() {
    let (mut server, server_port) = start_server(400, 0.0);
    let client = IngestClient::start(loopback_settings(server_port)).unwrap();
    server.set_client_port(client.data_addr().port());
    let server = spawn_server(server);

    wait_until(|| client.store().read().populated_count() == 400);

    {
        let view = client.store().read();
        assert_eq!(view.total_particle_count(), 400);
        assert_eq!(view.generation(), 1);
        assert!(view.total_timesteps() >= 1);
        let histogram = view.type_histogram();
        // 8x8x8 grid holding 400 particles: 64 on the floor
        assert_eq!(histogram.get(&ParticleType::Boundary), Some(&64));
        assert!(view.rotation_center().is_some());
        assert!(view.heartbeats_sent() >= 1);
    }

    let stats = server.shutdown().unwrap().unwrap();
    assert!(stats.heartbeats_received >= 1);
    assert!(stats.packets_sent >= 6);

    let report = client.shutdown();
    assert!(report.is_clean());
    assert_eq!(report.receiver.unwrap().packets_rejected, 0);
}

#[test]
fn test_dropped_packets_show_as_partial_coverage() {
    let (mut server, server_port) = start_server(2000, 0.5);
    let client = IngestClient::start(loopback_settings(server_port)).unwrap();
    server.set_client_port(client.data_addr().port());
    let server = spawn_server(server);

    wait_until(|| client.store().read().packets_received() >= 20);

    let summary = client.store().read().summary();
    assert_eq!(summary.total_particle_count, 2000);
    assert!(summary.current_timestep_particles <= 2000);

    let stats = server.shutdown().unwrap().unwrap();
    assert!(stats.packets_skipped > 0);
    client.shutdown();
}

#[test]
fn test_consumer_loop_stops_after_duration() {
    let (mut server, server_port) = start_server(100, 0.0);
    let client = IngestClient::start(loopback_settings(server_port)).unwrap();
    server.set_client_port(client.data_addr().port());
    let server = spawn_server(server);

    let options = ConsumerOptions {
        frame_interval: Duration::from_millis(5),
        status_interval: Duration::from_millis(50),
        run_for: Some(Duration::from_millis(400)),
        viewer: Settings::default().viewer(),
        endpoints: Endpoints {
            server_host: "127.0.0.1".to_string(),
            server_port,
            data_addr: client.data_addr(),
        },
    };

    let report = consumer::run(&client, &options, &ShutdownSignal::new());
    assert_eq!(report.stopped_by, StopReason::DurationElapsed);
    assert!(report.frames.frames > 10);
    assert!(report.frames.skipped <= report.frames.frames);
    assert_eq!(report.last_generation, 1);

    server.shutdown().unwrap().unwrap();
    assert!(client.shutdown().is_clean());
}

#[test]
fn test_consumer_loop_honours_stop_signal() {
    let (_server, server_port) = start_server(10, 0.0);
    let client = IngestClient::start(loopback_settings(server_port)).unwrap();

    let options = ConsumerOptions {
        frame_interval: Duration::from_millis(5),
        status_interval: Duration::from_secs(60),
        run_for: None,
        viewer: Settings::default().viewer(),
        endpoints: Endpoints {
            server_host: "127.0.0.1".to_string(),
            server_port,
            data_addr: client.data_addr(),
        },
    };

    let stop = ShutdownSignal::new();
    let trigger = stop.clone();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        trigger.trigger();
    });

    let report = consumer::run(&client, &options, &stop);
    stopper.join().unwrap();
    assert_eq!(report.stopped_by, StopReason::Interrupted);
    assert_eq!(report.last_generation, 0);

    client.shutdown();
}

/// Log sink that stalls on every event
struct SlowWriter;

impl io::Write for SlowWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        thread::sleep(Duration::from_millis(100));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_slow_log_output_does_not_stall_store_writer() {
    let (_server, server_port) = start_server(10, 0.0);
    let client = IngestClient::start(loopback_settings(server_port)).unwrap();

    let options = ConsumerOptions {
        frame_interval: Duration::from_millis(1),
        status_interval: Duration::ZERO,
        run_for: Some(Duration::from_millis(900)),
        viewer: Settings::default().viewer(),
        endpoints: Endpoints {
            server_host: "127.0.0.1".to_string(),
            server_port,
            data_addr: client.data_addr(),
        },
    };

    let bounds = WorldBounds::new([0.0; 3], [1.0; 3]);
    let worst_wait = thread::scope(|scope| {
        let consumer = scope.spawn(|| {
            let subscriber = tracing_subscriber::fmt()
                .with_max_level(tracing::Level::INFO)
                .with_writer(|| SlowWriter)
                .finish();
            tracing::subscriber::with_default(subscriber, || {
                consumer::run(&client, &options, &ShutdownSignal::new())
            })
        });

        // let the consumer reach its status output
        thread::sleep(Duration::from_millis(150));
        let mut worst = Duration::ZERO;
        for step in 0..30u32 {
            let packet = DataPacket::new(4, step as f32, bounds)
                .with_records([ParticleRecord::new(0, ParticleType::Fluid, [0.0; 3])]);
            let started = Instant::now();
            client.store().apply(&packet).unwrap();
            worst = worst.max(started.elapsed());
            thread::sleep(Duration::from_millis(20));
        }

        let report = consumer.join().unwrap();
        assert_eq!(report.stopped_by, StopReason::DurationElapsed);
        worst
    });

    assert!(
        worst_wait < Duration::from_millis(50),
        "Writer waited {:?} for the store",
        worst_wait
    );
    client.shutdown();
}

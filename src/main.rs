//! IndriyaIO - Sensor-manager QMI client daemon
//!
//! Connects to the SMGR service on the DSP through the QRTR router,
//! discovers the sensors the firmware exposes, and streams their buffered
//! samples to a local consumer over UDP.

use indriya_io::config::Config;
use indriya_io::error::{Error, Result};
use indriya_io::sensors::SensorDriver;
use indriya_io::smgr::SmgrClient;
use indriya_io::streaming::{Serializer, UdpPublisher, WireFormat};
use indriya_io::transport::QrtrSocket;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Parse config path from command line arguments.
///
/// Supports:
/// - `indriya-io <path>` (positional)
/// - `indriya-io --config <path>` (flag-based)
/// - `indriya-io -c <path>` (short flag)
///
/// Defaults to `/etc/indriyaio.toml` if not specified.
fn parse_config_path() -> String {
    let args: Vec<String> = env::args().collect();

    // Look for --config or -c flag
    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }

    // Fall back to first positional argument (if it doesn't start with -)
    if args.len() > 1 && !args[1].starts_with('-') {
        return args[1].clone();
    }

    // Default path
    "/etc/indriyaio.toml".to_string()
}

fn main() -> Result<()> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("IndriyaIO v0.2.0 starting...");

    // Load configuration; fall back to target defaults when the file is
    // absent so bring-up works out of the box
    let config_path = parse_config_path();
    let config = match Config::load(&config_path) {
        Ok(config) => {
            log::info!("Using config: {}", config_path);
            config
        }
        Err(e) => {
            log::warn!("Config {} not usable ({}), using defaults", config_path, e);
            Config::msm8226_defaults()
        }
    };

    log::info!(
        "Service: id {:#06x} instance {} (timeout {} ms)",
        config.service.service_id,
        config.service.instance,
        config.service.request_timeout_ms
    );

    // Open the router socket and start the client
    let transport = QrtrSocket::new()?;
    let mut client = SmgrClient::new(Box::new(transport), &config)?;
    client.start()?;

    // Set up shutdown signal handler
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    // Spawn the UDP publisher
    let format = WireFormat::from_config(&config.streaming.wire_format)?;
    log::info!("Wire format: {:?}", format);
    let mut publisher = UdpPublisher::new(
        &config.streaming.udp_address,
        Serializer::new(format),
        client.registry(),
        Arc::clone(&running),
    )?;
    let publisher_handle = thread::Builder::new()
        .name("udp-publisher".to_string())
        .spawn(move || {
            if let Err(e) = publisher.run() {
                log::error!("UDP publisher error: {}", e);
            }
        })
        .map_err(|e| Error::Other(format!("Failed to spawn UDP publisher: {}", e)))?;

    log::info!("IndriyaIO running. Press Ctrl-C to stop.");

    // Main loop - enable streaming as drivers appear, log stats periodically
    let mut enabled: usize = 0;
    let mut last_stats = Instant::now();
    while running.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(100));

        let drivers = client.drivers();
        if drivers.len() > enabled {
            for driver in &drivers[enabled..] {
                match driver.buffer_enable() {
                    Ok(()) => log::info!(
                        "Streaming enabled on {} sensor {}",
                        driver.kind().label(),
                        driver.sensor_id()
                    ),
                    Err(e) => log::warn!(
                        "Could not enable streaming on sensor {}: {}",
                        driver.sensor_id(),
                        e
                    ),
                }
            }
            enabled = drivers.len();
        }

        if last_stats.elapsed().as_secs() >= 10 {
            log::info!(
                "State: {:?}, {} sensors, {} consumer drivers",
                client.state(),
                client.sensors().len(),
                drivers.len()
            );
            last_stats = Instant::now();
        }
    }

    // Shutdown
    log::info!("Shutting down...");
    client.shutdown()?;
    publisher_handle
        .join()
        .map_err(|_| Error::Other("publisher thread panicked".to_string()))?;

    log::info!("IndriyaIO stopped");
    Ok(())
}

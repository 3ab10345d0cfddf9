pub mod battery;
pub mod channels;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod hoymiles;
pub mod options;
pub mod power_limiter;
pub mod power_meter;
pub mod prelude;
pub mod scheduler;
pub mod solar_charger;
pub mod sun_position;
pub mod surplus;
pub mod window_average;

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::prelude::*;
use crate::coordinator::{Coordinator, Stores};
use crate::options::Options;
use crate::scheduler::Scheduler;

fn init_logging(level: &str) -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .try_init()
        .map_err(|err| anyhow!("lib.rs:logger init failed: {}", err))
}

/// Loads the config and runs the receive path and the control loop until
/// `shutdown_rx` fires.
pub async fn app(mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
    let options = Options::new();

    // loglevel first: loading the config logs
    let content = std::fs::read_to_string(&options.config_file)
        .map_err(|err| crate::file_error_with_source!(err, "error reading {}", options.config_file))?;
    let loglevel = serde_yaml::from_str::<serde_yaml::Value>(&content)
        .ok()
        .and_then(|v| v.get("loglevel").and_then(|l| l.as_str()).map(str::to_string))
        .unwrap_or_else(|| "info".to_string());
    init_logging(&loglevel)?;

    info!("dtu-limiter {} starting", CARGO_PKG_VERSION);

    let config = ConfigWrapper::new(options.config_file)?;
    run(config, &mut shutdown_rx).await
}

pub async fn run(config: ConfigWrapper, shutdown_rx: &mut broadcast::Receiver<()>) -> Result<()> {
    let channels = Channels::new();
    let stores = Stores::from_config(&config)?;

    info!("Initializing components...");
    let coordinator = Coordinator::new(config.clone(), channels.clone(), stores.clone());
    let mut scheduler = Scheduler::new(config.clone(), channels.clone(), stores);

    if !config.power_limiter().enabled() {
        warn!("power limiter is disabled, only collecting data");
    } else if !config.surplus().is_enabled() {
        info!("surplus regulation is disabled");
    }

    let app_result = tokio::select! {
        result = async {
            futures::try_join!(coordinator.start(), scheduler.start()).map(|_| ())
        } => result,
        _ = shutdown_rx.recv() => {
            info!("Shutdown signal received, stopping components...");
            Ok(())
        }
    };
    coordinator.stop();

    if let Ok(stats) = coordinator.stats.lock() {
        stats.print_summary();
    }

    info!("Shutdown complete");
    app_result
}

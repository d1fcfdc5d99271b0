pub mod channels;    // broadcast channels between components
pub mod command;     // MQTT control commands and their router
pub mod config;      // YAML configuration
pub mod coordinator; // per-hub poll coordinator
pub mod error;       // typed errors and file_error!
pub mod liveness;    // ICMP pre-flight check
pub mod mqtt;        // MQTT client and messages
pub mod options;     // command line options
pub mod prelude;     // common imports
pub mod register;    // field layouts and sensor descriptors
pub mod scheduler;   // per-hub poll timer
pub mod snapshot;    // decoded values and their store
pub mod solarmax;    // Modbus session, decoder and status tables

// version from Cargo.toml
pub const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::prelude::*;

use crate::command::Router;
use crate::liveness::IcmpPinger;
use crate::mqtt::Mqtt;
use crate::solarmax::connection::ModbusTcpConnector;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Sets up env_logger with `level` as the default filter. `RUST_LOG` still
/// wins when set. Calling it twice is harmless.
pub fn init_logging(level: &str) {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
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
        .try_init();
}

/// Everything started by `app`, kept for an orderly shutdown.
///
/// The coordinators and schedulers are paired by index, one of each per
/// enabled hub.
pub struct Components {
    pub coordinators: Vec<Coordinator>, // one per enabled hub
    pub schedulers: Vec<Scheduler>,     // drive the coordinators
    pub mqtt: Option<Mqtt>,             // only when mqtt.enabled
    pub router: Router,                 // MQTT commands -> coordinators
}

impl Components {
    /// Stops schedulers first so no new cycles start, then the MQTT side,
    /// then closes every Modbus session.
    pub async fn stop(&self) {
        info!("Stopping all components...");

        for scheduler in &self.schedulers {
            scheduler.stop();
        }
        self.router.stop();
        if let Some(mqtt) = &self.mqtt {
            mqtt.stop();
        }
        for coordinator in &self.coordinators {
            coordinator.disconnect().await;
        }
    }

    /// Logs per-hub poll statistics and, if enabled, MQTT statistics.
    pub fn print_summary(&self) {
        for coordinator in &self.coordinators {
            coordinator.stats().print_summary(coordinator.name());
        }
        if let Some(mqtt) = &self.mqtt {
            let stats = mqtt.stats();
            info!("MQTT Statistics:");
            info!("  Messages sent: {}", stats.messages_sent);
            info!("  Messages received: {}", stats.messages_received);
            info!("  Errors: {}", stats.errors);
        }
    }
}

/// Main application entry point.
///
/// Starts one coordinator and scheduler per enabled hub, identification
/// for hubs that want it, the MQTT client if enabled and the command
/// router. Runs until `shutdown_rx` fires, then stops everything and
/// prints statistics.
pub async fn app(
    mut shutdown_rx: broadcast::Receiver<()>,
    config: ConfigWrapper,
) -> Result<()> {
    info!("solarmax-bridge {} starting", CARGO_PKG_VERSION);

    let channels = Channels::new();
    let privilege = IcmpPrivilege::detect();
    let pinger = Arc::new(IcmpPinger);

    let mut handles: Vec<JoinHandle<()>> = Vec::new();
    let mut coordinators = Vec::new();
    let mut schedulers = Vec::new();

    for hub in config.enabled_hubs() {
        let layout = hub
            .field_layout()
            .map_err(|e| anyhow!("hub {}: {}", hub.name(), e))?;

        let coordinator = Coordinator::new(
            hub.name(),
            HubSettings::from(&hub),
            layout,
            Arc::new(ModbusTcpConnector::new(hub.unit_id())),
            LivenessCheck::new(pinger.clone(), privilege),
            channels.clone(),
        );

        if hub.identify() {
            let c = coordinator.clone();
            handles.push(tokio::spawn(async move {
                c.identify().await;
            }));
        }

        let scheduler = Scheduler::new(coordinator.clone(), channels.clone());
        let s = scheduler.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = s.start().await {
                error!("Scheduler task failed: {}", e);
            }
        }));

        coordinators.push(coordinator);
        schedulers.push(scheduler);
    }

    if coordinators.is_empty() {
        warn!("no enabled hubs configured");
    }

    let mqtt = if config.mqtt().enabled() {
        let mqtt = Mqtt::new(config.clone(), channels.clone());
        let m = mqtt.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = m.start().await {
                error!("MQTT task failed: {}", e);
            }
        }));
        Some(mqtt)
    } else {
        None
    };

    let router = Router::new(config.clone(), channels.clone(), coordinators.clone());
    let r = router.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) = r.start().await {
            error!("Command router failed: {}", e);
        }
    }));

    let components = Components {
        coordinators,
        schedulers,
        mqtt,
        router,
    };

    let _ = shutdown_rx.recv().await;
    info!("Initiating shutdown sequence");

    components.stop().await;

    for handle in handles {
        if let Err(e) = handle.await {
            error!("Error waiting for task: {}", e);
        }
    }

    components.print_summary();
    info!("Application shutdown complete");

    Ok(())
}

use crate::prelude::*;

pub mod commands;

use commands::identify::{Identify, Identity};
use commands::poll::{Outcome, PollCycle};
use crate::solarmax::connection::Connector;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

/// Updates a coordinator broadcasts on `Channels::from_coordinator`. Each
/// carries the hub name it came from.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelData {
    /// full snapshot after every cycle, successful or not
    Snapshot(String, Snapshot),
    /// every state transition
    State(String, PollState),
    /// result of the one-shot identification
    Identity(String, Identity),
}

/// Connection and timing settings for one hub. Copied out at the start of
/// every cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubSettings {
    pub host: String,
    pub port: u16,
    pub scan_interval: u64,
    pub ping_host: String,
}

impl From<&config::Hub> for HubSettings {
    fn from(hub: &config::Hub) -> Self {
        Self {
            host: hub.host().to_owned(),
            port: hub.port(),
            scan_interval: hub.scan_interval(),
            ping_host: hub.ping_host().to_owned(),
        }
    }
}

/// Where the coordinator is in its cycle. `Failed` holds until the next
/// cycle succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Polling,
    Failed,
}

impl std::fmt::Display for PollState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PollState::Idle => "idle",
            PollState::Polling => "polling",
            PollState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Default)]
struct PollStatus {
    state: Option<PollState>,
    last_error: Option<String>,
}

/// Counters kept over the life of a coordinator and printed on shutdown.
#[derive(Debug, Default, Clone)]
pub struct PollStats {
    pub cycles_started: u64,
    pub cycles_succeeded: u64,
    pub cycles_failed: u64,
    pub offline: u64,
    pub resolve_errors: u64,
    pub coalesced_refreshes: u64,
    pub field_errors: u64,
}

impl PollStats {
    pub fn print_summary(&self, name: &str) {
        info!("Poll Statistics for {}:", name);
        info!("  Cycles started: {}", self.cycles_started);
        info!("  Cycles succeeded: {}", self.cycles_succeeded);
        info!("  Cycles failed: {}", self.cycles_failed);
        info!("    Host offline: {}", self.offline);
        info!("    Resolve errors: {}", self.resolve_errors);
        info!("  Coalesced refreshes: {}", self.coalesced_refreshes);
        info!("  Field decode errors: {}", self.field_errors);
    }
}

/// Polls one inverter and holds its latest snapshot.
///
/// At most one cycle runs at a time; a refresh requested while one is in
/// flight waits for it and returns its result instead of issuing a second
/// read.
#[derive(Clone)]
pub struct Coordinator {
    name: String,
    channels: Channels,
    settings: Arc<Mutex<HubSettings>>,
    layout: Arc<Mutex<Arc<FieldLayout>>>,
    liveness: LivenessCheck,
    connection: Arc<tokio::sync::Mutex<Connection>>,
    in_flight: Arc<tokio::sync::Mutex<()>>,
    settings_changed: Arc<Notify>,
    snapshot: SnapshotStore,
    status: Arc<Mutex<PollStatus>>,
    identity: Arc<Mutex<Option<Identity>>>,
    pub stats: Arc<Mutex<PollStats>>,
}

impl Coordinator {
    pub fn new(
        name: &str,
        settings: HubSettings,
        layout: FieldLayout,
        connector: Arc<dyn Connector>,
        liveness: LivenessCheck,
        channels: Channels,
    ) -> Self {
        let connection = Connection::new(connector, &settings.host, settings.port);

        Self {
            name: name.to_owned(),
            channels,
            settings: Arc::new(Mutex::new(settings)),
            layout: Arc::new(Mutex::new(Arc::new(layout))),
            liveness,
            connection: Arc::new(tokio::sync::Mutex::new(connection)),
            in_flight: Arc::new(tokio::sync::Mutex::new(())),
            settings_changed: Arc::new(Notify::new()),
            snapshot: SnapshotStore::new(),
            status: Arc::new(Mutex::new(PollStatus::default())),
            identity: Arc::new(Mutex::new(None)),
            stats: Arc::new(Mutex::new(PollStats::default())),
        }
    }

    /// Hub name as configured.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Copy of the current settings.
    pub fn settings(&self) -> HubSettings {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Time between the starts of two scheduled cycles.
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.settings().scan_interval)
    }

    /// Layout the next cycle will decode with.
    pub fn layout(&self) -> Arc<FieldLayout> {
        self.layout
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Copy of every value decoded so far.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.get()
    }

    /// Cached value of one sensor, by name.
    pub fn value(&self, key: &str) -> Option<Value> {
        self.snapshot.value(key)
    }

    /// Current state; `Idle` before the first cycle.
    pub fn state(&self) -> PollState {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state
            .unwrap_or(PollState::Idle)
    }

    /// Error that ended the most recent cycle, if it failed.
    pub fn last_error(&self) -> Option<String> {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_error
            .clone()
    }

    /// Model and serial, once identification has succeeded.
    pub fn identity(&self) -> Option<Identity> {
        self.identity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn stats(&self) -> PollStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Receives every `ChannelData` published from here on.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelData> {
        self.channels.from_coordinator.subscribe()
    }

    /// Resolves when runtime settings change.
    pub async fn settings_changed(&self) {
        self.settings_changed.notified().await
    }

    /// Changes the scan interval and liveness target. The host and port are
    /// left alone; a cycle already running keeps the settings it started with.
    pub fn update_runtime_settings(
        &self,
        scan_interval: u64,
        ping_host: &str,
    ) -> Result<(), SettingsError> {
        if scan_interval == 0 {
            return Err(SettingsError::ZeroScanInterval);
        }

        info!(
            "{}: update settings: scan_interval={}s ping_host={:?}",
            self.name, scan_interval, ping_host
        );
        {
            let mut settings = self.settings.lock().unwrap_or_else(PoisonError::into_inner);
            settings.scan_interval = scan_interval;
            settings.ping_host = ping_host.to_owned();
        }
        self.settings_changed.notify_waiters();

        Ok(())
    }

    /// Replaces every setting. The open session is closed by the next cycle
    /// if the endpoint differs.
    pub fn reconfigure_connection_settings(
        &self,
        host: &str,
        port: u16,
        scan_interval: u64,
        ping_host: &str,
    ) -> Result<(), SettingsError> {
        if scan_interval == 0 {
            return Err(SettingsError::ZeroScanInterval);
        }

        info!(
            "{}: reconfigure connection: {}:{} scan_interval={}s ping_host={:?}",
            self.name, host, port, scan_interval, ping_host
        );
        {
            let mut settings = self.settings.lock().unwrap_or_else(PoisonError::into_inner);
            *settings = HubSettings {
                host: host.to_owned(),
                port,
                scan_interval,
                ping_host: ping_host.to_owned(),
            };
        }
        self.settings_changed.notify_waiters();

        Ok(())
    }

    /// Replaces the register layout used from the next cycle on.
    pub fn set_field_layout(&self, layout: FieldLayout) {
        info!(
            "{}: field layout set: {} fields in {}+{}",
            self.name,
            layout.len(),
            layout.start_address(),
            layout.count()
        );
        *self.layout.lock().unwrap_or_else(PoisonError::into_inner) = Arc::new(layout);
    }

    /// Runs a poll cycle now, or waits for the one already running.
    pub async fn request_refresh(&self) -> PollState {
        let _guard = match self.in_flight.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("{}: poll already in flight, waiting for it", self.name);
                self.record(|stats| stats.coalesced_refreshes += 1);
                let _ = self.in_flight.lock().await;
                return self.state();
            }
        };

        self.set_status(PollState::Polling, None);
        self.record(|stats| stats.cycles_started += 1);

        let settings = self.settings();
        let cycle = PollCycle::new(
            &self.name,
            settings.clone(),
            self.layout(),
            self.liveness.clone(),
            self.connection.clone(),
            self.snapshot.clone(),
        );

        let state = match cycle.run().await {
            Ok(Outcome::Updated { fields, errors }) => {
                debug!("{}: {} fields updated", self.name, fields);
                self.record(|stats| {
                    stats.cycles_succeeded += 1;
                    stats.field_errors += errors.len() as u64;
                });
                self.set_status(PollState::Idle, None);
                PollState::Idle
            }
            Ok(Outcome::Offline) => {
                self.record(|stats| stats.offline += 1);
                self.set_status(
                    PollState::Failed,
                    Some(format!("{} is offline", settings.ping_host)),
                );
                PollState::Failed
            }
            Ok(Outcome::ResolveError(e)) => {
                self.record(|stats| stats.resolve_errors += 1);
                self.set_status(PollState::Failed, Some(e.to_string()));
                PollState::Failed
            }
            Err(e) => {
                error!("{}: poll cycle failed: {}", self.name, e);
                self.record(|stats| stats.cycles_failed += 1);
                self.set_status(PollState::Failed, Some(e.to_string()));
                PollState::Failed
            }
        };

        self.publish(ChannelData::Snapshot(self.name.clone(), self.snapshot()));

        state
    }

    /// Reads the serial number and stores the derived identity. Never fails.
    pub async fn identify(&self) -> Identity {
        let identity = Identify::new(&self.name, &self.settings(), self.connection.clone())
            .run()
            .await;

        *self.identity.lock().unwrap_or_else(PoisonError::into_inner) = Some(identity.clone());
        self.publish(ChannelData::Identity(self.name.clone(), identity.clone()));

        identity
    }

    /// Closes the Modbus session, waiting for any read in progress.
    pub async fn disconnect(&self) {
        self.connection.lock().await.close().await;
    }

    fn record(&self, update: impl FnOnce(&mut PollStats)) {
        update(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }

    fn set_status(&self, state: PollState, last_error: Option<String>) {
        {
            let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
            status.state = Some(state);
            status.last_error = last_error;
        }
        self.publish(ChannelData::State(self.name.clone(), state));
    }

    fn publish(&self, data: ChannelData) {
        // no subscribers is fine
        let _ = self.channels.from_coordinator.send(data);
    }
}

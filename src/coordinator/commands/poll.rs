use crate::prelude::*;
use crate::snapshot::{MODE_OFFLINE, MODE_RESOLVE_ERROR};
use crate::solarmax::decoder;

use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Registers were read and merged into the snapshot.
    Updated {
        fields: usize,
        errors: Vec<DecodeFieldError>,
    },
    /// The liveness target did not answer; only `InverterMode` was touched.
    Offline,
    /// The liveness target could not be resolved; only `InverterMode` was touched.
    ResolveError(HostResolutionError),
}

/// One read-decode-merge pass against the inverter.
///
/// Works entirely from the settings and layout it was built with, so a
/// reconfiguration that lands mid-cycle only affects the next one.
pub struct PollCycle {
    name: String,
    settings: HubSettings,
    layout: Arc<FieldLayout>,
    liveness: LivenessCheck,
    connection: Arc<tokio::sync::Mutex<Connection>>,
    snapshot: SnapshotStore,
}

impl PollCycle {
    pub fn new(
        name: &str,
        settings: HubSettings,
        layout: Arc<FieldLayout>,
        liveness: LivenessCheck,
        connection: Arc<tokio::sync::Mutex<Connection>>,
        snapshot: SnapshotStore,
    ) -> Self {
        Self {
            name: name.to_owned(),
            settings,
            layout,
            liveness,
            connection,
            snapshot,
        }
    }

    pub async fn run(&self) -> Result<Outcome, ConnectivityError> {
        debug!("{}: regular poll cycle", self.name);

        let ping_host = &self.settings.ping_host;
        if !ping_host.is_empty() {
            match self.liveness.is_alive(ping_host).await {
                Err(e) => {
                    info!("{}: {}", self.name, e);
                    self.snapshot.set_mode(MODE_RESOLVE_ERROR);
                    return Ok(Outcome::ResolveError(e));
                }
                Ok(false) => {
                    info!("{}: {} is not answering, inverter offline", self.name, ping_host);
                    self.snapshot.set_mode(MODE_OFFLINE);
                    return Ok(Outcome::Offline);
                }
                Ok(true) => {}
            }
        }

        let block = {
            let mut connection = self.connection.lock().await;
            connection
                .set_endpoint(&self.settings.host, self.settings.port)
                .await;
            connection.ensure_connected().await?;
            connection
                .read_block(self.layout.start_address(), self.layout.count())
                .await?
        };
        debug!("{}: got registers {:?}", self.name, block);

        let decoded = decoder::decode_block(&block, &self.layout);
        for err in &decoded.errors {
            warn!("{}: {}", self.name, err);
        }

        let fields = decoded.values.len();
        self.snapshot.merge(decoded.values);

        Ok(Outcome::Updated {
            fields,
            errors: decoded.errors,
        })
    }
}

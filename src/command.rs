use crate::prelude::*;

/// Control requests for a hub, received over MQTT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Refresh(config::Hub),
    SetScanInterval(config::Hub, u64),
    SetPingHost(config::Hub, String),
}

impl Command {
    pub fn hub(&self) -> &config::Hub {
        use Command::*;

        match self {
            Refresh(hub) | SetScanInterval(hub, _) | SetPingHost(hub, _) => hub,
        }
    }

    pub fn to_result_topic(&self) -> String {
        use Command::*;

        let rest = match self {
            Refresh(hub) => format!("{}/refresh", hub.topic_name()),
            SetScanInterval(hub, _) => format!("{}/set/scan_interval", hub.topic_name()),
            SetPingHost(hub, _) => format!("{}/set/ping_host", hub.topic_name()),
        };

        format!("result/{}", rest)
    }

    /// Applies the command to the coordinator it targets.
    pub async fn run(&self, coordinator: &Coordinator, config: &ConfigWrapper) -> Result<()> {
        use Command::*;

        match self {
            Refresh(_) => {
                let state = coordinator.request_refresh().await;
                if state == PollState::Failed {
                    bail!(
                        "refresh failed: {}",
                        coordinator.last_error().unwrap_or_default()
                    );
                }
            }
            SetScanInterval(_, secs) => {
                let settings = coordinator.settings();
                coordinator.update_runtime_settings(*secs, &settings.ping_host)?;
            }
            SetPingHost(_, host) => {
                let settings = coordinator.settings();
                coordinator.update_runtime_settings(settings.scan_interval, host)?;
            }
        }

        config.update_hub_settings(coordinator.name(), &coordinator.settings())
    }
}

/// Turns MQTT command messages into `Command`s for the matching hub and
/// reports each result on `result/{hub}/...`.
#[derive(Clone)]
pub struct Router {
    config: ConfigWrapper,
    channels: Channels,
    coordinators: Vec<Coordinator>,
}

impl Router {
    pub fn new(config: ConfigWrapper, channels: Channels, coordinators: Vec<Coordinator>) -> Self {
        Self {
            config,
            channels,
            coordinators,
        }
    }

    pub async fn start(&self) -> Result<()> {
        use tokio::sync::broadcast::error::RecvError;

        let mut receiver = self.channels.from_mqtt.subscribe();

        loop {
            match receiver.recv().await {
                Ok(mqtt::ChannelData::Message(message)) => {
                    // a refresh can take a full poll cycle; don't hold up other hubs
                    let router = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = router.process_message(message).await {
                            warn!("{:?}", e);
                        }
                    });
                }
                Ok(mqtt::ChannelData::Shutdown) | Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(n)) => warn!("command router lagged by {} messages", n),
            }
        }

        info!("command router exiting");
        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.channels.from_mqtt.send(mqtt::ChannelData::Shutdown);
    }

    pub async fn process_message(&self, message: mqtt::Message) -> Result<()> {
        let (topic_name, _) = message.split_cmd_topic()?;

        let hub = self
            .config
            .enabled_hub_with_topic_name(topic_name)
            .ok_or_else(|| anyhow!("no enabled hub named {}", topic_name))?;

        let coordinator = self
            .coordinators
            .iter()
            .find(|c| c.name() == hub.name())
            .ok_or_else(|| anyhow!("hub {} is not running", hub.name()))?;

        let command = message.to_command(hub)?;
        info!("parsed command {:?}", command);

        let result = command.run(coordinator, &self.config).await;

        let payload = match &result {
            Ok(_) => "OK",
            Err(e) => {
                warn!("{}: {:?} failed: {}", command.hub().name(), command, e);
                "FAIL"
            }
        };

        let reply = mqtt::Message {
            topic: command.to_result_topic(),
            retain: false,
            payload: payload.to_string(),
        };
        if self
            .channels
            .to_mqtt
            .send(mqtt::ChannelData::Message(reply))
            .is_err()
        {
            debug!("no mqtt subscriber for command result");
        }

        result
    }
}

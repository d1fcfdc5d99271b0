use crate::prelude::*;
use crate::coordinator::commands::identify::Identity;

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, LastWill, MqttOptions, Publish, QoS};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast::error::RecvError;

// Message {{{
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub retain: bool,
    pub payload: String,
}

impl Message {
    pub fn for_snapshot(hub: &str, snapshot: &Snapshot) -> Result<Message> {
        Ok(Message {
            topic: format!("{}/snapshot", config::topic_name(hub)),
            retain: false,
            payload: serde_json::to_string(snapshot)?,
        })
    }

    pub fn for_state(hub: &str, state: PollState) -> Message {
        Message {
            topic: format!("{}/state", config::topic_name(hub)),
            retain: false,
            payload: state.to_string(),
        }
    }

    pub fn for_identity(hub: &str, identity: &Identity) -> Result<Message> {
        Ok(Message {
            topic: format!("{}/identity", config::topic_name(hub)),
            retain: true,
            payload: serde_json::to_string(identity)?,
        })
    }

    pub fn to_command(&self, hub: config::Hub) -> Result<Command> {
        use Command::*;

        let (_hub, parts) = self.split_cmd_topic()?;

        let r = match parts[..] {
            ["refresh"] => Refresh(hub),
            ["set", "scan_interval"] => SetScanInterval(hub, self.payload_int()?),
            ["set", "ping_host"] => SetPingHost(hub, self.payload.trim().to_owned()),
            [..] => bail!("unhandled: {:?}", self),
        };

        Ok(r)
    }

    // given a cmd Message, return the hub topic name it is intended for.
    //
    // eg cmd/roof/set/scan_interval => ("roof", ["set", "scan_interval"])
    pub fn split_cmd_topic(&self) -> Result<(&str, Vec<&str>)> {
        let parts: Vec<&str> = self.topic.split('/').collect();

        // our subscriptions are all {namespace}/cmd/{hub}/#
        if parts.len() < 2 || parts[0] != "cmd" {
            bail!("ignoring badly formed MQTT topic: {}", self.topic);
        }

        Ok((parts[1], parts[2..].to_vec()))
    }

    fn payload_int(&self) -> Result<u64> {
        self.payload
            .trim()
            .parse()
            .map_err(|err| anyhow!("payload_int: {}", err))
    }
} // }}}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum ChannelData {
    Message(Message),
    Shutdown,
}

#[derive(Debug, Default, Clone)]
pub struct MqttStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub errors: u64,
}

#[derive(Clone)]
pub struct Mqtt {
    config: ConfigWrapper,
    channels: Channels,
    stats: Arc<Mutex<MqttStats>>,
}

impl Mqtt {
    pub fn new(config: ConfigWrapper, channels: Channels) -> Self {
        Self {
            config,
            channels,
            stats: Arc::new(Mutex::new(MqttStats::default())),
        }
    }

    pub async fn start(&self) -> Result<()> {
        let c = &self.config;

        if !c.mqtt().enabled() {
            info!("mqtt disabled, skipping");
            return Ok(());
        }

        let mut options = MqttOptions::new("solarmax-bridge", c.mqtt().host(), c.mqtt().port());

        let will = LastWill {
            topic: self.lwt_topic(),
            message: bytes::Bytes::from("offline"),
            qos: QoS::AtLeastOnce,
            retain: true,
        };
        options.set_last_will(will);

        options.set_keep_alive(std::time::Duration::from_secs(60));
        if let (Some(u), Some(p)) = (c.mqtt().username(), c.mqtt().password()) {
            options.set_credentials(u, p);
        }

        info!(
            "initializing mqtt at {}:{}",
            c.mqtt().host(),
            c.mqtt().port()
        );

        let (client, eventloop) = AsyncClient::new(options, 10);

        futures::try_join!(
            self.setup(client.clone()),
            self.receiver(eventloop),
            self.sender(client)
        )?;

        Ok(())
    }

    pub fn stop(&self) {
        info!("Stopping MQTT client...");
        let _ = self.channels.to_mqtt.send(ChannelData::Shutdown);
    }

    pub fn stats(&self) -> MqttStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn setup(&self, client: AsyncClient) -> Result<()> {
        client
            .publish(self.lwt_topic(), QoS::AtLeastOnce, true, "online")
            .await?;

        for hub in self.config.enabled_hubs() {
            client
                .subscribe(
                    format!(
                        "{}/cmd/{}/#",
                        self.config.mqtt().namespace(),
                        hub.topic_name()
                    ),
                    QoS::AtMostOnce,
                )
                .await?;
        }

        Ok(())
    }

    // mqtt -> command router
    async fn receiver(&self, mut eventloop: EventLoop) -> Result<()> {
        let mut shutdown = self.channels.to_mqtt.subscribe();

        loop {
            tokio::select! {
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        if let Err(e) = self.handle_message(publish) {
                            warn!("{}", e);
                        }
                    }
                    Err(e) => {
                        error!("{}", e);
                        info!("reconnecting in 5s");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    }
                    _ => {} // keepalives etc
                },
                msg = shutdown.recv() => match msg {
                    Ok(ChannelData::Shutdown) | Err(RecvError::Closed) => break,
                    _ => {}
                },
            }
        }

        info!("MQTT receiver loop exiting");
        Ok(())
    }

    fn handle_message(&self, publish: Publish) -> Result<()> {
        // remove the namespace, including the first /
        // doing it this way means we don't break if namespace happens to contain a /
        let namespace = self.config.mqtt().namespace().len();
        let topic = publish
            .topic
            .get(namespace + 1..)
            .ok_or_else(|| anyhow!("topic outside namespace: {}", publish.topic))?
            .to_owned();

        let message = Message {
            topic,
            retain: publish.retain,
            payload: String::from_utf8(publish.payload.to_vec())?,
        };
        debug!("RX: {:?}", message);

        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .messages_received += 1;

        if self
            .channels
            .from_mqtt
            .send(ChannelData::Message(message))
            .is_err()
        {
            bail!("send(from_mqtt) failed - channel closed?");
        }

        Ok(())
    }

    // coordinator -> mqtt
    async fn sender(&self, client: AsyncClient) -> Result<()> {
        let mut to_mqtt = self.channels.to_mqtt.subscribe();
        let mut from_coordinator = self.channels.from_coordinator.subscribe();

        loop {
            let message = tokio::select! {
                msg = to_mqtt.recv() => match msg {
                    Ok(ChannelData::Message(message)) => message,
                    Ok(ChannelData::Shutdown) | Err(RecvError::Closed) => break,
                    Err(RecvError::Lagged(n)) => {
                        warn!("mqtt sender lagged by {} messages", n);
                        continue;
                    }
                },
                data = from_coordinator.recv() => match data {
                    Ok(data) => match Self::coordinator_message(data) {
                        Ok(message) => message,
                        Err(e) => {
                            warn!("cannot encode coordinator update: {}", e);
                            continue;
                        }
                    },
                    Err(RecvError::Closed) => break,
                    Err(RecvError::Lagged(n)) => {
                        warn!("mqtt sender lagged by {} coordinator updates", n);
                        continue;
                    }
                },
            };

            self.publish(&client, message).await;
        }

        let _ = client.disconnect().await;
        info!("MQTT sender loop exiting");
        Ok(())
    }

    fn coordinator_message(data: coordinator::ChannelData) -> Result<Message> {
        use coordinator::ChannelData as Data;

        match data {
            Data::Snapshot(hub, snapshot) => Message::for_snapshot(&hub, &snapshot),
            Data::State(hub, state) => Ok(Message::for_state(&hub, state)),
            Data::Identity(hub, identity) => Message::for_identity(&hub, &identity),
        }
    }

    async fn publish(&self, client: &AsyncClient, message: Message) {
        let topic = format!("{}/{}", self.config.mqtt().namespace(), message.topic);
        debug!("publishing: {} = {}", topic, message.payload);

        for attempt in 1..=3 {
            match client
                .publish(&topic, QoS::AtLeastOnce, message.retain, message.payload.as_bytes())
                .await
            {
                Ok(_) => {
                    self.stats
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .messages_sent += 1;
                    return;
                }
                Err(err) => {
                    error!("MQTT publish failed: {:?} (attempt {}/3)", err, attempt);
                    self.stats
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .errors += 1;
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }

    fn lwt_topic(&self) -> String {
        format!("{}/LWT", self.config.mqtt().namespace())
    }
}

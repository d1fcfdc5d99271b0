use crate::prelude::*;
use crate::register::LayoutDescriptor;

use serde::Deserialize;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub hubs: Vec<Hub>,

    #[serde(default = "Config::default_mqtt")]
    pub mqtt: Mqtt,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,
}

// Hub {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Hub {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    pub name: String,
    #[serde(default)]
    pub host: String,
    #[serde(default = "Config::default_port")]
    pub port: u16,
    #[serde(default = "Config::default_scan_interval")]
    pub scan_interval: u64,
    #[serde(default)]
    pub ping_host: Option<String>,
    pub unit_id: Option<u8>,
    pub identify: Option<bool>,

    pub layout: Option<LayoutDescriptor>,
}

impl Hub {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topic_name(&self) -> String {
        topic_name(&self.name)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn scan_interval(&self) -> u64 {
        self.scan_interval
    }

    /// Empty means no liveness check.
    pub fn ping_host(&self) -> &str {
        self.ping_host.as_deref().unwrap_or("")
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id.unwrap_or(1)
    }

    pub fn identify(&self) -> bool {
        self.identify != Some(false)
    }

    /// Configured layout, or the built-in SMT one.
    pub fn field_layout(&self) -> Result<FieldLayout, LayoutError> {
        match &self.layout {
            Some(descriptor) => FieldLayout::from_descriptor(descriptor),
            None => FieldLayout::smt(),
        }
    }
}

// hubs are identified by name
impl PartialEq for Hub {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Hub {} // }}}

// Mqtt {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Mqtt {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    #[serde(default = "Config::default_mqtt_host")]
    pub host: String,
    #[serde(default = "Config::default_mqtt_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,

    #[serde(default = "Config::default_mqtt_namespace")]
    pub namespace: String,
}

impl Mqtt {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &Option<String> {
        &self.username
    }

    pub fn password(&self) -> &Option<String> {
        &self.password
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
} // }}}

/// Hub name as used in MQTT topics: lowercase, whitespace and slashes replaced.
pub fn topic_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() || c == '/' { '_' } else { c })
        .collect()
}

pub struct ConfigWrapper {
    config: Arc<Mutex<Config>>,
}

impl Clone for ConfigWrapper {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
        }
    }
}

impl ConfigWrapper {
    pub fn new(file: String) -> Result<Self> {
        let config = Config::new(file)?;
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Config> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn hubs(&self) -> Vec<Hub> {
        self.lock().hubs.clone()
    }

    pub fn enabled_hubs(&self) -> Vec<Hub> {
        self.hubs().into_iter().filter(|h| h.enabled()).collect()
    }

    pub fn enabled_hub_with_topic_name(&self, topic_name: &str) -> Option<Hub> {
        self.enabled_hubs()
            .into_iter()
            .find(|h| h.topic_name() == topic_name)
    }

    pub fn mqtt(&self) -> Mqtt {
        self.lock().mqtt.clone()
    }

    pub fn loglevel(&self) -> String {
        self.lock().loglevel.clone()
    }

    /// Records runtime settings changes so later lookups see them.
    pub fn update_hub_settings(&self, name: &str, settings: &HubSettings) -> Result<()> {
        let mut config = self.lock();

        let hub = config
            .hubs
            .iter_mut()
            .find(|h| h.name == name)
            .ok_or_else(|| file_error!("hub {} not found", name))?;

        hub.host = settings.host.clone();
        hub.port = settings.port;
        hub.scan_interval = settings.scan_interval;
        hub.ping_host = Some(settings.ping_host.clone());

        Ok(())
    }

    pub fn log_summary(&self) {
        let config = self.lock();

        info!("Configuration loaded successfully:");
        info!(
            "  Hubs: {} configured, {} enabled",
            config.hubs.len(),
            config.hubs.iter().filter(|h| h.enabled).count()
        );
        for (i, hub) in config.hubs.iter().enumerate() {
            info!("    Hub[{}]: {}", i, hub.name);
            info!("      Enabled: {}", hub.enabled);
            info!("      Host: {}", hub.host);
            info!("      Port: {}", hub.port);
            info!("      Scan Interval: {}s", hub.scan_interval);
            info!("      Ping Host: {}", hub.ping_host());
            info!("      Unit ID: {}", hub.unit_id());
            info!("      Identify: {}", hub.identify());
            match &hub.layout {
                Some(layout) => info!(
                    "      Layout: {} sensors in {}+{}",
                    layout.sensors.len(),
                    layout.start_address,
                    layout.count
                ),
                None => info!("      Layout: built-in SMT"),
            }
        }

        info!("  MQTT: {}", if config.mqtt.enabled { "enabled" } else { "disabled" });
        if config.mqtt.enabled {
            info!("    Host: {}", config.mqtt.host);
            info!("    Port: {}", config.mqtt.port);
            info!("    Namespace: {}", config.mqtt.namespace);
        }

        info!("  Log Level: {}", config.loglevel);
    }
}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        let content = std::fs::read_to_string(&file)
            .map_err(|err| file_error!("error reading {}: {}", file, err))?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.mqtt.enabled {
            if self.mqtt.port == 0 {
                bail!("mqtt.port must be between 1 and 65535");
            }
            if self.mqtt.host.is_empty() {
                return Err(file_error!("MQTT host cannot be empty"));
            }
        }

        let mut names = std::collections::HashSet::new();
        for (i, hub) in self.hubs.iter().enumerate() {
            if hub.name.is_empty() {
                bail!("hubs[{}].name cannot be empty", i);
            }
            if !names.insert(hub.topic_name()) {
                bail!("hubs[{}].name {} is not unique", i, hub.name);
            }
            if !hub.enabled {
                continue;
            }
            if hub.host.is_empty() {
                return Err(file_error!("hub {} host cannot be empty", hub.name));
            }
            if hub.port == 0 {
                bail!("hubs[{}].port must be between 1 and 65535", i);
            }
            if hub.scan_interval == 0 {
                return Err(file_error!("hub {} scan_interval must be at least 1 second", hub.name));
            }
            if let Err(e) = hub.field_layout() {
                return Err(file_error!("hub {} layout: {}", hub.name, e));
            }
        }

        Ok(())
    }

    fn default_port() -> u16 {
        502
    }

    fn default_scan_interval() -> u64 {
        60
    }

    fn default_mqtt() -> Mqtt {
        Mqtt {
            enabled: false,
            host: Self::default_mqtt_host(),
            port: Self::default_mqtt_port(),
            username: None,
            password: None,
            namespace: Self::default_mqtt_namespace(),
        }
    }

    fn default_mqtt_host() -> String {
        "localhost".to_string()
    }

    fn default_mqtt_port() -> u16 {
        1883
    }

    fn default_mqtt_namespace() -> String {
        "solarmax".to_string()
    }

    fn default_enabled() -> bool {
        true
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_defaults() {
        let config = Config::from_yaml("hubs:\n  - name: SolarMax\n    host: 10.0.0.5\n").unwrap();

        let hub = &config.hubs[0];
        assert!(hub.enabled());
        assert_eq!(hub.port(), 502);
        assert_eq!(hub.scan_interval(), 60);
        assert_eq!(hub.ping_host(), "");
        assert_eq!(hub.unit_id(), 1);
        assert!(hub.identify());
        assert_eq!(hub.field_layout().unwrap().count(), 60);

        assert!(!config.mqtt.enabled());
        assert_eq!(config.mqtt.namespace(), "solarmax");
        assert_eq!(config.loglevel, "info");
    }

    #[test]
    fn rejects_bad_hubs() {
        assert!(Config::from_yaml("hubs:\n  - name: a\n").is_err());
        assert!(Config::from_yaml("hubs:\n  - name: a\n    host: h\n    port: 0\n").is_err());
        assert!(Config::from_yaml("hubs:\n  - name: a\n    host: h\n    scan_interval: 0\n").is_err());
        assert!(
            Config::from_yaml("hubs:\n  - name: a\n    host: h\n  - name: A\n    host: i\n").is_err()
        );
        // disabled hubs may be incomplete
        assert!(Config::from_yaml("hubs:\n  - name: a\n    enabled: false\n").is_ok());
    }

    #[test]
    fn rejects_layout_that_overruns_block() {
        let yaml = r#"
hubs:
  - name: a
    host: h
    layout:
      count: 2
      sensors:
        - { offset: 1, name: Power, type: UINT32 }
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn topic_name_is_slugged() {
        let config = Config::from_yaml("hubs:\n  - name: Roof West/2\n    host: h\n").unwrap();
        assert_eq!(config.hubs[0].topic_name(), "roof_west_2");
    }
}

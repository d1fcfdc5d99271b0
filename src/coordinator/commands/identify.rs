use crate::prelude::*;
use crate::solarmax::{decoder, SERIAL_NUMBER_ADDRESS, SERIAL_NUMBER_REGISTERS};

use serde::Serialize;
use std::sync::Arc;

const MANUFACTURER: &str = "SolarMax";
const SMT_PREFIX: &str = "2245-";
const SMT_6_SERIAL: &str = "2245-211303511";
const UNKNOWN_SERIAL: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub serial_number: String,
    pub model_label: String,
}

impl Identity {
    fn fallback() -> Self {
        Self {
            serial_number: UNKNOWN_SERIAL.to_string(),
            model_label: MANUFACTURER.to_string(),
        }
    }
}

/// Reads the serial number once and derives a model label from it.
/// Best-effort: always produces an `Identity`.
pub struct Identify {
    name: String,
    host: String,
    port: u16,
    connection: Arc<tokio::sync::Mutex<Connection>>,
}

impl Identify {
    pub fn new(
        name: &str,
        settings: &HubSettings,
        connection: Arc<tokio::sync::Mutex<Connection>>,
    ) -> Self {
        Self {
            name: name.to_owned(),
            host: settings.host.clone(),
            port: settings.port,
            connection,
        }
    }

    pub async fn run(&self) -> Identity {
        match self.read_serial().await {
            Ok(serial) => {
                let identity = Identity {
                    model_label: classify(&serial),
                    serial_number: serial,
                };
                info!(
                    "{}: inverter serial {} identified as {}",
                    self.name, identity.serial_number, identity.model_label
                );
                identity
            }
            Err(e) => {
                warn!("{}: could not identify inverter: {}", self.name, e);
                Identity::fallback()
            }
        }
    }

    async fn read_serial(&self) -> Result<String, IdentificationError> {
        let words = {
            let mut connection = self.connection.lock().await;
            connection.set_endpoint(&self.host, self.port).await;
            connection.ensure_connected().await?;
            connection
                .read_block(SERIAL_NUMBER_ADDRESS, SERIAL_NUMBER_REGISTERS)
                .await?
        };
        debug!("{}: serial number registers {:?}", self.name, words);

        let serial = decoder::decode_serial(&words);
        if serial.is_empty() {
            return Err(IdentificationError::EmptySerial);
        }

        Ok(serial)
    }
}

/// Maps a serial number to a model label.
pub fn classify(serial: &str) -> String {
    if serial == SMT_6_SERIAL {
        return format!("{} 6SMT", MANUFACTURER);
    }

    if serial.starts_with(SMT_PREFIX) {
        // serials are ASCII, but don't slice through a char if one slipped in
        let tail: String = {
            let chars: Vec<char> = serial.chars().collect();
            chars[chars.len().saturating_sub(6)..].iter().collect()
        };
        return format!("{} SMT {}", MANUFACTURER, tail);
    }

    if serial.is_empty() {
        MANUFACTURER.to_string()
    } else {
        format!("{} {}", MANUFACTURER, serial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_serial() {
        assert_eq!(classify("2245-211303511"), "SolarMax 6SMT");
    }

    #[test]
    fn classifies_smt_prefix() {
        assert_eq!(classify("2245-219876543"), "SolarMax SMT 876543");
    }

    #[test]
    fn classifies_other_serials() {
        assert_eq!(classify("ABC123"), "SolarMax ABC123");
        assert_eq!(classify(""), "SolarMax");
    }
}

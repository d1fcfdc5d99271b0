use thiserror::Error;

/// Creates an anyhow error with the current file and line number
#[macro_export]
macro_rules! file_error {
    ($($arg:tt)*) => {
        anyhow::anyhow!(
            "[{}:{}] {}",
            std::path::Path::new(file!())
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_default(),
            line!(),
            format!($($arg)*)
        )
    };
}

/// The inverter could not be reached, or the session broke mid-read.
///
/// Recoverable: the coordinator records it and the next scheduled cycle
/// starts from a clean connection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unable to talk to inverter at {host}:{port}: {reason}")]
pub struct ConnectivityError {
    pub host: String,
    pub port: u16,
    pub reason: String,
}

impl ConnectivityError {
    pub fn new(host: &str, port: u16, reason: impl std::fmt::Display) -> Self {
        Self {
            host: host.to_owned(),
            port,
            reason: reason.to_string(),
        }
    }
}

/// The liveness target could not be resolved to an address.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("error resolving host {host}")]
pub struct HostResolutionError {
    pub host: String,
}

/// A single field could not be decoded from the register block.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("field {key} at offset {offset} needs {width} register(s) but block holds {available}")]
pub struct DecodeFieldError {
    pub key: String,
    pub offset: u16,
    pub width: u16,
    pub available: usize,
}

/// Runtime settings a coordinator refuses to adopt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("scan_interval must be at least 1 second")]
    ZeroScanInterval,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("register offset {offset} is used by both {first} and {second}")]
    DuplicateOffset {
        offset: u16,
        first: String,
        second: String,
    },
    #[error("field {key} has unknown type {data_type}")]
    UnknownType { key: String, data_type: String },
    #[error("field {key} at offset {offset} does not fit in a block of {count} registers")]
    OutOfBlock { key: String, offset: u16, count: u16 },
    #[error("register count {0} is outside 1..=125")]
    InvalidCount(u16),
}

// never leaves coordinator::commands::identify, it always resolves to a fallback label
#[derive(Debug, Error)]
pub enum IdentificationError {
    #[error(transparent)]
    Connectivity(#[from] ConnectivityError),
    #[error("serial number registers decoded to an empty string")]
    EmptySerial,
}

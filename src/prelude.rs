pub use anyhow::{anyhow, bail, Result};
pub use log::{debug, error, info, trace, warn};
pub use std::io::Write;
pub use tokio::sync::broadcast;

pub use crate::channels::Channels;
pub use crate::command::Command;
pub use crate::config::{self, Config, ConfigWrapper};
pub use crate::coordinator::{self, Coordinator, HubSettings, PollState};
pub use crate::error::{
    ConnectivityError, DecodeFieldError, HostResolutionError, IdentificationError, LayoutError,
    SettingsError,
};
pub use crate::file_error;
pub use crate::liveness::{self, IcmpPrivilege, LivenessCheck};
pub use crate::mqtt;
pub use crate::register::{self, FieldLayout, FieldType};
pub use crate::scheduler::{self, Scheduler};
pub use crate::snapshot::{self, Snapshot, SnapshotStore, Value};
pub use crate::solarmax::{self, connection::Connection};

use num_enum::TryFromPrimitive;

/// Operating mode reported by the inverter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive)]
#[repr(u16)]
pub enum InverterMode {
    InitialMode = 0,
    Standby = 1,
    OnGrid = 3,
    Error = 5,
    Shutdown = 9,
}

impl InverterMode {
    pub fn label(&self) -> &'static str {
        match self {
            Self::InitialMode => "Initial Mode",
            Self::Standby => "Standby",
            Self::OnGrid => "OnGrid",
            Self::Error => "Error",
            Self::Shutdown => "Shutdown",
        }
    }
}

/// A named code-to-label table, referenced by `STATUS_<NAME>` field types.
///
/// Tables are resolved once when a layout is built, so decoding never looks
/// anything up by name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusTable {
    InverterMode,
}

impl StatusTable {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "INVERTER_MODE" => Some(Self::InverterMode),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::InverterMode => "INVERTER_MODE",
        }
    }

    /// Label for `code`; codes missing from the table give `"unknown {code}"`.
    pub fn label(&self, code: u16) -> String {
        match self {
            Self::InverterMode => InverterMode::try_from(code)
                .map(|mode| mode.label().to_string())
                .unwrap_or_else(|_| format!("unknown {}", code)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_modes() {
        let table = StatusTable::InverterMode;
        assert_eq!(table.label(0), "Initial Mode");
        assert_eq!(table.label(1), "Standby");
        assert_eq!(table.label(3), "OnGrid");
        assert_eq!(table.label(5), "Error");
        assert_eq!(table.label(9), "Shutdown");
    }

    #[test]
    fn unknown_mode_embeds_code() {
        assert_eq!(StatusTable::InverterMode.label(2), "unknown 2");
        assert_eq!(StatusTable::InverterMode.label(65535), "unknown 65535");
    }

    #[test]
    fn table_names() {
        assert_eq!(
            StatusTable::from_name("INVERTER_MODE"),
            Some(StatusTable::InverterMode)
        );
        assert_eq!(StatusTable::from_name("BATTERY"), None);
        assert_eq!(StatusTable::InverterMode.name(), "INVERTER_MODE");
    }
}

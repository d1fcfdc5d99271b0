use crate::prelude::*;
use crate::solarmax::status::StatusTable;

use serde::Deserialize;
use std::collections::BTreeMap;

/// First holding register of the SMT measurement block.
pub const DEFAULT_START_ADDRESS: u16 = 4097;
/// Registers read per poll; grew from 36 to 60 as the layout was extended.
pub const DEFAULT_REGISTER_COUNT: u16 = 60;

// a single Modbus read cannot return more than this
const MAX_REGISTER_COUNT: u16 = 125;

/// One sensor as described by configuration. Only `offset`, `name`,
/// `data_type` and `factor` matter when decoding; the rest is carried for
/// consumers that render values.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SensorDescriptor {
    pub offset: u16,
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default = "default_factor")]
    pub factor: f64,
    #[serde(default)]
    pub unit: String,
    pub device_class: Option<String>,
    pub state_class: Option<String>,
    pub icon: Option<String>,
}

fn default_factor() -> f64 {
    1.0
}

/// Register block plus the sensors found in it; the two are versioned together.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LayoutDescriptor {
    #[serde(default = "LayoutDescriptor::default_start_address")]
    pub start_address: u16,
    #[serde(default = "LayoutDescriptor::default_count")]
    pub count: u16,
    pub sensors: Vec<SensorDescriptor>,
}

impl LayoutDescriptor {
    fn default_start_address() -> u16 {
        DEFAULT_START_ADDRESS
    }

    fn default_count() -> u16 {
        DEFAULT_REGISTER_COUNT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    U16,
    U32,
}

impl Width {
    pub fn registers(&self) -> u16 {
        match self {
            Width::U16 => 1,
            Width::U32 => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldType {
    Numeric { width: Width, factor: f64 },
    Status(StatusTable),
}

impl FieldType {
    /// Resolves a descriptor type string (`UINT16`, `UINT32`, `STATUS_<TABLE>`).
    pub fn parse(data_type: &str, factor: f64) -> Option<Self> {
        match data_type {
            "UINT16" => Some(FieldType::Numeric {
                width: Width::U16,
                factor,
            }),
            "UINT32" => Some(FieldType::Numeric {
                width: Width::U32,
                factor,
            }),
            other => other
                .strip_prefix("STATUS_")
                .and_then(StatusTable::from_name)
                .map(FieldType::Status),
        }
    }

    /// Number of consecutive registers the field occupies.
    pub fn width(&self) -> u16 {
        match self {
            FieldType::Numeric { width, .. } => width.registers(),
            FieldType::Status(_) => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub key: String,
    pub field_type: FieldType,
}

/// Resolved mapping from register offset to field, together with the block
/// it indexes into.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldLayout {
    start_address: u16,
    count: u16,
    fields: BTreeMap<u16, FieldSpec>,
}

impl FieldLayout {
    pub fn new(
        start_address: u16,
        count: u16,
        sensors: &[SensorDescriptor],
    ) -> Result<Self, LayoutError> {
        if count == 0 || count > MAX_REGISTER_COUNT {
            return Err(LayoutError::InvalidCount(count));
        }

        let mut fields = BTreeMap::new();

        for sensor in sensors {
            let field_type = FieldType::parse(&sensor.data_type, sensor.factor).ok_or_else(|| {
                LayoutError::UnknownType {
                    key: sensor.name.clone(),
                    data_type: sensor.data_type.clone(),
                }
            })?;

            if u32::from(sensor.offset) + u32::from(field_type.width()) > u32::from(count) {
                return Err(LayoutError::OutOfBlock {
                    key: sensor.name.clone(),
                    offset: sensor.offset,
                    count,
                });
            }

            let spec = FieldSpec {
                key: sensor.name.clone(),
                field_type,
            };
            if let Some(existing) = fields.insert(sensor.offset, spec) {
                return Err(LayoutError::DuplicateOffset {
                    offset: sensor.offset,
                    first: existing.key,
                    second: sensor.name.clone(),
                });
            }
        }

        Ok(Self {
            start_address,
            count,
            fields,
        })
    }

    pub fn from_descriptor(descriptor: &LayoutDescriptor) -> Result<Self, LayoutError> {
        Self::new(descriptor.start_address, descriptor.count, &descriptor.sensors)
    }

    /// Built-in layout for the SMT series.
    pub fn smt() -> Result<Self, LayoutError> {
        Self::new(DEFAULT_START_ADDRESS, DEFAULT_REGISTER_COUNT, &smt_sensors())
    }

    pub fn start_address(&self) -> u16 {
        self.start_address
    }

    pub fn count(&self) -> u16 {
        self.count
    }

    pub fn fields(&self) -> impl Iterator<Item = (u16, &FieldSpec)> {
        self.fields.iter().map(|(offset, spec)| (*offset, spec))
    }

    pub fn field(&self, offset: u16) -> Option<&FieldSpec> {
        self.fields.get(&offset)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

// SMT sensor groups {{{
struct Template {
    name: &'static str,
    data_type: &'static str,
    factor: f64,
    unit: &'static str,
    device_class: &'static str,
    state_class: &'static str,
    icon: &'static str,
}

const fn template(
    name: &'static str,
    data_type: &'static str,
    factor: f64,
    unit: &'static str,
    device_class: &'static str,
    state_class: &'static str,
    icon: &'static str,
) -> Template {
    Template {
        name,
        data_type,
        factor,
        unit,
        device_class,
        state_class,
        icon,
    }
}

const LINE: [Template; 4] = [
    template("Voltage", "UINT16", 0.1, "V", "voltage", "measurement", "mdi:sine-wave"),
    template("Current", "UINT16", 0.01, "A", "current", "measurement", "mdi:current-ac"),
    template("Power", "UINT32", 0.1, "W", "power", "measurement", "mdi:transmission-tower"),
    template("Frequency", "UINT16", 0.01, "Hz", "frequency", "measurement", "mdi:sine-wave"),
];

const PV: [Template; 3] = [
    template("Voltage", "UINT16", 0.1, "V", "voltage", "measurement", "mdi:current-dc"),
    template("Current", "UINT16", 0.01, "A", "current", "measurement", "mdi:current-dc"),
    template("Power", "UINT32", 0.1, "W", "power", "measurement", "mdi:solar-power"),
];

const ENERGY: [Template; 2] = [
    template("Total Energy", "UINT32", 1.0, "kWh", "energy", "total_increasing", "mdi:solar-power"),
    template("Total Hours", "UINT32", 1.0, "h", "duration", "total_increasing", "mdi:timeline-clock-outline"),
];

const POWER: [Template; 3] = [
    template("Active Power", "UINT32", 0.001, "kW", "power", "measurement", "mdi:solar-power"),
    template("Reactive Power", "UINT32", 0.001, "kW", "reactive_power", "measurement", "mdi:solar-power"),
    template("Today max Power", "UINT32", 0.1, "W", "power", "measurement", "mdi:solar-power"),
];

const MODE: [Template; 1] = [template(
    "InverterMode",
    "STATUS_INVERTER_MODE",
    1.0,
    "",
    "enum",
    "",
    "mdi:information-outline",
)];

/// Lays `templates` out back to back from `offset`, prefixing each name.
/// Returns the offset just past the group.
fn group(
    sensors: &mut Vec<SensorDescriptor>,
    prefix: &str,
    mut offset: u16,
    templates: &[Template],
) -> u16 {
    for t in templates {
        let name = if prefix.is_empty() {
            t.name.to_string()
        } else {
            format!("{} {}", prefix, t.name)
        };
        let width = FieldType::parse(t.data_type, t.factor).map_or(1, |ft| ft.width());

        sensors.push(SensorDescriptor {
            offset,
            name,
            data_type: t.data_type.to_string(),
            factor: t.factor,
            unit: t.unit.to_string(),
            device_class: Some(t.device_class.to_string()).filter(|s| !s.is_empty()),
            state_class: Some(t.state_class.to_string()).filter(|s| !s.is_empty()),
            icon: Some(t.icon.to_string()),
        });
        offset += width;
    }
    offset
}

/// Sensor descriptors for the SMT measurement block at 4097.
pub fn smt_sensors() -> Vec<SensorDescriptor> {
    let mut sensors = Vec::new();
    let mut offset = 0;

    for line in ["L1", "L2", "L3"] {
        offset = group(&mut sensors, line, offset, &LINE);
    }
    for pv in ["PV1", "PV2", "PV3"] {
        offset = group(&mut sensors, pv, offset, &PV);
    }
    offset = group(&mut sensors, "", offset, &ENERGY);
    offset = group(&mut sensors, "", offset, &POWER);
    group(&mut sensors, "", offset, &MODE);

    sensors
} // }}}

//! Resolution of a device profile into a numerically addressed read plan.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tracing::{debug, warn};

use crate::duration::parse_duration;
use crate::error::{Result, ScrapeError};
use crate::profile::{
    ByteOrder, DataType, DeviceProfile, FunctionCode, RegisterDescriptor, WordOrder,
};

/// Timeout used when `device_timeout` is absent or unparsable.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(200);

/// Request delay used when `device_request_delay` is absent or unparsable.
pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_millis(1000);

/// Label injected with the register name when the register does not set one.
pub const REGISTER_NAME_LABEL: &str = "register_name";

const DECIMAL_BASE: &str = "dec";
const HEXADECIMAL_BASE: &str = "hex";

/// Connection identity of a group of registers.
///
/// Registers resolving to the same `Device` share one connection per scrape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Device {
    pub unit_id: u8,
    /// Deadline for connecting and for every single read.
    pub timeout: Duration,
    /// Idle time after which the connection is re-established.
    pub request_delay: Duration,
    pub zero_based: bool,
}

impl Device {
    /// Derive the device key from a profile's connection parameters.
    pub fn from_profile(profile: &DeviceProfile) -> Self {
        Self {
            unit_id: profile.device_modbus_id,
            timeout: resolve_duration(
                profile.device_timeout.as_deref(),
                DEFAULT_TIMEOUT,
                "device_timeout",
            ),
            request_delay: resolve_duration(
                profile.device_request_delay.as_deref(),
                DEFAULT_REQUEST_DELAY,
                "device_request_delay",
            ),
            zero_based: profile.device_zero_based_addressing,
        }
    }
}

/// One resolved register, ready to be read and exported.
#[derive(Debug, Clone, PartialEq)]
pub struct DataUnit {
    /// Register name from the profile.
    pub name: String,
    /// Configured numeric address (before zero-based adjustment).
    pub address: u16,
    /// Decoded value, filled in by the reader.
    pub value: f64,
    pub si_name: String,
    pub data_type: DataType,
    pub byte_order: ByteOrder,
    pub word_order: WordOrder,
    pub function: FunctionCode,
    /// Register labels merged with device labels.
    pub labels: BTreeMap<String, String>,
}

/// The read plan of one profile for one scrape.
#[derive(Debug, Clone, Default)]
pub struct Workload {
    groups: HashMap<Device, Vec<DataUnit>>,
}

impl Workload {
    /// Iterate over device groups.
    pub fn groups(&self) -> impl Iterator<Item = (&Device, &[DataUnit])> {
        self.groups.iter().map(|(d, units)| (d, units.as_slice()))
    }

    pub fn into_groups(self) -> impl Iterator<Item = (Device, Vec<DataUnit>)> {
        self.groups.into_iter()
    }

    /// Number of device groups.
    pub fn device_count(&self) -> usize {
        self.groups.len()
    }

    /// Total number of data units across all groups.
    pub fn unit_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.unit_count() == 0
    }
}

/// Build the workload for one device profile.
///
/// Any register with an unresolvable address fails the whole build.
pub fn build_workload(profile: &DeviceProfile) -> Result<Workload> {
    let device = Device::from_profile(profile);

    debug!(
        unit_id = device.unit_id,
        timeout = ?device.timeout,
        request_delay = ?device.request_delay,
        zero_based = device.zero_based,
        registers = profile.device_registers.len(),
        "Preparing workload"
    );

    let units = profile
        .device_registers
        .iter()
        .map(|register| build_data_unit(register, &profile.device_labels))
        .collect::<Result<Vec<_>>>()?;

    let mut groups = HashMap::new();
    groups.insert(device, units);

    Ok(Workload { groups })
}

fn build_data_unit(
    register: &RegisterDescriptor,
    device_labels: &BTreeMap<String, String>,
) -> Result<DataUnit> {
    let address = resolve_address(&register.register_name, &register.register_address)?;

    Ok(DataUnit {
        name: register.register_name.clone(),
        address,
        value: 0.0,
        si_name: register.register_si_name.clone(),
        data_type: register.register_type,
        byte_order: register.register_byte_order,
        word_order: register.register_word_order,
        function: register.register_func_code.unwrap_or_default(),
        labels: merge_labels(register, device_labels),
    })
}

/// Resolve a textual `<base>#<digits>` address into a register offset.
pub fn resolve_address(register: &str, address: &str) -> Result<u16> {
    let parts: Vec<&str> = address.split('#').collect();
    let [base, digits] = parts.as_slice() else {
        return Err(ScrapeError::InvalidAddressFormat {
            register: register.to_string(),
            address: address.to_string(),
        });
    };

    let radix = match *base {
        DECIMAL_BASE => 10,
        HEXADECIMAL_BASE => 16,
        other => {
            return Err(ScrapeError::UnknownAddressBase {
                register: register.to_string(),
                base: other.to_string(),
            });
        }
    };

    u16::from_str_radix(digits, radix).map_err(|source| ScrapeError::AddressParse {
        register: register.to_string(),
        address: address.to_string(),
        source,
    })
}

/// Register labels win over device labels; `register_name` is always present.
pub fn merge_labels(
    register: &RegisterDescriptor,
    device_labels: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut labels = register.register_labels.clone();

    labels
        .entry(REGISTER_NAME_LABEL.to_string())
        .or_insert_with(|| register.register_name.clone());

    for (k, v) in device_labels {
        labels.entry(k.clone()).or_insert_with(|| v.clone());
    }

    labels
}

fn resolve_duration(raw: Option<&str>, default: Duration, field: &str) -> Duration {
    let Some(raw) = raw else {
        debug!(field, default = ?default, "Duration not set, using default");
        return default;
    };

    match parse_duration(raw) {
        Ok(duration) => duration,
        Err(e) => {
            warn!(
                field,
                value = raw,
                default = ?default,
                error = %e,
                "Cannot parse duration, using default"
            );
            default
        }
    }
}

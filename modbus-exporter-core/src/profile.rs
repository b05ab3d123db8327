//! Device profile configuration model.
//!
//! Profiles are produced by a loader (see the `modbus-exporter` crate) and are
//! treated as immutable afterwards: a reload swaps the whole
//! [`DeviceProfiles`] map, it never edits a profile in place.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// All named device profiles of one configuration version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceProfiles(BTreeMap<String, DeviceProfile>);

impl DeviceProfiles {
    /// Create an empty profile set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a profile by name.
    pub fn get(&self, name: &str) -> Option<&DeviceProfile> {
        self.0.get(name)
    }

    /// Insert a profile, returning the one it replaced.
    pub fn insert(&mut self, name: impl Into<String>, profile: DeviceProfile) -> Option<DeviceProfile> {
        self.0.insert(name.into(), profile)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Profile names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DeviceProfile)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, DeviceProfile)> for DeviceProfiles {
    fn from_iter<I: IntoIterator<Item = (String, DeviceProfile)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Connection parameters and register list of one kind of device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceProfile {
    /// Transport name. Only `tcp` is supported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_transport: Option<String>,

    /// Per-operation deadline as a duration string (e.g. "1000ms").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_timeout: Option<String>,

    /// Modbus unit (slave) identifier.
    #[serde(default)]
    pub device_modbus_id: u8,

    /// Configured addresses are one higher than the wire address.
    #[serde(default)]
    pub device_zero_based_addressing: bool,

    /// Connection idle timeout as a duration string (e.g. "3000ms").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_request_delay: Option<String>,

    /// Labels applied to every register of this device.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub device_labels: BTreeMap<String, String>,

    /// Registers to read, in order.
    pub device_registers: Vec<RegisterDescriptor>,
}

/// One addressable value within a device profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterDescriptor {
    /// Human-readable register name.
    pub register_name: String,

    /// Physical quantity, used to build the metric name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub register_si_name: String,

    #[serde(default)]
    pub register_type: DataType,

    #[serde(default)]
    pub register_byte_order: ByteOrder,

    #[serde(default)]
    pub register_word_order: WordOrder,

    /// Textual address: `dec#<digits>` or `hex#<digits>`.
    pub register_address: String,

    /// Function code override. Absent means input registers (FC4).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register_func_code: Option<FunctionCode>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub register_labels: BTreeMap<String, String>,
}

/// A register setting that names no known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {setting} '{value}' (expected one of: {expected})")]
pub struct UnknownVariant {
    pub setting: &'static str,
    pub value: String,
    pub expected: &'static str,
}

impl UnknownVariant {
    fn new(setting: &'static str, value: &str, expected: &'static str) -> Self {
        Self {
            setting,
            value: value.to_string(),
            expected,
        }
    }
}

/// How the raw register payload is interpreted.
///
/// Parsing ignores case; an empty string selects the default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum DataType {
    /// Unsigned 16-bit (default)
    #[default]
    Word,
    /// Unsigned 16-bit
    Uint16,
    /// Unsigned 32-bit (2 registers)
    Dword,
    /// Unsigned 32-bit (2 registers)
    Uint32,
    /// Signed 16-bit
    Int16,
    /// Signed 32-bit (2 registers)
    Int32,
    /// IEEE-754 single precision (2 registers)
    Float32,
    /// Unsigned 32-bit (2 registers), exported as a counter
    Counter,
}

impl DataType {
    /// Number of 16-bit registers a value of this type occupies.
    pub fn register_count(&self) -> u16 {
        match self {
            DataType::Word | DataType::Uint16 | DataType::Int16 => 1,
            DataType::Dword
            | DataType::Uint32
            | DataType::Int32
            | DataType::Float32
            | DataType::Counter => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Word => "word",
            DataType::Uint16 => "uint16",
            DataType::Dword => "dword",
            DataType::Uint32 => "uint32",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::Float32 => "float32",
            DataType::Counter => "counter",
        }
    }
}

impl FromStr for DataType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "word" => Ok(DataType::Word),
            "uint16" => Ok(DataType::Uint16),
            "dword" => Ok(DataType::Dword),
            "uint32" => Ok(DataType::Uint32),
            "int16" => Ok(DataType::Int16),
            "int32" => Ok(DataType::Int32),
            "float32" => Ok(DataType::Float32),
            "counter" => Ok(DataType::Counter),
            _ => Err(UnknownVariant::new(
                "register type",
                s,
                "word, uint16, dword, uint32, int16, int32, float32, counter",
            )),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Byte order within one 16-bit register.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum ByteOrder {
    #[default]
    #[serde(rename = "big_endian")]
    BigEndian,
    #[serde(rename = "lit_endian")]
    LitEndian,
}

impl FromStr for ByteOrder {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "big_endian" => Ok(ByteOrder::BigEndian),
            "lit_endian" => Ok(ByteOrder::LitEndian),
            _ => Err(UnknownVariant::new("byte order", s, "big_endian, lit_endian")),
        }
    }
}

/// Order of the two registers composing a 32-bit value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum WordOrder {
    #[default]
    None,
    /// Registers exchanged: `[w1, w0]`.
    Swapped,
    /// All four bytes reversed.
    Mirrored,
}

impl FromStr for WordOrder {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(WordOrder::None),
            "swapped" => Ok(WordOrder::Swapped),
            "mirrored" => Ok(WordOrder::Mirrored),
            _ => Err(UnknownVariant::new("word order", s, "none, swapped, mirrored")),
        }
    }
}

/// Modbus function code used to read a register.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum FunctionCode {
    #[serde(rename = "FC1")]
    ReadCoils,
    #[serde(rename = "FC2")]
    ReadDiscreteInputs,
    #[serde(rename = "FC3")]
    ReadHoldingRegisters,
    #[default]
    #[serde(rename = "FC4")]
    ReadInputRegisters,
}

impl FromStr for FunctionCode {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FC1" => Ok(FunctionCode::ReadCoils),
            "FC2" => Ok(FunctionCode::ReadDiscreteInputs),
            "FC3" => Ok(FunctionCode::ReadHoldingRegisters),
            "" | "FC4" => Ok(FunctionCode::ReadInputRegisters),
            _ => Err(UnknownVariant::new("function code", s, "FC1, FC2, FC3, FC4")),
        }
    }
}

macro_rules! impl_try_from_string {
    ($($ty:ty),+) => {
        $(
            impl TryFrom<String> for $ty {
                type Error = UnknownVariant;

                fn try_from(value: String) -> Result<Self, Self::Error> {
                    value.parse()
                }
            }
        )+
    };
}

impl_try_from_string!(DataType, ByteOrder, WordOrder, FunctionCode);

impl FunctionCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionCode::ReadCoils => "FC1",
            FunctionCode::ReadDiscreteInputs => "FC2",
            FunctionCode::ReadHoldingRegisters => "FC3",
            FunctionCode::ReadInputRegisters => "FC4",
        }
    }

    /// Whether this function reads single bits instead of registers.
    pub fn is_bit_access(&self) -> bool {
        matches!(
            self,
            FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs
        )
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_defaults() {
        let register = RegisterDescriptor {
            register_name: "QF1".into(),
            register_address: "dec#331".into(),
            ..Default::default()
        };

        assert_eq!(register.register_type, DataType::Word);
        assert_eq!(register.register_byte_order, ByteOrder::BigEndian);
        assert_eq!(register.register_word_order, WordOrder::None);
        assert!(register.register_func_code.is_none());
    }

    #[test]
    fn test_register_count() {
        assert_eq!(DataType::Word.register_count(), 1);
        assert_eq!(DataType::Uint16.register_count(), 1);
        assert_eq!(DataType::Int16.register_count(), 1);
        assert_eq!(DataType::Dword.register_count(), 2);
        assert_eq!(DataType::Uint32.register_count(), 2);
        assert_eq!(DataType::Int32.register_count(), 2);
        assert_eq!(DataType::Float32.register_count(), 2);
        assert_eq!(DataType::Counter.register_count(), 2);
    }

    #[test]
    fn test_function_code_as_str() {
        assert_eq!(FunctionCode::ReadCoils.as_str(), "FC1");
        assert_eq!(FunctionCode::ReadDiscreteInputs.as_str(), "FC2");
        assert_eq!(FunctionCode::ReadHoldingRegisters.as_str(), "FC3");
        assert_eq!(FunctionCode::ReadInputRegisters.as_str(), "FC4");
        assert_eq!(FunctionCode::default(), FunctionCode::ReadInputRegisters);
        assert!(FunctionCode::ReadCoils.is_bit_access());
        assert!(!FunctionCode::ReadHoldingRegisters.is_bit_access());
    }

    #[test]
    fn test_settings_ignore_case() {
        assert_eq!("UINT32".parse::<DataType>().unwrap(), DataType::Uint32);
        assert_eq!("Float32".parse::<DataType>().unwrap(), DataType::Float32);
        assert_eq!("".parse::<DataType>().unwrap(), DataType::Word);
        assert_eq!("LIT_ENDIAN".parse::<ByteOrder>().unwrap(), ByteOrder::LitEndian);
        assert_eq!("".parse::<ByteOrder>().unwrap(), ByteOrder::BigEndian);
        assert_eq!("Swapped".parse::<WordOrder>().unwrap(), WordOrder::Swapped);
        assert_eq!("".parse::<WordOrder>().unwrap(), WordOrder::None);
        assert_eq!("Fc3".parse::<FunctionCode>().unwrap(), FunctionCode::ReadHoldingRegisters);
        assert_eq!("fc1".parse::<FunctionCode>().unwrap(), FunctionCode::ReadCoils);
    }

    #[test]
    fn test_unknown_settings_rejected() {
        let err = "uint64".parse::<DataType>().unwrap_err();
        assert_eq!(err.value, "uint64");
        assert!(err.to_string().contains("register type"));
        assert!("middle_endian".parse::<ByteOrder>().is_err());
        assert!("reversed".parse::<WordOrder>().is_err());
        assert!("FC5".parse::<FunctionCode>().is_err());
    }

    #[test]
    fn test_profiles_lookup() {
        let mut profiles = DeviceProfiles::new();
        assert!(profiles.is_empty());

        profiles.insert("plc", DeviceProfile::default());
        profiles.insert("meter", DeviceProfile::default());

        assert_eq!(profiles.len(), 2);
        assert!(profiles.contains("plc"));
        assert!(profiles.get("ups").is_none());
        assert_eq!(profiles.names().collect::<Vec<_>>(), vec!["meter", "plc"]);
    }
}

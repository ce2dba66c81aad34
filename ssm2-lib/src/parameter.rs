use crate::address::MemoryAddress;
use serde::{Deserialize, Serialize};

/// A unit and the formula turning the raw reading `x` into that unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterConversion {
    pub units: String,
    pub expr: String,
}

impl ParameterConversion {
    pub fn new(units: impl Into<String>, expr: impl Into<String>) -> Self {
        Self {
            units: units.into(),
            expr: expr.into(),
        }
    }
}

/// Location of a parameter's flag in the init response capability bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CapabilityBit {
    pub byte_index: usize,
    pub bit: u8,
}

/// A loggable ECU parameter as described by the parameter catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    pub id: String,
    pub name: String,
    pub address: MemoryAddress,
    /// Declared byte length; `None` or `1` both mean a single byte.
    pub length: Option<usize>,
    pub capability: CapabilityBit,
    pub conversions: Vec<ParameterConversion>,
}

impl ParameterDescriptor {
    /// Number of consecutive addresses read for this parameter.
    pub fn byte_length(&self) -> usize {
        match self.length {
            Some(length) if length > 1 => length,
            _ => 1,
        }
    }

    /// Unit of the first conversion, the default output unit.
    pub fn default_units(&self) -> &str {
        self.conversions.first().map(|c| c.units.as_str()).unwrap_or("")
    }

    /// Whether the ECU flags this parameter in its capability bytes.
    ///
    /// A byte index past the end of `capabilities` means unsupported.
    pub fn is_supported(&self, capabilities: &[u8]) -> bool {
        let Some(flags) = capabilities.get(self.capability.byte_index) else {
            return false;
        };
        let Some(mask) = 1u8.checked_shl(u32::from(self.capability.bit)) else {
            return false;
        };
        flags & mask != 0
    }
}

/// Keep the parameters the ECU reports as supported, in catalog order.
pub fn supported_parameters(parameters: &[ParameterDescriptor], capabilities: &[u8]) -> Vec<ParameterDescriptor> {
    parameters
        .iter()
        .filter(|p| p.is_supported(capabilities))
        .cloned()
        .collect()
}

use crate::constants::{ADDRESS_SIZE, MAX_ADDRESS};
use crate::error::Ssm2Error;
use crate::parameter::ParameterDescriptor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// A 24-bit big-endian ECU memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemoryAddress([u8; ADDRESS_SIZE]);

impl MemoryAddress {
    pub const fn new(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_value(value: u32) -> Result<Self, Ssm2Error> {
        if value > MAX_ADDRESS {
            return Err(Ssm2Error::InvalidAddress(format!(
                "address {:#x} does not fit in 24 bits",
                value
            )));
        }
        Ok(Self([(value >> 16) as u8, (value >> 8) as u8, value as u8]))
    }

    pub fn value(&self) -> u32 {
        (u32::from(self.0[0]) << 16) | (u32::from(self.0[1]) << 8) | u32::from(self.0[2])
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }

    /// The address `offset` bytes further on.
    pub fn offset(&self, offset: usize) -> Result<Self, Ssm2Error> {
        let value = u64::from(self.value()) + offset as u64;
        if value > u64::from(MAX_ADDRESS) {
            return Err(Ssm2Error::InvalidAddress(format!(
                "address overflow while adding offset {}",
                offset
            )));
        }
        Self::from_value(value as u32)
    }
}

impl TryFrom<&[u8]> for MemoryAddress {
    type Error = Ssm2Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; ADDRESS_SIZE] = bytes.try_into().map_err(|_| {
            Ssm2Error::InvalidAddress(format!("address must be exactly 3 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(bytes))
    }
}

impl FromStr for MemoryAddress {
    type Err = Ssm2Error;

    /// Parses catalog notation such as `0x000008`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let value = u32::from_str_radix(digits, 16)
            .map_err(|e| Ssm2Error::InvalidAddress(format!("cannot parse `{}`: {}", s, e)))?;
        Self::from_value(value)
    }
}

impl fmt::Display for MemoryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:06x}", self.value())
    }
}

/// Add `offset` to a raw 3-byte base address.
pub fn expand_address(base: &[u8], offset: i64) -> Result<MemoryAddress, Ssm2Error> {
    let base = MemoryAddress::try_from(base)?;
    if offset < 0 {
        return Err(Ssm2Error::InvalidAddress("offset must be >= 0".to_string()));
    }
    let offset = usize::try_from(offset)
        .map_err(|_| Ssm2Error::InvalidAddress(format!("address overflow while adding offset {}", offset)))?;
    base.offset(offset)
}

/// A parameter's byte range inside a read-address response payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterMapping {
    pub parameter: ParameterDescriptor,
    pub units: String,
    pub start: usize,
    pub length: usize,
}

impl ParameterMapping {
    pub fn name(&self) -> &str {
        &self.parameter.name
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.start + self.length
    }
}

/// Flat address list for a read request plus the payload layout it produces.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AddressRequest {
    pub addresses: Vec<MemoryAddress>,
    pub mappings: Vec<ParameterMapping>,
}

/// Expand every parameter into its addresses and lay the parameters out
/// back to back in request order.
pub fn build_address_request(parameters: &[ParameterDescriptor]) -> Result<AddressRequest, Ssm2Error> {
    let mut request = AddressRequest::default();
    let mut offset = 0;

    for parameter in parameters {
        let length = parameter.byte_length();
        for i in 0..length {
            request.addresses.push(parameter.address.offset(i)?);
        }

        let units = parameter
            .conversions
            .first()
            .map(|c| c.units.clone())
            .unwrap_or_default();
        debug!(
            parameter = %parameter.name,
            address = %parameter.address,
            start = offset,
            length,
            "mapped parameter"
        );
        request.mappings.push(ParameterMapping {
            parameter: parameter.clone(),
            units,
            start: offset,
            length,
        });
        offset += length;
    }

    Ok(request)
}

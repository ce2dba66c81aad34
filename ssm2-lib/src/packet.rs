use crate::address::MemoryAddress;
use crate::constants::*;
use crate::error::Ssm2Error;
use bytes::{BufMut, Bytes, BytesMut};
use num_enum::{FromPrimitive, IntoPrimitive};
use std::fmt;
use std::io::Read;
use std::time::Duration;

/// Bus participant ids used as source and destination of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum DeviceAddress {
    Engine = 0x10,
    Transmission = 0x18,
    DiagnosticTool = 0xF0,

    #[num_enum(catch_all)]
    Unknown(u8),
}

/// Command opcodes observed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum Command {
    // declared first so the catch-all's implicit discriminant stays below 0xFF
    InitResponse = 0xFF,
    ReadAddressRequest = 0xA8,
    InitRequest = 0xBF,
    ReadAddressResponse = 0xE8,

    #[num_enum(catch_all)]
    Unknown(u8),
}

/// A single SSM2 frame, stored exactly as it appears on the wire.
///
/// Frames built with [`Packet::new`] or returned by [`read_packet`] are always
/// well formed. [`Packet::from_bytes`] wraps arbitrary bytes without checking
/// them; use [`Packet::validate`] and [`Packet::verify_checksum`] on those.
/// Fields of a truncated frame read as zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    bytes: Bytes,
}

impl Packet {
    /// Encode a frame: header, destination, source, size, command, data, checksum.
    ///
    /// `data` must not exceed [`MAX_DATA_SIZE`] bytes; the size byte cannot
    /// describe a longer frame. Callers building requests from user input check
    /// this first (see [`MAX_ADDRESSES_PER_REQUEST`]).
    pub fn new(destination: DeviceAddress, source: DeviceAddress, command: Command, data: &[u8]) -> Self {
        let mut frame = BytesMut::with_capacity(MIN_PACKET_SIZE + data.len());
        frame.put_u8(PACKET_HEADER);
        frame.put_u8(destination.into());
        frame.put_u8(source.into());
        debug_assert!(
            data.len() <= MAX_DATA_SIZE,
            "{} data bytes do not fit the size byte (max {})",
            data.len(),
            MAX_DATA_SIZE
        );
        // size counts the command byte plus data
        frame.put_u8((data.len() + 1) as u8);
        frame.put_u8(command.into());
        frame.extend_from_slice(data);
        let checksum = checksum(&frame);
        frame.put_u8(checksum);

        Self { bytes: frame.freeze() }
    }

    /// Handshake request. Carries no data.
    pub fn init_request(destination: DeviceAddress, source: DeviceAddress) -> Self {
        Self::new(destination, source, Command::InitRequest, &[])
    }

    /// Read request for a list of addresses, answered once or continuously.
    pub fn read_address_request(
        destination: DeviceAddress,
        source: DeviceAddress,
        addresses: &[MemoryAddress],
        continuous: bool,
    ) -> Self {
        let mut data = Vec::with_capacity(1 + addresses.len() * ADDRESS_SIZE);
        data.push(if continuous { READ_MODE_CONTINUOUS } else { READ_MODE_SINGLE });
        for address in addresses {
            data.extend_from_slice(address.as_bytes());
        }
        Self::new(destination, source, Command::ReadAddressRequest, &data)
    }

    /// Wrap raw bytes without any validation.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self { bytes: bytes.into() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn byte_at(&self, index: usize) -> u8 {
        self.bytes.get(index).copied().unwrap_or(0)
    }

    pub fn header(&self) -> u8 {
        self.byte_at(0)
    }

    pub fn destination(&self) -> DeviceAddress {
        DeviceAddress::from_primitive(self.byte_at(1))
    }

    pub fn source(&self) -> DeviceAddress {
        DeviceAddress::from_primitive(self.byte_at(2))
    }

    /// Declared count of command and data bytes.
    pub fn size(&self) -> u8 {
        self.byte_at(3)
    }

    pub fn command(&self) -> Command {
        Command::from_primitive(self.byte_at(COMMAND_OFFSET))
    }

    pub fn checksum(&self) -> u8 {
        self.bytes.last().copied().unwrap_or(0)
    }

    /// Everything between the command byte and the checksum.
    pub fn payload(&self) -> Bytes {
        if self.bytes.len() < MIN_PACKET_SIZE {
            return Bytes::new();
        }
        self.bytes.slice(DATA_OFFSET..self.bytes.len() - 1)
    }

    /// Check the header byte only.
    pub fn validate(&self) -> Result<(), Ssm2Error> {
        let actual = *self.bytes.first().ok_or(Ssm2Error::InsufficientData {
            expected: 1,
            actual: 0,
        })?;
        if actual != PACKET_HEADER {
            return Err(Ssm2Error::HeaderMismatch {
                expected: PACKET_HEADER,
                actual,
            });
        }
        Ok(())
    }

    /// Check the frame length against the size byte and recompute the checksum.
    pub fn verify_checksum(&self) -> Result<(), Ssm2Error> {
        if self.bytes.len() < MIN_PACKET_SIZE {
            return Err(Ssm2Error::InsufficientData {
                expected: MIN_PACKET_SIZE,
                actual: self.bytes.len(),
            });
        }
        let declared = FRAME_PREFIX_SIZE + self.size() as usize + 1;
        if declared != self.bytes.len() {
            return Err(Ssm2Error::InvalidPacket(format!(
                "size byte describes a {} byte frame, got {} bytes",
                declared,
                self.bytes.len()
            )));
        }
        let expected = checksum(&self.bytes[..self.bytes.len() - 1]);
        let actual = self.checksum();
        if expected != actual {
            return Err(Ssm2Error::ChecksumMismatch { expected, actual });
        }
        Ok(())
    }
}

impl From<Packet> for Bytes {
    fn from(packet: Packet) -> Self {
        packet.bytes
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.bytes))
    }
}

/// Low byte of the sum of all bytes.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Read one frame from a byte stream and verify it.
///
/// A wrong first byte is reported immediately; the reader is not
/// resynchronised.
pub fn read_packet<R: Read + ?Sized>(reader: &mut R) -> Result<Packet, Ssm2Error> {
    let mut prefix = [0u8; FRAME_PREFIX_SIZE];
    reader.read_exact(&mut prefix[..1])?;
    if prefix[0] != PACKET_HEADER {
        return Err(Ssm2Error::HeaderMismatch {
            expected: PACKET_HEADER,
            actual: prefix[0],
        });
    }
    reader.read_exact(&mut prefix[1..])?;

    let size = prefix[3] as usize;
    if size == 0 {
        return Err(Ssm2Error::InvalidPacket("size byte is zero".to_string()));
    }

    let total = FRAME_PREFIX_SIZE + size + 1;
    let mut frame = BytesMut::zeroed(total);
    frame[..FRAME_PREFIX_SIZE].copy_from_slice(&prefix);
    reader.read_exact(&mut frame[FRAME_PREFIX_SIZE..])?;

    let packet = Packet { bytes: frame.freeze() };
    packet.verify_checksum()?;
    Ok(packet)
}

/// Time needed to clock `byte_count` bytes over the K-line, in microseconds.
pub fn wire_time_micros(byte_count: usize) -> u64 {
    let seconds = (byte_count as f64 * BITS_PER_BYTE as f64) / BAUD_RATE as f64;
    (seconds * 1_000_000.0).round() as u64
}

pub fn wire_time(byte_count: usize) -> Duration {
    Duration::from_micros(wire_time_micros(byte_count))
}

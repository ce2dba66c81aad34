// Protocol constants for SSM2

/// First byte of every SSM2 frame
pub const PACKET_HEADER: u8 = 0x80;

/// Header, destination, source and size bytes
pub const FRAME_PREFIX_SIZE: usize = 4;

/// Offset of the command byte within a frame
pub const COMMAND_OFFSET: usize = 4;

/// Offset of the first data byte within a frame
pub const DATA_OFFSET: usize = 5;

/// Smallest well-formed frame: prefix, command and checksum
pub const MIN_PACKET_SIZE: usize = FRAME_PREFIX_SIZE + 2;

/// Size of an ECU memory address on the wire
pub const ADDRESS_SIZE: usize = 3;

/// Largest 24-bit memory address
pub const MAX_ADDRESS: u32 = 0xFF_FFFF;

/// Nominal K-line baud rate
pub const BAUD_RATE: u32 = 4800;

/// 8 data bits plus start and stop bit
pub const BITS_PER_BYTE: u32 = 10;

/// Read-address request data flag: single answer
pub const READ_MODE_SINGLE: u8 = 0x00;

/// Read-address request data flag: ECU keeps answering until interrupted
pub const READ_MODE_CONTINUOUS: u8 = 0x01;

/// Init response payload: SSM id occupies bytes 0..3
pub const SSM_ID_SIZE: usize = 3;

/// Init response payload: ROM id occupies bytes 3..8
pub const ROM_ID_SIZE: usize = 5;

/// Init response payload: capability bytes start here
pub const CAPABILITY_OFFSET: usize = SSM_ID_SIZE + ROM_ID_SIZE;

/// Default cap on addresses packed into one read request
pub const DEFAULT_MAX_ADDRESSES: usize = 45;

/// Largest data section a frame can carry: the size byte also counts the command
pub const MAX_DATA_SIZE: usize = u8::MAX as usize - 1;

/// Addresses that fit one read request after the read-mode flag byte
pub const MAX_ADDRESSES_PER_REQUEST: usize = (MAX_DATA_SIZE - 1) / ADDRESS_SIZE;

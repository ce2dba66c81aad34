//! Common test utilities and shared imports

// Allow unused imports and dead code since this is a shared module
// used across multiple test files - not all items are used in every test file
#[allow(unused_imports)]
pub use bytes::Bytes;
#[allow(unused_imports)]
pub use hex;
#[allow(unused_imports)]
pub use ssm2_lib::address::{MemoryAddress, build_address_request, expand_address};
#[allow(unused_imports)]
pub use ssm2_lib::error::Ssm2Error;
#[allow(unused_imports)]
pub use ssm2_lib::packet::{Command, DeviceAddress, Packet, read_packet};
#[allow(unused_imports)]
pub use ssm2_lib::parameter::{CapabilityBit, ParameterConversion, ParameterDescriptor};

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};

/// Decode hex string to bytes for testing
#[allow(dead_code)]
pub fn hex_to_bytes(hex_data: &str) -> Vec<u8> {
    hex::decode(hex_data).expect("Failed to decode hex")
}

/// Route library logs through the test harness; `RUST_LOG=debug` shows frames.
#[allow(dead_code)]
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Init response from an engine ECU: SSM id a21011, ROM id 3a54504007,
/// then capability bytes.
#[allow(dead_code)]
pub const INIT_RESPONSE_PAYLOAD: &[u8] = &[
    0xA2, 0x10, 0x11, 0x3A, 0x54, 0x50, 0x40, 0x07, 0xF3, 0xFA, 0xC9, 0x8E, 0x00,
];

#[allow(dead_code)]
pub fn init_response_frame() -> Vec<u8> {
    Packet::new(
        DeviceAddress::DiagnosticTool,
        DeviceAddress::Engine,
        Command::InitResponse,
        INIT_RESPONSE_PAYLOAD,
    )
    .as_bytes()
    .to_vec()
}

#[allow(dead_code)]
pub fn read_response_frame(values: &[u8]) -> Vec<u8> {
    Packet::new(
        DeviceAddress::DiagnosticTool,
        DeviceAddress::Engine,
        Command::ReadAddressResponse,
        values,
    )
    .as_bytes()
    .to_vec()
}

/// Build a parameter with one conversion.
#[allow(dead_code)]
pub fn parameter(name: &str, address: u32, length: Option<usize>, units: &str, expr: &str) -> ParameterDescriptor {
    ParameterDescriptor {
        id: name.to_uppercase(),
        name: name.to_string(),
        address: MemoryAddress::from_value(address).expect("valid address"),
        length,
        capability: CapabilityBit::default(),
        conversions: vec![ParameterConversion::new(units, expr)],
    }
}

/// In-memory K-line: serves queued bytes and records writes.
///
/// With `echo` set, every write is read back first, as on a real K-line.
/// Once the queue is drained reads either hit end of file or time out forever.
#[allow(dead_code)]
#[derive(Clone, Default)]
pub struct MockTransport {
    pub input: Arc<Mutex<VecDeque<u8>>>,
    pub written: Arc<Mutex<Vec<u8>>>,
    pub echo: bool,
    pub time_out_when_empty: bool,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn new(input: &[u8]) -> Self {
        let transport = Self::default();
        transport.push(input);
        transport
    }

    pub fn with_echo(mut self) -> Self {
        self.echo = true;
        self
    }

    pub fn timing_out(mut self) -> Self {
        self.time_out_when_empty = true;
        self
    }

    pub fn push(&self, bytes: &[u8]) {
        self.input.lock().unwrap().extend(bytes.iter().copied());
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }
}

impl Read for MockTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut input = self.input.lock().unwrap();
        if input.is_empty() {
            if self.time_out_when_empty {
                drop(input);
                std::thread::sleep(std::time::Duration::from_millis(5));
                return Err(io::Error::new(ErrorKind::TimedOut, "no data"));
            }
            return Ok(0);
        }
        let n = buf.len().min(input.len());
        for slot in buf.iter_mut().take(n) {
            *slot = input.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for MockTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.lock().unwrap().extend_from_slice(buf);
        if self.echo {
            let mut input = self.input.lock().unwrap();
            for b in buf.iter().rev() {
                input.push_front(*b);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

use crate::address::MemoryAddress;
use crate::constants::*;
use crate::error::Ssm2Error;
use crate::packet::{Command, DeviceAddress, Packet, read_packet};
use serde::Serialize;
use serialport::SerialPort;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use strum_macros::Display;
use tracing::{debug, info, trace};

// Short read timeout so a blocked read notices a close request quickly
const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

/// How long the handshake waits for the ECU before giving up.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Protocol state of a [`Ssm2Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ConnectionState {
    Closed,
    Open,
    Initialized,
    Streaming,
}

/// Serial line settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    pub timeout: Duration,
}

impl SerialConfig {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: BAUD_RATE,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::new("/dev/ttyUSB0")
    }
}

/// Identity and capabilities reported by the ECU during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitResponse {
    pub ssm_id: Vec<u8>,
    pub rom_id: Vec<u8>,
    pub capabilities: Vec<u8>,
}

impl InitResponse {
    /// Split an init response payload: SSM id, ROM id, then capability bytes.
    pub fn from_payload(payload: &[u8]) -> Result<Self, Ssm2Error> {
        if payload.len() < CAPABILITY_OFFSET {
            return Err(Ssm2Error::InsufficientData {
                expected: CAPABILITY_OFFSET,
                actual: payload.len(),
            });
        }
        Ok(Self {
            ssm_id: payload[..SSM_ID_SIZE].to_vec(),
            rom_id: payload[SSM_ID_SIZE..CAPABILITY_OFFSET].to_vec(),
            capabilities: payload[CAPABILITY_OFFSET..].to_vec(),
        })
    }

    pub fn rom_id_hex(&self) -> String {
        hex::encode(&self.rom_id)
    }

    pub fn ssm_id_hex(&self) -> String {
        hex::encode(&self.ssm_id)
    }
}

/// Requests a connection close from another thread.
///
/// A read blocked on the transport gives up within one read timeout and
/// returns [`Ssm2Error::TransportClosed`].
#[derive(Debug, Clone, Default)]
pub struct CloseHandle(Arc<AtomicBool>);

impl CloseHandle {
    pub fn close(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Retries timed-out reads until data arrives, a close is requested or the
/// deadline passes.
struct InterruptibleReader<'a, T> {
    inner: &'a mut T,
    close: &'a CloseHandle,
    deadline: Option<Instant>,
}

impl<T: Read> Read for InterruptibleReader<'_, T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.close.is_closed() {
                return Err(io::Error::new(ErrorKind::ConnectionAborted, "transport closed"));
            }
            match self.inner.read(buf) {
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                    if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                        return Err(io::Error::new(ErrorKind::TimedOut, "no response from ECU"));
                    }
                }
                other => return other,
            }
        }
    }
}

/// A session with one ECU over a K-line byte stream.
pub struct Ssm2Connection<T = Box<dyn SerialPort>> {
    transport: Option<T>,
    state: ConnectionState,
    source: DeviceAddress,
    destination: DeviceAddress,
    init: Option<InitResponse>,
    close_handle: CloseHandle,
    response_timeout: Duration,
}

impl<T> Ssm2Connection<T> {
    /// Diagnostic tool talking to the engine ECU.
    pub fn new() -> Self {
        Self::with_devices(DeviceAddress::DiagnosticTool, DeviceAddress::Engine)
    }

    pub fn with_devices(source: DeviceAddress, destination: DeviceAddress) -> Self {
        Self {
            transport: None,
            state: ConnectionState::Closed,
            source,
            destination,
            init: None,
            close_handle: CloseHandle::default(),
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    /// Bound on how long the handshake waits for the init response.
    ///
    /// Streaming reads are not bounded; stop them with a [`CloseHandle`].
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn close_handle(&self) -> CloseHandle {
        self.close_handle.clone()
    }

    pub fn init_response(&self) -> Option<&InitResponse> {
        self.init.as_ref()
    }

    /// Release the transport. Safe to call more than once.
    pub fn close(&mut self) {
        self.close_handle.close();
        if self.transport.take().is_some() {
            info!(state = %self.state, "Closing ECU connection");
        }
        self.state = ConnectionState::Closed;
    }

    fn require(&self, expected: ConnectionState) -> Result<(), Ssm2Error> {
        if self.state != expected {
            return Err(Ssm2Error::InvalidState {
                expected,
                actual: self.state,
            });
        }
        if self.close_handle.is_closed() {
            return Err(Ssm2Error::TransportClosed);
        }
        Ok(())
    }

    fn transport_mut(&mut self) -> Result<&mut T, Ssm2Error> {
        self.transport.as_mut().ok_or(Ssm2Error::TransportClosed)
    }
}

impl<T> Default for Ssm2Connection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Ssm2Connection<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl Ssm2Connection<Box<dyn SerialPort>> {
    /// Open the serial line, 8N1 without flow control.
    pub fn open(&mut self, config: &SerialConfig) -> Result<(), Ssm2Error> {
        info!(port = %config.port, baud = config.baud_rate, "Opening serial port");
        let port = serialport::new(&config.port, config.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(config.timeout)
            .open()?;
        self.attach(port)
    }
}

impl<T: Read + Write> Ssm2Connection<T> {
    /// Take ownership of an already opened byte stream.
    pub fn attach(&mut self, transport: T) -> Result<(), Ssm2Error> {
        self.require(ConnectionState::Closed)?;
        self.transport = Some(transport);
        self.state = ConnectionState::Open;
        Ok(())
    }

    fn send(&mut self, packet: &Packet) -> Result<(), Ssm2Error> {
        debug!(command = ?packet.command(), "Sending {}", packet);
        let transport = self.transport_mut()?;
        transport.write_all(packet.as_bytes())?;
        transport.flush()?;
        Ok(())
    }

    /// Next frame addressed from somebody else; our own echoed requests are dropped.
    ///
    /// With a deadline, a silent line fails with a timed-out [`Ssm2Error::Io`].
    fn receive(&mut self, deadline: Option<Instant>) -> Result<Packet, Ssm2Error> {
        let source = self.source;
        let close = self.close_handle.clone();
        loop {
            let transport = self.transport.as_mut().ok_or(Ssm2Error::TransportClosed)?;
            let mut reader = InterruptibleReader {
                inner: transport,
                close: &close,
                deadline,
            };
            let packet = read_packet(&mut reader).map_err(|e| {
                if close.is_closed() {
                    Ssm2Error::TransportClosed
                } else {
                    e
                }
            })?;

            if packet.source() == source {
                trace!("Skipping echo {}", packet);
                continue;
            }
            debug!(command = ?packet.command(), "Received {}", packet);
            return Ok(packet);
        }
    }

    /// Handshake: send the init request and decode the ECU's identity.
    pub fn init_engine(&mut self) -> Result<InitResponse, Ssm2Error> {
        self.require(ConnectionState::Open)?;

        info!("--- Starting ECU Handshake ---");
        self.send(&Packet::init_request(self.destination, self.source))?;
        let response = self.receive(Some(Instant::now() + self.response_timeout))?;
        if response.command() != Command::InitResponse {
            return Err(Ssm2Error::UnexpectedCommand {
                expected: Command::InitResponse.into(),
                actual: response.command().into(),
            });
        }

        let init = InitResponse::from_payload(&response.payload())?;
        info!(
            rom_id = %init.rom_id_hex(),
            ssm_id = %init.ssm_id_hex(),
            capability_bytes = init.capabilities.len(),
            "ECU initialized"
        );
        self.init = Some(init.clone());
        self.state = ConnectionState::Initialized;
        Ok(init)
    }

    /// Ask the ECU to stream the given addresses until interrupted.
    pub fn activate_continuous_read(&mut self, addresses: &[MemoryAddress]) -> Result<(), Ssm2Error> {
        self.require(ConnectionState::Initialized)?;
        if addresses.is_empty() {
            return Err(Ssm2Error::InvalidPacket("no addresses requested".to_string()));
        }
        if addresses.len() > MAX_ADDRESSES_PER_REQUEST {
            return Err(Ssm2Error::InvalidPacket(format!(
                "{} addresses do not fit in one request (max {})",
                addresses.len(),
                MAX_ADDRESSES_PER_REQUEST
            )));
        }

        let request = Packet::read_address_request(self.destination, self.source, addresses, true);
        info!(
            addresses = addresses.len(),
            wire_time_us = crate::packet::wire_time_micros(request.len()),
            "Activating continuous read"
        );
        self.send(&request)?;
        self.state = ConnectionState::Streaming;
        Ok(())
    }

    /// Block until the next streamed frame arrives.
    pub fn next_packet(&mut self) -> Result<Packet, Ssm2Error> {
        self.require(ConnectionState::Streaming)?;
        self.receive(None)
    }
}

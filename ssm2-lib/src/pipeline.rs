use crate::address::{MemoryAddress, build_address_request};
use crate::constants::MAX_ADDRESSES_PER_REQUEST;
use crate::conversion::{CompiledMapping, compile_mappings};
use crate::device::{ConnectionState, Ssm2Connection};
use crate::error::Ssm2Error;
use crate::packet::Packet;
use crate::parameter::ParameterDescriptor;
use crate::sink::{SampleSink, SessionHeader};
use chrono::{DateTime, Utc};
use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Cooperative stop request, set from a signal handler and polled by the loop.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One decoded set of values, in mapping order.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub values: Vec<f64>,
}

/// Counters reported when a streaming session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    pub samples: u64,
    pub skipped: u64,
}

/// Turns streamed read-address responses into samples.
#[derive(Debug, Clone)]
pub struct TelemetryPipeline {
    mappings: Vec<CompiledMapping>,
    address_count: usize,
}

impl TelemetryPipeline {
    pub fn new(mappings: Vec<CompiledMapping>, address_count: usize) -> Self {
        Self {
            mappings,
            address_count,
        }
    }

    /// Lay out `parameters` for a read request and compile their conversions.
    ///
    /// Returns the pipeline and the address list to activate streaming with.
    /// Fails before anything is sent when the addresses exceed one read request.
    pub fn prepare(parameters: &[ParameterDescriptor]) -> Result<(Self, Vec<MemoryAddress>), Ssm2Error> {
        let request = build_address_request(parameters)?;
        let address_count = request.addresses.len();
        if address_count > MAX_ADDRESSES_PER_REQUEST {
            return Err(Ssm2Error::InvalidPacket(format!(
                "{} addresses do not fit in one request (max {})",
                address_count, MAX_ADDRESSES_PER_REQUEST
            )));
        }
        let mappings = compile_mappings(request.mappings)?;
        Ok((Self::new(mappings, address_count), request.addresses))
    }

    pub fn mappings(&self) -> &[CompiledMapping] {
        &self.mappings
    }

    pub fn address_count(&self) -> usize {
        self.address_count
    }

    /// Decode one packet whose payload must match the requested address count.
    pub fn decode(&self, packet: &Packet) -> Result<Sample, Ssm2Error> {
        let payload = packet.payload();
        if payload.len() != self.address_count {
            return Err(Ssm2Error::PayloadLengthMismatch {
                expected: self.address_count,
                actual: payload.len(),
            });
        }

        let values = self
            .mappings
            .iter()
            .map(|m| m.evaluate(&payload))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Sample {
            timestamp: Utc::now(),
            values,
        })
    }

    /// Like [`decode`](Self::decode), but a payload length mismatch yields `None`.
    pub fn sample(&self, packet: &Packet) -> Result<Option<Sample>, Ssm2Error> {
        match self.decode(packet) {
            Ok(sample) => Ok(Some(sample)),
            Err(Ssm2Error::PayloadLengthMismatch { expected, actual }) => {
                debug!(
                    expected_payload = expected,
                    actual_payload = actual,
                    "Skipping sample due to unexpected payload length"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Stream samples into `sink` until `shutdown` is requested or an error occurs.
    ///
    /// The connection must already be streaming. The sink is finished even
    /// when streaming fails.
    pub fn run<T, S>(
        &self,
        connection: &mut Ssm2Connection<T>,
        sink: &mut S,
        shutdown: &ShutdownFlag,
    ) -> Result<RunSummary, Ssm2Error>
    where
        T: Read + Write,
        S: SampleSink + ?Sized,
    {
        let init = match (connection.state(), connection.init_response()) {
            (ConnectionState::Streaming, Some(init)) => init.clone(),
            (actual, _) => {
                return Err(Ssm2Error::InvalidState {
                    expected: ConnectionState::Streaming,
                    actual,
                });
            }
        };

        sink.begin(&SessionHeader {
            init: &init,
            mappings: &self.mappings,
        })?;
        let streamed = self.stream(connection, sink, shutdown);
        let finished = sink.finish();
        let summary = streamed?;
        finished?;

        info!(
            samples = summary.samples,
            skipped = summary.skipped,
            "Received stop signal and discontinued logging"
        );
        Ok(summary)
    }

    fn stream<T, S>(
        &self,
        connection: &mut Ssm2Connection<T>,
        sink: &mut S,
        shutdown: &ShutdownFlag,
    ) -> Result<RunSummary, Ssm2Error>
    where
        T: Read + Write,
        S: SampleSink + ?Sized,
    {
        let mut summary = RunSummary::default();
        while !shutdown.is_requested() {
            let packet = connection.next_packet()?;
            match self.sample(&packet)? {
                Some(sample) => {
                    sink.write(&sample)?;
                    summary.samples += 1;
                }
                None => summary.skipped += 1,
            }
        }
        Ok(summary)
    }
}

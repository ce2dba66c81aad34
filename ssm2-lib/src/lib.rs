pub mod address;
pub mod catalog;
pub mod constants;
pub mod conversion;
pub mod device;
pub mod error;
pub mod expr;
pub mod packet;
pub mod parameter;
pub mod pipeline;
pub mod selection;
pub mod sink;

// Re-export the main types for easy access
pub use address::{AddressRequest, MemoryAddress, ParameterMapping, build_address_request, expand_address};
pub use conversion::{CompiledMapping, compile_mappings};
pub use device::{CloseHandle, ConnectionState, InitResponse, SerialConfig, Ssm2Connection};
pub use error::Ssm2Error;
pub use packet::{Command, DeviceAddress, Packet, read_packet};
pub use parameter::{CapabilityBit, ParameterConversion, ParameterDescriptor, supported_parameters};
pub use pipeline::{RunSummary, Sample, ShutdownFlag, TelemetryPipeline};
pub use sink::{CsvSink, NdjsonSink, SampleSink, SessionHeader};

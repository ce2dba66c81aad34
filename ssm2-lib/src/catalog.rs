//! RomRaider logger definition loader.
//!
//! Only the SSM protocol's `<parameter>` entries are read, and of those only
//! id, name, capability location, address and conversions. Computed
//! parameters (no `<address>`) are skipped.

use crate::address::MemoryAddress;
use crate::error::Ssm2Error;
use crate::parameter::{CapabilityBit, ParameterConversion, ParameterDescriptor};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::path::Path;
use tracing::{debug, info};

const SSM_PROTOCOL_ID: &str = "SSM";

#[derive(Debug, Default)]
struct ParameterBuilder {
    id: String,
    name: String,
    byte_index: Option<usize>,
    bit: Option<u8>,
    address: Option<String>,
    length: Option<usize>,
    conversions: Vec<ParameterConversion>,
}

impl ParameterBuilder {
    fn from_element(e: &BytesStart) -> Self {
        Self {
            id: get_attribute(e, "id").unwrap_or_default(),
            name: get_attribute(e, "name").unwrap_or_default(),
            byte_index: get_attribute(e, "ecubyteindex").and_then(|v| v.trim().parse().ok()),
            bit: get_attribute(e, "ecubit").and_then(|v| v.trim().parse().ok()),
            ..Default::default()
        }
    }

    fn build(self) -> Result<Option<ParameterDescriptor>, Ssm2Error> {
        let (Some(address), Some(byte_index), Some(bit)) = (self.address, self.byte_index, self.bit) else {
            debug!(parameter = %self.name, "Skipping parameter without address or capability bit");
            return Ok(None);
        };
        let address: MemoryAddress = address
            .parse()
            .map_err(|e| Ssm2Error::Catalog(format!("parameter `{}`: {}", self.name, e)))?;

        Ok(Some(ParameterDescriptor {
            id: self.id,
            name: self.name,
            address,
            length: self.length,
            capability: CapabilityBit { byte_index, bit },
            conversions: self.conversions,
        }))
    }
}

#[derive(Debug, Default)]
struct ParserState {
    in_ssm_protocol: bool,
    in_address: bool,
    current: Option<ParameterBuilder>,
}

/// Read a logger definition file.
pub fn load_catalog(path: &Path) -> Result<Vec<ParameterDescriptor>, Ssm2Error> {
    let xml = std::fs::read_to_string(path)?;
    let parameters = parse_catalog(&xml)?;
    info!(path = %path.display(), parameters = parameters.len(), "Loaded logger definitions");
    Ok(parameters)
}

/// Parse the SSM parameters of a logger definition document.
pub fn parse_catalog(xml: &str) -> Result<Vec<ParameterDescriptor>, Ssm2Error> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut parameters = Vec::new();
    let mut state = ParserState::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => handle_start(&mut state, e),
            Event::Empty(ref e) => {
                // <conversion .../> is self-closing; treat as start + end
                handle_start(&mut state, e);
                state.in_address = false;
            }
            Event::Text(ref e) => {
                if state.in_address {
                    if let Some(current) = state.current.as_mut() {
                        current.address = Some(e.unescape().unwrap_or_default().trim().to_string());
                    }
                }
            }
            Event::End(ref e) => match e.name().as_ref() {
                b"protocol" => state.in_ssm_protocol = false,
                b"address" => state.in_address = false,
                b"parameter" => {
                    if let Some(builder) = state.current.take() {
                        if let Some(parameter) = builder.build()? {
                            parameters.push(parameter);
                        }
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(parameters)
}

fn handle_start(state: &mut ParserState, e: &BytesStart) {
    match e.name().as_ref() {
        b"protocol" => {
            state.in_ssm_protocol = get_attribute(e, "id").as_deref() == Some(SSM_PROTOCOL_ID);
        }
        b"parameter" if state.in_ssm_protocol => {
            state.current = Some(ParameterBuilder::from_element(e));
        }
        b"address" => {
            if let Some(current) = state.current.as_mut() {
                current.length = get_attribute(e, "length").and_then(|v| v.trim().parse().ok());
                state.in_address = true;
            }
        }
        b"conversion" => {
            if let Some(current) = state.current.as_mut() {
                current.conversions.push(ParameterConversion::new(
                    get_attribute(e, "units").unwrap_or_default(),
                    get_attribute(e, "expr").unwrap_or_default(),
                ));
            }
        }
        _ => {}
    }
}

fn get_attribute(e: &BytesStart, name: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == name.as_bytes())
        .map(|attr| match attr.unescape_value() {
            Ok(value) => value.into_owned(),
            Err(_) => String::from_utf8_lossy(&attr.value).into_owned(),
        })
}

use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::io::{self, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

use ssm2_lib::catalog::load_catalog;
use ssm2_lib::selection::{DEFAULT_PARAMETER_NAMES, ParameterRequest, select_parameters};
use ssm2_lib::{
    InitResponse, ParameterDescriptor, SerialConfig, ShutdownFlag, Ssm2Connection, Ssm2Error, TelemetryPipeline,
    supported_parameters,
};

use crate::output::open_sink;
use crate::{ListFormat, LogArgs, ParamsArgs};

/// Pause between the handshake and the continuous read request.
const ACTIVATION_COOLDOWN: Duration = Duration::from_millis(200);

fn connect(connection: &mut Ssm2Connection, port: &str, defs: &Path) -> Result<(Vec<ParameterDescriptor>, InitResponse)> {
    let catalog = load_catalog(defs).with_context(|| format!("Failed to load logger definitions from {:?}", defs))?;
    connection
        .open(&SerialConfig::new(port))
        .with_context(|| format!("Failed to open serial port {}", port))?;
    let init = connection.init_engine().context("ECU handshake failed")?;
    Ok((catalog, init))
}

fn request_from_args(args: &LogArgs) -> ParameterRequest {
    if args.all {
        ParameterRequest::All
    } else {
        ParameterRequest::from_csv(args.params.as_deref().unwrap_or_default())
    }
}

/// Handshake, select, then stream into the chosen sink until stopped.
pub fn log_session(mut connection: Ssm2Connection, port: &str, args: &LogArgs, shutdown: &ShutdownFlag) -> Result<()> {
    let (catalog, init) = connect(&mut connection, port, &args.defs)?;

    let supported = supported_parameters(&catalog, &init.capabilities);
    info!(supported = supported.len(), known = catalog.len(), "Matched ECU capabilities");

    let selection = select_parameters(&supported, &request_from_args(args), DEFAULT_PARAMETER_NAMES, args.max_addresses);
    if selection.trimmed {
        warn!(
            wanted = selection.wanted_addresses,
            kept = selection.address_count(),
            max = args.max_addresses,
            "Too many addresses requested, some parameters were dropped"
        );
    }
    if selection.parameters.is_empty() {
        bail!("None of the requested parameters are supported by this ECU");
    }
    let names: Vec<&str> = selection.parameters.iter().map(|p| p.name.as_str()).collect();
    info!(parameters = ?names, "Logging parameters");

    let (pipeline, addresses) = TelemetryPipeline::prepare(&selection.parameters)?;

    let Some((mut sink, _socket)) = open_sink(args, &init, shutdown)? else {
        info!("Stopped before a client connected");
        return Ok(());
    };

    thread::sleep(ACTIVATION_COOLDOWN);
    connection.activate_continuous_read(&addresses)?;

    let result = match pipeline.run(&mut connection, &mut sink, shutdown) {
        Err(Ssm2Error::TransportClosed) if shutdown.is_requested() => {
            info!("Serial port closed during shutdown");
            Ok(())
        }
        other => other.map(|_| ()).context("Streaming failed"),
    };
    connection.close();
    result
}

#[derive(Serialize)]
struct ParameterRecord<'a> {
    id: &'a str,
    name: &'a str,
    address: String,
    length: usize,
    units: Vec<&'a str>,
    supported: bool,
}

/// Handshake and print the parameters the ECU reports as supported.
pub fn list_parameters(mut connection: Ssm2Connection, port: &str, args: &ParamsArgs) -> Result<()> {
    let (catalog, init) = connect(&mut connection, port, &args.defs)?;
    connection.close();

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match args.format {
        ListFormat::Text => write_text(&mut out, &catalog, &init)?,
        ListFormat::Ndjson => write_ndjson(&mut out, &catalog, &init)?,
    }
    out.flush()?;
    Ok(())
}

fn write_text<W: Write>(out: &mut W, catalog: &[ParameterDescriptor], init: &InitResponse) -> Result<()> {
    let supported = supported_parameters(catalog, &init.capabilities);
    writeln!(out, "ROM id {} / SSM id {}: {} supported parameters", init.rom_id_hex(), init.ssm_id_hex(), supported.len())?;
    for parameter in &supported {
        let units: Vec<&str> = parameter.conversions.iter().map(|c| c.units.as_str()).collect();
        writeln!(
            out,
            "{:<8} {:<40} {} [{}]",
            parameter.id,
            parameter.name,
            parameter.address,
            units.join(", ")
        )?;
    }
    Ok(())
}

fn write_ndjson<W: Write>(out: &mut W, catalog: &[ParameterDescriptor], init: &InitResponse) -> Result<()> {
    for parameter in catalog {
        let record = ParameterRecord {
            id: &parameter.id,
            name: &parameter.name,
            address: parameter.address.to_string(),
            length: parameter.byte_length(),
            units: parameter.conversions.iter().map(|c| c.units.as_str()).collect(),
            supported: parameter.is_supported(&init.capabilities),
        };
        serde_json::to_writer(&mut *out, &record)?;
        writeln!(out)?;
    }
    Ok(())
}

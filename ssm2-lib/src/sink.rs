//! Sample sinks
//!
//! A sink receives the session header once, then every decoded sample.

use crate::conversion::CompiledMapping;
use crate::device::InitResponse;
use crate::error::Ssm2Error;
use crate::pipeline::Sample;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;

/// What a sink needs to know before the first sample.
#[derive(Debug, Clone, Copy)]
pub struct SessionHeader<'a> {
    pub init: &'a InitResponse,
    pub mappings: &'a [CompiledMapping],
}

pub trait SampleSink {
    fn begin(&mut self, header: &SessionHeader<'_>) -> Result<(), Ssm2Error>;

    fn write(&mut self, sample: &Sample) -> Result<(), Ssm2Error>;

    fn finish(&mut self) -> Result<(), Ssm2Error> {
        Ok(())
    }
}

/// One row per sample: unix seconds, then one column per parameter.
pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> CsvSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(writer),
        }
    }

    pub fn into_inner(self) -> Result<W, Ssm2Error> {
        self.writer
            .into_inner()
            .map_err(|e| Ssm2Error::Io(e.into_error()))
    }
}

impl<W: Write> SampleSink for CsvSink<W> {
    fn begin(&mut self, header: &SessionHeader<'_>) -> Result<(), Ssm2Error> {
        let mut row = vec!["timestamp".to_string()];
        row.extend(header.mappings.iter().map(CompiledMapping::header_label));
        self.writer.write_record(&row)?;
        self.writer.flush()?;
        Ok(())
    }

    fn write(&mut self, sample: &Sample) -> Result<(), Ssm2Error> {
        let mut row = Vec::with_capacity(sample.values.len() + 1);
        row.push(sample.timestamp.timestamp().to_string());
        row.extend(sample.values.iter().map(|v| format!("{:.6}", v)));
        self.writer.write_record(&row)?;
        self.writer.flush()?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), Ssm2Error> {
        self.writer.flush()?;
        Ok(())
    }
}

#[derive(Serialize)]
struct NdjsonRecord<'a> {
    ts: i64,
    rom_id: &'a str,
    ssm_id: &'a str,
    data: BTreeMap<&'a str, f64>,
}

/// One self-describing JSON object per line.
pub struct NdjsonSink<W: Write> {
    writer: W,
    rom_id: String,
    ssm_id: String,
    keys: Vec<String>,
}

impl<W: Write> NdjsonSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            rom_id: String::new(),
            ssm_id: String::new(),
            keys: Vec::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> SampleSink for NdjsonSink<W> {
    fn begin(&mut self, header: &SessionHeader<'_>) -> Result<(), Ssm2Error> {
        self.rom_id = header.init.rom_id_hex();
        self.ssm_id = header.init.ssm_id_hex();
        self.keys = header.mappings.iter().map(|m| m.key.clone()).collect();
        Ok(())
    }

    fn write(&mut self, sample: &Sample) -> Result<(), Ssm2Error> {
        let record = NdjsonRecord {
            ts: sample.timestamp.timestamp_millis(),
            rom_id: &self.rom_id,
            ssm_id: &self.ssm_id,
            data: self
                .keys
                .iter()
                .map(String::as_str)
                .zip(sample.values.iter().copied())
                .collect(),
        };
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), Ssm2Error> {
        self.writer.flush()?;
        Ok(())
    }
}

impl<S: SampleSink + ?Sized> SampleSink for Box<S> {
    fn begin(&mut self, header: &SessionHeader<'_>) -> Result<(), Ssm2Error> {
        (**self).begin(header)
    }

    fn write(&mut self, sample: &Sample) -> Result<(), Ssm2Error> {
        (**self).write(sample)
    }

    fn finish(&mut self) -> Result<(), Ssm2Error> {
        (**self).finish()
    }
}

use crate::address::ParameterMapping;
use crate::error::Ssm2Error;
use crate::expr::Expr;
use byteorder::{BigEndian, ByteOrder};
use regex::Regex;
use std::sync::LazyLock;

/// Byte widths of a raw reading.
const RAW_WIDTHS: [usize; 3] = [1, 2, 4];

static KEY_CLEANER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("static regex"));

/// A mapping with its formula parsed, ready to evaluate per sample.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledMapping {
    pub mapping: ParameterMapping,
    /// Normalized key used in structured output.
    pub key: String,
    expr: Expr,
}

impl CompiledMapping {
    /// Pick the conversion matching the mapping's unit and parse its formula.
    ///
    /// Widths [`raw_value`] cannot decode are rejected here, before streaming.
    pub fn compile(mapping: ParameterMapping) -> Result<Self, Ssm2Error> {
        if !RAW_WIDTHS.contains(&mapping.length) {
            return Err(Ssm2Error::UnsupportedWidth(mapping.length));
        }
        let conversion = mapping
            .parameter
            .conversions
            .iter()
            .find(|c| c.units == mapping.units)
            .ok_or_else(|| Ssm2Error::MissingConversion {
                parameter: mapping.parameter.name.clone(),
                unit: mapping.units.clone(),
            })?;
        let expr = Expr::parse(&conversion.expr)?;
        let key = normalize_key(&mapping.parameter.name, &mapping.units);

        Ok(Self { mapping, key, expr })
    }

    /// Column header for tabular output.
    pub fn header_label(&self) -> String {
        header_label(&self.mapping)
    }

    /// Convert this parameter's bytes of a response payload.
    pub fn evaluate(&self, payload: &[u8]) -> Result<f64, Ssm2Error> {
        let raw = payload
            .get(self.mapping.range())
            .ok_or(Ssm2Error::InsufficientData {
                expected: self.mapping.start + self.mapping.length,
                actual: payload.len(),
            })?;
        let x = raw_value(raw)?;
        self.expr.evaluate(f64::from(x))
    }
}

/// Compile every mapping, failing on the first that has no usable conversion.
pub fn compile_mappings(mappings: Vec<ParameterMapping>) -> Result<Vec<CompiledMapping>, Ssm2Error> {
    mappings.into_iter().map(CompiledMapping::compile).collect()
}

/// Unsigned big-endian value of a 1, 2 or 4 byte reading.
pub fn raw_value(bytes: &[u8]) -> Result<u32, Ssm2Error> {
    match bytes.len() {
        1 => Ok(u32::from(bytes[0])),
        2 => Ok(u32::from(BigEndian::read_u16(bytes))),
        4 => Ok(BigEndian::read_u32(bytes)),
        other => Err(Ssm2Error::UnsupportedWidth(other)),
    }
}

/// `name` or `name (units)`.
pub fn header_label(mapping: &ParameterMapping) -> String {
    if mapping.units.is_empty() {
        mapping.parameter.name.clone()
    } else {
        format!("{} ({})", mapping.parameter.name, mapping.units)
    }
}

/// Lower-case snake key from a parameter name, suffixed with its unit.
///
/// `Engine Speed` in `rpm` becomes `engine_speed_rpm`; a name that already
/// ends in the unit is left alone.
pub fn normalize_key(name: &str, units: &str) -> String {
    let base = name.to_lowercase().replace(['(', ')'], " ");
    let mut key = KEY_CLEANER.replace_all(&base, "_").trim_matches('_').to_string();

    let units = units.to_lowercase();
    let units = KEY_CLEANER.replace_all(&units, "_");
    let units = units.trim_matches('_');
    if !units.is_empty() && !key.ends_with(&format!("_{}", units)) {
        key.push('_');
        key.push_str(units);
    }
    key
}

use crate::parameter::ParameterDescriptor;
use std::collections::HashMap;
use tracing::debug;

/// Parameters logged when the user names none.
pub const DEFAULT_PARAMETER_NAMES: &[&str] = &[
    "Engine Speed",
    "Throttle Opening Angle",
    "Manifold Relative Pressure",
    "Manifold Absolute Pressure",
    "Primary Wastegate Duty Cycle",
    "Mass Airflow",
    "Ignition Timing",
    "Fine Learning Knock Correction",
    "Feedback Knock Correction",
    "A/F Correction #1",
    "A/F Learning #1",
    "Coolant Temperature",
    "Intake Air Temperature",
    "Vehicle Speed",
    "Rear O2 Sensor",
    "Injector Pulse Width",
    "Battery Voltage",
    "Calculated Load",
];

/// Which supported parameters to log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterRequest {
    /// Every supported parameter, catalog order.
    All,
    /// Named parameters, case-insensitive, in the given order.
    Named(Vec<String>),
}

impl ParameterRequest {
    /// Parse a comma separated list; blank entries are dropped.
    pub fn from_csv(list: &str) -> Self {
        ParameterRequest::Named(
            list.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Selection {
    pub parameters: Vec<ParameterDescriptor>,
    /// Some parameters were dropped to stay within the address budget.
    pub trimmed: bool,
    /// Addresses the full request would have needed.
    pub wanted_addresses: usize,
}

impl Selection {
    pub fn address_count(&self) -> usize {
        self.parameters.iter().map(ParameterDescriptor::byte_length).sum()
    }
}

/// Resolve a request against the supported parameters and enforce the
/// address budget. `max_addresses == 0` disables the budget.
///
/// `defaults` stands in for an empty name list.
pub fn select_parameters(
    supported: &[ParameterDescriptor],
    request: &ParameterRequest,
    defaults: &[&str],
    max_addresses: usize,
) -> Selection {
    let chosen: Vec<&ParameterDescriptor> = match request {
        ParameterRequest::All => supported.iter().collect(),
        ParameterRequest::Named(names) => {
            let lookup: HashMap<String, &ParameterDescriptor> =
                supported.iter().map(|p| (p.name.to_lowercase(), p)).collect();
            let wanted: Vec<String> = if names.is_empty() {
                defaults.iter().map(|s| s.to_string()).collect()
            } else {
                names.clone()
            };
            wanted
                .iter()
                .filter_map(|name| {
                    let found = lookup.get(&name.to_lowercase()).copied();
                    if found.is_none() {
                        debug!(parameter = %name, "Requested parameter not supported by ECU");
                    }
                    found
                })
                .collect()
        }
    };

    let mut selection = Selection::default();
    let mut used = 0;
    for parameter in chosen {
        let length = parameter.byte_length();
        selection.wanted_addresses += length;
        if max_addresses > 0 && used + length > max_addresses {
            selection.trimmed = true;
            continue;
        }
        used += length;
        selection.parameters.push(parameter.clone());
    }
    selection
}

//! Parser for the CSV report written by the hardware profiler.
//!
//! The report is line oriented and comma delimited. The processor section
//! starts at a `Processor Name:` line and holds `Label :,value` pairs until
//! `Profile Time:`. The metric section starts after a `System (Aggregated)`
//! marker: an optional header row (`IC Fetch ...`) followed by one data row
//! whose values are addressed by fixed column index.
//!
//! Column positions are an uncontrolled dependency: there is no format
//! version in the report, so every field is parsed independently and a
//! field that is missing or non-numeric keeps its previous value.

use tracing::{debug, warn};

use crate::error::TelemetryError;
use crate::snapshot::{CacheMetrics, ProcessorTopology};

/// Marker line preceding the aggregated metric row.
pub const AGGREGATED_MARKER: &str = "System (Aggregated)";
const HEADER_PREFIX: &str = "IC Fetch";
const PROCESSOR_NAME: &str = "Processor Name:";
const PROFILE_TIME: &str = "Profile Time:";

/// Column of "IC Fetch Miss Ratio".
pub const COL_L1I_MISS: usize = 0;
/// Column of "L2 Miss (pti)".
pub const COL_L2_MISS: usize = 16;
/// Column of "L2 Hit (pti)".
pub const COL_L2_HIT: usize = 20;
/// Column of "L1 DC Miss (pti)".
pub const COL_L1D_MISS: usize = 24;

/// Outcome of one parse: the merged value and how many fields were taken
/// from the input. Zero fields means the input was unusable and `value` is
/// the unchanged previous value.
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed<T> {
    pub value: T,
    pub fields_parsed: usize,
}

impl<T> Parsed<T> {
    pub fn is_failure(&self) -> bool {
        self.fields_parsed == 0
    }

    /// Converts a failed parse into `TelemetryError::Parse`.
    pub fn into_result(self, what: &str) -> Result<T, TelemetryError> {
        if self.is_failure() {
            Err(TelemetryError::Parse(format!("no valid {} fields", what)))
        } else {
            Ok(self.value)
        }
    }
}

/// Parses a float with '.' as decimal separator regardless of locale.
fn parse_number(raw: &str) -> Option<f64> {
    let v: f64 = raw.trim().trim_end_matches('%').trim().parse().ok()?;
    v.is_finite().then_some(v)
}

fn parse_count(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    raw.parse::<u32>()
        .ok()
        .or_else(|| parse_number(raw).filter(|v| *v >= 0.0 && v.fract() == 0.0).map(|v| v as u32))
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "enabled" => Some(true),
        "false" | "no" | "0" | "disabled" => Some(false),
        _ => None,
    }
}

/// Value column of a `Label :,value` line.
fn value_of(line: &str) -> Option<&str> {
    line.split(',').nth(1).map(str::trim).filter(|v| !v.is_empty())
}

/// Parses the processor section into a topology, starting from `previous`.
pub fn parse_topology<I, S>(lines: I, previous: &ProcessorTopology) -> Parsed<ProcessorTopology>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut topo = previous.clone();
    let mut fields = 0usize;
    let mut in_section = false;
    let mut ccd_from_ccd_line = false;

    for line in lines {
        let line = line.as_ref().trim();

        if line.starts_with(PROCESSOR_NAME) {
            in_section = true;
            if let Some(name) = value_of(line) {
                topo.name = name.to_string();
                fields += 1;
            }
            continue;
        }
        if !in_section {
            continue;
        }
        if line.starts_with(PROFILE_TIME) {
            break;
        }

        let Some(value) = value_of(line) else {
            continue;
        };

        let parsed = if line.starts_with("Number of Cores") {
            parse_count(value).map(|v| topo.core_count = v)
        } else if line.starts_with("Number of Threads") {
            parse_count(value).map(|v| topo.thread_count = v)
        } else if line.starts_with("Core P0 state frequency") {
            parse_number(value).map(|v| topo.base_frequency_mhz = v)
        } else if line.starts_with("Number of Core Complexes") {
            parse_count(value).map(|v| topo.ccx_count = v)
        } else if line.starts_with("Number of CCDs") {
            parse_count(value).map(|v| {
                topo.ccd_count = v;
                ccd_from_ccd_line = true;
            })
        } else if line.starts_with("Number of Sockets") {
            // Older reports have no CCD line; the socket count stands in.
            parse_count(value).map(|v| {
                if !ccd_from_ccd_line {
                    topo.ccd_count = v;
                }
            })
        } else if line.starts_with("SMT Enabled") {
            parse_flag(value).map(|v| topo.smt_enabled = v)
        } else {
            continue;
        };

        match parsed {
            Some(()) => fields += 1,
            None => debug!("Ignoring malformed topology line: {}", line),
        }
    }

    if fields == 0 {
        warn!("Profiler report contained no processor topology fields");
        return Parsed {
            value: previous.clone(),
            fields_parsed: 0,
        };
    }

    Parsed {
        value: topo,
        fields_parsed: fields,
    }
}

/// Parses the aggregated metric row into cache metrics, starting from `previous`.
pub fn parse_cache_metrics<I, S>(lines: I, previous: &CacheMetrics) -> Parsed<CacheMetrics>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut metrics = *previous;
    let mut fields = 0usize;
    let mut in_section = false;

    for line in lines {
        let line = line.as_ref().trim();

        if line.starts_with(AGGREGATED_MARKER) {
            in_section = true;
            continue;
        }
        if !in_section || line.is_empty() || line.starts_with(HEADER_PREFIX) {
            continue;
        }

        let columns: Vec<&str> = line.split(',').collect();
        let mut take = |col: usize, slot: &mut f64| {
            if let Some(v) = columns.get(col).and_then(|raw| parse_number(raw)) {
                *slot = v;
                fields += 1;
            }
        };
        take(COL_L1I_MISS, &mut metrics.l1_instruction_miss_percent);
        take(COL_L1D_MISS, &mut metrics.l1_data_miss_per_thousand_instructions);
        take(COL_L2_MISS, &mut metrics.l2_miss_per_thousand_instructions);
        take(COL_L2_HIT, &mut metrics.l2_hit_per_thousand_instructions);

        if columns.len() <= COL_L1D_MISS {
            debug!(
                "Aggregated row has {} columns, expected at least {}",
                columns.len(),
                COL_L1D_MISS + 1
            );
        }
        // Only the first data row after the marker is used.
        break;
    }

    if fields == 0 {
        warn!("Profiler report contained no usable cache metric fields");
        return Parsed {
            value: *previous,
            fields_parsed: 0,
        };
    }

    Parsed {
        value: metrics,
        fields_parsed: fields,
    }
}

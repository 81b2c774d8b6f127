//! Observation CSV ingest and export.
//!
//! Expected columns (header names are case-insensitive, BOM tolerant):
//!
//! - `group`: integer group id, non-decreasing through the file
//! - `x`: independent variable (HJD − 2450000 for the built-in families)
//! - `y`: observed value (flux)
//! - `sigma`: one-sigma uncertainty of `y`
//! - `tag` (optional): integer forwarded to the forward model
//!
//! Group ids are renumbered densely in order of appearance. The weight of a
//! point is `1 / sigma`, divided by its group's normalization factor.
//!
//! Rows that fail to parse or carry non-finite values / `sigma <= 0` are
//! skipped and reported; a group id that goes backwards is fatal, since the
//! engine relies on contiguous groups.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::StringRecord;

use crate::domain::Observation;
use crate::error::AppError;

/// A row-level error encountered during ingest.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct IngestedData {
    pub points: Vec<Observation>,
    /// Raw group id for each dense group index.
    pub group_ids: Vec<i64>,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
    pub rows_used: usize,
}

impl IngestedData {
    pub fn group_count(&self) -> usize {
        self.group_ids.len()
    }
}

struct ParsedRow {
    group: i64,
    x: f64,
    y: f64,
    sigma: f64,
    tag: i32,
}

/// Load observations from a CSV file.
pub fn load_observations(path: &Path, normalizations: &[f64]) -> Result<IngestedData, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::config(format!("Failed to open data CSV '{}': {e}", path.display())))?;
    read_observations(file, normalizations)
}

/// Parse observations from any CSV reader.
pub fn read_observations<R: Read>(input: R, normalizations: &[f64]) -> Result<IngestedData, AppError> {
    if let Some(bad) = normalizations.iter().find(|v| !(v.is_finite() && **v > 0.0)) {
        return Err(AppError::config(format!(
            "Normalization factors must be positive, got {bad}."
        )));
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);

    let headers = reader
        .headers()
        .map_err(|e| AppError::config(format!("Failed to read CSV headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);
    for required in ["group", "x", "y", "sigma"] {
        if !header_map.contains_key(required) {
            return Err(AppError::config(format!("Missing required column: `{required}`")));
        }
    }

    let mut points = Vec::new();
    let mut group_ids: Vec<i64> = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // Header is line 1.
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        let row = match parse_row(&record, &header_map) {
            Ok(row) => row,
            Err(message) => {
                row_errors.push(RowError { line, message });
                continue;
            }
        };

        let group = match group_ids.last() {
            Some(last) if row.group == *last => group_ids.len() - 1,
            Some(last) if row.group < *last => {
                return Err(AppError::config(format!(
                    "Line {line}: group {} follows group {last}; groups must be contiguous and non-decreasing.",
                    row.group
                )));
            }
            _ => {
                group_ids.push(row.group);
                group_ids.len() - 1
            }
        };

        let normalization = normalizations.get(group).copied().unwrap_or(1.0);
        points.push(Observation {
            group,
            x: row.x,
            y: row.y,
            weight: 1.0 / row.sigma / normalization,
            tag: row.tag,
        });
    }

    let rows_used = points.len();
    if rows_used == 0 {
        return Err(AppError::data("No valid observation rows in the data CSV."));
    }

    Ok(IngestedData {
        points,
        group_ids,
        row_errors,
        rows_read,
        rows_used,
    })
}

/// Write observations in the same CSV layout the loader reads.
pub fn write_observations(path: &Path, points: &[Observation]) -> Result<(), AppError> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| AppError::output(format!("Failed to create data CSV '{}': {e}", path.display())))?;

    writer
        .write_record(["group", "x", "y", "sigma", "tag"])
        .map_err(|e| AppError::output(format!("Failed to write data CSV header: {e}")))?;
    for p in points {
        writer
            .write_record([
                p.group.to_string(),
                format!("{:.6}", p.x),
                format!("{:.8e}", p.y),
                format!("{:.8e}", 1.0 / p.weight),
                p.tag.to_string(),
            ])
            .map_err(|e| AppError::output(format!("Failed to write data CSV row: {e}")))?;
    }
    writer
        .flush()
        .map_err(|e| AppError::output(format!("Failed to flush data CSV: {e}")))?;
    Ok(())
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports often prefix the first header with a UTF-8 BOM.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

fn parse_row(record: &StringRecord, header_map: &HashMap<String, usize>) -> Result<ParsedRow, String> {
    let group = get_required(record, header_map, "group")?
        .parse::<i64>()
        .map_err(|_| "Invalid `group` value (expected an integer).".to_string())?;
    let x = parse_f64(get_required(record, header_map, "x")?, "x")?;
    let y = parse_f64(get_required(record, header_map, "y")?, "y")?;
    let sigma = parse_f64(get_required(record, header_map, "sigma")?, "sigma")?;
    if sigma <= 0.0 {
        return Err(format!("Non-positive `sigma` ({sigma})."));
    }
    let tag = match get_optional(record, header_map, "tag") {
        Some(s) => s
            .parse::<i32>()
            .map_err(|_| format!("Invalid `tag` value '{s}'."))?,
        None => 0,
    };

    Ok(ParsedRow {
        group,
        x,
        y,
        sigma,
        tag,
    })
}

fn get_required<'a>(
    record: &'a StringRecord,
    header_map: &HashMap<String, usize>,
    name: &str,
) -> Result<&'a str, String> {
    let idx = header_map
        .get(name)
        .ok_or_else(|| format!("Missing required column: `{name}`"))?;
    record
        .get(*idx)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("Missing required value: `{name}`"))
}

fn get_optional<'a>(record: &'a StringRecord, header_map: &HashMap<String, usize>, name: &str) -> Option<&'a str> {
    let idx = header_map.get(name)?;
    record.get(*idx).map(str::trim).filter(|s| !s.is_empty())
}

fn parse_f64(s: &str, name: &str) -> Result<f64, String> {
    let v = s
        .parse::<f64>()
        .map_err(|_| format!("Invalid `{name}` value '{s}'."))?;
    if v.is_finite() {
        Ok(v)
    } else {
        Err(format!("Non-finite `{name}` value."))
    }
}

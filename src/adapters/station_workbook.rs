use crate::api::lib::{canonical_column_name, normalize_date_key, parse_measurement};
use crate::api::models::Observation;
use crate::errors::{PipelineError, PipelineResult};
use calamine::{open_workbook_auto, Data, Reader};
use chrono::{NaiveDateTime, Timelike};
use std::path::Path;
use tracing::{debug, info};

pub const REQUIRED_COLUMNS: [&str; 3] = ["name", "date", "first"];

static EMPTY_CELL: Data = Data::Empty;

/// Reads the first worksheet of the station workbook. Header names go through
/// the rename map before the `name`, `date` and `first` columns are selected.
pub fn read_station_workbook(path: &Path) -> PipelineResult<Vec<Observation>> {
    let mut workbook = open_workbook_auto(path).map_err(|source| PipelineError::Workbook {
        path: path.to_path_buf(),
        source,
    })?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| PipelineError::EmptyWorkbook {
            path: path.to_path_buf(),
        })?
        .map_err(|source| PipelineError::Workbook {
            path: path.to_path_buf(),
            source,
        })?;

    let mut rows = range.rows();
    let header: Vec<String> = rows
        .next()
        .map(|cells| {
            cells
                .iter()
                .map(|cell| canonical_column_name(&cell_text(cell).unwrap_or_default()).to_owned())
                .collect()
        })
        .unwrap_or_default();

    let mut indices = [0usize; 3];
    for (slot, column) in indices.iter_mut().zip(REQUIRED_COLUMNS) {
        *slot = header
            .iter()
            .position(|name| name == column)
            .ok_or_else(|| PipelineError::MissingColumn {
                column,
                path: path.to_path_buf(),
            })?;
    }
    let [name_idx, date_idx, value_idx] = indices;

    let mut observations = Vec::new();
    let mut skipped = 0usize;
    for (offset, cells) in rows.enumerate() {
        // Spreadsheet rows are 1-based and the header occupies row 1
        let row_number = offset + 2;
        if cells.iter().all(|cell| matches!(cell, Data::Empty)) {
            continue;
        }

        let cell = |idx: usize| cells.get(idx).unwrap_or(&EMPTY_CELL);
        let (Some(station_id), Some(date)) = (cell_text(cell(name_idx)), date_text(cell(date_idx)))
        else {
            skipped += 1;
            continue;
        };
        let value = cell_value(cell(value_idx), path, row_number)?;

        observations.push(Observation {
            station_id,
            date,
            value,
        });
    }

    if skipped > 0 {
        debug!(rows = skipped, path = %path.display(), "skipped rows without station or date");
    }
    info!(rows = observations.len(), path = %path.display(), "loaded station workbook");
    Ok(observations)
}

fn format_datetime(datetime: NaiveDateTime) -> String {
    if datetime.time().num_seconds_from_midnight() == 0 {
        datetime.format("%Y-%m-%d").to_string()
    } else {
        datetime.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

/// Cell rendered as text. Whole floats drop their decimal part so numeric
/// station codes match the delimited file.
fn cell_text(cell: &Data) -> Option<String> {
    let text = match cell {
        Data::String(text) | Data::DateTimeIso(text) | Data::DurationIso(text) => {
            text.trim().to_owned()
        }
        Data::Int(value) => value.to_string(),
        Data::Float(value) if value.fract() == 0.0 && value.abs() < 1e15 => {
            format!("{}", *value as i64)
        }
        Data::Float(value) => value.to_string(),
        Data::Bool(value) => value.to_string(),
        Data::DateTime(datetime) => format_datetime(datetime.as_datetime()?),
        _ => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Date cells are normalized to `YYYY-MM-DD` when they parse, so both sources
/// share one key format. Unparseable text is kept verbatim.
fn date_text(cell: &Data) -> Option<String> {
    let text = cell_text(cell)?;
    Some(normalize_date_key(&text))
}

fn cell_value(cell: &Data, path: &Path, row: usize) -> PipelineResult<Option<f64>> {
    let invalid = |value: String| PipelineError::InvalidValue {
        path: path.to_path_buf(),
        row,
        value,
    };

    match cell {
        Data::Empty => Ok(None),
        Data::Float(value) => Ok(Some(*value).filter(|v| v.is_finite())),
        Data::Int(value) => Ok(Some(*value as f64)),
        Data::String(text) => parse_measurement(text).map_err(|_| invalid(text.clone())),
        // Excel error cells such as #N/A are missing readings
        Data::Error(_) => Ok(None),
        other => Err(invalid(format!("{:?}", other))),
    }
}

use crate::adapters::station_workbook::REQUIRED_COLUMNS;
use crate::api::lib::normalize_date_key;
use crate::api::models::Observation;
use crate::errors::{PipelineError, PipelineResult};
use std::fs::File;
use std::path::Path;
use tracing::{debug, info};

/// Reads the satellite reference series. The file already uses the canonical
/// `name`, `date` and `first` headers; any other column is ignored.
pub fn read_reference_csv(path: &Path) -> PipelineResult<Vec<Observation>> {
    let csv_error = |source: csv::Error| PipelineError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(|source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(file);

    let headers = reader.headers().map_err(csv_error)?.clone();
    for column in REQUIRED_COLUMNS {
        if !headers.iter().any(|header| header == column) {
            return Err(PipelineError::MissingColumn {
                column,
                path: path.to_path_buf(),
            });
        }
    }

    let mut observations = Vec::new();
    let mut skipped = 0usize;
    for record in reader.deserialize::<Observation>() {
        let mut observation = record.map_err(csv_error)?;
        if observation.station_id.is_empty() || observation.date.is_empty() {
            skipped += 1;
            continue;
        }
        observation.date = normalize_date_key(&observation.date);
        observations.push(observation);
    }

    if skipped > 0 {
        debug!(rows = skipped, path = %path.display(), "skipped rows without station or date");
    }
    info!(rows = observations.len(), path = %path.display(), "loaded reference CSV");
    Ok(observations)
}

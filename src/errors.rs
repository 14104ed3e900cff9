use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not read workbook {path}: {source}")]
    Workbook {
        path: PathBuf,
        #[source]
        source: calamine::Error,
    },

    #[error("workbook {path} does not contain any worksheet")]
    EmptyWorkbook { path: PathBuf },

    #[error("could not read CSV {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("column '{column}' not found in {path}")]
    MissingColumn { column: &'static str, path: PathBuf },

    #[error("{path} row {row}: '{value}' is not a number")]
    InvalidValue {
        path: PathBuf,
        row: usize,
        value: String,
    },

    #[error("dataframe operation failed: {0}")]
    Frame(#[from] polars::prelude::PolarsError),

    #[error("correlation input has an invalid shape: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("could not write report: {0}")]
    Report(#[from] rust_xlsxwriter::XlsxError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

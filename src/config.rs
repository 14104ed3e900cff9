use std::env;
use std::path::PathBuf;

use crate::errors::{PipelineError, PipelineResult};

pub const OUTPUT_DIR_VAR: &str = "GRACE_OUTPUT_DIR";
pub const DEFAULT_LOG_FILTER: &str = "info";
/// The working directory.
pub const DEFAULT_OUTPUT_DIR: &str = ".";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub output_dir: PathBuf,
}

impl AppConfig {
    /// Reads settings from the environment. `.env` is loaded by `main` first.
    pub fn from_env() -> PipelineResult<Self> {
        let output_dir =
            env::var(OUTPUT_DIR_VAR).unwrap_or_else(|_| DEFAULT_OUTPUT_DIR.to_string());
        Self::with_output_dir(PathBuf::from(output_dir))
    }

    pub fn with_output_dir(output_dir: PathBuf) -> PipelineResult<Self> {
        if !output_dir.is_dir() {
            return Err(PipelineError::Config(format!(
                "{} must be an existing directory, got {}",
                OUTPUT_DIR_VAR,
                output_dir.display()
            )));
        }
        Ok(Self { output_dir })
    }

    pub fn output_path(&self, file_name: &str) -> PathBuf {
        self.output_dir.join(file_name)
    }
}

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod adapters;
mod api;
mod config;
mod core_logic;
mod errors;

use adapters::reference_csv::read_reference_csv;
use adapters::report_writer::write_report;
use adapters::station_workbook::read_station_workbook;
use anyhow::{bail, Context, Result};
use api::lib::{output_file_name, output_suffix};
use config::{AppConfig, DEFAULT_LOG_FILTER};
use core_logic::data_processing::run_analysis;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::info;
use tracing_subscriber::EnvFilter;

const REAL_DATA_PROMPT: &str =
    "Please enter the path of the real data excel (e.g. C:/Users/User/Downloads/RealData.xlsx): ";
const REFERENCE_DATA_PROMPT: &str =
    "Please enter the path of the grace data csv (e.g. C:/Users/User/Downloads/GRACE_RA_Fix_6ML.csv): ";

/// Strips surrounding whitespace and one layer of matching quotes, as left
/// behind by drag-and-drop into a terminal.
fn clean_path_input(answer: &str) -> &str {
    let answer = answer.trim();
    for quote in ['"', '\''] {
        if answer.len() >= 2 && answer.starts_with(quote) && answer.ends_with(quote) {
            return answer[1..answer.len() - 1].trim();
        }
    }
    answer
}

fn prompt_path(input: &mut impl BufRead, prompt: &str) -> Result<PathBuf> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut answer = String::new();
    if input.read_line(&mut answer)? == 0 {
        bail!("input closed before a path was entered");
    }

    let path = clean_path_input(&answer);
    if path.is_empty() {
        bail!("no path entered");
    }
    Ok(PathBuf::from(path))
}

fn run(config: &AppConfig, real_path: &Path, reference_path: &Path) -> Result<PathBuf> {
    let now = SystemTime::now();

    let real = read_station_workbook(real_path)
        .with_context(|| format!("failed to load real data from {}", real_path.display()))?;
    let reference = read_reference_csv(reference_path).with_context(|| {
        format!(
            "failed to load reference data from {}",
            reference_path.display()
        )
    })?;

    let results = run_analysis(&real, &reference).context("analysis failed")?;

    let output_path = config.output_path(&output_file_name(&output_suffix(reference_path)));
    write_report(&results, &output_path)
        .with_context(|| format!("failed to write {}", output_path.display()))?;

    info!(
        elapsed_ms = now.elapsed().map(|d| d.as_millis() as u64).unwrap_or_default(),
        "pipeline finished"
    );
    Ok(output_path)
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(io::stderr)
        .init();

    let config = AppConfig::from_env()?;

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let real_path = prompt_path(&mut input, REAL_DATA_PROMPT)?;
    let reference_path = prompt_path(&mut input, REFERENCE_DATA_PROMPT)?;

    let output_path = run(&config, &real_path, &reference_path)?;
    println!("All data exported successfully to {}", output_path.display());
    Ok(())
}

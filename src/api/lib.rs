use crate::api::models::CorrelationCategory;
use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

pub const WINDOW_START_YEAR: i32 = 2009;
pub const WINDOW_END_YEAR: i32 = 2014;
pub const UNKNOWN_SUFFIX: &str = "Unknown";

const CATEGORY_THRESHOLD: f64 = 0.5;

/// Text markers read as a missing measurement, matching the usual CSV/Excel
/// export conventions.
const MISSING_VALUE_MARKERS: [&str; 19] = [
    "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null", "",
];

static SUFFIX_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_([A-Za-z0-9]+)\.[A-Za-z0-9]+$").expect("suffix pattern is valid"));

/// Maps the observation workbook's header names onto the canonical ones.
pub fn canonical_column_name(header: &str) -> &str {
    match header {
        "Codice" => "name",
        "Date" => "date",
        "x" => "first",
        other => other,
    }
}

pub fn categorize_correlation(correlation: f64) -> CorrelationCategory {
    if correlation > CATEGORY_THRESHOLD {
        CorrelationCategory::Positive
    } else if correlation < -CATEGORY_THRESHOLD {
        CorrelationCategory::Negative
    } else {
        CorrelationCategory::Neutral
    }
}

/// Parses a measurement cell. Missing markers and non-finite numbers yield
/// `Ok(None)`; any other non-numeric text is an error.
pub fn parse_measurement(text: &str) -> Result<Option<f64>, std::num::ParseFloatError> {
    let text = text.trim();
    if MISSING_VALUE_MARKERS.contains(&text) {
        return Ok(None);
    }
    Ok(Some(text.parse::<f64>()?).filter(|value| value.is_finite()))
}

/// Label embedded in the report filename, taken from the reference file's
/// trailing `_<label>.<ext>` segment.
pub fn output_suffix(reference_path: &Path) -> String {
    reference_path
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| SUFFIX_PATTERN.captures(name))
        .and_then(|captures| captures.get(1))
        .map(|label| label.as_str().to_owned())
        .unwrap_or_else(|| UNKNOWN_SUFFIX.to_owned())
}

pub fn output_file_name(suffix: &str) -> String {
    format!("analysis_results_{}.xlsx", suffix)
}

/// Lenient date parsing. Unrecognized text yields `None` instead of an error.
pub fn parse_date_text(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    for format in ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(date);
        }
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(text, format) {
            return Some(datetime.date());
        }
    }

    // Year-month only, pinned to the first of the month
    NaiveDate::parse_from_str(&format!("{}-01", text), "%Y-%m-%d").ok()
}

/// Join key for a raw date: ISO form when it parses, trimmed text otherwise.
pub fn normalize_date_key(text: &str) -> String {
    parse_date_text(text)
        .map(|date| date.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| text.trim().to_owned())
}

pub fn format_month(date: NaiveDate) -> String {
    date.format("%Y-%m").to_string()
}

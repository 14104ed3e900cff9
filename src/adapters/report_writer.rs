use crate::api::lib::format_month;
use crate::api::models::{AnalysisResults, AnomalyRecord, Baseline, CorrelationRecord};
use crate::errors::PipelineResult;
use rust_xlsxwriter::{Workbook, Worksheet, XlsxError};
use std::path::Path;
use tracing::info;

pub const MERGED_SHEET: &str = "Merged_Data";
pub const AVERAGES_SHEET: &str = "Averages";
pub const CORRELATIONS_SHEET: &str = "Correlations";

const MERGED_HEADERS: [&str; 6] = ["name", "date", "first_x", "first_y", "anomaly_x", "anomaly_y"];
const AVERAGES_HEADERS: [&str; 3] = ["name", "avg_x", "avg_y"];
const CORRELATIONS_HEADERS: [&str; 3] = ["name", "correlation", "corr_category"];

/// Writes the three result tables into one workbook. The file is only
/// created once every sheet has been built.
pub fn write_report(results: &AnalysisResults, path: &Path) -> PipelineResult<()> {
    let mut workbook = Workbook::new();

    write_merged_sheet(workbook.add_worksheet(), &results.merged)?;
    write_averages_sheet(workbook.add_worksheet(), &results.baselines)?;
    write_correlations_sheet(workbook.add_worksheet(), &results.correlations)?;

    workbook.save(path)?;
    info!(path = %path.display(), "wrote analysis report");
    Ok(())
}

fn write_headers(sheet: &mut Worksheet, headers: &[&str]) -> Result<(), XlsxError> {
    for (col, header) in headers.iter().enumerate() {
        sheet.write_string(0, col as u16, *header)?;
    }
    Ok(())
}

/// Missing values stay as blank cells.
fn write_optional_number(
    sheet: &mut Worksheet,
    row: u32,
    col: u16,
    value: Option<f64>,
) -> Result<(), XlsxError> {
    if let Some(value) = value.filter(|v| v.is_finite()) {
        sheet.write_number(row, col, value)?;
    }
    Ok(())
}

fn write_merged_sheet(sheet: &mut Worksheet, records: &[AnomalyRecord]) -> Result<(), XlsxError> {
    sheet.set_name(MERGED_SHEET)?;
    write_headers(sheet, &MERGED_HEADERS)?;

    for (index, record) in records.iter().enumerate() {
        let row = index as u32 + 1;
        sheet.write_string(row, 0, record.station_id.as_str())?;
        if let Some(date) = record.date {
            sheet.write_string(row, 1, format_month(date))?;
        }
        write_optional_number(sheet, row, 2, record.value_real)?;
        write_optional_number(sheet, row, 3, record.value_ref)?;
        write_optional_number(sheet, row, 4, record.anomaly_real)?;
        write_optional_number(sheet, row, 5, record.anomaly_ref)?;
    }
    Ok(())
}

fn write_averages_sheet(sheet: &mut Worksheet, baselines: &[Baseline]) -> Result<(), XlsxError> {
    sheet.set_name(AVERAGES_SHEET)?;
    write_headers(sheet, &AVERAGES_HEADERS)?;

    for (index, baseline) in baselines.iter().enumerate() {
        let row = index as u32 + 1;
        sheet.write_string(row, 0, baseline.station_id.as_str())?;
        write_optional_number(sheet, row, 1, baseline.avg_real)?;
        write_optional_number(sheet, row, 2, baseline.avg_ref)?;
    }
    Ok(())
}

fn write_correlations_sheet(
    sheet: &mut Worksheet,
    correlations: &[CorrelationRecord],
) -> Result<(), XlsxError> {
    sheet.set_name(CORRELATIONS_SHEET)?;
    write_headers(sheet, &CORRELATIONS_HEADERS)?;

    for (index, correlation) in correlations.iter().enumerate() {
        let row = index as u32 + 1;
        sheet.write_string(row, 0, correlation.station_id.as_str())?;
        write_optional_number(sheet, row, 1, correlation.correlation)?;
        write_optional_number(
            sheet,
            row,
            2,
            correlation.category.map(|category| f64::from(category.value())),
        )?;
    }
    Ok(())
}

pub mod reference_csv;
pub mod report_writer;
pub mod station_workbook;

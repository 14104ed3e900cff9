use crate::api::lib::{categorize_correlation, parse_date_text, WINDOW_END_YEAR, WINDOW_START_YEAR};
use crate::api::models::{
    AnalysisResults, AnomalyRecord, Baseline, CorrelationRecord, MergedRecord, Observation,
};
use crate::errors::PipelineResult;
use chrono::NaiveDate;
use ndarray::Array2;
use ndarray_stats::CorrelationExt;
use polars::prelude::*;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

pub fn observations_to_dataframe(observations: &[Observation]) -> PolarsResult<DataFrame> {
    let name_series = Series::new(
        "name",
        observations
            .iter()
            .map(|o| o.station_id.as_str())
            .collect::<Vec<&str>>(),
    );
    let date_series = Series::new(
        "date",
        observations
            .iter()
            .map(|o| o.date.as_str())
            .collect::<Vec<&str>>(),
    );
    let value_series = Series::new(
        "first",
        observations
            .iter()
            .map(|o| o.value)
            .collect::<Vec<Option<f64>>>(),
    );

    DataFrame::new(vec![name_series, date_series, value_series])
}

/// Collapses repeated (name, date) keys into one row holding the mean value.
pub fn deduplicate(df: &DataFrame) -> PolarsResult<DataFrame> {
    df.clone()
        .lazy()
        .group_by(vec![col("name"), col("date")])
        .agg(vec![col("first").mean().alias("first")])
        .collect()
}

/// Inner join on (name, date). The real series becomes `first_x`, the
/// reference series `first_y`.
pub fn merge_sources(real: &DataFrame, reference: &DataFrame) -> PolarsResult<DataFrame> {
    let mut real = real.clone();
    real.rename("first", "first_x")?;
    let mut reference = reference.clone();
    reference.rename("first", "first_y")?;

    real.inner_join(&reference, ["name", "date"], ["name", "date"])
}

/// Rebuilds the merged frame with `date` as a Date column. Unparseable text
/// becomes null and is later ignored by the window filter.
pub fn dated_dataframe(records: &[MergedRecord]) -> PolarsResult<DataFrame> {
    let dates: Vec<Option<NaiveDate>> = records
        .iter()
        .map(|r| parse_date_text(&r.date))
        .collect();

    let unparsed = dates.iter().filter(|d| d.is_none()).count();
    if unparsed > 0 {
        debug!(rows = unparsed, "dates could not be parsed and will be ignored by the window");
    }

    DataFrame::new(vec![
        Series::new(
            "name",
            records
                .iter()
                .map(|r| r.station_id.as_str())
                .collect::<Vec<&str>>(),
        ),
        Series::new("date", dates),
        Series::new(
            "first_x",
            records.iter().map(|r| r.value_real).collect::<Vec<Option<f64>>>(),
        ),
        Series::new(
            "first_y",
            records.iter().map(|r| r.value_ref).collect::<Vec<Option<f64>>>(),
        ),
    ])
}

pub fn filter_window(df: &DataFrame) -> PolarsResult<DataFrame> {
    df.clone()
        .lazy()
        .filter(
            col("date")
                .dt()
                .year()
                .gt_eq(lit(WINDOW_START_YEAR))
                .and(col("date").dt().year().lt_eq(lit(WINDOW_END_YEAR))),
        )
        .collect()
}

pub fn compute_baselines(windowed: &DataFrame) -> PolarsResult<DataFrame> {
    windowed
        .clone()
        .lazy()
        .group_by(vec![col("name")])
        .agg(vec![
            col("first_x").mean().alias("avg_x"),
            col("first_y").mean().alias("avg_y"),
        ])
        .collect()
}

/// Left join so stations without a baseline keep their rows with null anomalies.
pub fn attach_anomalies(merged: &DataFrame, baselines: &DataFrame) -> PolarsResult<DataFrame> {
    merged
        .clone()
        .lazy()
        .left_join(baselines.clone().lazy(), col("name"), col("name"))
        .with_columns(vec![
            (col("first_x") - col("avg_x")).alias("anomaly_x"),
            (col("first_y") - col("avg_y")).alias("anomaly_y"),
        ])
        .collect()
}

fn string_column(df: &DataFrame, name: &str) -> PolarsResult<Vec<String>> {
    Ok(df
        .column(name)?
        .str()?
        .into_iter()
        .map(|value| value.unwrap_or_default().to_owned())
        .collect())
}

fn float_column(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<f64>>> {
    Ok(df.column(name)?.f64()?.into_iter().collect())
}

fn date_column(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<NaiveDate>>> {
    Ok(df.column(name)?.date()?.as_date_iter().collect())
}

pub fn dataframe_to_merged_records(df: &DataFrame) -> PolarsResult<Vec<MergedRecord>> {
    let names = string_column(df, "name")?;
    let dates = string_column(df, "date")?;
    let first_x = float_column(df, "first_x")?;
    let first_y = float_column(df, "first_y")?;

    let mut records: Vec<MergedRecord> = (0..names.len())
        .map(|i| MergedRecord {
            station_id: names[i].clone(),
            date: dates[i].clone(),
            value_real: first_x[i],
            value_ref: first_y[i],
        })
        .collect();
    records.sort_by(|a, b| (&a.station_id, &a.date).cmp(&(&b.station_id, &b.date)));
    Ok(records)
}

pub fn dataframe_to_baselines(df: &DataFrame) -> PolarsResult<Vec<Baseline>> {
    let names = string_column(df, "name")?;
    let avg_x = float_column(df, "avg_x")?;
    let avg_y = float_column(df, "avg_y")?;

    let mut baselines: Vec<Baseline> = (0..names.len())
        .map(|i| Baseline {
            station_id: names[i].clone(),
            avg_real: avg_x[i],
            avg_ref: avg_y[i],
        })
        .collect();
    baselines.sort_by(|a, b| a.station_id.cmp(&b.station_id));
    Ok(baselines)
}

pub fn dataframe_to_anomalies(df: &DataFrame) -> PolarsResult<Vec<AnomalyRecord>> {
    let names = string_column(df, "name")?;
    let dates = date_column(df, "date")?;
    let first_x = float_column(df, "first_x")?;
    let first_y = float_column(df, "first_y")?;
    let anomaly_x = float_column(df, "anomaly_x")?;
    let anomaly_y = float_column(df, "anomaly_y")?;

    let mut records: Vec<AnomalyRecord> = (0..names.len())
        .map(|i| AnomalyRecord {
            station_id: names[i].clone(),
            date: dates[i],
            value_real: first_x[i],
            value_ref: first_y[i],
            anomaly_real: anomaly_x[i],
            anomaly_ref: anomaly_y[i],
        })
        .collect();
    records.sort_by(|a, b| (&a.station_id, a.date).cmp(&(&b.station_id, b.date)));
    Ok(records)
}

fn is_constant(values: &[f64]) -> bool {
    values.iter().all(|v| *v == values[0])
}

/// Pearson coefficient of two equally long series. `None` when there are
/// fewer than two points or either series has no variance.
pub fn pearson(xs: &[f64], ys: &[f64]) -> PipelineResult<Option<f64>> {
    if xs.len() != ys.len() || xs.len() < 2 || is_constant(xs) || is_constant(ys) {
        return Ok(None);
    }

    let matrix = Array2::from_shape_vec(
        (2, xs.len()),
        xs.iter().chain(ys.iter()).cloned().collect(),
    )?;
    let correlation = matrix
        .pearson_correlation()
        .ok()
        .map(|correlation_matrix| correlation_matrix[[0, 1]]);

    Ok(correlation
        .filter(|value| value.is_finite())
        .map(|value| value.clamp(-1.0, 1.0)))
}

/// One record per station. Only rows where both anomalies are present count.
pub fn correlate_anomalies(records: &[AnomalyRecord]) -> PipelineResult<Vec<CorrelationRecord>> {
    let mut by_station: BTreeMap<&str, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
    for record in records {
        let (xs, ys) = by_station.entry(record.station_id.as_str()).or_default();
        if let (Some(x), Some(y)) = (record.anomaly_real, record.anomaly_ref) {
            xs.push(x);
            ys.push(y);
        }
    }

    by_station
        .into_iter()
        .map(|(station_id, (xs, ys))| {
            let correlation = pearson(&xs, &ys)?;
            if correlation.is_none() {
                debug!(station = station_id, points = xs.len(), "correlation undefined");
            }
            Ok(CorrelationRecord {
                station_id: station_id.to_owned(),
                correlation,
                category: correlation.map(categorize_correlation),
            })
        })
        .collect()
}

/// Runs every stage from raw observations to the three report tables.
pub fn run_analysis(
    real: &[Observation],
    reference: &[Observation],
) -> PipelineResult<AnalysisResults> {
    let real_df = deduplicate(&observations_to_dataframe(real)?)?;
    let reference_df = deduplicate(&observations_to_dataframe(reference)?)?;
    info!(
        real = real_df.height(),
        reference = reference_df.height(),
        "deduplicated observations"
    );

    let merged_records = dataframe_to_merged_records(&merge_sources(&real_df, &reference_df)?)?;
    info!(rows = merged_records.len(), "merged sources on station and date");
    if merged_records.is_empty() {
        warn!("no station/date pairs are shared by both sources");
    }

    let merged = dated_dataframe(&merged_records)?;
    let windowed = filter_window(&merged)?;
    info!(
        rows = windowed.height(),
        start = WINDOW_START_YEAR,
        end = WINDOW_END_YEAR,
        "rows inside baseline window"
    );

    let baselines_df = compute_baselines(&windowed)?;
    let with_anomalies = attach_anomalies(&merged, &baselines_df)?;

    let anomalies = dataframe_to_anomalies(&with_anomalies)?;
    let baselines = dataframe_to_baselines(&baselines_df)?;
    let correlations = correlate_anomalies(&anomalies)?;

    let without_baseline = correlations.len().saturating_sub(baselines.len());
    if without_baseline > 0 {
        warn!(
            stations = without_baseline,
            "stations have no rows inside the baseline window"
        );
    }
    info!(
        stations = correlations.len(),
        baselines = baselines.len(),
        defined = correlations.iter().filter(|c| c.correlation.is_some()).count(),
        "computed station correlations"
    );

    Ok(AnalysisResults {
        merged: anomalies,
        baselines,
        correlations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::CorrelationCategory;
    use approx::assert_abs_diff_eq;

    fn obs(station_id: &str, date: &str, value: f64) -> Observation {
        Observation {
            station_id: station_id.to_string(),
            date: date.to_string(),
            value: Some(value),
        }
    }

    fn dataframe_to_observations(df: &DataFrame) -> PolarsResult<Vec<Observation>> {
        let names = string_column(df, "name")?;
        let dates = string_column(df, "date")?;
        let values = float_column(df, "first")?;

        let mut observations: Vec<Observation> = names
            .into_iter()
            .zip(dates)
            .zip(values)
            .map(|((station_id, date), value)| Observation {
                station_id,
                date,
                value,
            })
            .collect();
        observations.sort_by(|a, b| (&a.station_id, &a.date).cmp(&(&b.station_id, &b.date)));
        Ok(observations)
    }

    fn anomaly(station_id: &str, x: Option<f64>, y: Option<f64>) -> AnomalyRecord {
        AnomalyRecord {
            station_id: station_id.to_string(),
            date: NaiveDate::from_ymd_opt(2010, 1, 1),
            value_real: None,
            value_ref: None,
            anomaly_real: x,
            anomaly_ref: y,
        }
    }

    #[test]
    fn test_deduplicate_averages_repeated_keys() {
        let df = observations_to_dataframe(&[
            obs("A001", "2010-05-01", 10.0),
            obs("A001", "2010-05-01", 20.0),
            obs("A001", "2010-06-01", 5.0),
            obs("B002", "2010-05-01", 1.0),
        ])
        .unwrap();

        let result = dataframe_to_observations(&deduplicate(&df).unwrap()).unwrap();

        assert_eq!(
            result,
            vec![
                obs("A001", "2010-05-01", 15.0),
                obs("A001", "2010-06-01", 5.0),
                obs("B002", "2010-05-01", 1.0),
            ]
        );
    }

    #[test]
    fn test_deduplicate_skips_missing_values() {
        let mut missing = obs("A001", "2010-05-01", 0.0);
        missing.value = None;
        let df = observations_to_dataframe(&[missing.clone(), obs("A001", "2010-05-01", 4.0)])
            .unwrap();
        let result = dataframe_to_observations(&deduplicate(&df).unwrap()).unwrap();
        assert_eq!(result, vec![obs("A001", "2010-05-01", 4.0)]);

        let df = observations_to_dataframe(&[missing.clone()]).unwrap();
        let result = dataframe_to_observations(&deduplicate(&df).unwrap()).unwrap();
        assert_eq!(result, vec![missing]);
    }

    #[test]
    fn test_deduplicate_is_idempotent() {
        let df = observations_to_dataframe(&[
            obs("A001", "2010-05-01", 10.0),
            obs("A001", "2010-05-01", 11.0),
            obs("C003", "2012-01-01", 3.5),
        ])
        .unwrap();

        let once = deduplicate(&df).unwrap();
        let twice = deduplicate(&once).unwrap();

        assert_eq!(
            dataframe_to_observations(&once).unwrap(),
            dataframe_to_observations(&twice).unwrap()
        );
    }

    #[test]
    fn test_merge_sources_keeps_only_shared_keys() {
        let real = deduplicate(
            &observations_to_dataframe(&[
                obs("A001", "2010-05-01", 10.0),
                obs("A001", "2010-06-01", 11.0),
                obs("B002", "2010-05-01", 7.0),
            ])
            .unwrap(),
        )
        .unwrap();
        let reference = deduplicate(
            &observations_to_dataframe(&[
                obs("A001", "2010-05-01", 12.0),
                obs("B002", "2011-05-01", 8.0),
                obs("C003", "2010-05-01", 9.0),
            ])
            .unwrap(),
        )
        .unwrap();

        let merged = dataframe_to_merged_records(&merge_sources(&real, &reference).unwrap())
            .unwrap();

        assert_eq!(
            merged,
            vec![MergedRecord {
                station_id: "A001".to_string(),
                date: "2010-05-01".to_string(),
                value_real: Some(10.0),
                value_ref: Some(12.0),
            }]
        );
    }

    #[test]
    fn test_merge_with_empty_source_is_empty() {
        let real = deduplicate(&observations_to_dataframe(&[obs("A001", "2010-05-01", 1.0)]).unwrap())
            .unwrap();
        let reference = deduplicate(&observations_to_dataframe(&[]).unwrap()).unwrap();

        let merged = merge_sources(&real, &reference).unwrap();
        assert_eq!(merged.height(), 0);
    }

    #[test]
    fn test_filter_window_bounds() {
        let records: Vec<MergedRecord> = [
            "2008-12-31",
            "2009-01-01",
            "2014-12-31",
            "2015-01-01",
            "unknown",
        ]
        .iter()
        .map(|date| MergedRecord {
            station_id: "A001".to_string(),
            date: date.to_string(),
            value_real: Some(1.0),
            value_ref: Some(1.0),
        })
        .collect();

        let windowed = filter_window(&dated_dataframe(&records).unwrap()).unwrap();
        let dates: Vec<Option<NaiveDate>> = windowed
            .column("date")
            .unwrap()
            .date()
            .unwrap()
            .as_date_iter()
            .collect();

        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd_opt(2009, 1, 1),
                NaiveDate::from_ymd_opt(2014, 12, 31),
            ]
        );
    }

    #[test]
    fn test_baseline_uses_window_only() {
        let real = [
            obs("A001", "2008-12-01", 100.0),
            obs("A001", "2009-01-01", 2.0),
            obs("A001", "2014-12-01", 4.0),
            obs("A001", "2015-01-01", 100.0),
        ];
        let reference = [
            obs("A001", "2008-12-01", -50.0),
            obs("A001", "2009-01-01", 1.0),
            obs("A001", "2014-12-01", 3.0),
            obs("A001", "2015-01-01", -50.0),
        ];

        let results = run_analysis(&real, &reference).unwrap();

        assert_eq!(results.baselines.len(), 1);
        assert_abs_diff_eq!(results.baselines[0].avg_real.unwrap(), 3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(results.baselines[0].avg_ref.unwrap(), 2.0, epsilon = 1e-9);

        // Rows outside the window keep their anomalies
        assert_eq!(results.merged.len(), 4);
        let first = &results.merged[0];
        assert_eq!(first.date, NaiveDate::from_ymd_opt(2008, 12, 1));
        assert_abs_diff_eq!(first.anomaly_real.unwrap(), 97.0, epsilon = 1e-9);
        assert_abs_diff_eq!(first.anomaly_ref.unwrap(), -52.0, epsilon = 1e-9);
        let last = &results.merged[3];
        assert_eq!(last.date, NaiveDate::from_ymd_opt(2015, 1, 1));
        assert_abs_diff_eq!(last.anomaly_real.unwrap(), 97.0, epsilon = 1e-9);
    }

    #[test]
    fn test_station_without_window_rows_has_no_baseline() {
        let real = [obs("A001", "2010-01-01", 1.0), obs("Z999", "2020-01-01", 5.0)];
        let reference = [obs("A001", "2010-01-01", 2.0), obs("Z999", "2020-01-01", 6.0)];

        let results = run_analysis(&real, &reference).unwrap();

        assert_eq!(results.baselines.len(), 1);
        assert_eq!(results.baselines[0].station_id, "A001");

        let orphan = results
            .merged
            .iter()
            .find(|r| r.station_id == "Z999")
            .unwrap();
        assert_eq!(orphan.value_real, Some(5.0));
        assert_eq!(orphan.anomaly_real, None);
        assert_eq!(orphan.anomaly_ref, None);

        let orphan_correlation = results
            .correlations
            .iter()
            .find(|c| c.station_id == "Z999")
            .unwrap();
        assert_eq!(orphan_correlation.correlation, None);
        assert_eq!(orphan_correlation.category, None);
    }

    #[test]
    fn test_unparseable_dates_are_kept_but_excluded_from_window() {
        let real = [obs("A001", "2010-01-01", 1.0), obs("A001", "garbage", 50.0)];
        let reference = [obs("A001", "2010-01-01", 2.0), obs("A001", "garbage", 60.0)];

        let results = run_analysis(&real, &reference).unwrap();

        assert_abs_diff_eq!(results.baselines[0].avg_real.unwrap(), 1.0, epsilon = 1e-9);
        assert_eq!(results.merged.len(), 2);
        let undated = results.merged.iter().find(|r| r.date.is_none()).unwrap();
        assert_abs_diff_eq!(undated.anomaly_real.unwrap(), 49.0, epsilon = 1e-9);
    }

    #[test]
    fn test_single_matching_row_scenario() {
        let real = [obs("A001", "2010-05-01", 10.0)];
        let reference = [obs("A001", "2010-05-01", 12.0)];

        let results = run_analysis(&real, &reference).unwrap();

        assert_eq!(
            results.baselines,
            vec![Baseline {
                station_id: "A001".to_string(),
                avg_real: Some(10.0),
                avg_ref: Some(12.0),
            }]
        );
        assert_eq!(results.merged[0].anomaly_real, Some(0.0));
        assert_eq!(results.merged[0].anomaly_ref, Some(0.0));
        assert_eq!(
            results.correlations,
            vec![CorrelationRecord {
                station_id: "A001".to_string(),
                correlation: None,
                category: None,
            }]
        );
    }

    #[test]
    fn test_missing_reference_value_does_not_spoil_station() {
        let real = [
            obs("A001", "2010-01-01", 1.0),
            obs("A001", "2011-01-01", 2.0),
            obs("A001", "2012-01-01", 3.0),
        ];
        let mut gap = obs("A001", "2011-01-01", 0.0);
        gap.value = None;
        let reference = [
            obs("A001", "2010-01-01", 1.0),
            gap,
            obs("A001", "2012-01-01", 3.0),
        ];

        let results = run_analysis(&real, &reference).unwrap();

        assert_abs_diff_eq!(results.baselines[0].avg_ref.unwrap(), 2.0, epsilon = 1e-9);
        let anomaly_ref: Vec<Option<f64>> = results.merged.iter().map(|r| r.anomaly_ref).collect();
        assert_eq!(anomaly_ref, vec![Some(-1.0), None, Some(1.0)]);
        assert_abs_diff_eq!(
            results.correlations[0].correlation.unwrap(),
            1.0,
            epsilon = 1e-9
        );
        assert_eq!(
            results.correlations[0].category,
            Some(CorrelationCategory::Positive)
        );
    }

    #[test]
    fn test_pearson() {
        let correlation = pearson(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]).unwrap().unwrap();
        assert_abs_diff_eq!(correlation, 1.0, epsilon = 1e-9);

        let correlation = pearson(&[1.0, 2.0, 3.0], &[3.0, 2.0, 1.0]).unwrap().unwrap();
        assert_abs_diff_eq!(correlation, -1.0, epsilon = 1e-9);

        let correlation = pearson(&[1.0, 2.0, 3.0, 4.0], &[1.0, 3.0, 2.0, 4.0])
            .unwrap()
            .unwrap();
        assert_abs_diff_eq!(correlation, 0.8, epsilon = 1e-9);

        assert_eq!(pearson(&[1.0], &[2.0]).unwrap(), None);
        assert_eq!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]).unwrap(), None);
        assert_eq!(pearson(&[], &[]).unwrap(), None);
    }

    #[test]
    fn test_correlate_anomalies_categories() {
        let records = vec![
            anomaly("POS", Some(-1.0), Some(-2.0)),
            anomaly("POS", Some(0.0), Some(0.1)),
            anomaly("POS", Some(1.0), Some(2.0)),
            anomaly("NEG", Some(-1.0), Some(1.0)),
            anomaly("NEG", Some(1.0), Some(-1.0)),
            anomaly("MID", Some(1.0), Some(1.0)),
            anomaly("MID", Some(2.0), Some(-1.0)),
            anomaly("MID", Some(3.0), Some(1.0)),
            anomaly("MID", Some(4.0), None),
        ];

        let correlations = correlate_anomalies(&records).unwrap();
        let categories: Vec<(&str, Option<CorrelationCategory>)> = correlations
            .iter()
            .map(|c| (c.station_id.as_str(), c.category))
            .collect();

        assert_eq!(
            categories,
            vec![
                ("MID", Some(CorrelationCategory::Neutral)),
                ("NEG", Some(CorrelationCategory::Negative)),
                ("POS", Some(CorrelationCategory::Positive)),
            ]
        );
        assert_abs_diff_eq!(correlations[0].correlation.unwrap(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_anomaly_correlation_end_to_end() {
        let dates = ["2009-03-01", "2010-03-01", "2011-03-01", "2016-03-01"];
        let real_values = [1.0, 2.0, 3.0, 4.0];
        let reference_values = [10.0, 20.0, 30.0, 40.0];

        let real: Vec<Observation> = dates
            .iter()
            .zip(real_values)
            .map(|(date, value)| obs("A001", date, value))
            .collect();
        let reference: Vec<Observation> = dates
            .iter()
            .zip(reference_values)
            .map(|(date, value)| obs("A001", date, value))
            .collect();

        let results = run_analysis(&real, &reference).unwrap();

        assert_abs_diff_eq!(results.baselines[0].avg_real.unwrap(), 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(results.baselines[0].avg_ref.unwrap(), 20.0, epsilon = 1e-9);
        assert_abs_diff_eq!(results.merged[3].anomaly_real.unwrap(), 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(
            results.correlations[0].correlation.unwrap(),
            1.0,
            epsilon = 1e-9
        );
        assert_eq!(
            results.correlations[0].category,
            Some(CorrelationCategory::Positive)
        );
    }
}

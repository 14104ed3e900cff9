use crate::api::lib::parse_measurement;
use chrono::NaiveDate;
use serde::{de, Deserialize, Deserializer, Serialize};

/// One reading from either source, after column normalization.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Observation {
    #[serde(rename = "name")]
    pub station_id: String,
    /// Raw date text as it appeared in the source. Parsing happens after the join.
    pub date: String,
    #[serde(rename = "first", deserialize_with = "deserialize_measurement")]
    pub value: Option<f64>,
}

fn deserialize_measurement<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(text) => parse_measurement(&text)
            .map_err(|_| de::Error::custom(format!("'{}' is not a number", text))),
        None => Ok(None),
    }
}

/// A (station, date) pair present in both sources.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct MergedRecord {
    pub station_id: String,
    pub date: String,
    pub value_real: Option<f64>,
    pub value_ref: Option<f64>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Baseline {
    pub station_id: String,
    pub avg_real: Option<f64>,
    pub avg_ref: Option<f64>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AnomalyRecord {
    pub station_id: String,
    /// `None` when the raw date text could not be parsed.
    pub date: Option<NaiveDate>,
    pub value_real: Option<f64>,
    pub value_ref: Option<f64>,
    pub anomaly_real: Option<f64>,
    pub anomaly_ref: Option<f64>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationCategory {
    Positive,
    Neutral,
    Negative,
}

impl CorrelationCategory {
    pub fn value(self) -> i8 {
        match self {
            CorrelationCategory::Positive => 1,
            CorrelationCategory::Neutral => 0,
            CorrelationCategory::Negative => -1,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CorrelationRecord {
    pub station_id: String,
    pub correlation: Option<f64>,
    pub category: Option<CorrelationCategory>,
}

/// Everything the report writer needs, in output order.
#[derive(Debug, Clone, Default)]
pub struct AnalysisResults {
    pub merged: Vec<AnomalyRecord>,
    pub baselines: Vec<Baseline>,
    pub correlations: Vec<CorrelationRecord>,
}

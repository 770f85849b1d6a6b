use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use strum::Display;

/// One row of the report table, written by the benchmark container when a job ends.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ResultRecord {
    pub job_id: String,
    /// Compute environment the job ran in, e.g. "g5-48xlarge".
    pub compute_environment: String,
    /// Basecaller and modification profile, e.g. "dorado, modified bases 5mCG".
    #[serde(default)]
    pub tags: String,
    pub status: JobOutcome,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub container_start_time: Option<NaiveDateTime>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub container_end_time: Option<NaiveDateTime>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub samples_per_s: f64,
    /// Correlation id of the dataset submission. Older runs lack it.
    #[serde(default)]
    pub data_set_id: Option<String>,
    #[serde(default)]
    pub ec2_instance_id: Option<String>,
    #[serde(default)]
    pub basecaller_name: Option<String>,
    #[serde(default)]
    pub basecaller_version: Option<String>,
    /// Display label of the basecaller, filled in during aggregation when absent.
    #[serde(default)]
    pub basecaller: Option<String>,
}

impl ResultRecord {
    /// Wall clock time of the container in hours.
    pub fn runtime_hours(&self) -> Option<f64> {
        match (self.container_start_time, self.container_end_time) {
            (Some(start), Some(end)) => {
                Some((end - start).num_milliseconds() as f64 / 3_600_000.0)
            },
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobOutcome {
    Succeeded,
    Failed,
    #[serde(other)]
    Unknown,
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Number {
        Float(f64),
        Text(String),
    }

    match Option::<Number>::deserialize(deserializer)? {
        Some(Number::Float(value)) => Ok(value),
        Some(Number::Text(text)) if text.trim().is_empty() => Ok(0.0),
        Some(Number::Text(text)) => text.trim().parse().map_err(serde::de::Error::custom),
        None => Ok(0.0),
    }
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(text) if !text.trim().is_empty() => parse_timestamp(text.trim())
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp {}", text))),
        _ => Ok(None),
    }
}

/// Parse RFC 3339 timestamps as well as naive ones with a space or `T` separator.
/// Offsets are normalized to UTC.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(text) {
        return Some(timestamp.naive_utc());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_report_row() {
        let json = r#"{
            "job_id": "4d6f",
            "compute_environment": "g5-12xlarge",
            "tags": "dorado, no modified bases",
            "status": "succeeded",
            "container_start_time": "2023-07-28 10:00:00",
            "container_end_time": "2023-07-28T11:30:00+00:00",
            "samples_per_s": "1.5e7",
            "data_set_id": "6b1e",
            "extra": 1
        }"#;
        let record: ResultRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.status, JobOutcome::Succeeded);
        assert_eq!(record.samples_per_s, 1.5e7);
        assert_eq!(record.runtime_hours(), Some(1.5));
        assert_eq!(record.data_set_id.as_deref(), Some("6b1e"));
        assert_eq!(record.ec2_instance_id, None);
    }

    #[test]
    fn unknown_status_and_missing_values() {
        let json = r#"{
            "job_id": "1",
            "compute_environment": "p3-2xlarge",
            "status": "running",
            "samples_per_s": null,
            "container_start_time": ""
        }"#;
        let record: ResultRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.status, JobOutcome::Unknown);
        assert_eq!(record.samples_per_s, 0.0);
        assert_eq!(record.runtime_hours(), None);
    }
}

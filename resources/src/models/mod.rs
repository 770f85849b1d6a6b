use std::fmt;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Parameters shared with the infrastructure deployment through Parameter Store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Parameter {
    #[strum(serialize = "data-s3-bucket")]
    DataS3Bucket,
    #[strum(serialize = "aws-batch-launch-template")]
    LaunchTemplate,
    DownloadStatus,
    #[strum(serialize = "pod5-converter-status")]
    Pod5ConverterStatus,
    #[strum(serialize = "aws-batch-instance-types")]
    InstanceTypes,
    ReportsTableName,
}

impl Parameter {
    /// Full parameter name below the given prefix.
    pub fn path(&self, prefix: &str) -> String {
        format!("{}/{}", prefix.trim_end_matches('/'), self)
    }
}

/// Progress of the data download and the FAST5 to POD5 conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum Status {
    #[strum(serialize = "not started")]
    #[serde(rename = "not started")]
    NotStarted,
    #[strum(serialize = "in progress")]
    #[serde(rename = "in progress")]
    InProgress,
    #[strum(serialize = "completed")]
    #[serde(rename = "completed")]
    Completed,
    #[strum(serialize = "failed")]
    #[serde(rename = "failed")]
    Failed,
}

/// Location of an object in S3, `s3://bucket/key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct S3Url {
    pub bucket: String,
    pub key: String,
}

impl S3Url {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        S3Url {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    pub fn parse(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("s3://")
            .ok_or_else(|| anyhow!("Not an S3 URL: {}", url))?;
        match rest.split_once('/') {
            Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
                Ok(S3Url::new(bucket, key))
            },
            _ => Err(anyhow!("S3 URL {} has no bucket or key", url)),
        }
    }
}

impl fmt::Display for S3Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

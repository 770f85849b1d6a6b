//! Interfaces of the external services the benchmark talks to.
//!
//! Every component receives the clients it needs as `Arc<dyn ...>`, so tests can
//! swap in the in-memory implementations of [`crate::mock`].

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    models::S3Url,
    objects::{
        compute_environment::{ComputeEnvironmentSpec, ComputeEnvironmentUpdate, JobQueueSpec},
        instance_type::{GpuInfo, MemoryInfo, ProcessorInfo, VCpuInfo},
        job::{JobStatus, JobSummary, SubmitJobRequest},
        job_definition::{JobDefinition, JobDefinitionSpec},
        result::ResultRecord,
    },
};

pub mod aws;

/// One page of `DescribeInstanceTypes`.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceTypePage {
    #[serde(default)]
    pub instance_types: Vec<InstanceTypeDescriptor>,
    #[serde(default)]
    pub next_token: Option<String>,
}

/// Raw catalog entry. Only the sections the filter looks at are kept,
/// everything else in the response is ignored.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceTypeDescriptor {
    pub instance_type: String,
    #[serde(default)]
    pub processor_info: ProcessorInfo,
    #[serde(rename = "VCpuInfo", default)]
    pub vcpu_info: VCpuInfo,
    #[serde(default)]
    pub memory_info: MemoryInfo,
    /// Missing for instance types without accelerators.
    #[serde(default)]
    pub gpu_info: Option<GpuInfo>,
}

#[async_trait]
pub trait InstanceCatalog: Send + Sync {
    /// Fetch one page of the catalog, starting at `next_token` if given.
    async fn describe_instance_types(&self, next_token: Option<String>)
        -> Result<InstanceTypePage>;
}

#[async_trait]
pub trait BatchClient: Send + Sync {
    async fn create_compute_environment(&self, spec: &ComputeEnvironmentSpec) -> Result<()>;

    async fn update_compute_environment(&self, update: &ComputeEnvironmentUpdate) -> Result<()>;

    async fn create_job_queue(&self, spec: &JobQueueSpec) -> Result<()>;

    /// All job definition revisions with status ACTIVE.
    async fn describe_active_job_definitions(&self) -> Result<Vec<JobDefinition>>;

    async fn register_job_definition(&self, spec: &JobDefinitionSpec) -> Result<JobDefinition>;

    async fn deregister_job_definition(&self, job_definition_arn: &str) -> Result<()>;

    /// Submit a job and return its id.
    async fn submit_job(&self, request: &SubmitJobRequest) -> Result<String>;

    async fn list_jobs(&self, job_queue: &str, status: JobStatus) -> Result<Vec<JobSummary>>;

    async fn terminate_job(&self, job_id: &str, reason: &str) -> Result<()>;
}

#[async_trait]
pub trait ParameterStore: Send + Sync {
    async fn get_parameter(&self, name: &str) -> Result<String>;

    /// Create or overwrite a string parameter.
    async fn put_parameter(&self, name: &str, value: &str) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ObjectSummary {
    pub key: String,
    #[serde(default)]
    pub size: u64,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_object(&self, url: &S3Url) -> Result<Vec<u8>>;

    async fn put_object(&self, url: &S3Url, body: Vec<u8>) -> Result<()>;

    /// All objects of the bucket below the prefix.
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectSummary>>;
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Read every row of the report table.
    async fn scan(&self, table: &str) -> Result<Vec<ResultRecord>>;
}

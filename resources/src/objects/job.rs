use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

use super::job_definition::{ResourceRequirement, ResourceType};

/// Lifecycle states of a Batch job.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum JobStatus {
    Submitted,
    Pending,
    Runnable,
    Starting,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    /// States in which a job can still be cancelled.
    pub fn active() -> impl Iterator<Item = JobStatus> {
        JobStatus::iter().filter(|status| !status.is_terminal())
    }
}

/// Request body of `SubmitJob`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobRequest {
    pub job_name: String,
    pub job_queue: String,
    pub job_definition: String,
    pub container_overrides: ContainerOverrides,
    pub retry_strategy: RetryStrategy,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ContainerOverrides {
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_requirements: Vec<ResourceRequirement>,
    #[serde(default)]
    pub environment: Vec<KeyValuePair>,
}

impl ContainerOverrides {
    /// Value of an environment variable in the overrides.
    pub fn env(&self, name: &str) -> Option<&str> {
        self.environment
            .iter()
            .find(|pair| pair.name == name)
            .map(|pair| pair.value.as_str())
    }

    /// Value of a resource override.
    pub fn resource(&self, kind: ResourceType) -> Option<&str> {
        self.resource_requirements
            .iter()
            .find(|requirement| requirement.kind == kind)
            .map(|requirement| requirement.value.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct KeyValuePair {
    pub name: String,
    pub value: String,
}

impl KeyValuePair {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        KeyValuePair {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct RetryStrategy {
    pub attempts: u32,
}

/// Per-job overrides of the job definition. Every field is optional and
/// only the ones that are set end up in the submitted overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceOverrides {
    pub vcpus: Option<u32>,
    pub gpus: Option<u32>,
    /// Memory in MiB.
    pub memory: Option<u64>,
    pub tags: Option<Vec<String>>,
    /// Correlation id shared by all jobs of one dataset submission.
    pub data_set_id: Option<String>,
}

impl ResourceOverrides {
    pub fn container_overrides(&self, command: String, region: &str) -> ContainerOverrides {
        let mut resource_requirements = vec![];
        if let Some(vcpus) = self.vcpus {
            resource_requirements.push(ResourceRequirement::new(ResourceType::Vcpu, vcpus));
        }
        if let Some(gpus) = self.gpus {
            resource_requirements.push(ResourceRequirement::new(ResourceType::Gpu, gpus));
        }
        if let Some(memory) = self.memory {
            resource_requirements.push(ResourceRequirement::new(ResourceType::Memory, memory));
        }

        let mut environment = vec![KeyValuePair::new("REGION", region)];
        if let Some(tags) = &self.tags {
            environment.push(KeyValuePair::new("TAGS", tags.join(",")));
        }
        if let Some(data_set_id) = &self.data_set_id {
            environment.push(KeyValuePair::new("DATA_SET_ID", data_set_id.as_str()));
        }

        ContainerOverrides {
            command: vec![command],
            resource_requirements,
            environment,
        }
    }
}

/// Entry of `ListJobs`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub job_id: String,
    pub job_name: String,
    #[serde(default)]
    pub status: Option<JobStatus>,
}

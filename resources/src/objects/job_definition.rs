use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum::Display;

/// Request body of `RegisterJobDefinition` for container jobs.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobDefinitionSpec {
    pub job_definition_name: String,
    /// Always "container".
    #[serde(rename = "type")]
    pub kind: String,
    /// Default values for parameter substitution placeholders.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    pub container_properties: ContainerProperties,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerProperties {
    pub image: String,
    pub resource_requirements: Vec<ResourceRequirement>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
    #[serde(default)]
    pub mount_points: Vec<MountPoint>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum ResourceType {
    Vcpu,
    Gpu,
    Memory,
}

/// A resource request. Values are strings in the Batch API;
/// memory is in MiB.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ResourceRequirement {
    #[serde(rename = "type")]
    pub kind: ResourceType,
    pub value: String,
}

impl ResourceRequirement {
    pub fn new(kind: ResourceType, value: impl ToString) -> Self {
        ResourceRequirement {
            kind,
            value: value.to_string(),
        }
    }
}

/// A host path made available to the container.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,
    pub host: HostPath,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HostPath {
    pub source_path: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MountPoint {
    pub container_path: String,
    /// This must match the name of a volume.
    pub source_volume: String,
}

/// A registered job definition revision as returned by the scheduler.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobDefinition {
    pub job_definition_name: String,
    pub job_definition_arn: String,
    pub revision: u32,
    /// "ACTIVE" or "INACTIVE".
    #[serde(default)]
    pub status: Option<String>,
}

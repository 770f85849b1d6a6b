use serde::{Deserialize, Serialize};

use super::instance_type::ProvisioningModel;

/// Request body of `CreateComputeEnvironment`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComputeEnvironmentSpec {
    pub compute_environment_name: String,
    /// Always "MANAGED".
    #[serde(rename = "type")]
    pub kind: String,
    /// "ENABLED" or "DISABLED".
    pub state: String,
    pub compute_resources: ComputeResources,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComputeResources {
    /// Provisioning model, "EC2" or "SPOT".
    #[serde(rename = "type")]
    pub kind: ProvisioningModel,
    pub allocation_strategy: String,
    #[serde(rename = "minvCpus")]
    pub min_vcpus: u32,
    #[serde(rename = "maxvCpus")]
    pub max_vcpus: u32,
    pub instance_types: Vec<String>,
    pub subnets: Vec<String>,
    pub security_group_ids: Vec<String>,
    pub instance_role: String,
    pub launch_template: LaunchTemplateSpecification,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LaunchTemplateSpecification {
    pub launch_template_id: String,
    /// "$Default", "$Latest" or a version number.
    pub version: String,
}

/// Request body of `UpdateComputeEnvironment` when swapping the launch template.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComputeEnvironmentUpdate {
    pub compute_environment: String,
    pub compute_resources: ComputeResourcesUpdate,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComputeResourcesUpdate {
    pub launch_template: LaunchTemplateSpecification,
}

/// Request body of `CreateJobQueue`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobQueueSpec {
    pub job_queue_name: String,
    pub state: String,
    pub priority: u32,
    pub compute_environment_order: Vec<ComputeEnvironmentOrder>,
}

impl JobQueueSpec {
    /// A queue feeding exactly one compute environment, named after it.
    pub fn for_environment(compute_environment: &str) -> Self {
        JobQueueSpec {
            job_queue_name: compute_environment.to_string(),
            state: "ENABLED".to_string(),
            priority: 1,
            compute_environment_order: vec![ComputeEnvironmentOrder {
                order: 1,
                compute_environment: compute_environment.to_string(),
            }],
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComputeEnvironmentOrder {
    pub order: u32,
    pub compute_environment: String,
}

//! Keeps one active job definition per compute environment.
//!
//! The desired set is every environment of the registry. Definitions that already exist are
//! left alone, so running the reconciler again registers nothing new.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use anyhow::{Context, Error, Result};
use resources::{
    client::BatchClient,
    objects::{
        instance_type::InstanceTypeRecord,
        job_definition::{
            ContainerProperties, HostPath, JobDefinition, JobDefinitionSpec, MountPoint,
            ResourceRequirement, ResourceType, Volume,
        },
    },
    registry::{Environment, Registry},
};

const SHARED_FILESYSTEM_VOLUME: &str = "FSx-for-Lustre";
const HOST_BIN_VOLUME: &str = "usr_local_bin";

#[derive(Default)]
pub struct ReconcileReport {
    pub created: Vec<JobDefinition>,
    pub failed: Vec<(String, Error)>,
}

#[derive(Default)]
pub struct DeregisterReport {
    pub deregistered: Vec<String>,
    pub failed: Vec<(String, Error)>,
}

pub struct JobDefinitionReconciler {
    batch: Arc<dyn BatchClient>,
    image: String,
}

/// Environments of the registry without a job definition among `existing`.
pub fn missing<'a>(registry: &'a Registry, existing: &HashSet<String>) -> Vec<Environment<'a>> {
    registry
        .environments()
        .filter(|environment| !existing.contains(environment.name))
        .collect()
}

/// Job definition for a compute environment. The job claims the whole instance
/// unless the submission overrides the resources.
pub fn job_definition_spec(
    name: &str,
    record: &InstanceTypeRecord,
    image: &str,
) -> JobDefinitionSpec {
    JobDefinitionSpec {
        job_definition_name: name.to_owned(),
        kind: "container".to_string(),
        parameters: HashMap::from([("tags".to_string(), String::new())]),
        container_properties: ContainerProperties {
            image: image.to_owned(),
            resource_requirements: vec![
                ResourceRequirement::new(ResourceType::Vcpu, record.vcpus()),
                ResourceRequirement::new(ResourceType::Gpu, record.gpu_count()),
                ResourceRequirement::new(ResourceType::Memory, record.usable_memory_mib()),
            ],
            volumes: vec![
                Volume {
                    name: SHARED_FILESYSTEM_VOLUME.to_string(),
                    host: HostPath {
                        source_path: "/fsx".to_string(),
                    },
                },
                Volume {
                    name: HOST_BIN_VOLUME.to_string(),
                    host: HostPath {
                        source_path: "/usr/local/bin".to_string(),
                    },
                },
            ],
            mount_points: vec![
                MountPoint {
                    container_path: "/fsx".to_string(),
                    source_volume: SHARED_FILESYSTEM_VOLUME.to_string(),
                },
                MountPoint {
                    container_path: "/host/bin".to_string(),
                    source_volume: HOST_BIN_VOLUME.to_string(),
                },
            ],
        },
    }
}

impl JobDefinitionReconciler {
    pub fn new(batch: Arc<dyn BatchClient>, image: String) -> Self {
        Self { batch, image }
    }

    /// Register a job definition for every environment missing from `existing`.
    pub async fn reconcile(
        &self,
        registry: &Registry,
        existing: &HashSet<String>,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for environment in missing(registry, existing) {
            let spec = job_definition_spec(environment.name, environment.record, &self.image);
            match self.batch.register_job_definition(&spec).await {
                Ok(definition) => {
                    tracing::info!(
                        "Registered job definition {}:{}",
                        definition.job_definition_name,
                        definition.revision
                    );
                    report.created.push(definition);
                },
                Err(e) => {
                    tracing::error!(
                        "Failed to register job definition {}: {:#}",
                        environment.name,
                        e
                    );
                    report.failed.push((environment.name.to_owned(), e));
                },
            }
        }
        report
    }

    /// Fetch the active definitions once and register the missing ones.
    pub async fn sync(&self, registry: &Registry) -> Result<ReconcileReport> {
        let existing = self
            .batch
            .describe_active_job_definitions()
            .await
            .context("Failed to describe job definitions")?
            .into_iter()
            .map(|definition| definition.job_definition_name)
            .collect::<HashSet<_>>();
        tracing::debug!("Found {} active job definitions", existing.len());
        Ok(self.reconcile(registry, &existing).await)
    }

    /// Deregister every active revision. The next `sync` creates them again.
    pub async fn deregister_all(&self) -> Result<DeregisterReport> {
        let definitions = self
            .batch
            .describe_active_job_definitions()
            .await
            .context("Failed to describe job definitions")?;
        let mut report = DeregisterReport::default();
        for definition in definitions {
            let arn = definition.job_definition_arn;
            match self.batch.deregister_job_definition(&arn).await {
                Ok(()) => {
                    tracing::info!("Deregistered job definition {}", arn);
                    report.deregistered.push(arn);
                },
                Err(e) => {
                    tracing::error!("Failed to deregister job definition {}: {:#}", arn, e);
                    report.failed.push((arn, e));
                },
            }
        }
        Ok(report)
    }
}

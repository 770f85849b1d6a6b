use std::{collections::BTreeMap, sync::Arc};

use anyhow::{Context, Error, Result};
use resources::{
    client::BatchClient,
    config::{ComputeResourcesConfig, COMPUTE_ENV_MAX_VCPUS, COMPUTE_ENV_MIN_VCPUS},
    objects::{
        compute_environment::{
            ComputeEnvironmentSpec, ComputeResources, JobQueueSpec, LaunchTemplateSpecification,
        },
        instance_type::{InstanceTypeRecord, ProvisioningModel},
    },
    registry::{Registry, RegistryBuilder},
};

/// Outcome of a provisioning run. The registry holds the environments that have
/// a job queue, whether created by this run or an earlier one.
pub struct ProvisionReport {
    pub registry: Registry,
    pub failures: Vec<ProvisionFailure>,
}

pub struct ProvisionFailure {
    pub instance_type: String,
    pub model: ProvisioningModel,
    pub error: Error,
}

pub struct ComputeEnvironmentProvisioner {
    batch: Arc<dyn BatchClient>,
    launch_template_id: String,
    compute_resources: ComputeResourcesConfig,
}

impl ComputeEnvironmentProvisioner {
    pub fn new(
        batch: Arc<dyn BatchClient>,
        launch_template_id: String,
        compute_resources: ComputeResourcesConfig,
    ) -> Self {
        Self {
            batch,
            launch_template_id,
            compute_resources,
        }
    }

    /// Create an on-demand environment for every instance type, and a spot one for
    /// those in `spot_allowlist`. A failure only affects its own environment.
    ///
    /// Environments and queues that already exist count as provisioned. Environments
    /// of the `published` registry that fail this time are kept.
    pub async fn provision(
        &self,
        instance_types: BTreeMap<String, InstanceTypeRecord>,
        spot_allowlist: &[String],
        published: Option<&Registry>,
    ) -> ProvisionReport {
        let mut builder = RegistryBuilder::with_instance_types(instance_types);
        let mut failures = vec![];

        let mut targets = vec![];
        for instance_type in builder.instance_types() {
            targets.push((instance_type.to_owned(), ProvisioningModel::Ec2));
            if spot_allowlist.iter().any(|name| name == instance_type) {
                targets.push((instance_type.to_owned(), ProvisioningModel::Spot));
            }
        }

        for (instance_type, model) in targets {
            let result = match self.create_environment(&instance_type, model).await {
                Ok(name) => builder.record_environment(&instance_type, model, name),
                Err(e) => Err(e),
            };
            if let Err(error) = result {
                tracing::error!(
                    "Failed to provision {} environment for {}: {:#}",
                    model,
                    instance_type,
                    error
                );
                failures.push(ProvisionFailure {
                    instance_type,
                    model,
                    error,
                });
            }
        }

        if let Some(published) = published {
            for environment in published.environments() {
                let recorded = builder
                    .environment(environment.instance_type, environment.model)
                    .is_some();
                if !recorded
                    && builder
                        .record_environment(
                            environment.instance_type,
                            environment.model,
                            environment.name.to_owned(),
                        )
                        .is_ok()
                {
                    tracing::warn!("Keeping published compute environment {}", environment.name);
                }
            }
        }

        let registry = builder.build();
        tracing::info!(
            "Provisioned {} compute environments, {} failed",
            registry.environments().count(),
            failures.len()
        );
        ProvisionReport { registry, failures }
    }

    async fn create_environment(
        &self,
        instance_type: &str,
        model: ProvisioningModel,
    ) -> Result<String> {
        let spec = self.environment_spec(instance_type, model);
        let name = spec.compute_environment_name.to_owned();
        match self.batch.create_compute_environment(&spec).await {
            Ok(()) => tracing::info!("Created compute environment {}", name),
            Err(err) if already_exists(&err) => {
                tracing::info!("Compute environment {} already exists", name)
            },
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to create compute environment {}", name))
            },
        }

        match self
            .batch
            .create_job_queue(&JobQueueSpec::for_environment(&name))
            .await
        {
            Ok(()) => tracing::info!("Created job queue {}", name),
            Err(err) if already_exists(&err) => tracing::info!("Job queue {} already exists", name),
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to create job queue {}", name))
            },
        }
        Ok(name)
    }

    pub fn environment_spec(
        &self,
        instance_type: &str,
        model: ProvisioningModel,
    ) -> ComputeEnvironmentSpec {
        ComputeEnvironmentSpec {
            compute_environment_name: model.environment_name(instance_type),
            kind: "MANAGED".to_string(),
            state: "ENABLED".to_string(),
            compute_resources: ComputeResources {
                kind: model,
                allocation_strategy: "BEST_FIT_PROGRESSIVE".to_string(),
                min_vcpus: COMPUTE_ENV_MIN_VCPUS,
                max_vcpus: COMPUTE_ENV_MAX_VCPUS,
                instance_types: vec![instance_type.to_owned()],
                subnets: self.compute_resources.subnets.to_owned(),
                security_group_ids: self.compute_resources.security_group_ids.to_owned(),
                instance_role: self.compute_resources.instance_role.to_owned(),
                launch_template: LaunchTemplateSpecification {
                    launch_template_id: self.launch_template_id.to_owned(),
                    version: "$Default".to_string(),
                },
            },
        }
    }
}

/// Batch rejects a duplicate name with a ClientException "Object already exists".
fn already_exists(err: &Error) -> bool {
    err.chain()
        .any(|cause| cause.to_string().contains("already exists"))
}

#[cfg(test)]
mod tests {
    use resources::{
        mock::MockBatch,
        objects::instance_type::{Gpu, GpuInfo, MemoryInfo, ProcessorInfo, VCpuInfo},
    };

    use super::*;

    fn record(gpus: u32) -> InstanceTypeRecord {
        InstanceTypeRecord {
            processor_info: ProcessorInfo {
                supported_architectures: vec!["x86_64".to_string()],
            },
            vcpu_info: VCpuInfo { default_vcpus: 96 },
            memory_info: MemoryInfo {
                size_in_mib: 196608,
            },
            gpu_info: GpuInfo {
                gpus: vec![Gpu {
                    name: "V100".to_string(),
                    manufacturer: "NVIDIA".to_string(),
                    count: gpus,
                    memory_info: MemoryInfo { size_in_mib: 16384 },
                }],
                total_gpu_memory_in_mib: None,
            },
            provisioning_model: BTreeMap::new(),
        }
    }

    fn instance_types() -> BTreeMap<String, InstanceTypeRecord> {
        ["g5.xlarge", "p3.16xlarge", "p4d.24xlarge"]
            .into_iter()
            .map(|name| (name.to_string(), record(8)))
            .collect()
    }

    fn provisioner(batch: Arc<MockBatch>) -> ComputeEnvironmentProvisioner {
        ComputeEnvironmentProvisioner::new(
            batch,
            "lt-0123456789abcdef0".to_string(),
            ComputeResourcesConfig {
                subnets: vec!["subnet-1".to_string()],
                security_group_ids: vec!["sg-1".to_string()],
                instance_role: "arn:aws:iam::123456789012:instance-profile/batch".to_string(),
            },
        )
    }

    #[test]
    fn environment_request() {
        let provisioner = provisioner(Arc::new(MockBatch::new()));
        let spec = provisioner.environment_spec("p4d.24xlarge", ProvisioningModel::Spot);
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["computeEnvironmentName"], "p4d-24xlarge-spot");
        assert_eq!(json["type"], "MANAGED");
        assert_eq!(json["state"], "ENABLED");
        let resources = &json["computeResources"];
        assert_eq!(resources["type"], "SPOT");
        assert_eq!(resources["allocationStrategy"], "BEST_FIT_PROGRESSIVE");
        assert_eq!(resources["minvCpus"], 0);
        assert_eq!(resources["maxvCpus"], 4000);
        assert_eq!(resources["instanceTypes"], serde_json::json!(["p4d.24xlarge"]));
        assert_eq!(
            resources["launchTemplate"],
            serde_json::json!({"launchTemplateId": "lt-0123456789abcdef0", "version": "$Default"})
        );
    }

    #[tokio::test]
    async fn spot_only_for_allowlist() {
        let batch = Arc::new(MockBatch::new());
        let report = provisioner(batch.clone())
            .provision(instance_types(), &["p4d.24xlarge".to_string()], None)
            .await;
        assert!(report.failures.is_empty());

        let names: Vec<_> = report.registry.environments().map(|env| env.name).collect();
        assert_eq!(
            names,
            vec!["g5-xlarge", "p3-16xlarge", "p4d-24xlarge", "p4d-24xlarge-spot"]
        );
        let state = batch.state();
        assert_eq!(state.compute_environments.len(), 4);
        let queues: Vec<_> = state
            .job_queues
            .iter()
            .map(|queue| queue.job_queue_name.as_str())
            .collect();
        assert_eq!(queues, names);
    }

    #[tokio::test]
    async fn failures_are_collected() {
        let batch = Arc::new(MockBatch::new());
        {
            let mut state = batch.state();
            state.fail_environments.insert("g5-xlarge".to_string());
            state.fail_queues.insert("p3-16xlarge-spot".to_string());
        }
        let report = provisioner(batch.clone())
            .provision(
                instance_types(),
                &["p3.16xlarge".to_string(), "p4d.24xlarge".to_string()],
                None,
            )
            .await;

        let failed: Vec<_> = report
            .failures
            .iter()
            .map(|failure| (failure.instance_type.as_str(), failure.model))
            .collect();
        assert_eq!(
            failed,
            vec![
                ("g5.xlarge", ProvisioningModel::Ec2),
                ("p3.16xlarge", ProvisioningModel::Spot),
            ]
        );

        let registry = &report.registry;
        assert!(registry.get("g5.xlarge").unwrap().provisioning_model.is_empty());
        assert!(registry
            .environment_for("p3.16xlarge", ProvisioningModel::Spot)
            .is_err());
        assert_eq!(
            registry
                .environment_for("p3.16xlarge", ProvisioningModel::Ec2)
                .unwrap(),
            "p3-16xlarge"
        );
        assert_eq!(registry.environments().count(), 3);
    }

    #[tokio::test]
    async fn rerun_adopts_existing_environments() {
        let batch = Arc::new(MockBatch::new());
        batch
            .state()
            .fail_queues
            .insert("g5-xlarge".to_string());
        let provisioner = provisioner(batch.clone());

        let first = provisioner.provision(instance_types(), &[], None).await;
        assert_eq!(first.failures.len(), 1);
        assert!(first
            .registry
            .environment_for("g5.xlarge", ProvisioningModel::Ec2)
            .is_err());

        batch.state().fail_queues.clear();
        let second = provisioner
            .provision(instance_types(), &[], Some(&first.registry))
            .await;
        assert!(second.failures.is_empty());
        let names: Vec<_> = second.registry.environments().map(|env| env.name).collect();
        assert_eq!(names, vec!["g5-xlarge", "p3-16xlarge", "p4d-24xlarge"]);

        let state = batch.state();
        assert_eq!(state.compute_environments.len(), 3);
        assert_eq!(state.job_queues.len(), 3);
    }

    #[tokio::test]
    async fn published_environments_survive_failures() {
        let batch = Arc::new(MockBatch::new());
        let provisioner = provisioner(batch.clone());
        let first = provisioner
            .provision(instance_types(), &["p4d.24xlarge".to_string()], None)
            .await;
        assert_eq!(first.registry.environments().count(), 4);

        batch
            .state()
            .fail_environments
            .insert("p4d-24xlarge-spot".to_string());
        let second = provisioner
            .provision(
                instance_types(),
                &["p4d.24xlarge".to_string()],
                Some(&first.registry),
            )
            .await;
        assert_eq!(second.failures.len(), 1);
        assert_eq!(
            second
                .registry
                .environment_for("p4d.24xlarge", ProvisioningModel::Spot)
                .unwrap(),
            "p4d-24xlarge-spot"
        );
        assert_eq!(second.registry, first.registry);
    }
}

use std::{cmp::min, sync::Arc};

use anyhow::{anyhow, bail, Result};
use resources::{
    client::BatchClient,
    config::{JOB_RETRY_ATTEMPTS, MAX_BASE_MOD_THREADS},
    objects::{
        instance_type::{InstanceTypeRecord, ProvisioningModel},
        job::{ResourceOverrides, RetryStrategy, SubmitJobRequest},
    },
    registry::Registry,
};
use uuid::Uuid;

use crate::template::{CommandTemplate, TemplateParams};

/// Share of an instance given to each job. Every job gets one GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobShares {
    /// GPUs of the instance, which is also the number of jobs per dataset.
    pub total_gpus: u32,
    pub vcpus: u32,
    /// MiB.
    pub memory: u64,
    pub num_base_mod_threads: u32,
}

impl JobShares {
    pub fn for_instance(record: &InstanceTypeRecord) -> Result<Self> {
        let total_gpus = record.gpu_count();
        if total_gpus == 0 {
            bail!("Instance type has no GPUs to share");
        }
        let vcpus = record.vcpus() / total_gpus;
        Ok(JobShares {
            total_gpus,
            vcpus,
            memory: record.usable_memory_mib() / total_gpus as u64,
            num_base_mod_threads: min(vcpus, MAX_BASE_MOD_THREADS),
        })
    }
}

/// Jobs created for one dataset. All of them carry `data_set_id`.
/// Rejected jobs are missing from `job_ids`.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSubmission {
    pub data_set_id: String,
    pub job_ids: Vec<String>,
}

pub struct SubmissionService {
    batch: Arc<dyn BatchClient>,
    region: String,
}

impl SubmissionService {
    pub fn new(batch: Arc<dyn BatchClient>, region: String) -> Self {
        Self { batch, region }
    }

    /// Submit one job per chunk to the queue of the instance type, one chunk per GPU.
    pub async fn submit_dataset(
        &self,
        registry: &Registry,
        instance_type: &str,
        model: ProvisioningModel,
        template: &CommandTemplate,
        chunks: &[String],
        tags: &str,
    ) -> Result<DatasetSubmission> {
        let job_queue = registry.environment_for(instance_type, model)?;
        let record = registry
            .get(instance_type)
            .ok_or_else(|| anyhow!("Instance type {} is not in the registry", instance_type))?;
        let shares = JobShares::for_instance(record)?;
        if chunks.len() != shares.total_gpus as usize {
            bail!(
                "{} has {} GPUs but the dataset has {} chunks",
                instance_type,
                shares.total_gpus,
                chunks.len()
            );
        }

        let data_set_id = Uuid::new_v4().to_string();
        let overrides = ResourceOverrides {
            vcpus: Some(shares.vcpus),
            gpus: Some(1),
            memory: Some(shares.memory),
            tags: Some(vec![tags.to_owned()]),
            data_set_id: Some(data_set_id.to_owned()),
        };
        tracing::info!(
            "Submitting {} jobs to {}, data set {}",
            chunks.len(),
            job_queue,
            data_set_id
        );

        let mut job_ids = vec![];
        for chunk in chunks {
            let command = template.render(&TemplateParams {
                file_list: chunk,
                num_base_mod_threads: shares.num_base_mod_threads,
            });
            let request = SubmitJobRequest {
                job_name: job_queue.to_owned(),
                job_queue: job_queue.to_owned(),
                // Job definitions are named after the compute environment
                job_definition: job_queue.to_owned(),
                container_overrides: overrides.container_overrides(command, &self.region),
                retry_strategy: RetryStrategy {
                    attempts: JOB_RETRY_ATTEMPTS,
                },
            };
            match self.batch.submit_job(&request).await {
                Ok(job_id) => {
                    tracing::info!(
                        "instance type: {}, tags: {}, file list: {}, job ID: {}",
                        instance_type,
                        tags,
                        chunk,
                        job_id
                    );
                    job_ids.push(job_id);
                },
                Err(e) => tracing::error!("Failed to submit job for {}: {:#}", chunk, e),
            }
        }

        Ok(DatasetSubmission {
            data_set_id,
            job_ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use resources::{
        mock::MockBatch,
        objects::{
            instance_type::{Gpu, GpuInfo, MemoryInfo, ProcessorInfo, VCpuInfo},
            job_definition::ResourceType,
        },
        registry::RegistryBuilder,
    };

    use super::*;
    use crate::job_definition::JobDefinitionReconciler;

    const DORADO: &str = "dorado basecaller ${file_list}/ --verbose --threads ${num_base_mod_threads}";

    fn record(vcpus: u32, memory: u64, gpus: u32) -> InstanceTypeRecord {
        InstanceTypeRecord {
            processor_info: ProcessorInfo {
                supported_architectures: vec!["x86_64".to_string()],
            },
            vcpu_info: VCpuInfo {
                default_vcpus: vcpus,
            },
            memory_info: MemoryInfo {
                size_in_mib: memory,
            },
            gpu_info: GpuInfo {
                gpus: vec![Gpu {
                    name: "A100".to_string(),
                    manufacturer: "NVIDIA".to_string(),
                    count: gpus,
                    memory_info: MemoryInfo { size_in_mib: 40960 },
                }],
                total_gpu_memory_in_mib: None,
            },
            provisioning_model: BTreeMap::new(),
        }
    }

    fn registry() -> Registry {
        let mut builder = RegistryBuilder::with_instance_types(vec![
            ("p3.16xlarge".to_string(), record(96, 196608, 8)),
            ("p4d.24xlarge".to_string(), record(96, 1179648, 8)),
            ("g5.xlarge".to_string(), record(4, 16384, 1)),
        ]);
        for (instance_type, model) in [
            ("p3.16xlarge", ProvisioningModel::Ec2),
            ("p4d.24xlarge", ProvisioningModel::Ec2),
            ("p4d.24xlarge", ProvisioningModel::Spot),
            ("g5.xlarge", ProvisioningModel::Ec2),
        ] {
            builder
                .record_environment(instance_type, model, model.environment_name(instance_type))
                .unwrap();
        }
        builder.build()
    }

    fn chunks(count: usize) -> Vec<String> {
        (0..count)
            .map(|idx| format!("/fsx/pod5-subsets/wgs_subset_128_files_{}_{}.lst", count, idx))
            .collect()
    }

    #[test]
    fn shares_per_gpu() {
        let shares = JobShares::for_instance(&record(96, 196608, 8)).unwrap();
        assert_eq!(
            shares,
            JobShares {
                total_gpus: 8,
                vcpus: 12,
                memory: 22118,
                num_base_mod_threads: 12,
            }
        );

        let shares = JobShares::for_instance(&record(768, 2097152, 8)).unwrap();
        assert_eq!(shares.vcpus, 96);
        assert_eq!(shares.num_base_mod_threads, 48);

        assert!(JobShares::for_instance(&record(8, 32768, 0)).is_err());
    }

    #[tokio::test]
    async fn one_job_per_gpu_with_shared_id() {
        let batch = Arc::new(MockBatch::new());
        let service = SubmissionService::new(batch.clone(), "us-west-2".to_string());
        let template = CommandTemplate::parse(DORADO).unwrap();

        let submission = service
            .submit_dataset(
                &registry(),
                "p3.16xlarge",
                ProvisioningModel::Ec2,
                &template,
                &chunks(8),
                "dorado, no modified bases",
            )
            .await
            .unwrap();
        assert_eq!(submission.job_ids.len(), 8);

        let state = batch.state();
        assert_eq!(state.submitted.len(), 8);
        for (idx, request) in state.submitted.iter().enumerate() {
            assert_eq!(request.job_queue, "p3-16xlarge");
            assert_eq!(request.job_definition, "p3-16xlarge");
            assert_eq!(request.retry_strategy.attempts, 10);
            let overrides = &request.container_overrides;
            assert_eq!(
                overrides.command,
                vec![format!(
                    "dorado basecaller /fsx/pod5-subsets/wgs_subset_128_files_8_{}.lst/ --verbose --threads 12",
                    idx
                )]
            );
            assert_eq!(overrides.resource(ResourceType::Gpu), Some("1"));
            assert_eq!(overrides.resource(ResourceType::Vcpu), Some("12"));
            assert_eq!(overrides.resource(ResourceType::Memory), Some("22118"));
            assert_eq!(overrides.env("DATA_SET_ID"), Some(submission.data_set_id.as_str()));
            assert_eq!(overrides.env("TAGS"), Some("dorado, no modified bases"));
            assert_eq!(overrides.env("REGION"), Some("us-west-2"));
        }
    }

    #[tokio::test]
    async fn chunk_count_must_match_gpus() {
        let batch = Arc::new(MockBatch::new());
        let service = SubmissionService::new(batch.clone(), "us-west-2".to_string());
        let template = CommandTemplate::parse(DORADO).unwrap();

        let result = service
            .submit_dataset(
                &registry(),
                "p3.16xlarge",
                ProvisioningModel::Ec2,
                &template,
                &chunks(4),
                "dorado, no modified bases",
            )
            .await;
        assert!(result.is_err());
        assert!(batch.state().submitted.is_empty());
    }

    #[tokio::test]
    async fn unprovisioned_model_is_rejected() {
        let batch = Arc::new(MockBatch::new());
        let service = SubmissionService::new(batch.clone(), "us-west-2".to_string());
        let template = CommandTemplate::parse(DORADO).unwrap();

        for (instance_type, model) in [
            ("g5.xlarge", ProvisioningModel::Spot),
            ("g5.48xlarge", ProvisioningModel::Ec2),
        ] {
            let result = service
                .submit_dataset(&registry(), instance_type, model, &template, &chunks(1), "t")
                .await;
            assert!(result.is_err());
        }
        assert!(batch.state().submitted.is_empty());
    }

    #[tokio::test]
    async fn rejected_jobs_are_skipped() {
        let batch = Arc::new(MockBatch::new());
        batch.state().submit_limit = Some(3);
        let service = SubmissionService::new(batch.clone(), "us-west-2".to_string());
        let template = CommandTemplate::parse(DORADO).unwrap();

        let submission = service
            .submit_dataset(
                &registry(),
                "p4d.24xlarge",
                ProvisioningModel::Ec2,
                &template,
                &chunks(8),
                "dorado, no modified bases",
            )
            .await
            .unwrap();
        assert_eq!(submission.job_ids.len(), 3);
        assert_eq!(batch.state().submitted.len(), 3);
    }

    #[tokio::test]
    async fn spot_job_uses_matching_definition_and_queue() {
        let batch = Arc::new(MockBatch::new());
        let registry = registry();
        JobDefinitionReconciler::new(batch.clone(), "basecaller:latest".to_string())
            .sync(&registry)
            .await
            .unwrap();
        let service = SubmissionService::new(batch.clone(), "us-west-2".to_string());
        let template = CommandTemplate::parse(DORADO).unwrap();

        service
            .submit_dataset(
                &registry,
                "p4d.24xlarge",
                ProvisioningModel::Spot,
                &template,
                &chunks(8),
                "dorado, no modified bases",
            )
            .await
            .unwrap();

        let active = batch.active_job_definition_names();
        let state = batch.state();
        let request = &state.submitted[0];
        assert_eq!(request.job_queue, "p4d-24xlarge-spot");
        assert_eq!(request.job_definition, request.job_queue);
        assert!(active.contains(&request.job_definition));
        assert_eq!(request.container_overrides.resource(ResourceType::Memory), Some("132710"));
    }
}

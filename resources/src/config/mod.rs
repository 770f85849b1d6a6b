use serde::{Deserialize, Serialize};

/// Share of an instance's memory handed to containers, in percent.
/// The remainder is left to the host and the container runtime.
pub const MEMORY_USABLE_PERCENT: u64 = 90;
/// Upper bound for the basecaller's modified-base threads, whatever the vCPU share per GPU.
pub const MAX_BASE_MOD_THREADS: u32 = 48;
/// Scheduler-level attempts for every submitted job.
pub const JOB_RETRY_ATTEMPTS: u32 = 10;
pub const COMPUTE_ENV_MIN_VCPUS: u32 = 0;
pub const COMPUTE_ENV_MAX_VCPUS: u32 = 4000;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct BenchConfig {
    /// AWS region of the benchmark environment.
    /// Defaults to "us-west-2", the only region the environment is deployed to.
    pub region: String,
    /// AWS account id, used to build the ECR image reference.
    pub account_id: String,
    /// Settings for the AWS command line used as backend.
    pub aws: AwsCliConfig,
    /// Prefix of every parameter in Parameter Store.
    pub parameter_prefix: String,
    /// Instance types that also get a spot compute environment.
    pub spot_instance_types: Vec<String>,
    /// Instance types dropped from the catalog even though they qualify.
    pub excluded_instance_types: Vec<String>,
    pub compute_resources: ComputeResourcesConfig,
    /// ECR repository of the basecaller container.
    pub basecaller_repository: String,
    pub basecaller_tag: String,
    /// Directory on the shared filesystem holding the dataset chunks.
    pub chunk_root: String,
    /// Chunk counts prepared for every dataset, one chunk per GPU.
    pub chunk_counts: Vec<u32>,
}

impl BenchConfig {
    pub fn basecaller_image(&self) -> String {
        format!(
            "{}.dkr.ecr.{}.amazonaws.com/{}:{}",
            self.account_id, self.region, self.basecaller_repository, self.basecaller_tag
        )
    }
}

impl Default for BenchConfig {
    fn default() -> Self {
        BenchConfig {
            region: "us-west-2".to_string(),
            account_id: String::new(),
            aws: AwsCliConfig::default(),
            parameter_prefix: "/ONT-performance-benchmark".to_string(),
            spot_instance_types: vec![
                "g5.48xlarge".to_string(),
                "p3.16xlarge".to_string(),
                "p4d.24xlarge".to_string(),
            ],
            // Not yet usable as AWS Batch compute environment instance type.
            excluded_instance_types: vec!["p5.48xlarge".to_string()],
            compute_resources: ComputeResourcesConfig::default(),
            basecaller_repository: "basecaller".to_string(),
            basecaller_tag: "latest".to_string(),
            chunk_root: "/fsx/pod5-subsets".to_string(),
            chunk_counts: vec![1, 2, 4, 8],
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct AwsCliConfig {
    /// Program to invoke. Defaults to "aws".
    pub program: String,
    /// Named profile passed as `--profile`.
    pub profile: Option<String>,
}

impl Default for AwsCliConfig {
    fn default() -> Self {
        AwsCliConfig {
            program: "aws".to_string(),
            profile: None,
        }
    }
}

/// Network and IAM wiring of the compute environments.
/// These are created by the infrastructure deployment and only referenced here.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ComputeResourcesConfig {
    pub subnets: Vec<String>,
    pub security_group_ids: Vec<String>,
    /// ARN of the EC2 instance profile of the container instances.
    pub instance_role: String,
}

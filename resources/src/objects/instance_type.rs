use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::config::MEMORY_USABLE_PERCENT;

/// How the capacity of a compute environment is bought.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
    EnumString, EnumIter,
)]
#[strum(ascii_case_insensitive)]
pub enum ProvisioningModel {
    /// On-demand instances.
    #[serde(rename = "EC2")]
    #[strum(serialize = "EC2")]
    Ec2,
    /// Interruptible, discounted instances.
    #[serde(rename = "SPOT")]
    #[strum(serialize = "SPOT")]
    Spot,
}

impl ProvisioningModel {
    /// Name of the compute environment for an instance type.
    /// Job queues and job definitions share this name.
    pub fn environment_name(&self, instance_type: &str) -> String {
        let base = instance_type.replace('.', "-");
        match self {
            ProvisioningModel::Ec2 => base,
            ProvisioningModel::Spot => format!("{}-spot", base),
        }
    }
}

/// Catalog entry of an instance type, reduced to what the benchmark needs.
///
/// Field names follow the EC2 `DescribeInstanceTypes` response, which is also the
/// format of the instance type map persisted in S3.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceTypeRecord {
    pub processor_info: ProcessorInfo,
    #[serde(rename = "VCpuInfo")]
    pub vcpu_info: VCpuInfo,
    pub memory_info: MemoryInfo,
    pub gpu_info: GpuInfo,
    /// Compute environment handling each provisioning model of this instance type.
    /// Empty until the environments are created.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub provisioning_model: BTreeMap<ProvisioningModel, String>,
}

impl InstanceTypeRecord {
    /// An instance type qualifies if it has an NVIDIA GPU and runs x86_64 code.
    pub fn is_eligible(&self) -> bool {
        self.gpu_info.has_nvidia() && self.processor_info.supports("x86_64")
    }

    pub fn vcpus(&self) -> u32 {
        self.vcpu_info.default_vcpus
    }

    pub fn memory_mib(&self) -> u64 {
        self.memory_info.size_in_mib
    }

    /// Memory available to containers, the instance memory minus the host reservation.
    pub fn usable_memory_mib(&self) -> u64 {
        self.memory_info.size_in_mib * MEMORY_USABLE_PERCENT / 100
    }

    /// Total number of GPUs over all GPU entries.
    pub fn gpu_count(&self) -> u32 {
        self.gpu_info.gpus.iter().map(|gpu| gpu.count).sum()
    }

    /// Compute environment created for the provisioning model, if any.
    pub fn environment(&self, model: ProvisioningModel) -> Option<&str> {
        self.provisioning_model
            .get(&model)
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ProcessorInfo {
    #[serde(default)]
    pub supported_architectures: Vec<String>,
}

impl ProcessorInfo {
    pub fn supports(&self, architecture: &str) -> bool {
        self.supported_architectures
            .iter()
            .any(|arch| arch == architecture)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct VCpuInfo {
    #[serde(rename = "DefaultVCpus")]
    pub default_vcpus: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct MemoryInfo {
    #[serde(rename = "SizeInMiB")]
    pub size_in_mib: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct GpuInfo {
    #[serde(default)]
    pub gpus: Vec<Gpu>,
    #[serde(
        rename = "TotalGpuMemoryInMiB",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub total_gpu_memory_in_mib: Option<u64>,
}

impl GpuInfo {
    pub fn has_nvidia(&self) -> bool {
        self.gpus.iter().any(|gpu| gpu.manufacturer == "NVIDIA")
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Gpu {
    pub name: String,
    pub manufacturer: String,
    pub count: u32,
    pub memory_info: MemoryInfo,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(vcpus: u32, memory: u64, gpus: &[(&str, u32)]) -> InstanceTypeRecord {
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
                gpus: gpus
                    .iter()
                    .map(|(manufacturer, count)| Gpu {
                        name: "A10G".to_string(),
                        manufacturer: manufacturer.to_string(),
                        count: *count,
                        memory_info: MemoryInfo { size_in_mib: 24576 },
                    })
                    .collect(),
                total_gpu_memory_in_mib: None,
            },
            provisioning_model: BTreeMap::new(),
        }
    }

    #[test]
    fn environment_names() {
        assert_eq!(
            ProvisioningModel::Ec2.environment_name("g5.48xlarge"),
            "g5-48xlarge"
        );
        assert_eq!(
            ProvisioningModel::Spot.environment_name("p4d.24xlarge"),
            "p4d-24xlarge-spot"
        );
    }

    #[test]
    fn parse_provisioning_model() {
        assert_eq!(
            "SPOT".parse::<ProvisioningModel>().unwrap(),
            ProvisioningModel::Spot
        );
        assert_eq!(
            "ec2".parse::<ProvisioningModel>().unwrap(),
            ProvisioningModel::Ec2
        );
        assert_eq!(ProvisioningModel::Ec2.to_string(), "EC2");
    }

    #[test]
    fn usable_memory_is_floored() {
        assert_eq!(record(192, 786432, &[("NVIDIA", 8)]).usable_memory_mib(), 707788);
        assert_eq!(record(96, 196608, &[("NVIDIA", 8)]).usable_memory_mib(), 176947);
        assert_eq!(record(4, 16384, &[("NVIDIA", 1)]).usable_memory_mib(), 14745);
    }

    #[test]
    fn gpu_count_sums_entries() {
        let r = record(96, 196608, &[("NVIDIA", 4), ("NVIDIA", 2)]);
        assert_eq!(r.gpu_count(), 6);
    }

    #[test]
    fn eligibility() {
        assert!(record(8, 32768, &[("NVIDIA", 1)]).is_eligible());
        assert!(!record(8, 32768, &[("AMD", 1)]).is_eligible());
        assert!(!record(8, 32768, &[]).is_eligible());

        let mut arm = record(8, 32768, &[("NVIDIA", 1)]);
        arm.processor_info.supported_architectures = vec!["arm64".to_string()];
        assert!(!arm.is_eligible());
    }

    #[test]
    fn empty_environment_is_not_provisioned() {
        let mut r = record(8, 32768, &[("NVIDIA", 1)]);
        r.provisioning_model
            .insert(ProvisioningModel::Ec2, "g5-2xlarge".to_string());
        r.provisioning_model
            .insert(ProvisioningModel::Spot, String::new());
        assert_eq!(r.environment(ProvisioningModel::Ec2), Some("g5-2xlarge"));
        assert_eq!(r.environment(ProvisioningModel::Spot), None);
    }

    #[test]
    fn deserialize_persisted_format() {
        let json = r#"{
            "ProcessorInfo": {"SupportedArchitectures": ["x86_64"], "SustainedClockSpeedInGhz": 3.3},
            "VCpuInfo": {"DefaultVCpus": 192, "DefaultCores": 96},
            "MemoryInfo": {"SizeInMiB": 786432},
            "GpuInfo": {
                "Gpus": [{"Name": "A10G", "Manufacturer": "NVIDIA", "Count": 8, "MemoryInfo": {"SizeInMiB": 24576}}],
                "TotalGpuMemoryInMiB": 196608
            },
            "ProvisioningModel": {"EC2": "g5-48xlarge", "SPOT": "g5-48xlarge-spot"}
        }"#;
        let r: InstanceTypeRecord = serde_json::from_str(json).unwrap();
        assert_eq!(r.vcpus(), 192);
        assert_eq!(r.gpu_count(), 8);
        assert_eq!(r.gpu_info.total_gpu_memory_in_mib, Some(196608));
        assert_eq!(r.environment(ProvisioningModel::Spot), Some("g5-48xlarge-spot"));
    }
}

//! Mapping of instance types to the compute environments created for them.
//!
//! The map is assembled with a [`RegistryBuilder`] while environments are created and
//! frozen into a [`Registry`] afterwards. Every other component only reads it.

use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use strum::IntoEnumIterator;

use crate::{
    client::{ObjectStore, ParameterStore},
    models::{Parameter, S3Url},
    objects::instance_type::{InstanceTypeRecord, ProvisioningModel},
};

/// Object key of the published registry in the data bucket.
pub const REGISTRY_OBJECT_KEY: &str = "aws-batch-instance-types.json";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Registry {
    instance_types: BTreeMap<String, InstanceTypeRecord>,
}

/// A compute environment of the registry. Its name is also the name of
/// the job queue and the job definition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Environment<'a> {
    pub name: &'a str,
    pub instance_type: &'a str,
    pub model: ProvisioningModel,
    pub record: &'a InstanceTypeRecord,
}

impl Registry {
    pub fn from_json(json: &[u8]) -> Result<Self> {
        let instance_types = serde_json::from_slice(json).context("Invalid instance type map")?;
        Ok(Registry { instance_types })
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(&self.instance_types)?)
    }

    pub fn get(&self, instance_type: &str) -> Option<&InstanceTypeRecord> {
        self.instance_types.get(instance_type)
    }

    pub fn instance_types(&self) -> impl Iterator<Item = (&str, &InstanceTypeRecord)> {
        self.instance_types
            .iter()
            .map(|(name, record)| (name.as_str(), record))
    }

    pub fn len(&self) -> usize {
        self.instance_types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instance_types.is_empty()
    }

    /// All created compute environments, ordered by instance type, on-demand first.
    pub fn environments(&self) -> impl Iterator<Item = Environment<'_>> {
        self.instance_types
            .iter()
            .flat_map(|(instance_type, record)| {
                ProvisioningModel::iter().filter_map(move |model| {
                    record.environment(model).map(|name| Environment {
                        name,
                        instance_type,
                        model,
                        record,
                    })
                })
            })
    }

    /// Compute environment (and job queue) handling the instance type with the given model.
    pub fn environment_for(&self, instance_type: &str, model: ProvisioningModel) -> Result<&str> {
        let record = self
            .get(instance_type)
            .ok_or_else(|| anyhow!("Instance type {} is not in the registry", instance_type))?;
        record.environment(model).ok_or_else(|| {
            anyhow!(
                "Instance type {} has no {} compute environment",
                instance_type,
                model
            )
        })
    }

    pub fn find_environment(&self, name: &str) -> Option<Environment<'_>> {
        self.environments()
            .find(|environment| environment.name == name)
    }

    /// Read the registry published by the provisioner.
    pub async fn load(
        params: &dyn ParameterStore,
        objects: &dyn ObjectStore,
        prefix: &str,
    ) -> Result<Self> {
        let parameter = Parameter::InstanceTypes.path(prefix);
        let url = params
            .get_parameter(&parameter)
            .await
            .with_context(|| format!("Failed to read parameter {}", parameter))?;
        let url = S3Url::parse(&url)?;
        let json = objects
            .get_object(&url)
            .await
            .with_context(|| format!("Failed to fetch {}", url))?;
        let registry = Self::from_json(&json)?;
        tracing::debug!("Loaded {} instance types from {}", registry.len(), url);
        Ok(registry)
    }

    /// Write the registry to the data bucket and point the parameter at it.
    pub async fn publish(
        &self,
        params: &dyn ParameterStore,
        objects: &dyn ObjectStore,
        prefix: &str,
    ) -> Result<S3Url> {
        let bucket_parameter = Parameter::DataS3Bucket.path(prefix);
        let bucket = params
            .get_parameter(&bucket_parameter)
            .await
            .with_context(|| format!("Failed to read parameter {}", bucket_parameter))?;
        let url = S3Url::new(bucket, REGISTRY_OBJECT_KEY);
        objects
            .put_object(&url, self.to_json()?)
            .await
            .with_context(|| format!("Failed to upload {}", url))?;
        params
            .put_parameter(&Parameter::InstanceTypes.path(prefix), &url.to_string())
            .await?;
        tracing::info!("Published {} instance types to {}", self.len(), url);
        Ok(url)
    }
}

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    instance_types: BTreeMap<String, InstanceTypeRecord>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    /// Start from the qualifying instance types, none of them provisioned yet.
    pub fn with_instance_types(
        instance_types: impl IntoIterator<Item = (String, InstanceTypeRecord)>,
    ) -> Self {
        let mut builder = Self::new();
        for (name, record) in instance_types {
            builder.insert(name, record);
        }
        builder
    }

    pub fn insert(&mut self, instance_type: String, record: InstanceTypeRecord) {
        self.instance_types.insert(instance_type, record);
    }

    pub fn instance_types(&self) -> impl Iterator<Item = &str> {
        self.instance_types.keys().map(String::as_str)
    }

    /// Environment recorded so far for the instance type and model.
    pub fn environment(&self, instance_type: &str, model: ProvisioningModel) -> Option<&str> {
        self.instance_types.get(instance_type)?.environment(model)
    }

    /// Record that `name` handles the instance type for the given model.
    pub fn record_environment(
        &mut self,
        instance_type: &str,
        model: ProvisioningModel,
        name: String,
    ) -> Result<()> {
        let record = self
            .instance_types
            .get_mut(instance_type)
            .ok_or_else(|| anyhow!("Unknown instance type {}", instance_type))?;
        record.provisioning_model.insert(model, name);
        Ok(())
    }

    pub fn build(self) -> Registry {
        Registry {
            instance_types: self.instance_types,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        mock::{MockObjectStore, MockParameterStore},
        objects::instance_type::{Gpu, GpuInfo, MemoryInfo, ProcessorInfo, VCpuInfo},
    };

    pub(crate) fn gpu_record(vcpus: u32, memory: u64, gpus: u32) -> InstanceTypeRecord {
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

    fn sample() -> Registry {
        let mut builder = RegistryBuilder::with_instance_types(vec![
            ("p4d.24xlarge".to_string(), gpu_record(96, 1179648, 8)),
            ("g5.xlarge".to_string(), gpu_record(4, 16384, 1)),
            ("g4dn.xlarge".to_string(), gpu_record(4, 16384, 1)),
        ]);
        for (instance_type, model) in [
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

    #[test]
    fn environments_are_listed_per_model() {
        let registry = sample();
        let names: Vec<_> = registry.environments().map(|env| env.name).collect();
        assert_eq!(
            names,
            vec!["g5-xlarge", "p4d-24xlarge", "p4d-24xlarge-spot"]
        );
        let spot = registry.find_environment("p4d-24xlarge-spot").unwrap();
        assert_eq!(spot.instance_type, "p4d.24xlarge");
        assert_eq!(spot.model, ProvisioningModel::Spot);
        assert_eq!(spot.record.gpu_count(), 8);
    }

    #[test]
    fn resolve_environment() {
        let registry = sample();
        assert_eq!(
            registry
                .environment_for("p4d.24xlarge", ProvisioningModel::Spot)
                .unwrap(),
            "p4d-24xlarge-spot"
        );
        assert!(registry
            .environment_for("g5.xlarge", ProvisioningModel::Spot)
            .is_err());
        assert!(registry
            .environment_for("g4dn.xlarge", ProvisioningModel::Ec2)
            .is_err());
        assert!(registry
            .environment_for("p5.48xlarge", ProvisioningModel::Ec2)
            .is_err());
    }

    #[test]
    fn unknown_instance_type_is_rejected() {
        let mut builder = RegistryBuilder::new();
        assert!(builder
            .record_environment("g5.xlarge", ProvisioningModel::Ec2, "g5-xlarge".to_string())
            .is_err());
    }

    #[tokio::test]
    async fn publish_then_load() {
        let prefix = "/ONT-performance-benchmark";
        let params =
            MockParameterStore::new().with(Parameter::DataS3Bucket.path(prefix), "data-bucket");
        let objects = MockObjectStore::new();
        let registry = sample();

        let url = registry.publish(&params, &objects, prefix).await.unwrap();
        assert_eq!(
            url.to_string(),
            "s3://data-bucket/aws-batch-instance-types.json"
        );
        assert_eq!(
            params.value(&Parameter::InstanceTypes.path(prefix)).as_deref(),
            Some("s3://data-bucket/aws-batch-instance-types.json")
        );

        let json: serde_json::Value =
            serde_json::from_slice(&objects.object(&url).unwrap()).unwrap();
        assert_eq!(
            json["p4d.24xlarge"]["ProvisioningModel"]["SPOT"],
            "p4d-24xlarge-spot"
        );
        assert!(json["g4dn.xlarge"].get("ProvisioningModel").is_none());

        let loaded = Registry::load(&params, &objects, prefix).await.unwrap();
        assert_eq!(loaded, registry);
    }

    #[tokio::test]
    async fn load_without_parameter_fails() {
        let params = MockParameterStore::new();
        let objects = MockObjectStore::new();
        assert!(Registry::load(&params, &objects, "/ONT-performance-benchmark")
            .await
            .is_err());
    }
}

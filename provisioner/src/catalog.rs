use std::collections::BTreeMap;

use anyhow::{Context, Result};
use resources::{
    client::{InstanceCatalog, InstanceTypeDescriptor},
    objects::instance_type::InstanceTypeRecord,
};

/// Reduce raw catalog entries to the instance types able to run the basecaller:
/// at least one NVIDIA GPU and x86_64 support.
pub fn filter(raw: Vec<InstanceTypeDescriptor>) -> Vec<(String, InstanceTypeRecord)> {
    raw.into_iter()
        .filter_map(|descriptor| {
            let gpu_info = descriptor.gpu_info?;
            let record = InstanceTypeRecord {
                processor_info: descriptor.processor_info,
                vcpu_info: descriptor.vcpu_info,
                memory_info: descriptor.memory_info,
                gpu_info,
                provisioning_model: BTreeMap::new(),
            };
            record
                .is_eligible()
                .then(|| (descriptor.instance_type, record))
        })
        .collect()
}

/// Walk all pages of the catalog and keep the qualifying instance types
/// that are not explicitly excluded.
pub async fn discover(
    catalog: &dyn InstanceCatalog,
    excluded: &[String],
) -> Result<BTreeMap<String, InstanceTypeRecord>> {
    let mut instance_types = BTreeMap::new();
    let mut next_token = None;
    let mut pages = 0;
    loop {
        let page = catalog
            .describe_instance_types(next_token)
            .await
            .with_context(|| format!("Failed to describe instance types, page {}", pages + 1))?;
        pages += 1;
        instance_types.extend(filter(page.instance_types));
        next_token = page.next_token;
        if next_token.is_none() {
            break;
        }
    }

    for instance_type in excluded {
        if instance_types.remove(instance_type).is_some() {
            tracing::info!("Excluding instance type {}", instance_type);
        }
    }
    tracing::info!(
        "Found {} GPU instance types in {} pages",
        instance_types.len(),
        pages
    );
    Ok(instance_types)
}

use std::{collections::BTreeMap, fmt};

use resources::{
    objects::result::{JobOutcome, ResultRecord},
    registry::Registry,
};

use crate::aggregate::normalize;

/// A data set whose jobs all finished on one compute environment, some of them failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyWarning {
    pub compute_environment: String,
    pub instance_type: String,
    pub data_set_id: String,
    pub tags: String,
    pub num_gpus: u32,
    pub succeeded: u32,
    pub failed: u32,
}

impl fmt::Display for ConsistencyWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) data set {} \"{}\": {} of {} jobs failed, {} succeeded",
            self.compute_environment,
            self.instance_type,
            self.data_set_id,
            self.tags,
            self.failed,
            self.num_gpus,
            self.succeeded
        )
    }
}

#[derive(Default)]
struct Counts {
    instance_type: String,
    succeeded: u32,
    failed: u32,
}

/// Find data sets where every per-GPU job finished but not all of them succeeded.
///
/// Fan-outs that are still incomplete are not evaluated.
pub fn check_consistency(results: &[ResultRecord], specs: &Registry) -> Vec<ConsistencyWarning> {
    let mut groups: BTreeMap<(String, String, String, u32), Counts> = BTreeMap::new();
    for row in normalize(results, specs) {
        let counts = groups
            .entry((
                row.compute_environment,
                row.data_set_id,
                row.tags,
                row.num_gpus,
            ))
            .or_default();
        counts.instance_type = row.instance_type;
        match row.status {
            JobOutcome::Succeeded => counts.succeeded += 1,
            JobOutcome::Failed => counts.failed += 1,
            JobOutcome::Unknown => {},
        }
    }

    groups
        .into_iter()
        .filter(|((_, _, _, num_gpus), counts)| {
            counts.succeeded + counts.failed == *num_gpus && counts.failed > 0
        })
        .map(
            |((compute_environment, data_set_id, tags, num_gpus), counts)| ConsistencyWarning {
                compute_environment,
                instance_type: counts.instance_type,
                data_set_id,
                tags,
                num_gpus,
                succeeded: counts.succeeded,
                failed: counts.failed,
            },
        )
        .collect()
}

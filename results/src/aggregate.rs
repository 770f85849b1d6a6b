use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDateTime;
use resources::{
    objects::result::{JobOutcome, ResultRecord},
    registry::Registry,
};
use serde::Serialize;
use strum::Display;

/// Gigabases in the first 128 files of the benchmark dataset.
pub const DATASET_GIGABASES: f64 = 18.330576791;
/// Gigabases of a whole human genome (GRCh38.p14) at 30x coverage.
pub const WHG_30X_GIGABASES: f64 = 3.298912062 * 30.0;

/// A report row with the instance type resolved and the gaps of older runs filled.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkRow {
    pub job_id: String,
    pub compute_environment: String,
    pub instance_type: String,
    pub tags: String,
    pub status: JobOutcome,
    pub end_time: Option<NaiveDateTime>,
    pub runtime_hours: Option<f64>,
    pub samples_per_s: f64,
    pub data_set_id: String,
    pub basecaller: String,
    pub num_gpus: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Display)]
pub enum ModifiedBases {
    #[serde(rename = "no modified bases")]
    #[strum(serialize = "no modified bases")]
    NoModifiedBases,
    #[serde(rename = "5mCG")]
    #[strum(serialize = "5mCG")]
    Cg5m,
    #[serde(rename = "5mCG_5hmCG")]
    #[strum(serialize = "5mCG_5hmCG")]
    Cg5m5hm,
}

impl ModifiedBases {
    /// Modification profile from tags like "dorado, modified bases 5mCG".
    pub fn from_tags(tags: &str) -> Option<Self> {
        let (_, profile) = tags.split_once(", ")?;
        match profile {
            "no modified bases" => Some(ModifiedBases::NoModifiedBases),
            "modified bases 5mCG" => Some(ModifiedBases::Cg5m),
            "modified bases 5mCG & 5hmCG" => Some(ModifiedBases::Cg5m5hm),
            _ => None,
        }
    }
}

/// Instance type behind a compute environment name.
fn instance_type_of(compute_environment: &str, specs: &Registry) -> Option<String> {
    if let Some(environment) = specs.find_environment(compute_environment) {
        return Some(environment.instance_type.to_owned());
    }
    let base = compute_environment
        .strip_suffix("-spot")
        .unwrap_or(compute_environment);
    let instance_type = base.replace('-', ".");
    specs.get(&instance_type).map(|_| instance_type)
}

pub fn normalize_record(record: &ResultRecord, specs: &Registry) -> Option<BenchmarkRow> {
    let instance_type = match instance_type_of(&record.compute_environment, specs) {
        Some(instance_type) => instance_type,
        None => {
            tracing::warn!(
                "Skipping job {}, unknown compute environment {}",
                record.job_id,
                record.compute_environment
            );
            return None;
        },
    };
    let data_set_id = match record.data_set_id.as_ref().or(record.ec2_instance_id.as_ref()) {
        Some(data_set_id) => data_set_id,
        None => {
            tracing::warn!("Skipping job {} without data set", record.job_id);
            return None;
        },
    };
    let num_gpus = specs.get(&instance_type).map_or(0, |spec| spec.gpu_count());
    let basecaller = record.basecaller.to_owned().unwrap_or_else(|| {
        format!(
            "{} v{}",
            record.basecaller_name.as_deref().unwrap_or("unknown"),
            record.basecaller_version.as_deref().unwrap_or("?")
        )
    });

    Some(BenchmarkRow {
        job_id: record.job_id.to_owned(),
        compute_environment: record.compute_environment.to_owned(),
        instance_type,
        tags: record.tags.to_owned(),
        status: record.status,
        end_time: record.container_end_time,
        runtime_hours: record.runtime_hours(),
        samples_per_s: record.samples_per_s,
        data_set_id: data_set_id.to_owned(),
        basecaller,
        num_gpus,
    })
}

pub fn normalize(records: &[ResultRecord], specs: &Registry) -> Vec<BenchmarkRow> {
    records
        .iter()
        .filter_map(|record| normalize_record(record, specs))
        .collect()
}

/// Keep the succeeded rows of the most recent run per tags and compute environment.
///
/// A run is identified by its data set. For every compute environment the data set
/// of the job that finished last wins.
pub fn latest_runs(rows: Vec<BenchmarkRow>) -> Vec<BenchmarkRow> {
    let rows: Vec<_> = rows
        .into_iter()
        .filter(|row| row.status == JobOutcome::Succeeded && row.samples_per_s >= 1.0)
        .collect();

    let mut last: HashMap<(&str, &str), &BenchmarkRow> = HashMap::new();
    for row in &rows {
        let key = (row.tags.as_str(), row.compute_environment.as_str());
        match last.get(&key) {
            Some(current) if current.end_time >= row.end_time => {},
            _ => {
                last.insert(key, row);
            },
        }
    }
    let latest: HashSet<(String, String)> = last
        .into_iter()
        .map(|((tags, _), row)| (tags.to_owned(), row.data_set_id.to_owned()))
        .collect();

    rows.into_iter()
        .filter(|row| latest.contains(&(row.tags.to_owned(), row.data_set_id.to_owned())))
        .collect()
}

/// Throughput and runtime of one benchmark run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub modified_bases: ModifiedBases,
    pub compute_environment: String,
    pub instance_type: String,
    pub num_gpus: u32,
    pub data_set_id: String,
    pub basecaller: String,
    /// Sum over the jobs of the run, one job per GPU.
    pub samples_per_s: f64,
    /// Mean over the jobs of the run.
    pub runtime_hours: f64,
}

impl Summary {
    pub fn runtime_per_gigabase(&self) -> f64 {
        self.runtime_hours / DATASET_GIGABASES
    }

    pub fn runtime_per_whg_30x(&self) -> f64 {
        self.runtime_hours * (WHG_30X_GIGABASES / DATASET_GIGABASES)
    }
}

type GroupKey = (ModifiedBases, String, String, u32, String, String);

pub fn aggregate(rows: &[BenchmarkRow]) -> Vec<Summary> {
    let mut groups: BTreeMap<GroupKey, Vec<&BenchmarkRow>> = BTreeMap::new();
    for row in rows {
        let modified_bases = match ModifiedBases::from_tags(&row.tags) {
            Some(modified_bases) => modified_bases,
            None => {
                tracing::debug!("Ignoring job {} with tags {}", row.job_id, row.tags);
                continue;
            },
        };
        groups
            .entry((
                modified_bases,
                row.compute_environment.to_owned(),
                row.instance_type.to_owned(),
                row.num_gpus,
                row.data_set_id.to_owned(),
                row.basecaller.to_owned(),
            ))
            .or_default()
            .push(row);
    }

    groups
        .into_iter()
        .map(
            |(
                (modified_bases, compute_environment, instance_type, num_gpus, data_set_id, basecaller),
                rows,
            )| {
                let runtimes: Vec<f64> = rows.iter().filter_map(|row| row.runtime_hours).collect();
                let runtime_hours = if runtimes.is_empty() {
                    0.0
                } else {
                    runtimes.iter().sum::<f64>() / runtimes.len() as f64
                };
                Summary {
                    modified_bases,
                    compute_environment,
                    instance_type,
                    num_gpus,
                    data_set_id,
                    basecaller,
                    samples_per_s: rows.iter().map(|row| row.samples_per_s).sum(),
                    runtime_hours,
                }
            },
        )
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::BTreeMap;

    use resources::{
        objects::instance_type::{
            Gpu, GpuInfo, InstanceTypeRecord, MemoryInfo, ProcessorInfo, ProvisioningModel,
            VCpuInfo,
        },
        registry::RegistryBuilder,
    };

    use super::*;

    pub(crate) fn specs() -> Registry {
        let record = |gpus: u32| InstanceTypeRecord {
            processor_info: ProcessorInfo {
                supported_architectures: vec!["x86_64".to_string()],
            },
            vcpu_info: VCpuInfo { default_vcpus: 48 },
            memory_info: MemoryInfo {
                size_in_mib: 196608,
            },
            gpu_info: GpuInfo {
                gpus: vec![Gpu {
                    name: "A10G".to_string(),
                    manufacturer: "NVIDIA".to_string(),
                    count: gpus,
                    memory_info: MemoryInfo { size_in_mib: 24576 },
                }],
                total_gpu_memory_in_mib: None,
            },
            provisioning_model: BTreeMap::new(),
        };
        let mut builder = RegistryBuilder::with_instance_types(vec![
            ("g5.12xlarge".to_string(), record(4)),
            ("g5.xlarge".to_string(), record(1)),
        ]);
        for (instance_type, model) in [
            ("g5.12xlarge", ProvisioningModel::Ec2),
            ("g5.12xlarge", ProvisioningModel::Spot),
            ("g5.xlarge", ProvisioningModel::Ec2),
        ] {
            builder
                .record_environment(instance_type, model, model.environment_name(instance_type))
                .unwrap();
        }
        builder.build()
    }

    pub(crate) fn record(
        job_id: &str,
        compute_environment: &str,
        status: JobOutcome,
        data_set_id: &str,
        end: &str,
    ) -> ResultRecord {
        ResultRecord {
            job_id: job_id.to_string(),
            compute_environment: compute_environment.to_string(),
            tags: "dorado, no modified bases".to_string(),
            status,
            container_start_time: resources::objects::result::parse_timestamp("2023-07-28 10:00:00"),
            container_end_time: resources::objects::result::parse_timestamp(end),
            samples_per_s: 1.0e7,
            data_set_id: Some(data_set_id.to_string()),
            ec2_instance_id: None,
            basecaller_name: Some("dorado".to_string()),
            basecaller_version: Some("0.3.0".to_string()),
            basecaller: None,
        }
    }

    #[test]
    fn normalize_fills_gaps() {
        let mut legacy = record("1", "g5-12xlarge-spot", JobOutcome::Succeeded, "x", "2023-07-28 12:00:00");
        legacy.data_set_id = None;
        legacy.ec2_instance_id = Some("i-0abc".to_string());
        let row = normalize_record(&legacy, &specs()).unwrap();
        assert_eq!(row.instance_type, "g5.12xlarge");
        assert_eq!(row.data_set_id, "i-0abc");
        assert_eq!(row.basecaller, "dorado v0.3.0");
        assert_eq!(row.num_gpus, 4);
        assert_eq!(row.runtime_hours, Some(2.0));

        let mut labelled = record("2", "g5-xlarge", JobOutcome::Succeeded, "y", "2023-07-28 12:00:00");
        labelled.basecaller = Some("guppy v6.5.7".to_string());
        assert_eq!(normalize_record(&labelled, &specs()).unwrap().basecaller, "guppy v6.5.7");

        let unknown = record("3", "p5-48xlarge", JobOutcome::Succeeded, "z", "2023-07-28 12:00:00");
        assert!(normalize_record(&unknown, &specs()).is_none());
    }

    #[test]
    fn modified_bases_from_tags() {
        assert_eq!(
            ModifiedBases::from_tags("guppy, no modified bases"),
            Some(ModifiedBases::NoModifiedBases)
        );
        assert_eq!(
            ModifiedBases::from_tags("dorado, modified bases 5mCG"),
            Some(ModifiedBases::Cg5m)
        );
        assert_eq!(
            ModifiedBases::from_tags("dorado, modified bases 5mCG & 5hmCG"),
            Some(ModifiedBases::Cg5m5hm)
        );
        assert_eq!(ModifiedBases::from_tags("smoke test"), None);
        assert_eq!(ModifiedBases::Cg5m5hm.to_string(), "5mCG_5hmCG");
    }

    #[test]
    fn only_latest_run_survives() {
        let records = vec![
            record("1", "g5-xlarge", JobOutcome::Succeeded, "old", "2023-07-01 12:00:00"),
            record("2", "g5-xlarge", JobOutcome::Succeeded, "new", "2023-07-28 12:00:00"),
            record("3", "g5-xlarge", JobOutcome::Failed, "newer", "2023-07-29 12:00:00"),
            record("4", "g5-12xlarge", JobOutcome::Succeeded, "other", "2023-07-02 12:00:00"),
        ];
        let rows = latest_runs(normalize(&records, &specs()));
        let ids: Vec<_> = rows.iter().map(|row| row.job_id.as_str()).collect();
        assert_eq!(ids, vec!["2", "4"]);
    }

    #[test]
    fn low_throughput_is_dropped() {
        let mut record = record("1", "g5-xlarge", JobOutcome::Succeeded, "a", "2023-07-28 12:00:00");
        record.samples_per_s = 0.5;
        assert!(latest_runs(normalize(&[record], &specs())).is_empty());
    }

    #[test]
    fn aggregate_run() {
        let mut records: Vec<_> = (0..4)
            .map(|idx| {
                record(
                    &idx.to_string(),
                    "g5-12xlarge",
                    JobOutcome::Succeeded,
                    "run",
                    &format!("2023-07-28 1{}:00:00", idx + 1),
                )
            })
            .collect();
        records[0].samples_per_s = 2.0e7;
        let summaries = aggregate(&normalize(&records, &specs()));
        assert_eq!(summaries.len(), 1);
        let summary = &summaries[0];
        assert_eq!(summary.modified_bases, ModifiedBases::NoModifiedBases);
        assert_eq!(summary.num_gpus, 4);
        assert_eq!(summary.samples_per_s, 5.0e7);
        // 1, 2, 3 and 4 hours
        assert!((summary.runtime_hours - 2.5).abs() < 1e-9);
        assert!((summary.runtime_per_gigabase() - 2.5 / 18.330576791).abs() < 1e-12);
        assert!(
            (summary.runtime_per_whg_30x() - 2.5 * 3.298912062 * 30.0 / 18.330576791).abs() < 1e-9
        );
    }
}

use std::{fs::File, path::Path};

use anyhow::{anyhow, bail, Context, Result};
use resources::objects::instance_type::ProvisioningModel;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::template::CommandTemplate;

const GUPPY_OPTIONS: &str = "--bam_out \
    --index \
    --device cuda:all:100% \
    --records_per_fastq 0 \
    --progress_stats_frequency 600 \
    --recursive \
    --num_base_mod_threads ${num_base_mod_threads} \
    --num_callers 16 \
    --gpu_runners_per_device 8 \
    --chunks_per_runner 2048";

const DORADO_OUTPUT: &str = "samtools view --threads 8 -O BAM -o /fsx/out/&job_id&/calls.bam";

/// Basecaller commands benchmarked so far.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Preset {
    GuppyNoModifiedBases,
    #[serde(rename = "guppy-5mcg")]
    #[strum(serialize = "guppy-5mcg")]
    Guppy5mCG,
    #[serde(rename = "guppy-5mcg-5hmcg")]
    #[strum(serialize = "guppy-5mcg-5hmcg")]
    Guppy5mCG5hmCG,
    DoradoNoModifiedBases,
    #[serde(rename = "dorado-5mcg")]
    #[strum(serialize = "dorado-5mcg")]
    Dorado5mCG,
    #[serde(rename = "dorado-5mcg-5hmcg")]
    #[strum(serialize = "dorado-5mcg-5hmcg")]
    Dorado5mCG5hmCG,
}

impl Preset {
    pub fn command(&self) -> String {
        match self {
            Preset::GuppyNoModifiedBases => guppy("dna_r10.4.1_e8.2_400bps_hac.cfg"),
            Preset::Guppy5mCG => guppy("dna_r10.4.1_e8.2_400bps_modbases_5mc_cg_hac.cfg"),
            Preset::Guppy5mCG5hmCG => guppy("dna_r10.4_e8.1_modbases_5hmc_5mc_cg_hac.cfg"),
            Preset::DoradoNoModifiedBases => dorado("dna_r10.4.1_e8.2_400bps_hac@v3.5.2", None),
            Preset::Dorado5mCG => dorado("dna_r10.4.1_e8.2_400bps_hac@v3.5.2", Some("5mCG")),
            Preset::Dorado5mCG5hmCG => {
                dorado("dna_r10.4.1_e8.2_400bps_hac@v4.0.0", Some("5mCG_5hmCG"))
            },
        }
    }

    /// Tags reported with the results, which also select the result group.
    pub fn tags(&self) -> &'static str {
        match self {
            Preset::GuppyNoModifiedBases => "guppy, no modified bases",
            Preset::Guppy5mCG => "guppy, modified bases 5mCG",
            Preset::Guppy5mCG5hmCG => "guppy, modified bases 5mCG & 5hmCG",
            Preset::DoradoNoModifiedBases => "dorado, no modified bases",
            Preset::Dorado5mCG => "dorado, modified bases 5mCG",
            Preset::Dorado5mCG5hmCG => "dorado, modified bases 5mCG & 5hmCG",
        }
    }
}

fn guppy(config: &str) -> String {
    format!(
        "guppy_basecaller --compress_fastq --input_path ${{file_list}}/ --save_path /fsx/out/ --config {} {}",
        config, GUPPY_OPTIONS
    )
}

fn dorado(model: &str, modified_bases: Option<&str>) -> String {
    let modified_bases = modified_bases
        .map(|bases| format!("--modified-bases {} ", bases))
        .unwrap_or_default();
    format!(
        "dorado basecaller /usr/local/dorado/models/{} ${{file_list}}/ --verbose {}| {}",
        model, modified_bases, DORADO_OUTPUT
    )
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeTarget {
    pub instance_type: String,
    pub provisioning_model: ProvisioningModel,
}

/// What to benchmark: one command on a set of instance types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPlan {
    /// One of the built-in commands.
    #[serde(default)]
    pub preset: Option<Preset>,
    /// A custom command template, used instead of a preset.
    #[serde(default)]
    pub command: Option<String>,
    /// Defaults to the tags of the preset.
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default = "default_data_set")]
    pub data_set: String,
    pub compute: Vec<ComputeTarget>,
}

fn default_data_set() -> String {
    "wgs_subset_128_files".to_string()
}

impl Default for JobPlan {
    fn default() -> Self {
        JobPlan {
            preset: Some(Preset::DoradoNoModifiedBases),
            command: None,
            tags: None,
            data_set: default_data_set(),
            compute: vec![ComputeTarget {
                instance_type: "g5.48xlarge".to_string(),
                provisioning_model: ProvisioningModel::Spot,
            }],
        }
    }
}

impl JobPlan {
    pub fn from_file(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Failed to open file {}", path.display()))?;
        let plan: JobPlan = serde_yaml::from_reader(file)
            .with_context(|| format!("Failed to parse file {}", path.display()))?;
        plan.template()?;
        Ok(plan)
    }

    pub fn template(&self) -> Result<CommandTemplate> {
        match (&self.preset, &self.command) {
            (Some(preset), None) => CommandTemplate::parse(&preset.command()),
            (None, Some(command)) => CommandTemplate::parse(command),
            (Some(_), Some(_)) => bail!("A job plan takes either a preset or a command"),
            (None, None) => bail!("A job plan needs a preset or a command"),
        }
    }

    pub fn tags(&self) -> Result<String> {
        match (&self.tags, &self.preset) {
            (Some(tags), _) => Ok(tags.to_owned()),
            (None, Some(preset)) => Ok(preset.tags().to_string()),
            (None, None) => Err(anyhow!("Tags are required for a custom command")),
        }
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;
    use crate::template::{Placeholder, TemplateParams};

    #[test]
    fn presets_are_valid_templates() {
        for preset in Preset::iter() {
            let template = CommandTemplate::parse(&preset.command()).unwrap();
            assert!(template.placeholders().any(|p| p == Placeholder::FileList));
        }
        let guppy = CommandTemplate::parse(&Preset::Guppy5mCG.command()).unwrap();
        assert!(guppy
            .placeholders()
            .any(|p| p == Placeholder::NumBaseModThreads));
    }

    #[test]
    fn dorado_command() {
        let template = CommandTemplate::parse(&Preset::Dorado5mCG.command()).unwrap();
        assert_eq!(
            template.render(&TemplateParams {
                file_list: "/fsx/pod5-subsets/wgs_subset_128_files_1_0.lst",
                num_base_mod_threads: 48,
            }),
            "dorado basecaller /usr/local/dorado/models/dna_r10.4.1_e8.2_400bps_hac@v3.5.2 \
             /fsx/pod5-subsets/wgs_subset_128_files_1_0.lst/ --verbose --modified-bases 5mCG | \
             samtools view --threads 8 -O BAM -o /fsx/out/&job_id&/calls.bam"
        );
    }

    #[test]
    fn default_plan() {
        let plan = JobPlan::default();
        assert_eq!(plan.tags().unwrap(), "dorado, no modified bases");
        assert_eq!(plan.data_set, "wgs_subset_128_files");
        assert_eq!(plan.compute[0].provisioning_model, ProvisioningModel::Spot);
        assert!(plan.template().is_ok());
    }

    #[test]
    fn parse_plan() {
        let plan: JobPlan = serde_yaml::from_str(
            r#"
preset: guppy-5mcg-5hmcg
compute:
  - instanceType: p3.16xlarge
    provisioningModel: EC2
  - instanceType: p4d.24xlarge
    provisioningModel: SPOT
"#,
        )
        .unwrap();
        assert_eq!(plan.preset, Some(Preset::Guppy5mCG5hmCG));
        assert_eq!(plan.tags().unwrap(), "guppy, modified bases 5mCG & 5hmCG");
        assert_eq!(plan.compute.len(), 2);

        let plan: JobPlan = serde_yaml::from_str(
            r#"
command: "dorado basecaller ${file_list}/ --bad ${threads}"
tags: custom
dataSet: wgs_subset_8_files
compute: []
"#,
        )
        .unwrap();
        assert!(plan.template().is_err());

        let plan: JobPlan =
            serde_yaml::from_str("command: \"nvidia-smi\"\ncompute: []\n").unwrap();
        assert!(plan.tags().is_err());
    }
}

#[macro_use]
extern crate lazy_static;

use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use config::{Config, Environment, File};
use resources::{
    client::{aws::AwsCli, ParameterStore},
    config::BenchConfig,
    models::Parameter,
    registry::Registry,
};

use crate::{
    dataset::{DatasetManifest, DatasetPreparer, POD5_FILES_PREFIX},
    job_definition::JobDefinitionReconciler,
    plan::JobPlan,
    queue::QueueController,
    submission::{JobShares, SubmissionService},
};

mod dataset;
mod job_definition;
mod plan;
mod queue;
mod readiness;
mod submission;
mod template;

lazy_static! {
    pub static ref CONFIG: BenchConfig = Config::builder()
        .add_source(File::with_name("/etc/perfbench/config.yaml").required(false))
        .add_source(Environment::with_prefix("PERFBENCH").separator("__"))
        .build()
        .unwrap_or_default()
        .try_deserialize::<BenchConfig>()
        .with_context(|| "Failed to parse config".to_string())
        .unwrap_or_default();
}

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show whether the dataset is ready for benchmarking.
    Status,
    /// Register the missing job definitions.
    Reconcile,
    /// Deregister all job definitions.
    Deregister,
    /// Submit basecaller jobs.
    Submit(SubmitArg),
    /// Cancel all unfinished jobs.
    Terminate,
    /// Split the POD5 files into per-GPU chunks.
    PrepareDataset(PrepareArg),
}

#[derive(Args)]
struct SubmitArg {
    /// YAML job plan, the built-in plan is used when omitted
    #[clap(short, long, parse(from_os_str), value_name = "FILE")]
    plan: Option<PathBuf>,
}

#[derive(Args)]
struct PrepareArg {
    /// Key prefix of the POD5 files in the data bucket
    #[clap(long, default_value = POD5_FILES_PREFIX)]
    prefix: String,
    /// Also create the chunk directories, linking to the POD5 files in DIR on the
    /// shared filesystem
    #[clap(long, parse(from_os_str), value_name = "DIR")]
    link: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let aws = Arc::new(AwsCli::new(&CONFIG));

    match &cli.command {
        Commands::Status => {
            let readiness = readiness::check(aws.as_ref(), &CONFIG.parameter_prefix).await?;
            println!("Status downloading data set = {}", readiness.download);
            println!(
                "Status converting data from FAST5 to POD5 format = {}",
                readiness.conversion
            );
            if readiness.is_ready() {
                println!("The benchmark environment is ready.");
            } else {
                println!("The benchmark environment is not ready. Please try again later.");
            }
        },
        Commands::Reconcile => {
            let registry = load_registry(&aws).await?;
            reconcile(aws.clone(), &registry).await?;
        },
        Commands::Deregister => {
            let report = JobDefinitionReconciler::new(aws.clone(), CONFIG.basecaller_image())
                .deregister_all()
                .await?;
            println!(
                "Deregistered {} job definitions, {} failed",
                report.deregistered.len(),
                report.failed.len()
            );
        },
        Commands::Submit(arg) => submit(aws, arg).await?,
        Commands::Terminate => {
            let registry = load_registry(&aws).await?;
            let report = QueueController::new(aws.clone())
                .terminate_all(&registry)
                .await;
            println!(
                "Terminated {} jobs, {} failures",
                report.terminated.len(),
                report.failures.len()
            );
            for failure in &report.failures {
                println!(
                    "{: <24} {: <40} {:#}",
                    failure.job_queue,
                    failure.job_id.as_deref().unwrap_or("-"),
                    failure.error
                );
            }
        },
        Commands::PrepareDataset(arg) => {
            let bucket = data_bucket(aws.as_ref()).await?;
            let mut preparer = DatasetPreparer::new(
                aws.clone(),
                bucket,
                CONFIG.chunk_root.to_owned(),
                CONFIG.chunk_counts.to_owned(),
            );
            if let Some(pod5_dir) = &arg.link {
                preparer = preparer.with_links(pod5_dir.to_owned());
            }
            preparer.prepare(&arg.prefix).await?;
            println!("Dataset chunks written");
        },
    }

    Ok(())
}

async fn load_registry(aws: &Arc<AwsCli>) -> Result<Registry> {
    Registry::load(aws.as_ref(), aws.as_ref(), &CONFIG.parameter_prefix).await
}

async fn data_bucket(params: &dyn ParameterStore) -> Result<String> {
    let name = Parameter::DataS3Bucket.path(&CONFIG.parameter_prefix);
    params
        .get_parameter(&name)
        .await
        .with_context(|| format!("Failed to read parameter {}", name))
}

async fn reconcile(aws: Arc<AwsCli>, registry: &Registry) -> Result<()> {
    let report = JobDefinitionReconciler::new(aws, CONFIG.basecaller_image())
        .sync(registry)
        .await?;
    println!(
        "Registered {} job definitions, {} failed",
        report.created.len(),
        report.failed.len()
    );
    for (name, error) in &report.failed {
        println!("{: <24} {:#}", name, error);
    }
    Ok(())
}

async fn submit(aws: Arc<AwsCli>, arg: &SubmitArg) -> Result<()> {
    let plan = match &arg.plan {
        Some(path) => JobPlan::from_file(path)?,
        None => JobPlan::default(),
    };
    let template = plan.template()?;
    let tags = plan.tags()?;

    println!("Checking benchmark environment readiness ...");
    let readiness = readiness::check(aws.as_ref(), &CONFIG.parameter_prefix).await?;
    if !readiness.is_ready() {
        println!("The benchmark environment is not ready. Please try again later.");
        return Ok(());
    }
    println!("The benchmark environment is ready.");

    let registry = load_registry(&aws).await?;
    reconcile(aws.clone(), &registry).await?;

    let bucket = data_bucket(aws.as_ref()).await?;
    let manifest = DatasetManifest::load(aws.as_ref(), &bucket).await?;
    let service = SubmissionService::new(aws.clone(), CONFIG.region.to_owned());

    let mut incomplete = 0;
    for target in &plan.compute {
        let record = registry.get(&target.instance_type).ok_or_else(|| {
            anyhow!(
                "Instance type {} is not in the registry",
                target.instance_type
            )
        })?;
        let shares = JobShares::for_instance(record)?;
        let chunks = manifest.chunks(&plan.data_set, shares.total_gpus)?;
        let submission = service
            .submit_dataset(
                &registry,
                &target.instance_type,
                target.provisioning_model,
                &template,
                chunks,
                &tags,
            )
            .await?;
        println!(
            "{: <16} {: <6} data set {}: {} of {} jobs submitted",
            target.instance_type,
            target.provisioning_model,
            submission.data_set_id,
            submission.job_ids.len(),
            chunks.len()
        );
        if submission.job_ids.len() != chunks.len() {
            incomplete += 1;
        }
    }
    println!("Done. Check the status of the jobs in the AWS Batch console.");

    if incomplete > 0 {
        return Err(anyhow!("{} data sets were only partially submitted", incomplete));
    }
    Ok(())
}

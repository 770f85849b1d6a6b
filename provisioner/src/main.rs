#[macro_use]
extern crate lazy_static;

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use config::{Config, Environment, File};
use resources::{
    client::{aws::AwsCli, ParameterStore},
    config::BenchConfig,
    models::Parameter,
    registry::Registry,
};

use crate::registry::ComputeEnvironmentProvisioner;

mod catalog;
mod launch_template;
mod registry;

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
    /// Print the GPU instance types usable for benchmarking.
    Discover,
    /// Create compute environments and job queues, then publish the instance type map.
    Provision,
    /// Move all compute environments to the latest launch template version.
    UpdateLaunchTemplate(launch_template::Arg),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let aws = Arc::new(AwsCli::new(&CONFIG));

    match &cli.command {
        Commands::Discover => {
            let instance_types =
                catalog::discover(aws.as_ref(), &CONFIG.excluded_instance_types).await?;
            println!("{}", serde_json::to_string_pretty(&instance_types)?);
        },
        Commands::Provision => provision(aws).await?,
        Commands::UpdateLaunchTemplate(arg) => {
            let changed = arg.launch_template_id()?;
            let shared = shared_launch_template(aws.as_ref()).await?;
            let registry =
                Registry::load(aws.as_ref(), aws.as_ref(), &CONFIG.parameter_prefix).await?;
            let report =
                launch_template::propagate(aws.as_ref(), &registry, &shared, changed.as_deref())
                    .await;
            println!(
                "Updated {} compute environments, {} failed",
                report.updated.len(),
                report.failures.len()
            );
            if !report.failures.is_empty() {
                return Err(anyhow!(
                    "Failed to update {} compute environments",
                    report.failures.len()
                ));
            }
        },
    }

    Ok(())
}

async fn provision(aws: Arc<AwsCli>) -> Result<()> {
    let instance_types = catalog::discover(aws.as_ref(), &CONFIG.excluded_instance_types).await?;
    let launch_template = shared_launch_template(aws.as_ref()).await?;
    let provisioner = ComputeEnvironmentProvisioner::new(
        aws.clone(),
        launch_template,
        CONFIG.compute_resources.to_owned(),
    );
    let published = Registry::load(aws.as_ref(), aws.as_ref(), &CONFIG.parameter_prefix).await;
    let published = match published {
        Ok(registry) => Some(registry),
        Err(err) => {
            tracing::info!("No published instance type map: {:#}", err);
            None
        },
    };
    let report = provisioner
        .provision(instance_types, &CONFIG.spot_instance_types, published.as_ref())
        .await;

    println!("{: <16} {: <6} {: <24}", "INSTANCE TYPE", "MODEL", "COMPUTE ENVIRONMENT");
    for environment in report.registry.environments() {
        println!(
            "{: <16} {: <6} {: <24}",
            environment.instance_type, environment.model, environment.name
        );
    }
    for failure in &report.failures {
        println!(
            "{: <16} {: <6} FAILED: {:#}",
            failure.instance_type, failure.model, failure.error
        );
    }

    if report.registry.environments().next().is_none() {
        return Err(anyhow!(
            "No compute environment was provisioned, keeping the published instance type map"
        ));
    }
    let url = report
        .registry
        .publish(aws.as_ref(), aws.as_ref(), &CONFIG.parameter_prefix)
        .await?;
    println!("Instance type map published to {}", url);

    if !report.failures.is_empty() {
        return Err(anyhow!(
            "Failed to provision {} compute environments",
            report.failures.len()
        ));
    }
    Ok(())
}

async fn shared_launch_template(params: &dyn ParameterStore) -> Result<String> {
    let name = Parameter::LaunchTemplate.path(&CONFIG.parameter_prefix);
    params
        .get_parameter(&name)
        .await
        .with_context(|| format!("Failed to read parameter {}", name))
}

#[macro_use]
extern crate lazy_static;

use std::{fs::File as StdFile, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use config::{Config, Environment, File};
use resources::{client::aws::AwsCli, config::BenchConfig};

use crate::{
    consistency::check_consistency,
    loader::Loader,
    pricing::Pricing,
};

mod aggregate;
mod consistency;
mod loader;
mod pricing;
mod report;

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

/// Summarize the basecaller benchmark results.
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// Instance prices, `{"instances": {region: {instance type: {"cost_per_hour": ..}}}}`
    #[clap(short, long, parse(from_os_str), value_name = "FILE")]
    pricing: Option<PathBuf>,
    /// Write the report rows as JSON
    #[clap(short, long, parse(from_os_str), value_name = "FILE")]
    output: Option<PathBuf>,
    /// Directory caching report tables and instance specs
    #[clap(long, parse(from_os_str), value_name = "DIR", default_value = ".")]
    cache_dir: PathBuf,
    /// Region whose prices are shown in the table, defaults to the configured region
    #[clap(long)]
    region: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let aws = AwsCli::new(&CONFIG);
    let loader = Loader::new(&aws, cli.cache_dir.to_owned(), CONFIG.parameter_prefix.to_owned());

    let results = loader.load_results(&aws).await?;
    let specs = loader.load_instance_specs(&aws).await?;
    tracing::info!(
        "Loaded {} results and {} instance types",
        results.len(),
        specs.len()
    );

    let warnings = check_consistency(&results, &specs);
    for warning in &warnings {
        tracing::warn!("Partially failed benchmark run: {}", warning);
    }

    let pricing = match &cli.pricing {
        Some(path) => Pricing::load(path)?,
        None => Pricing::default(),
    };
    let rows = aggregate::latest_runs(aggregate::normalize(&results, &specs));
    let rows = report::build(aggregate::aggregate(&rows), &pricing);

    report::print(&rows, cli.region.as_deref().unwrap_or(&CONFIG.region));
    if !warnings.is_empty() {
        println!();
        println!("{} partially failed runs:", warnings.len());
        for warning in &warnings {
            println!("  {}", warning);
        }
    }

    if let Some(path) = &cli.output {
        let file = StdFile::create(path)
            .with_context(|| format!("Failed to create file {}", path.display()))?;
        serde_json::to_writer_pretty(file, &rows)?;
        tracing::info!("Wrote {} rows to {}", rows.len(), path.display());
    }

    Ok(())
}

use anyhow::{Context, Result};
use resources::{
    client::ParameterStore,
    models::{Parameter, Status},
};

/// Progress of the dataset download and the FAST5 to POD5 conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub download: Status,
    pub conversion: Status,
}

impl Readiness {
    /// Jobs can only be submitted once the POD5 files are in place.
    pub fn is_ready(&self) -> bool {
        self.download == Status::Completed && self.conversion == Status::Completed
    }
}

pub async fn check(params: &dyn ParameterStore, prefix: &str) -> Result<Readiness> {
    let download = read_status(params, Parameter::DownloadStatus.path(prefix)).await?;
    let conversion = read_status(params, Parameter::Pod5ConverterStatus.path(prefix)).await?;
    tracing::info!(
        "Status downloading data set = {}, converting data from FAST5 to POD5 = {}",
        download,
        conversion
    );
    Ok(Readiness {
        download,
        conversion,
    })
}

async fn read_status(params: &dyn ParameterStore, name: String) -> Result<Status> {
    let value = params
        .get_parameter(&name)
        .await
        .with_context(|| format!("Failed to read parameter {}", name))?;
    value
        .trim()
        .parse::<Status>()
        .with_context(|| format!("Parameter {} has unknown status {}", name, value))
}

use std::path::PathBuf;

use anyhow::{anyhow, Context, Error, Result};
use clap::Args;
use resources::{
    client::BatchClient,
    objects::compute_environment::{
        ComputeEnvironmentUpdate, ComputeResourcesUpdate, LaunchTemplateSpecification,
    },
    registry::Registry,
};
use serde::Deserialize;

/// The parts of an EventBridge `CreateLaunchTemplateVersion` API call event we need.
#[derive(Debug, Deserialize)]
pub struct LaunchTemplateEvent {
    detail: EventDetail,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventDetail {
    #[serde(default)]
    request_parameters: RequestParameters,
}

#[derive(Debug, Default, Deserialize)]
struct RequestParameters {
    #[serde(rename = "CreateLaunchTemplateVersionRequest")]
    create_launch_template_version_request: Option<CreateLaunchTemplateVersionRequest>,
}

#[derive(Debug, Deserialize)]
struct CreateLaunchTemplateVersionRequest {
    #[serde(rename = "LaunchTemplateId")]
    launch_template_id: Option<String>,
}

impl LaunchTemplateEvent {
    /// Id of the launch template that got a new version, if the event is about one.
    pub fn launch_template_id(&self) -> Option<&str> {
        self.detail
            .request_parameters
            .create_launch_template_version_request
            .as_ref()
            .and_then(|request| request.launch_template_id.as_deref())
    }
}

#[derive(Args)]
pub struct Arg {
    /// EventBridge event (JSON) announcing the new launch template version
    #[clap(short, long, parse(from_os_str), value_name = "FILE")]
    event: Option<PathBuf>,
    /// Id of the launch template that changed
    #[clap(short, long, value_name = "ID", conflicts_with = "event")]
    launch_template_id: Option<String>,
}

impl Arg {
    pub fn launch_template_id(&self) -> Result<Option<String>> {
        if let Some(id) = &self.launch_template_id {
            return Ok(Some(id.to_owned()));
        }
        let path = self
            .event
            .as_ref()
            .ok_or_else(|| anyhow!("Either an event or a launch template id is required"))?;
        let content = std::fs::read(path)
            .with_context(|| format!("Failed to read event {}", path.display()))?;
        let event: LaunchTemplateEvent = serde_json::from_slice(&content)
            .with_context(|| format!("Failed to parse event {}", path.display()))?;
        Ok(event.launch_template_id().map(str::to_owned))
    }
}

#[derive(Default)]
pub struct UpdateReport {
    pub updated: Vec<String>,
    pub failures: Vec<(String, Error)>,
}

/// Switch every compute environment of the registry to the latest version of the shared
/// launch template. Nothing happens unless `changed` is the shared template.
pub async fn propagate(
    batch: &dyn BatchClient,
    registry: &Registry,
    shared_launch_template: &str,
    changed: Option<&str>,
) -> UpdateReport {
    let mut report = UpdateReport::default();
    if changed != Some(shared_launch_template) {
        tracing::info!(
            "Launch template {} is not used by the compute environments, ignoring",
            changed.unwrap_or("<none>")
        );
        return report;
    }

    for environment in registry.environments() {
        let update = ComputeEnvironmentUpdate {
            compute_environment: environment.name.to_owned(),
            compute_resources: ComputeResourcesUpdate {
                launch_template: LaunchTemplateSpecification {
                    launch_template_id: shared_launch_template.to_owned(),
                    version: "$Latest".to_string(),
                },
            },
        };
        match batch.update_compute_environment(&update).await {
            Ok(()) => {
                tracing::info!("Updated compute environment {}", environment.name);
                report.updated.push(environment.name.to_owned());
            },
            Err(e) => {
                tracing::error!(
                    "Failed to update compute environment {}: {:#}",
                    environment.name,
                    e
                );
                report.failures.push((environment.name.to_owned(), e));
            },
        }
    }
    report
}

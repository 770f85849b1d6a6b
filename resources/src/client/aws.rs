//! Backend for all service traits on top of the AWS command line.
//!
//! Requests with a body are passed through `--cli-input-json`, responses are read
//! with `--output json`. Credentials and retries are left to the CLI.

use std::{collections::HashMap, process::Stdio};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::{io::AsyncWriteExt, process::Command};

use super::{
    BatchClient, InstanceCatalog, InstanceTypePage, ObjectStore, ObjectSummary, ParameterStore,
    ResultStore,
};
use crate::{
    config::BenchConfig,
    models::S3Url,
    objects::{
        compute_environment::{ComputeEnvironmentSpec, ComputeEnvironmentUpdate, JobQueueSpec},
        job::{JobStatus, JobSummary, SubmitJobRequest},
        job_definition::{JobDefinition, JobDefinitionSpec},
        result::ResultRecord,
    },
};

pub struct AwsCli {
    program: String,
    region: String,
    profile: Option<String>,
}

impl AwsCli {
    pub fn new(config: &BenchConfig) -> Self {
        AwsCli {
            program: config.aws.program.to_owned(),
            region: config.region.to_owned(),
            profile: config.aws.profile.to_owned(),
        }
    }

    fn command(&self, service: &str, operation: &str) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("--region")
            .arg(&self.region)
            .arg("--output")
            .arg("json");
        if let Some(profile) = &self.profile {
            command.arg("--profile").arg(profile);
        }
        command.arg(service).arg(operation);
        command
    }

    async fn run(
        &self,
        mut command: Command,
        label: &str,
        stdin: Option<Vec<u8>>,
    ) -> Result<Vec<u8>> {
        command
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to run {}", self.program))?;
        if let Some(body) = stdin {
            let mut pipe = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("No stdin for aws {}", label))?;
            pipe.write_all(&body).await?;
            // Close stdin so the CLI sees the end of the upload
            drop(pipe);
        }
        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("aws {}: {}", label, stderr.trim()));
        }
        tracing::debug!("aws {} succeeded", label);
        Ok(output.stdout)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        service: &str,
        operation: &str,
        args: &[&str],
    ) -> Result<T> {
        let mut command = self.command(service, operation);
        command.args(args);
        let label = format!("{} {}", service, operation);
        let stdout = self.run(command, &label, None).await?;
        parse_json(&stdout).with_context(|| format!("Invalid response of aws {}", label))
    }

    async fn call_with_input<I, T>(&self, service: &str, operation: &str, input: &I) -> Result<T>
    where
        I: Serialize + Sync,
        T: DeserializeOwned,
    {
        let input = serde_json::to_string(input)?;
        self.call(service, operation, &["--cli-input-json", input.as_str()])
            .await
    }
}

fn parse_json<T: DeserializeOwned>(stdout: &[u8]) -> Result<T> {
    let text = String::from_utf8_lossy(stdout);
    // Some operations print nothing at all on success
    let text = if text.trim().is_empty() {
        "{}"
    } else {
        text.trim()
    };
    Ok(serde_json::from_str(text)?)
}

#[async_trait]
impl InstanceCatalog for AwsCli {
    async fn describe_instance_types(
        &self,
        next_token: Option<String>,
    ) -> Result<InstanceTypePage> {
        match next_token {
            Some(token) => {
                let mut command = self.command("ec2", "describe-instance-types");
                let input = serde_json::json!({ "NextToken": token }).to_string();
                command
                    .arg("--no-paginate")
                    .arg("--cli-input-json")
                    .arg(input);
                let stdout = self
                    .run(command, "ec2 describe-instance-types", None)
                    .await?;
                parse_json(&stdout)
            },
            None => {
                self.call("ec2", "describe-instance-types", &["--no-paginate"])
                    .await
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobDefinitionList {
    #[serde(default)]
    job_definitions: Vec<JobDefinition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitJobResponse {
    job_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobSummaryList {
    #[serde(default)]
    job_summary_list: Vec<JobSummary>,
}

#[async_trait]
impl BatchClient for AwsCli {
    async fn create_compute_environment(&self, spec: &ComputeEnvironmentSpec) -> Result<()> {
        self.call_with_input::<_, Value>("batch", "create-compute-environment", spec)
            .await?;
        Ok(())
    }

    async fn update_compute_environment(&self, update: &ComputeEnvironmentUpdate) -> Result<()> {
        self.call_with_input::<_, Value>("batch", "update-compute-environment", update)
            .await?;
        Ok(())
    }

    async fn create_job_queue(&self, spec: &JobQueueSpec) -> Result<()> {
        self.call_with_input::<_, Value>("batch", "create-job-queue", spec)
            .await?;
        Ok(())
    }

    async fn describe_active_job_definitions(&self) -> Result<Vec<JobDefinition>> {
        let list: JobDefinitionList = self
            .call("batch", "describe-job-definitions", &["--status", "ACTIVE"])
            .await?;
        Ok(list.job_definitions)
    }

    async fn register_job_definition(&self, spec: &JobDefinitionSpec) -> Result<JobDefinition> {
        self.call_with_input("batch", "register-job-definition", spec)
            .await
    }

    async fn deregister_job_definition(&self, job_definition_arn: &str) -> Result<()> {
        self.call::<Value>(
            "batch",
            "deregister-job-definition",
            &["--job-definition", job_definition_arn],
        )
        .await?;
        Ok(())
    }

    async fn submit_job(&self, request: &SubmitJobRequest) -> Result<String> {
        let response: SubmitJobResponse =
            self.call_with_input("batch", "submit-job", request).await?;
        Ok(response.job_id)
    }

    async fn list_jobs(&self, job_queue: &str, status: JobStatus) -> Result<Vec<JobSummary>> {
        let status = status.to_string();
        let list: JobSummaryList = self
            .call(
                "batch",
                "list-jobs",
                &["--job-queue", job_queue, "--job-status", status.as_str()],
            )
            .await?;
        Ok(list.job_summary_list)
    }

    async fn terminate_job(&self, job_id: &str, reason: &str) -> Result<()> {
        self.call::<Value>(
            "batch",
            "terminate-job",
            &["--job-id", job_id, "--reason", reason],
        )
        .await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetParameterResponse {
    parameter: ParameterValue,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ParameterValue {
    value: String,
}

#[async_trait]
impl ParameterStore for AwsCli {
    async fn get_parameter(&self, name: &str) -> Result<String> {
        let response: GetParameterResponse =
            self.call("ssm", "get-parameter", &["--name", name]).await?;
        Ok(response.parameter.value)
    }

    async fn put_parameter(&self, name: &str, value: &str) -> Result<()> {
        self.call::<Value>(
            "ssm",
            "put-parameter",
            &[
                "--name",
                name,
                "--value",
                value,
                "--type",
                "String",
                "--overwrite",
            ],
        )
        .await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListObjectsResponse {
    #[serde(default)]
    contents: Vec<ObjectSummary>,
}

#[async_trait]
impl ObjectStore for AwsCli {
    async fn get_object(&self, url: &S3Url) -> Result<Vec<u8>> {
        let mut command = self.command("s3", "cp");
        command.arg(url.to_string()).arg("-");
        self.run(command, &format!("s3 cp {}", url), None).await
    }

    async fn put_object(&self, url: &S3Url, body: Vec<u8>) -> Result<()> {
        let mut command = self.command("s3", "cp");
        command.arg("-").arg(url.to_string());
        self.run(command, &format!("s3 cp - {}", url), Some(body))
            .await?;
        Ok(())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectSummary>> {
        let response: ListObjectsResponse = self
            .call(
                "s3api",
                "list-objects-v2",
                &["--bucket", bucket, "--prefix", prefix],
            )
            .await?;
        Ok(response.contents)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ScanResponse {
    #[serde(default)]
    items: Vec<HashMap<String, Value>>,
}

#[async_trait]
impl ResultStore for AwsCli {
    async fn scan(&self, table: &str) -> Result<Vec<ResultRecord>> {
        let response: ScanResponse = self
            .call("dynamodb", "scan", &["--table-name", table])
            .await?;
        let mut records = Vec::with_capacity(response.items.len());
        for item in response.items {
            let row = item_to_json(item);
            match serde_json::from_value::<ResultRecord>(row) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("Skipping malformed row of table {}: {}", table, e),
            }
        }
        Ok(records)
    }
}

/// Flatten DynamoDB attribute values (`{"S": "..."}`, `{"N": "..."}`, ...) into plain JSON.
fn item_to_json(item: HashMap<String, Value>) -> Value {
    let mut row = Map::new();
    for (name, attribute) in item {
        row.insert(name, attribute_to_json(attribute));
    }
    Value::Object(row)
}

fn attribute_to_json(attribute: Value) -> Value {
    let Value::Object(mut typed) = attribute else {
        return attribute;
    };
    if let Some(value) = typed.remove("S") {
        return value;
    }
    if let Some(Value::String(number)) = typed.remove("N") {
        return number
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::String(number));
    }
    if let Some(value) = typed.remove("BOOL") {
        return value;
    }
    if typed.contains_key("NULL") {
        return Value::Null;
    }
    if let Some(Value::Array(values)) = typed.remove("L") {
        return Value::Array(values.into_iter().map(attribute_to_json).collect());
    }
    if let Some(Value::Object(fields)) = typed.remove("M") {
        return Value::Object(
            fields
                .into_iter()
                .map(|(name, value)| (name, attribute_to_json(value)))
                .collect(),
        );
    }
    Value::Object(typed)
}

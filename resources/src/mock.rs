//! In-memory implementations of the service clients.

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};

use crate::{
    client::{
        BatchClient, InstanceCatalog, InstanceTypeDescriptor, InstanceTypePage, ObjectStore,
        ObjectSummary, ParameterStore, ResultStore,
    },
    models::S3Url,
    objects::{
        compute_environment::{ComputeEnvironmentSpec, ComputeEnvironmentUpdate, JobQueueSpec},
        job::{JobStatus, JobSummary, SubmitJobRequest},
        job_definition::{JobDefinition, JobDefinitionSpec},
        result::ResultRecord,
    },
};

/// Catalog serving fixed pages. The page index doubles as continuation token.
#[derive(Default)]
pub struct MockCatalog {
    pages: Vec<Vec<InstanceTypeDescriptor>>,
    calls: Mutex<Vec<Option<String>>>,
}

impl MockCatalog {
    pub fn new(pages: Vec<Vec<InstanceTypeDescriptor>>) -> Self {
        MockCatalog {
            pages,
            calls: Mutex::new(vec![]),
        }
    }

    /// Tokens of all calls so far.
    pub fn calls(&self) -> Vec<Option<String>> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl InstanceCatalog for MockCatalog {
    async fn describe_instance_types(
        &self,
        next_token: Option<String>,
    ) -> Result<InstanceTypePage> {
        self.calls.lock().push(next_token.clone());
        let index = match next_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| anyhow!("Invalid next token {}", token))?,
            None => 0,
        };
        let instance_types = match self.pages.get(index) {
            Some(page) => page.clone(),
            None if index == 0 => vec![],
            None => return Err(anyhow!("Invalid next token {}", index)),
        };
        let next_token = if index + 1 < self.pages.len() {
            Some((index + 1).to_string())
        } else {
            None
        };
        Ok(InstanceTypePage {
            instance_types,
            next_token,
        })
    }
}

/// Scheduler state, inspectable and adjustable by tests.
#[derive(Default)]
pub struct BatchState {
    pub compute_environments: Vec<ComputeEnvironmentSpec>,
    pub environment_updates: Vec<ComputeEnvironmentUpdate>,
    pub job_queues: Vec<JobQueueSpec>,
    /// Every revision ever registered, active or not.
    pub job_definitions: Vec<JobDefinition>,
    pub registered: Vec<JobDefinitionSpec>,
    pub submitted: Vec<SubmitJobRequest>,
    /// Jobs per queue.
    pub jobs: HashMap<String, Vec<JobSummary>>,
    /// (job id, reason) of every cancellation.
    pub terminated: Vec<(String, String)>,
    /// Calls to `describe_active_job_definitions`.
    pub describe_calls: usize,

    /// Compute environment names whose creation or update fails.
    pub fail_environments: HashSet<String>,
    pub fail_queues: HashSet<String>,
    /// Job definition names whose registration fails.
    pub fail_register: HashSet<String>,
    /// Queues rejecting submissions.
    pub fail_submit: HashSet<String>,
    /// Submissions accepted before every further one is rejected.
    pub submit_limit: Option<usize>,
    /// Queues whose listing fails.
    pub fail_list: HashSet<String>,
    /// Job ids whose cancellation fails.
    pub fail_terminate: HashSet<String>,
    next_job: usize,
}

#[derive(Default)]
pub struct MockBatch {
    state: Mutex<BatchState>,
}

impl MockBatch {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn state(&self) -> MutexGuard<'_, BatchState> {
        self.state.lock()
    }

    /// Put a job into a queue, as if submitted by someone else.
    pub fn add_job(&self, queue: &str, job_id: &str, status: JobStatus) {
        self.state
            .lock()
            .jobs
            .entry(queue.to_owned())
            .or_default()
            .push(JobSummary {
                job_id: job_id.to_owned(),
                job_name: queue.to_owned(),
                status: Some(status),
            });
    }

    /// Register a revision directly, bypassing failure injection.
    pub fn add_job_definition(&self, name: &str) -> JobDefinition {
        let mut state = self.state.lock();
        insert_revision(&mut state, name)
    }

    pub fn active_job_definition_names(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut names: Vec<_> = state
            .job_definitions
            .iter()
            .filter(|definition| definition.status.as_deref() == Some("ACTIVE"))
            .map(|definition| definition.job_definition_name.to_owned())
            .collect();
        names.sort();
        names
    }
}

fn insert_revision(state: &mut BatchState, name: &str) -> JobDefinition {
    let revision = state
        .job_definitions
        .iter()
        .filter(|definition| definition.job_definition_name == name)
        .count() as u32
        + 1;
    let definition = JobDefinition {
        job_definition_name: name.to_owned(),
        job_definition_arn: format!(
            "arn:aws:batch:us-west-2:123456789012:job-definition/{}:{}",
            name, revision
        ),
        revision,
        status: Some("ACTIVE".to_string()),
    };
    state.job_definitions.push(definition.clone());
    definition
}

#[async_trait]
impl BatchClient for MockBatch {
    async fn create_compute_environment(&self, spec: &ComputeEnvironmentSpec) -> Result<()> {
        let mut state = self.state.lock();
        let name = &spec.compute_environment_name;
        if state.fail_environments.contains(name) {
            return Err(anyhow!("Failed to create compute environment {}", name));
        }
        if state
            .compute_environments
            .iter()
            .any(|existing| &existing.compute_environment_name == name)
        {
            return Err(anyhow!("Object already exists: {}", name));
        }
        state.compute_environments.push(spec.clone());
        Ok(())
    }

    async fn update_compute_environment(&self, update: &ComputeEnvironmentUpdate) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_environments.contains(&update.compute_environment) {
            return Err(anyhow!(
                "Failed to update compute environment {}",
                update.compute_environment
            ));
        }
        state.environment_updates.push(update.clone());
        Ok(())
    }

    async fn create_job_queue(&self, spec: &JobQueueSpec) -> Result<()> {
        let mut state = self.state.lock();
        let name = &spec.job_queue_name;
        if state.fail_queues.contains(name) {
            return Err(anyhow!("Failed to create job queue {}", name));
        }
        if state
            .job_queues
            .iter()
            .any(|existing| &existing.job_queue_name == name)
        {
            return Err(anyhow!("Object already exists: {}", name));
        }
        state.job_queues.push(spec.clone());
        Ok(())
    }

    async fn describe_active_job_definitions(&self) -> Result<Vec<JobDefinition>> {
        let mut state = self.state.lock();
        state.describe_calls += 1;
        Ok(state
            .job_definitions
            .iter()
            .filter(|definition| definition.status.as_deref() == Some("ACTIVE"))
            .cloned()
            .collect())
    }

    async fn register_job_definition(&self, spec: &JobDefinitionSpec) -> Result<JobDefinition> {
        let mut state = self.state.lock();
        let name = &spec.job_definition_name;
        if state.fail_register.contains(name) {
            return Err(anyhow!("Failed to register job definition {}", name));
        }
        state.registered.push(spec.clone());
        Ok(insert_revision(&mut state, name))
    }

    async fn deregister_job_definition(&self, job_definition_arn: &str) -> Result<()> {
        let mut state = self.state.lock();
        let definition = state
            .job_definitions
            .iter_mut()
            .find(|definition| definition.job_definition_arn == job_definition_arn)
            .ok_or_else(|| anyhow!("Job definition {} not found", job_definition_arn))?;
        definition.status = Some("INACTIVE".to_string());
        Ok(())
    }

    async fn submit_job(&self, request: &SubmitJobRequest) -> Result<String> {
        let mut state = self.state.lock();
        if state.fail_submit.contains(&request.job_queue) {
            return Err(anyhow!("Job queue {} rejected the job", request.job_queue));
        }
        if let Some(limit) = state.submit_limit {
            if state.submitted.len() >= limit {
                return Err(anyhow!("Too many requests"));
            }
        }
        state.next_job += 1;
        let job_id = format!("job-{}", state.next_job);
        state.submitted.push(request.clone());
        state
            .jobs
            .entry(request.job_queue.to_owned())
            .or_default()
            .push(JobSummary {
                job_id: job_id.to_owned(),
                job_name: request.job_name.to_owned(),
                status: Some(JobStatus::Submitted),
            });
        Ok(job_id)
    }

    async fn list_jobs(&self, job_queue: &str, status: JobStatus) -> Result<Vec<JobSummary>> {
        let state = self.state.lock();
        if state.fail_list.contains(job_queue) {
            return Err(anyhow!("Failed to list jobs of {}", job_queue));
        }
        Ok(state
            .jobs
            .get(job_queue)
            .map(|jobs| {
                jobs.iter()
                    .filter(|job| job.status == Some(status))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn terminate_job(&self, job_id: &str, reason: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_terminate.contains(job_id) {
            return Err(anyhow!("Failed to terminate job {}", job_id));
        }
        let job = state
            .jobs
            .values_mut()
            .flat_map(|jobs| jobs.iter_mut())
            .find(|job| job.job_id == job_id)
            .ok_or_else(|| anyhow!("Job {} not found", job_id))?;
        job.status = Some(JobStatus::Failed);
        state
            .terminated
            .push((job_id.to_owned(), reason.to_owned()));
        Ok(())
    }
}

#[derive(Default)]
pub struct MockParameterStore {
    parameters: Mutex<HashMap<String, String>>,
}

impl MockParameterStore {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with<K: Into<String>, V: Into<String>>(self, name: K, value: V) -> Self {
        self.parameters.lock().insert(name.into(), value.into());
        self
    }

    pub fn value(&self, name: &str) -> Option<String> {
        self.parameters.lock().get(name).cloned()
    }
}

#[async_trait]
impl ParameterStore for MockParameterStore {
    async fn get_parameter(&self, name: &str) -> Result<String> {
        self.value(name)
            .ok_or_else(|| anyhow!("ParameterNotFound: {}", name))
    }

    async fn put_parameter(&self, name: &str, value: &str) -> Result<()> {
        self.parameters
            .lock()
            .insert(name.to_owned(), value.to_owned());
        Ok(())
    }
}

#[derive(Default)]
pub struct MockObjectStore {
    objects: Mutex<BTreeMap<(String, String), Vec<u8>>>,
}

impl MockObjectStore {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn insert(&self, url: &S3Url, body: impl Into<Vec<u8>>) {
        self.objects
            .lock()
            .insert((url.bucket.to_owned(), url.key.to_owned()), body.into());
    }

    pub fn object(&self, url: &S3Url) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .get(&(url.bucket.to_owned(), url.key.to_owned()))
            .cloned()
    }

    /// Keys of all objects in the bucket, sorted.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .lock()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, key)| key.to_owned())
            .collect()
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    async fn get_object(&self, url: &S3Url) -> Result<Vec<u8>> {
        self.object(url)
            .ok_or_else(|| anyhow!("NoSuchKey: {}", url))
    }

    async fn put_object(&self, url: &S3Url, body: Vec<u8>) -> Result<()> {
        self.insert(url, body);
        Ok(())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectSummary>> {
        Ok(self
            .objects
            .lock()
            .iter()
            .filter(|((b, key), _)| b == bucket && key.starts_with(prefix))
            .map(|((_, key), body)| ObjectSummary {
                key: key.to_owned(),
                size: body.len() as u64,
            })
            .collect())
    }
}

#[derive(Default)]
pub struct MockResultStore {
    tables: Mutex<HashMap<String, Vec<ResultRecord>>>,
}

impl MockResultStore {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_table(self, table: &str, records: Vec<ResultRecord>) -> Self {
        self.tables.lock().insert(table.to_owned(), records);
        self
    }
}

#[async_trait]
impl ResultStore for MockResultStore {
    async fn scan(&self, table: &str) -> Result<Vec<ResultRecord>> {
        self.tables
            .lock()
            .get(table)
            .cloned()
            .ok_or_else(|| anyhow!("ResourceNotFoundException: table {}", table))
    }
}

use std::sync::Arc;

use anyhow::Error;
use resources::{client::BatchClient, objects::job::JobStatus, registry::Registry};

pub const TERMINATION_REASON: &str = "Cancelled by basecaller perf-bench";

pub struct TerminationFailure {
    pub job_queue: String,
    /// Missing when listing the queue failed.
    pub job_id: Option<String>,
    pub error: Error,
}

#[derive(Default)]
pub struct TerminationReport {
    pub terminated: Vec<String>,
    pub failures: Vec<TerminationFailure>,
}

pub struct QueueController {
    batch: Arc<dyn BatchClient>,
}

impl QueueController {
    pub fn new(batch: Arc<dyn BatchClient>) -> Self {
        Self { batch }
    }

    /// Cancel every job that has not finished yet in the queues of all compute environments.
    pub async fn terminate_all(&self, registry: &Registry) -> TerminationReport {
        let mut report = TerminationReport::default();
        for environment in registry.environments() {
            let job_queue = environment.name;
            for status in JobStatus::active() {
                let jobs = match self.batch.list_jobs(job_queue, status).await {
                    Ok(jobs) => jobs,
                    Err(error) => {
                        tracing::error!(
                            "Failed to list {} jobs of {}: {:#}",
                            status,
                            job_queue,
                            error
                        );
                        report.failures.push(TerminationFailure {
                            job_queue: job_queue.to_owned(),
                            job_id: None,
                            error,
                        });
                        continue;
                    },
                };
                for job in jobs {
                    tracing::info!("Terminating job {} in {}", job.job_id, job_queue);
                    match self
                        .batch
                        .terminate_job(&job.job_id, TERMINATION_REASON)
                        .await
                    {
                        Ok(()) => report.terminated.push(job.job_id),
                        Err(error) => {
                            tracing::error!("Failed to terminate job {}: {:#}", job.job_id, error);
                            report.failures.push(TerminationFailure {
                                job_queue: job_queue.to_owned(),
                                job_id: Some(job.job_id),
                                error,
                            });
                        },
                    }
                }
            }
        }
        report
    }
}

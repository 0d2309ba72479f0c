//! Follows asynchronous controller jobs until they reach a terminal state.

use http::Method;
use serde::Deserialize;
use shared::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::cancel::{run_or_cancel, sleep_or_cancel};
use crate::errors::{RelayError, Result};
use crate::metrics_defs::JOB_POLLS;
use crate::transport::{OutboundRequest, Transport, UploadOutcome, split_credentials};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Finished,
    Failed,
}

impl JobStatus {
    /// Anything the controller reports other than `finished` or `failed`
    /// (`queued`, `running`, or a status this relay has never seen) means the
    /// job is still going.
    pub fn parse(status: &str) -> Self {
        match status {
            "finished" => JobStatus::Finished,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Running,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

#[derive(Deserialize)]
struct JobDocument {
    metadata: JobMetadata,
    entity: JobEntity,
}

#[derive(Deserialize)]
struct JobMetadata {
    guid: String,
    url: String,
}

#[derive(Deserialize)]
struct JobEntity {
    status: String,
}

/// A controller job, as described in an upload or job-status response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReference {
    pub guid: String,
    /// Absolute status URL, carrying the credentials of the upload target.
    pub url: Url,
    pub status: JobStatus,
}

impl JobReference {
    /// Extracts the job from a controller response body. Relative job URLs
    /// are resolved against `base`. Returns `None` when the body does not
    /// describe a job.
    pub fn from_body(body: &[u8], base: &Url) -> Option<Self> {
        let document: JobDocument = serde_json::from_slice(body).ok()?;
        let url = base.join(&document.metadata.url).ok()?;
        Some(Self {
            guid: document.metadata.guid,
            url,
            status: JobStatus::parse(&document.entity.status),
        })
    }

    pub fn from_outcome(outcome: &UploadOutcome, base: &Url) -> Option<Self> {
        Self::from_body(outcome.body(), base)
    }
}

/// Polls job status URLs at a fixed interval.
pub struct Poller {
    transport: Arc<dyn Transport>,
    interval: Duration,
}

impl Poller {
    pub fn new(transport: Arc<dyn Transport>, interval: Duration) -> Self {
        Self {
            transport,
            interval,
        }
    }

    /// Follows the job referenced by the controller's answer to an upload
    /// to `target`, if there is one.
    pub async fn poll(
        &self,
        target: &Url,
        initial: &UploadOutcome,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let job = JobReference::from_outcome(initial, target);
        if let Some(job) = &job {
            tracing::debug!(job = %job.guid, status = ?job.status, "upload accepted as job");
        }
        self.wait_for_completion(job, cancel).await
    }

    /// Waits until `job` finishes.
    ///
    /// A job that is already terminal is settled without any request. Each
    /// poll waits one interval first. A poll that fails or returns something
    /// unreadable is logged and the next poll goes ahead as scheduled; only a
    /// `failed` job or cancellation ends the wait with an error.
    pub async fn wait_for_completion(
        &self,
        job: Option<JobReference>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let Some(mut job) = job else {
            return Ok(());
        };

        loop {
            match job.status {
                JobStatus::Finished => return Ok(()),
                JobStatus::Failed => return Err(RelayError::JobFailed(job.guid)),
                JobStatus::Running => {}
            }

            sleep_or_cancel(cancel, self.interval).await?;

            counter!(JOB_POLLS).increment(1);
            let request = OutboundRequest::new(Method::GET, &job.url);
            let outcome = match run_or_cancel(cancel, self.transport.send(request)).await? {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(job = %job.guid, error = %e, "polling job failed, will retry");
                    continue;
                }
            };

            if !outcome.status().is_success() {
                tracing::warn!(
                    job = %job.guid,
                    status = outcome.status().as_u16(),
                    "unexpected status while polling job, will retry"
                );
                continue;
            }

            match JobReference::from_body(outcome.body(), &job.url) {
                Some(update) => {
                    tracing::debug!(job = %update.guid, status = ?update.status, "polled job");
                    job = update;
                }
                None => {
                    let (url, _) = split_credentials(&job.url);
                    tracing::warn!(job = %job.guid, %url, "unreadable job status, will retry");
                }
            }
        }
    }
}

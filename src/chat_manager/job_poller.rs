use std::future::Future;
use std::time::Duration;

use serde_json::Value;

use crate::abort_manager::AbortSignal;
use crate::error::{GenerationError, GenerationErrorKind};
use crate::utils::{log_info, log_warn};

pub const POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const MAX_POLL_ATTEMPTS: u32 = 60;

#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Pending,
    Done(String),
    Faulted,
    /// No worker can serve the request.
    Impossible,
}

pub fn classify_job_status(status: &Value) -> JobState {
    if status.get("faulted").and_then(|v| v.as_bool()) == Some(true) {
        return JobState::Faulted;
    }
    if status.get("is_possible").and_then(|v| v.as_bool()) == Some(false) {
        return JobState::Impossible;
    }
    if status.get("done").and_then(|v| v.as_bool()) == Some(true) {
        let text = status
            .get("generations")
            .and_then(|g| g.as_array())
            .and_then(|g| g.first())
            .and_then(|g| g.get("text"))
            .and_then(|t| t.as_str());
        if let Some(text) = text {
            return JobState::Done(text.to_string());
        }
    }
    JobState::Pending
}

/// Fixed-interval poller for async jobs. Sleeps before every status check.
#[derive(Debug, Clone, Copy)]
pub struct JobPoller {
    interval: Duration,
    max_attempts: u32,
}

impl Default for JobPoller {
    fn default() -> Self {
        Self {
            interval: POLL_INTERVAL,
            max_attempts: MAX_POLL_ATTEMPTS,
        }
    }
}

impl JobPoller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interval(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// `fetch` returns `Ok(None)` for a non-success status response, which
    /// counts as an attempt and keeps polling.
    pub async fn poll<F, Fut>(
        &self,
        job_id: &str,
        mut fetch: F,
        mut abort: Option<AbortSignal>,
    ) -> Result<String, GenerationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<Value>, GenerationError>>,
    {
        let cancelled = |abort: &mut Option<AbortSignal>| {
            abort.as_mut().map(|a| a.is_aborted()).unwrap_or(false)
        };

        for attempt in 1..=self.max_attempts {
            tokio::time::sleep(self.interval).await;
            if cancelled(&mut abort) {
                log_info("job_poller", format!("job {} cancelled", job_id));
                return Err(GenerationError::new(
                    GenerationErrorKind::Cancelled,
                    "Generation was cancelled",
                ));
            }

            let status = match fetch().await? {
                Some(status) => status,
                None => {
                    log_warn(
                        "job_poller",
                        format!("job {} status check {} failed", job_id, attempt),
                    );
                    continue;
                }
            };

            match classify_job_status(&status) {
                JobState::Done(text) => {
                    log_info("job_poller", format!("job {} done after {} polls", job_id, attempt));
                    return Ok(text);
                }
                JobState::Faulted => {
                    return Err(GenerationError::new(
                        GenerationErrorKind::Failed,
                        "Horde generation faulted",
                    ))
                }
                JobState::Impossible => {
                    return Err(GenerationError::new(
                        GenerationErrorKind::Failed,
                        "No Horde worker can serve this request",
                    ))
                }
                JobState::Pending => {}
            }
        }

        Err(GenerationError::new(
            GenerationErrorKind::Timeout,
            format!("Horde job {} timed out after {} polls", job_id, self.max_attempts),
        ))
    }
}

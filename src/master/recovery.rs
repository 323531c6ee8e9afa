//! Startup recovery of jobs that were running when the master went down.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::{JoinHandle, JoinSet};

use crate::actor::recovery::with_recovery_async;
use crate::db::{Database, JobConfig, JobRecord, JobSpec};
use crate::types::{JobId, Result};

/// External collaborator that brings a persisted job back to life.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobResumer: Send + Sync + 'static {
    async fn resume(&self, job: JobId, spec: JobSpec) -> Result<()>;
}

/// Resumer that accepts every job and does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopResumer;

#[async_trait]
impl JobResumer for NoopResumer {
    async fn resume(&self, job: JobId, _spec: JobSpec) -> Result<()> {
        tracing::debug!(job = %job, "job_resume_skipped");
        Ok(())
    }
}

/// Per-job result of a restore attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    Resumed,
    /// Could not be restored and was moved to the error state.
    Errored,
}

/// What happened to each job at boot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    pub resumed: Vec<JobId>,
    pub errored: Vec<JobId>,
}

/// List non-terminal jobs and resume each one concurrently.
///
/// Returns once the listing is done; the attempts keep running behind the
/// returned handle. A failed job is marked errored on its own and never stops
/// the others.
pub async fn restore_jobs(
    db: Arc<dyn Database>,
    resumer: Arc<dyn JobResumer>,
) -> Result<JoinHandle<RestoreSummary>> {
    let jobs = db.non_terminal_jobs().await?;
    tracing::info!(count = jobs.len(), "restoring_jobs");

    let mut attempts = JoinSet::new();
    for job in jobs {
        let db = db.clone();
        let resumer = resumer.clone();
        attempts.spawn(async move {
            let id = job.id;
            (id, restore_job(db.as_ref(), resumer.as_ref(), job).await)
        });
    }

    Ok(tokio::spawn(async move {
        let mut summary = RestoreSummary::default();
        while let Some(joined) = attempts.join_next().await {
            match joined {
                Ok((id, RestoreOutcome::Resumed)) => summary.resumed.push(id),
                Ok((id, RestoreOutcome::Errored)) => summary.errored.push(id),
                Err(err) => tracing::error!(error = %err, "job_restore_task_failed"),
            }
        }
        summary.resumed.sort();
        summary.errored.sort();
        tracing::info!(
            resumed = summary.resumed.len(),
            errored = summary.errored.len(),
            "jobs_restored"
        );
        summary
    }))
}

async fn restore_job(db: &dyn Database, resumer: &dyn JobResumer, job: JobRecord) -> RestoreOutcome {
    let failure = match job.config {
        JobConfig::Invalid { reason } => reason,
        JobConfig::Valid(spec) => {
            let resume = async { resumer.resume(job.id, spec).await };
            match with_recovery_async(resume, "resume_job").await {
                Ok(()) => {
                    tracing::info!(job = %job.id, "job_resumed");
                    return RestoreOutcome::Resumed;
                }
                Err(err) => err.to_string(),
            }
        }
    };

    tracing::warn!(job = %job.id, reason = %failure, "job_restore_failed");
    if let Err(err) = db.terminate_job_in_restart(job.id).await {
        tracing::error!(job = %job.id, error = %err, "job_terminate_in_restart_failed");
    }
    RestoreOutcome::Errored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{InMemoryDatabase, JobState};
    use crate::types::{ClusterId, Error};
    use pretty_assertions::assert_eq;

    async fn seeded(n: i32, invalid: i32) -> Arc<InMemoryDatabase> {
        let db = Arc::new(InMemoryDatabase::new(
            ClusterId::from_string("c".to_string()).unwrap(),
        ));
        for id in 1..=n {
            let raw = if id == invalid {
                "{}".to_string()
            } else {
                format!(r#"{{"name": "job-{}"}}"#, id)
            };
            db.insert_job(JobId(id), JobState::Active, &raw).await;
        }
        db
    }

    #[tokio::test]
    async fn test_invalid_config_errors_only_that_job() {
        let db = seeded(5, 3).await;
        let mut resumer = MockJobResumer::new();
        resumer
            .expect_resume()
            .times(4)
            .returning(|_, _| Ok(()));

        let summary = restore_jobs(db.clone(), Arc::new(resumer))
            .await
            .unwrap()
            .await
            .unwrap();

        assert_eq!(summary.errored, vec![JobId(3)]);
        assert_eq!(summary.resumed, vec![JobId(1), JobId(2), JobId(4), JobId(5)]);
        assert_eq!(db.job(JobId(3)).await.unwrap().state, JobState::Error);
        assert_eq!(db.job(JobId(1)).await.unwrap().state, JobState::Active);
    }

    struct FlakyResumer;

    #[async_trait]
    impl JobResumer for FlakyResumer {
        async fn resume(&self, job: JobId, _spec: JobSpec) -> Result<()> {
            match job.0 {
                1 => Err(Error::internal("checkpoint missing")),
                2 => panic!("resumer bug"),
                _ => Ok(()),
            }
        }
    }

    #[tokio::test]
    async fn test_failed_and_panicking_resumes_are_contained() {
        let db = seeded(3, 0).await;

        let summary = restore_jobs(db.clone(), Arc::new(FlakyResumer))
            .await
            .unwrap()
            .await
            .unwrap();

        assert_eq!(summary.errored, vec![JobId(1), JobId(2)]);
        assert_eq!(summary.resumed, vec![JobId(3)]);
        assert_eq!(db.job(JobId(2)).await.unwrap().state, JobState::Error);
    }

    #[tokio::test]
    async fn test_terminal_jobs_are_not_touched() {
        let db = seeded(0, 0).await;
        db.insert_job(JobId(9), JobState::Completed, "{}").await;
        let summary = restore_jobs(db.clone(), Arc::new(NoopResumer))
            .await
            .unwrap()
            .await
            .unwrap();
        assert_eq!(summary, RestoreSummary::default());
        assert_eq!(db.job(JobId(9)).await.unwrap().state, JobState::Completed);
    }
}

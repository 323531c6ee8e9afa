use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Database, DbError, DbResult, JobConfig, JobRecord, JobState, TrialLog};
use crate::types::{ClusterId, JobId};

/// Process-local storage backend.
#[derive(Debug)]
pub struct InMemoryDatabase {
    cluster_id: ClusterId,
    jobs: RwLock<BTreeMap<JobId, JobRecord>>,
    trial_logs: RwLock<Vec<TrialLog>>,
}

impl InMemoryDatabase {
    pub fn new(cluster_id: ClusterId) -> Self {
        Self {
            cluster_id,
            jobs: RwLock::new(BTreeMap::new()),
            trial_logs: RwLock::new(Vec::new()),
        }
    }

    /// Store a job; the raw configuration is classified once here.
    pub async fn insert_job(&self, id: JobId, state: JobState, raw_config: &str) {
        let record = JobRecord {
            id,
            state,
            config: JobConfig::parse(raw_config),
        };
        self.jobs.write().await.insert(id, record);
    }

    pub async fn job(&self, id: JobId) -> Option<JobRecord> {
        self.jobs.read().await.get(&id).cloned()
    }

    pub async fn trial_logs(&self) -> Vec<TrialLog> {
        self.trial_logs.read().await.clone()
    }
}

#[async_trait]
impl Database for InMemoryDatabase {
    async fn cluster_id(&self) -> DbResult<ClusterId> {
        Ok(self.cluster_id.clone())
    }

    async fn non_terminal_jobs(&self) -> DbResult<Vec<JobRecord>> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| !job.state.is_terminal())
            .cloned()
            .collect())
    }

    async fn terminate_job_in_restart(&self, job: JobId) -> DbResult<()> {
        let mut jobs = self.jobs.write().await;
        let record = jobs
            .get_mut(&job)
            .ok_or_else(|| DbError::NotFound(format!("job {}", job)))?;
        record.state = JobState::Error;
        Ok(())
    }

    async fn add_trial_logs(&self, logs: Vec<TrialLog>) -> DbResult<()> {
        let mut stored = self.trial_logs.write().await;
        for mut log in logs {
            log.id = Some(stored.len() as i64 + 1);
            stored.push(log);
        }
        Ok(())
    }
}

//! Durable storage seen through the handful of operations the master needs.

mod memory;

pub use memory::InMemoryDatabase;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::{ClusterId, Error, JobId};

/// Storage-layer failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("database error: {0}")]
    Backend(String),
}

impl From<DbError> for Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => Error::not_found(what),
            DbError::Backend(msg) => Error::internal(msg),
        }
    }
}

pub type DbResult<T> = std::result::Result<T, DbError>;

/// Lifecycle state of a persisted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Active,
    Paused,
    StoppingCanceled,
    StoppingCompleted,
    StoppingError,
    Canceled,
    Completed,
    Error,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Canceled | JobState::Completed | JobState::Error)
    }
}

/// Structurally valid job configuration. Contents are opaque to the master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobSpec(Map<String, Value>);

impl JobSpec {
    pub fn name(&self) -> Option<&str> {
        self.0.get("name").and_then(Value::as_str)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// Persisted configuration, classified once when it is read.
#[derive(Debug, Clone, PartialEq)]
pub enum JobConfig {
    Valid(JobSpec),
    Invalid { reason: String },
}

impl JobConfig {
    /// Classify raw persisted JSON: unparseable, non-object, or empty
    /// configurations are invalid.
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) if !map.is_empty() => JobConfig::Valid(JobSpec(map)),
            Ok(Value::Object(_)) => JobConfig::Invalid {
                reason: "configuration is empty".to_string(),
            },
            Ok(other) => JobConfig::Invalid {
                reason: format!("configuration must be an object, got {}", type_name(&other)),
            },
            Err(e) => JobConfig::Invalid {
                reason: format!("configuration does not parse: {}", e),
            },
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A job as read back at boot.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub id: JobId,
    pub state: JobState,
    pub config: JobConfig,
}

/// One trial log line as ingested from workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialLog {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default)]
    pub trial_id: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// Storage operations used by the master.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Database: Send + Sync + 'static {
    /// Identity of the cluster this database belongs to.
    async fn cluster_id(&self) -> DbResult<ClusterId>;

    /// Every job not yet in a terminal state.
    async fn non_terminal_jobs(&self) -> DbResult<Vec<JobRecord>>;

    /// Move a job that cannot be restored into the error state.
    async fn terminate_job_in_restart(&self, job: JobId) -> DbResult<()>;

    async fn add_trial_logs(&self, logs: Vec<TrialLog>) -> DbResult<()>;
}

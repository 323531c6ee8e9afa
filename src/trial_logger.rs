//! Batching writer for trial logs.
//!
//! Workers post log lines far faster than storage wants single-row inserts, so
//! lines are buffered here and written in batches: when the buffer reaches the
//! configured size, on a periodic tick, and once more on shutdown.

use std::sync::Arc;

use async_trait::async_trait;

use crate::actor::{Actor, Context};
use crate::db::{Database, TrialLog};
use crate::types::{Result, TrialLoggerConfig};

/// Name of the trial logger under the root.
pub const TRIAL_LOGGER_NAME: &str = "trialLogger";

#[derive(Debug)]
pub enum TrialLoggerMessage {
    Log(TrialLog),
    Flush,
}

pub struct TrialLogger {
    db: Arc<dyn Database>,
    config: TrialLoggerConfig,
    pending: Vec<TrialLog>,
}

impl std::fmt::Debug for TrialLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrialLogger")
            .field("config", &self.config)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl TrialLogger {
    pub fn new(db: Arc<dyn Database>, config: TrialLoggerConfig) -> Self {
        Self {
            db,
            config,
            pending: Vec::new(),
        }
    }

    async fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.pending);
        let count = batch.len();
        if let Err(err) = self.db.add_trial_logs(batch).await {
            tracing::warn!(count, error = %err, "trial_log_flush_failed");
        } else {
            tracing::trace!(count, "trial_logs_flushed");
        }
    }
}

#[async_trait]
impl Actor for TrialLogger {
    type Message = TrialLoggerMessage;

    async fn pre_start(&mut self, ctx: &mut Context<Self>) -> Result<()> {
        let myself = ctx.myself().clone();
        let period = self.config.flush_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !myself.tell(TrialLoggerMessage::Flush) {
                            break;
                        }
                    }
                    _ = myself.await_termination() => break,
                }
            }
        });
        Ok(())
    }

    async fn handle(&mut self, _ctx: &mut Context<Self>, message: TrialLoggerMessage) {
        match message {
            TrialLoggerMessage::Log(log) => {
                self.pending.push(log);
                if self.pending.len() >= self.config.batch_size {
                    self.flush().await;
                }
            }
            TrialLoggerMessage::Flush => self.flush().await,
        }
    }

    async fn post_stop(&mut self, _ctx: &mut Context<Self>) {
        self.flush().await;
    }
}

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::db::TrialLog;
use crate::master::Master;

/// POST /trial_logs
///
/// Records without a trial are dropped; the rest are handed to the trial
/// logger without waiting for storage.
pub async fn post_trial_logs(
    State(master): State<Arc<Master>>,
    Json(logs): Json<Vec<TrialLog>>,
) -> &'static str {
    let received = logs.len();
    let forwarded = master.post_trial_logs(logs);
    tracing::trace!(received, forwarded, "trial_logs_received");
    ""
}

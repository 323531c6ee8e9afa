use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;

use crate::logs::{LogEntry, LogWindow};
use crate::master::Master;

/// GET /logs?greater_than_id=&less_than_id=&tail=
///
/// Always a JSON array, `[]` when nothing matches.
pub async fn master_logs(
    State(master): State<Arc<Master>>,
    Query(window): Query<LogWindow>,
) -> Json<Vec<LogEntry>> {
    Json(master.master_logs(window))
}

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::master::{ClusterInfo, Master};
use crate::types::Result;

/// GET /info
pub async fn info(State(master): State<Arc<Master>>) -> Result<Json<ClusterInfo>> {
    Ok(Json(master.info()?))
}

/// GET /config, with credentials redacted.
pub async fn config(State(master): State<Arc<Master>>) -> Result<Json<serde_json::Value>> {
    Ok(Json(master.config().printable()?))
}

/// GET /health
pub async fn health() -> &'static str {
    "OK"
}

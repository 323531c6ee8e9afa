//! Trials service handler: trial log ingestion.

use serde_json::Value;

use crate::db::TrialLog;
use crate::master::Master;
use crate::rpc::router::unknown_method;
use crate::types::{Error, Result};

pub async fn handle(master: &Master, method: &str, body: Value) -> Result<Value> {
    match method {
        "PostLogs" => {
            let logs = body
                .get("logs")
                .cloned()
                .ok_or_else(|| Error::bad_request("missing required field: logs"))?;
            let logs: Vec<TrialLog> = serde_json::from_value(logs)
                .map_err(|e| Error::bad_request(format!("invalid logs: {}", e)))?;
            let forwarded = master.post_trial_logs(logs);
            Ok(serde_json::json!({ "forwarded": forwarded }))
        }

        _ => Err(unknown_method("trials", method)),
    }
}

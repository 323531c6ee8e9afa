//! Master service handler: cluster info and master log retrieval.

use serde_json::Value;

use crate::logs::LogWindow;
use crate::master::Master;
use crate::rpc::router::{parse_body, unknown_method};
use crate::types::Result;

pub async fn handle(master: &Master, method: &str, body: Value) -> Result<Value> {
    match method {
        "GetInfo" => Ok(serde_json::to_value(master.info()?)?),

        "GetLogs" => {
            let window: LogWindow = parse_body(body)?;
            Ok(serde_json::to_value(master.master_logs(window))?)
        }

        _ => Err(unknown_method("master", method)),
    }
}

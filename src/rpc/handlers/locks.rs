//! Locks service handler: lock introspection and eviction.

use serde_json::Value;

use crate::master::Master;
use crate::rpc::router::{str_field, unknown_method};
use crate::types::{Error, Result};

pub async fn handle(master: &Master, method: &str, body: Value) -> Result<Value> {
    match method {
        "GetResourceState" => {
            let resource = str_field(&body, "resource")?;
            let snapshot = master
                .lock_state(&resource)
                .await?
                .ok_or_else(|| Error::not_found(format!("no lock state for {}", resource)))?;
            Ok(serde_json::to_value(snapshot)?)
        }

        "EvictResource" => {
            let resource = str_field(&body, "resource")?;
            let evicted = master.evict_lock(&resource).await?;
            Ok(serde_json::json!({ "evicted": evicted }))
        }

        _ => Err(unknown_method("locks", method)),
    }
}

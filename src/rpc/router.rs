//! Top-level RPC router: routes by service, delegates to handlers.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::master::Master;
use crate::rpc::handlers;
use crate::types::{Error, Result};

/// Route an RPC request to the appropriate service handler.
pub async fn route_request(master: &Master, service: &str, method: &str, body: Value) -> Result<Value> {
    match service {
        "master" => handlers::master::handle(master, method, body).await,
        "trials" => handlers::trials::handle(master, method, body).await,
        "locks" => handlers::locks::handle(master, method, body).await,
        _ => Err(Error::not_found(format!("unknown service: {}", service))),
    }
}

// =============================================================================
// Shared helpers used by the handler modules
// =============================================================================

pub fn str_field(body: &Value, key: &str) -> Result<String> {
    body.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| Error::bad_request(format!("missing required field: {}", key)))
}

/// Decode the whole body into `T`.
pub fn parse_body<T: DeserializeOwned>(body: Value) -> Result<T> {
    serde_json::from_value(body).map_err(|e| Error::bad_request(format!("invalid body: {}", e)))
}

pub fn unknown_method(service: &str, method: &str) -> Error {
    Error::not_found(format!("unknown method: {}.{}", service, method))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master::{Collaborators, Master};
    use crate::logs::LogBuffer;
    use crate::rwlock::{LockConnection, LockMode, LockRequest};
    use crate::types::Config;
    use serde_json::json;
    use std::sync::Arc;

    async fn master() -> (Arc<Master>, LogBuffer) {
        let config = Config::default();
        let logs = LogBuffer::new(100);
        let collaborators = Collaborators::in_memory(&config).unwrap();
        let master = Master::setup(config, "0.0.1", logs.clone(), collaborators)
            .await
            .unwrap();
        (master, logs)
    }

    #[tokio::test]
    async fn test_unknown_service_and_method() {
        let (master, _) = master().await;
        let err = route_request(&master, "nope", "X", json!({})).await.unwrap_err();
        assert_eq!(err.to_ipc_error_code(), "NOT_FOUND");
        let err = route_request(&master, "master", "X", json!({})).await.unwrap_err();
        assert_eq!(err.to_ipc_error_code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_get_info() {
        let (master, _) = master().await;
        let info = route_request(&master, "master", "GetInfo", json!({})).await.unwrap();
        assert_eq!(info["version"], "0.0.1");
        assert_eq!(info["master_id"], master.id().as_str());
        assert_eq!(info["sso_providers"], json!([]));
    }

    #[tokio::test]
    async fn test_get_logs_window() {
        let (master, logs) = master().await;
        for i in 1..=10 {
            logs.push("INFO", format!("line {i}"));
        }
        let body = json!({"greater_than_id": 3, "tail": 2});
        let entries = route_request(&master, "master", "GetLogs", body).await.unwrap();
        let ids: Vec<i64> = entries
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![4, 5]);

        let body = json!({"greater_than_id": 100});
        let entries = route_request(&master, "master", "GetLogs", body).await.unwrap();
        assert_eq!(entries, json!([]));
    }

    #[tokio::test]
    async fn test_post_logs() {
        let (master, _) = master().await;
        let body = json!({"logs": [{"trial_id": 0, "message": "x"}, {"trial_id": 3, "message": "y"}]});
        let resp = route_request(&master, "trials", "PostLogs", body).await.unwrap();
        assert_eq!(resp, json!({"forwarded": 1}));

        let err = route_request(&master, "trials", "PostLogs", json!({})).await.unwrap_err();
        assert_eq!(err.to_ipc_error_code(), "INVALID_ARGUMENT");
    }

    #[tokio::test]
    async fn test_resource_state() {
        let (master, _) = master().await;
        let err = route_request(&master, "locks", "GetResourceState", json!({"resource": "/r"}))
            .await
            .unwrap_err();
        assert_eq!(err.to_ipc_error_code(), "NOT_FOUND");

        let connection = LockConnection::new();
        let _guard = connection.close_on_drop();
        master
            .acquire_lock(LockRequest {
                resource: "/r".to_string(),
                mode: LockMode::Read,
                connection: connection.clone(),
            })
            .await
            .unwrap();

        let state = route_request(&master, "locks", "GetResourceState", json!({"resource": "/r"}))
            .await
            .unwrap();
        assert_eq!(state["holders"][0]["mode"], "read");
        assert_eq!(state["holders"][0]["connection"], connection.id().as_str());
        assert_eq!(state["waiters"], json!([]));
    }
}

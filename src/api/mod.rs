//! HTTP surface of the master.
//!
//! ## Routes
//!
//! - `GET /info` - cluster info (unauthenticated)
//! - `GET /health` - liveness
//! - `GET /config` - configuration with credentials redacted
//! - `GET /logs` - master log window (authenticated)
//! - `POST /trial_logs` - trial log ingestion
//! - `GET /ws/data-layer/{*resource}` - lock session (WebSocket)

pub mod info;
pub mod locks;
pub mod logs;
pub mod trial_logs;

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::auth::require_auth;
use crate::master::Master;
use crate::types::Result;

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

fn security_header(name: &'static str, value: &'static str) -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::if_not_present(
        HeaderName::from_static(name),
        HeaderValue::from_static(value),
    )
}

/// Build the HTTP router. Fails when a route cannot be registered from the
/// current configuration.
pub fn router(master: Arc<Master>) -> Result<Router> {
    master.sso_providers()?;

    let authenticated = Router::new()
        .route("/logs", get(logs::master_logs))
        .route_layer(middleware::from_fn_with_state(
            master.authenticator(),
            require_auth,
        ));

    let mut router = Router::new()
        .route("/info", get(info::info))
        .route("/health", get(info::health))
        .route("/config", get(info::config))
        .route("/trial_logs", post(trial_logs::post_trial_logs))
        .route("/ws/data-layer/{*resource}", get(locks::lock_session))
        .merge(authenticated)
        .with_state(master.clone())
        .layer(security_header("x-xss-protection", "1; mode=block"))
        .layer(security_header("x-content-type-options", "nosniff"))
        .layer(security_header("x-frame-options", "SAMEORIGIN"))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http());

    if master.config().enable_cors {
        router = router.layer(cors_layer());
    }
    Ok(router)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master::Collaborators;
    use crate::logs::LogBuffer;
    use crate::types::Config;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use axum::response::Response;
    use pretty_assertions::assert_eq;
    use tower::ServiceExt;

    const TOKEN: &str = "api-token";

    async fn app_with(mut config: Config) -> (Router, LogBuffer) {
        config.security.api_tokens = vec![TOKEN.to_string()];
        let logs = LogBuffer::new(100);
        let collaborators = Collaborators::in_memory(&config).unwrap();
        let master = Master::setup(config, "test", logs.clone(), collaborators)
            .await
            .unwrap();
        (router(master).unwrap(), logs)
    }

    async fn get(app: Router, uri: &str, token: Option<&str>) -> Response {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        app.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_and_security_headers() {
        let (app, _) = app_with(Config::default()).await;
        let response = get(app, "/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers["x-xss-protection"], "1; mode=block");
        assert_eq!(headers["x-content-type-options"], "nosniff");
        assert_eq!(headers["x-frame-options"], "SAMEORIGIN");
        assert!(headers.get("access-control-allow-origin").is_none());
    }

    #[tokio::test]
    async fn test_info_is_public() {
        let mut config = Config::default();
        config.cluster_name = "lab".to_string();
        let (app, _) = app_with(config).await;
        let response = get(app, "/info", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let info = body_json(response).await;
        assert_eq!(info["cluster_name"], "lab");
        assert_eq!(info["telemetry"]["enabled"], false);
        assert!(info["telemetry"].get("segment_key").is_none());
    }

    #[tokio::test]
    async fn test_logs_require_auth() {
        let (app, logs) = app_with(Config::default()).await;
        for i in 1..=10 {
            logs.push("INFO", format!("entry {i}"));
        }

        let response = get(app.clone(), "/logs", None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let response = get(app.clone(), "/logs", Some("wrong")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = get(app.clone(), "/logs?less_than_id=5", Some(TOKEN)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let ids: Vec<i64> = body_json(response)
            .await
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);

        let response = get(app, "/logs?greater_than_id=50", Some(TOKEN)).await;
        assert_eq!(body_json(response).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_bad_log_window_is_client_error() {
        let (app, _) = app_with(Config::default()).await;
        let response = get(app, "/logs?tail=lots", Some(TOKEN)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_config_is_redacted() {
        let (app, _) = app_with(Config::default()).await;
        let response = get(app.clone(), "/config", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let config = body_json(response).await;
        assert_eq!(config["security"]["api_tokens"][0], "********");
        assert!(!config.to_string().contains(TOKEN));

        // Dropping auth from /config leaves /logs guarded.
        let response = get(app, "/logs", None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_post_trial_logs_returns_empty_body() {
        let (app, _) = app_with(Config::default()).await;
        let request = Request::builder()
            .method("POST")
            .uri("/trial_logs")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                r#"[{"trial_id": 0, "message": "dropped"}, {"trial_id": 2, "message": "kept"}]"#,
            ))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_lock_flag_checked_before_upgrade() {
        let (app, _) = app_with(Config::default()).await;
        for uri in [
            "/ws/data-layer/a/b",
            "/ws/data-layer/a/b?read_lock=maybe",
            // Valid flag but not an upgrade request.
            "/ws/data-layer/a/b?read_lock=TRUE",
        ] {
            let response = get(app.clone(), uri, None).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_cors_when_enabled() {
        let mut config = Config::default();
        config.enable_cors = true;
        let (app, _) = app_with(config).await;
        let request = Request::builder()
            .uri("/health")
            .header(header::ORIGIN, "https://example.com")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
    }

    #[tokio::test]
    async fn test_malformed_sso_url_fails_router() {
        let mut config = Config::default();
        config.saml.enabled = true;
        config.saml.idp_recipient_url = "::not a url::".to_string();
        let collaborators = Collaborators::in_memory(&config).unwrap();
        let master = Master::setup(config, "test", LogBuffer::new(10), collaborators)
            .await
            .unwrap();
        assert!(router(master).is_err());
    }
}

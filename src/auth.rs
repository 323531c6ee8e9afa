//! Bearer-token authentication for the HTTP surface.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;

use crate::types::{Error, Result};

/// Validates API credentials.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    /// `Ok` if `token` grants access, `Unauthorized` otherwise.
    async fn authenticate(&self, token: &str) -> Result<()>;
}

/// Accepts a fixed set of tokens. An empty set rejects everything.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenAuthenticator {
    tokens: HashSet<String>,
}

impl StaticTokenAuthenticator {
    pub fn new(tokens: impl IntoIterator<Item = String>) -> Self {
        Self {
            tokens: tokens.into_iter().filter(|t| !t.is_empty()).collect(),
        }
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<()> {
        if self.tokens.contains(token) {
            Ok(())
        } else {
            Err(Error::unauthorized("invalid credentials"))
        }
    }
}

fn bearer_token(request: &Request) -> Option<&str> {
    let value = request.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
        Some(token.trim())
    } else {
        None
    }
}

/// Route middleware: reject requests without an accepted bearer token.
pub async fn require_auth(
    State(authenticator): State<Arc<dyn Authenticator>>,
    request: Request,
    next: Next,
) -> Result<Response> {
    let token =
        bearer_token(&request).ok_or_else(|| Error::unauthorized("missing bearer token"))?;
    authenticator.authenticate(token).await?;
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    fn app(authenticator: Arc<dyn Authenticator>) -> Router {
        Router::new()
            .route("/secret", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(authenticator, require_auth))
    }

    async fn status(app: Router, auth: Option<&str>) -> StatusCode {
        let mut builder = Request::builder().uri("/secret");
        if let Some(auth) = auth {
            builder = builder.header(AUTHORIZATION, auth);
        }
        let response = app.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();
        response.status()
    }

    #[tokio::test]
    async fn test_static_tokens() {
        let auth: Arc<dyn Authenticator> =
            Arc::new(StaticTokenAuthenticator::new(vec!["s3cret".to_string()]));
        assert_eq!(status(app(auth.clone()), Some("Bearer s3cret")).await, StatusCode::OK);
        assert_eq!(status(app(auth.clone()), Some("bearer s3cret")).await, StatusCode::OK);
        assert_eq!(
            status(app(auth.clone()), Some("Bearer wrong")).await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(status(app(auth.clone()), Some("Basic abc")).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status(app(auth), None).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_empty_token_set_rejects_all() {
        let auth = StaticTokenAuthenticator::new(vec![String::new()]);
        assert!(auth.authenticate("").await.is_err());
        assert!(auth.authenticate("anything").await.is_err());
    }

    #[tokio::test]
    async fn test_delegates_to_authenticator() {
        let mut mock = MockAuthenticator::new();
        mock.expect_authenticate()
            .withf(|token| token.eq_ignore_ascii_case("from-idp"))
            .times(1)
            .returning(|_| Ok(()));
        assert_eq!(
            status(app(Arc::new(mock)), Some("Bearer from-idp")).await,
            StatusCode::OK
        );
    }
}

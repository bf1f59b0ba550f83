//! HTTP surface of a node.
//!
//! Publishes the node's own identity so peers can fetch and verify it.
//! Everything served here is public material; there is no authentication.
//!
//! Endpoints:
//! - GET  /        — node public key, PKCS#1 PEM text
//! - GET  /cert    — certificate JSON for this node's user id
//! - GET  /sig     — detached signature, base64 text
//! - GET  /whoami  — user id, key fingerprint, certificate presence
//! - GET  /health  — liveness
//! - POST /ping    — "pong"
//! - GET  /echo    — echoes the `text` query parameter
//! - GET  /routes  — this list

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use umbrella_core::{IdentityService, WhoAmI};

/// Routes served by [`router`], for `GET /routes`.
pub const ROUTES: &[(&str, &str)] = &[
    ("GET", "/"),
    ("GET", "/cert"),
    ("GET", "/sig"),
    ("GET", "/whoami"),
    ("GET", "/health"),
    ("POST", "/ping"),
    ("GET", "/echo"),
    ("GET", "/routes"),
];

/// Shared node state.
pub struct NodeState {
    pub identity: IdentityService,
    /// This node's user id, if one has been configured.
    pub node_id: Option<u64>,
    /// Server start time (for uptime reporting).
    pub start_time: Instant,
}

impl NodeState {
    pub fn new(identity: IdentityService, node_id: Option<u64>) -> Self {
        Self {
            identity,
            node_id,
            start_time: Instant::now(),
        }
    }

    fn node_id(&self) -> Result<u64, ApiError> {
        self.node_id.ok_or(ApiError::NoNodeId)
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("this node has no user id configured")]
    NoNodeId,

    #[error(transparent)]
    Core(#[from] umbrella_core::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NoNodeId => StatusCode::NOT_FOUND,
            ApiError::Core(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            ApiError::Core(e) => {
                error!("request failed: {e}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.to_string()).into_response()
    }
}

/// Build the node's router.
pub fn router(state: Arc<NodeState>) -> Router {
    Router::new()
        .route("/", get(public_key))
        .route("/cert", get(certificate))
        .route("/sig", get(signature))
        .route("/whoami", get(whoami))
        .route("/health", get(health))
        .route("/ping", post(ping))
        .route("/echo", get(echo))
        .route("/routes", get(routes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// GET /: node public key.
pub async fn public_key(State(state): State<Arc<NodeState>>) -> Result<String, ApiError> {
    Ok(state.identity.own_public_key_pem()?)
}

/// GET /cert: certificate bytes exactly as signed.
pub async fn certificate(State(state): State<Arc<NodeState>>) -> Result<Response, ApiError> {
    let cert = state.identity.own_certificate(state.node_id()?)?;
    Ok(([(header::CONTENT_TYPE, "application/json")], cert.into_bytes()).into_response())
}

/// GET /sig: detached signature as base64 text.
pub async fn signature(State(state): State<Arc<NodeState>>) -> Result<String, ApiError> {
    let sig = state.identity.own_signature(state.node_id()?)?;
    Ok(sig.to_text())
}

/// Response for GET /whoami.
#[derive(Debug, Serialize)]
pub struct WhoAmIResponse {
    #[serde(flatten)]
    pub identity: WhoAmI,
    pub uptime_secs: u64,
    pub version: &'static str,
}

/// GET /whoami: who this node is.
pub async fn whoami(State(state): State<Arc<NodeState>>) -> Result<Json<WhoAmIResponse>, ApiError> {
    let identity = state.identity.whoami(state.node_id()?)?;
    Ok(Json(WhoAmIResponse {
        identity,
        uptime_secs: state.start_time.elapsed().as_secs(),
        version: crate::BUILD_VERSION,
    }))
}

async fn health() -> &'static str {
    "ok"
}

async fn ping() -> &'static str {
    "pong"
}

/// Query params for GET /echo.
#[derive(Debug, Deserialize)]
pub struct EchoQuery {
    pub text: Option<String>,
}

async fn echo(Query(params): Query<EchoQuery>) -> Result<String, (StatusCode, &'static str)> {
    params
        .text
        .ok_or((StatusCode::BAD_REQUEST, "missing `text` query parameter"))
}

async fn routes() -> String {
    ROUTES
        .iter()
        .map(|(method, path)| format!("{method} {path}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbrella_core::{CertificateAuthority, CertificateStore, KeyStore, Signature, Verifier};
    use tempfile::TempDir;

    /// Node with a fresh small key; when `issue` is set it holds a
    /// certificate for id 0x2A signed by its own key.
    fn node(dir: &TempDir, node_id: Option<u64>, issue: bool) -> Arc<NodeState> {
        let keys = KeyStore::new(dir.path(), dir.path()).with_key_bits(1024);
        keys.ensure_initialized().unwrap();
        let store = CertificateStore::new(dir.path());
        if issue {
            let kp = keys.load_keypair().unwrap();
            CertificateAuthority::new(store.clone())
                .issue_at(kp.public_key(), 0x2A, 1_700_000_000, &kp)
                .unwrap();
        }
        let identity = IdentityService::new(Arc::new(keys), store);
        Arc::new(NodeState::new(identity, node_id))
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn root_serves_public_key() {
        let dir = TempDir::new().unwrap();
        let state = node(&dir, None, false);
        let pem = public_key(State(state)).await.unwrap();
        assert!(pem.starts_with("-----BEGIN RSA PUBLIC KEY-----"));
    }

    #[tokio::test]
    async fn cert_and_sig_verify() {
        let dir = TempDir::new().unwrap();
        let state = node(&dir, Some(0x2A), true);
        let own_key = state.identity.own_public_key().unwrap();

        let cert_response = certificate(State(state.clone())).await.unwrap();
        assert_eq!(
            cert_response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        let cert_text = body_text(cert_response).await;
        let sig_text = signature(State(state)).await.unwrap();

        let cert = umbrella_core::Certificate::from_bytes(cert_text.into_bytes());
        let sig = Signature::from_text(&sig_text).unwrap();
        let identity = Verifier::verify(&cert, &sig, &own_key).unwrap();
        assert_eq!(identity.user_id, 42);
        assert_eq!(identity.issued_at, 1_700_000_000);
    }

    #[tokio::test]
    async fn cert_for_unissued_id_is_404() {
        let dir = TempDir::new().unwrap();
        let state = node(&dir, Some(0x77), false);

        let err = certificate(State(state.clone())).await.unwrap_err();
        assert!(matches!(err, ApiError::Core(ref e) if e.is_not_found()));
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);

        let err = signature(State(state)).await.unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cert_without_node_id_is_404() {
        let dir = TempDir::new().unwrap();
        let state = node(&dir, None, true);
        let err = certificate(State(state)).await.unwrap_err();
        assert!(matches!(err, ApiError::NoNodeId));
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn whoami_reports_certificate() {
        let dir = TempDir::new().unwrap();
        let state = node(&dir, Some(0x2A), true);
        let Json(me) = whoami(State(state)).await.unwrap();
        assert_eq!(me.identity.user_id, 42);
        assert!(me.identity.has_certificate);

        let json = serde_json::to_value(&me).unwrap();
        assert_eq!(json["user_id_hex"], "2a");
        let version = json["version"].as_str().unwrap();
        assert!(version.starts_with(env!("CARGO_PKG_VERSION")));
    }

    #[tokio::test]
    async fn corrupt_key_is_500() {
        let dir = TempDir::new().unwrap();
        let state = node(&dir, Some(1), false);
        std::fs::write(state.identity.key_store().public_key_path(), "junk").unwrap();
        let err = whoami(State(state)).await.unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn small_endpoints() {
        assert_eq!(ping().await, "pong");
        assert_eq!(health().await, "ok");

        let echoed = echo(Query(EchoQuery { text: Some("hi".into()) })).await.unwrap();
        assert_eq!(echoed, "hi");
        let missing = echo(Query(EchoQuery { text: None })).await.unwrap_err();
        assert_eq!(missing.0, StatusCode::BAD_REQUEST);

        let listing = routes().await;
        assert_eq!(listing.lines().count(), ROUTES.len());
        assert!(listing.contains("GET /cert"));
    }
}

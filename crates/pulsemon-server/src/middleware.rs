use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::{HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use pulsemon_common::signing::HASH_HEADER;

use crate::api::error_response;
use crate::logging::TraceId;
use crate::state::AppState;

/// Largest request body accepted for signature checks.
const MAX_SIGNED_BODY: usize = 4 * 1024 * 1024;

/// Verifies and produces `HashSHA256` body signatures.
///
/// Runs after request decompression, so the signature covers the plain
/// body. Without a configured key every request passes untouched. With a
/// key, a request carrying a non-empty `HashSHA256` header must match it or
/// is rejected with 400, and every response body is signed.
pub async fn signature_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(signer) = state.signer.clone() else {
        return next.run(req).await;
    };

    let trace_id = req
        .extensions()
        .get::<TraceId>()
        .map(|t| t.0.clone())
        .unwrap_or_default();

    let provided = req
        .headers()
        .get(HASH_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|s| !s.is_empty());

    let (parts, body) = req.into_parts();
    let bytes = match to_bytes(body, MAX_SIGNED_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(trace_id = %trace_id, error = %e, "Request body rejected");
            return error_response(
                StatusCode::BAD_REQUEST,
                &trace_id,
                "invalid_body",
                "request body could not be read",
            );
        }
    };

    if let Some(signature) = provided {
        if let Err(e) = signer.verify(&bytes, &signature) {
            tracing::warn!(trace_id = %trace_id, error = %e, "Request rejected: bad signature");
            return error_response(
                StatusCode::BAD_REQUEST,
                &trace_id,
                "signature_mismatch",
                &e.to_string(),
            );
        }
    }

    let response = next.run(Request::from_parts(parts, Body::from(bytes))).await;

    let (mut parts, body) = response.into_parts();
    let body = match to_bytes(body, usize::MAX).await {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(trace_id = %trace_id, error = %e, "Response body unreadable");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "internal_error",
                "response body could not be signed",
            );
        }
    };
    if let Ok(value) = HeaderValue::from_str(&signer.sign(&body)) {
        parts.headers.insert(HASH_HEADER, value);
    }
    Response::from_parts(parts, Body::from(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use axum::routing::post;
    use axum::Router;
    use pulsemon_common::signing::Signer;
    use pulsemon_storage::cache::MemoryStorage;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn build_mock_state(key: Option<&str>) -> AppState {
        AppState {
            storage: Arc::new(MemoryStorage::new()),
            database: None,
            signer: Signer::from_key(key),
            config: Arc::new(ServerConfig::default()),
        }
    }

    fn echo_app(state: AppState) -> Router {
        Router::new()
            .route("/echo", post(|body: String| async move { body }))
            .layer(axum::middleware::from_fn_with_state(
                state.clone(),
                signature_middleware,
            ))
            .with_state(state)
    }

    fn request(body: &str, signature: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri("/echo");
        if let Some(sig) = signature {
            builder = builder.header(HASH_HEADER, sig);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn passes_through_without_key() {
        let app = echo_app(build_mock_state(None));
        let resp = app.oneshot(request("hello", Some("00"))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().get(HASH_HEADER).is_none());
    }

    #[tokio::test]
    async fn valid_signature_is_accepted_and_response_signed() {
        let signer = Signer::new("k");
        let app = echo_app(build_mock_state(Some("k")));
        let sig = signer.sign(b"hello");
        let resp = app.oneshot(request("hello", Some(&sig))).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let header = resp.headers().get(HASH_HEADER).unwrap().to_str().unwrap().to_string();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"hello");
        assert!(signer.verify(&body, &header).is_ok());
    }

    #[tokio::test]
    async fn mismatched_signature_is_rejected() {
        let app = echo_app(build_mock_state(Some("k")));
        let sig = Signer::new("other").sign(b"hello");
        let resp = app.oneshot(request("hello", Some(&sig))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unsigned_request_is_accepted_with_key() {
        let app = echo_app(build_mock_state(Some("k")));
        let resp = app.oneshot(request("hello", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().get(HASH_HEADER).is_some());
    }
}

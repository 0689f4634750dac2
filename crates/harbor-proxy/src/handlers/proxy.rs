//! Verbatim `/v1/*` forwarding to the inference server.

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, Uri};
use axum::response::Response;

use crate::{AppState, ProxyError};

/// Connection-scoped headers that must not cross the proxy.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Headers to send upstream: end-to-end request headers minus `Host` and
/// `Content-Length`, which the client recomputes for the new connection.
fn upstream_headers(incoming: &HeaderMap, bearer: &str) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(incoming.len() + 1);
    for (name, value) in incoming {
        if is_hop_by_hop(name) || name == header::HOST || name == header::CONTENT_LENGTH {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    if !headers.contains_key(header::AUTHORIZATION) {
        if let Ok(value) = HeaderValue::from_str(bearer) {
            headers.insert(header::AUTHORIZATION, value);
        }
    }
    headers
}

/// Upstream URL from the raw request target, so percent-encoded path
/// segments and the query string reach the backend as sent.
fn target_url(base: &str, uri: &Uri) -> String {
    match uri.path_and_query() {
        Some(target) => format!("{}{}", base, target.as_str()),
        None => format!("{}{}", base, uri.path()),
    }
}

/// Forward the request to the inference server and relay its response.
pub async fn forward(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let url = target_url(state.backend.base_url(), &uri);
    tracing::debug!("Proxying {} {}", method, url);

    let upstream = state
        .http
        .request(method, &url)
        .headers(upstream_headers(&headers, &state.backend.bearer()))
        .body(body)
        .timeout(state.request_timeout)
        .send()
        .await
        .map_err(|e| ProxyError::Unavailable(e.to_string()))?;

    let mut builder = Response::builder().status(upstream.status());
    if let Some(out) = builder.headers_mut() {
        for (name, value) in upstream.headers() {
            if !is_hop_by_hop(name) {
                out.append(name.clone(), value.clone());
            }
        }
    }

    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| ProxyError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router;
    use crate::test_support::{closed_url, spawn_server, state_for};
    use axum::body::to_bytes;
    use axum::http::{Request, StatusCode};
    use axum::routing::any;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::path::PathBuf;
    use tower::ServiceExt;

    /// Reflects what it received so the test can compare both sides.
    async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
        let received: serde_json::Map<String, Value> = headers
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v.to_str().unwrap_or_default())))
            .collect();
        let payload = json!({
            "method": method.as_str(),
            "uri": uri.to_string(),
            "headers": received,
            "body": String::from_utf8_lossy(&body),
        });
        Response::builder()
            .status(StatusCode::ACCEPTED)
            .header("x-backend", "llama")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap()
    }

    async fn echo_backend() -> String {
        spawn_server(Router::new().route("/v1/*rest", any(echo))).await
    }

    async fn send(backend: &str, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let app = router(state_for(backend, PathBuf::from("frontend")));
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, serde_json::from_slice(&body).unwrap())
    }

    #[test]
    fn test_upstream_headers_strip_and_inject() {
        let mut incoming = HeaderMap::new();
        incoming.insert(header::HOST, HeaderValue::from_static("example.com"));
        incoming.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        incoming.insert("x-trace", HeaderValue::from_static("abc"));

        let out = upstream_headers(&incoming, "Bearer secret");
        assert!(out.get(header::HOST).is_none());
        assert!(out.get(header::CONNECTION).is_none());
        assert_eq!(out["x-trace"], "abc");
        assert_eq!(out[header::AUTHORIZATION], "Bearer secret");
    }

    #[test]
    fn test_caller_authorization_wins() {
        let mut incoming = HeaderMap::new();
        incoming.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer mine"));
        let out = upstream_headers(&incoming, "Bearer secret");
        assert_eq!(out[header::AUTHORIZATION], "Bearer mine");
    }

    #[test]
    fn test_target_url_keeps_query() {
        let uri: Uri = "/v1/models?limit=2".parse().unwrap();
        assert_eq!(
            target_url("http://127.0.0.1:8001", &uri),
            "http://127.0.0.1:8001/v1/models?limit=2"
        );
    }

    #[tokio::test]
    async fn test_forwards_method_headers_and_body() {
        let backend = echo_backend().await;
        let request = Request::post("/v1/chat/completions")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, "Bearer client-token")
            .header("x-request-id", "42")
            .body(Body::from(r#"{"messages":[]}"#))
            .unwrap();

        let (status, headers, echoed) = send(&backend, request).await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(headers["x-backend"], "llama");
        assert_eq!(echoed["method"], "POST");
        assert_eq!(echoed["uri"], "/v1/chat/completions");
        assert_eq!(echoed["body"], r#"{"messages":[]}"#);
        assert_eq!(echoed["headers"]["content-type"], "application/json");
        assert_eq!(echoed["headers"]["authorization"], "Bearer client-token");
        assert_eq!(echoed["headers"]["x-request-id"], "42");
    }

    #[tokio::test]
    async fn test_forwards_every_method() {
        let backend = echo_backend().await;
        for method in [Method::GET, Method::PUT, Method::DELETE, Method::PATCH] {
            let request = Request::builder()
                .method(method.clone())
                .uri("/v1/models/phi?verbose=true")
                .body(Body::empty())
                .unwrap();
            let (status, _, echoed) = send(&backend, request).await;
            assert_eq!(status, StatusCode::ACCEPTED);
            assert_eq!(echoed["method"], method.as_str());
            assert_eq!(echoed["uri"], "/v1/models/phi?verbose=true");
            assert_eq!(echoed["headers"]["authorization"], "Bearer secret");
        }
    }

    #[tokio::test]
    async fn test_backend_error_status_passes_through() {
        let backend = spawn_server(Router::new().route(
            "/v1/models",
            any(|| async {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({ "error": "invalid api key" })),
                )
            }),
        ))
        .await;

        let request = Request::get("/v1/models").body(Body::empty()).unwrap();
        let (status, _, body) = send(&backend, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "invalid api key");
    }

    #[tokio::test]
    async fn test_event_stream_passes_through() {
        let events = "data: {\"delta\":\"Hel\"}\n\ndata: {\"delta\":\"lo\"}\n\ndata: [DONE]\n\n";
        let backend = spawn_server(Router::new().route(
            "/v1/chat/completions",
            any(move || async move { ([(header::CONTENT_TYPE, "text/event-stream")], events) }),
        ))
        .await;

        let app = router(state_for(&backend, PathBuf::from("frontend")));
        let response = app
            .oneshot(
                Request::post("/v1/chat/completions")
                    .body(Body::from(r#"{"stream":true}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], events.as_bytes());
    }

    #[tokio::test]
    async fn test_encoded_path_forwarded_verbatim() {
        let backend = echo_backend().await;
        let request = Request::get("/v1/files/a%2Fb%3Fx").body(Body::empty()).unwrap();
        let (status, _, echoed) = send(&backend, request).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(echoed["uri"], "/v1/files/a%2Fb%3Fx");
    }

    #[tokio::test]
    async fn test_bare_v1_prefix_is_forwarded() {
        let backend = spawn_server(Router::new().route("/v1/", any(echo))).await;
        let request = Request::get("/v1/").body(Body::empty()).unwrap();
        let (status, _, echoed) = send(&backend, request).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(echoed["uri"], "/v1/");
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_503() {
        let request = Request::get("/v1/models").body(Body::empty()).unwrap();
        let (status, _, body) = send(&closed_url().await, request).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["detail"]
            .as_str()
            .unwrap()
            .starts_with("Service unavailable"));
    }

    #[tokio::test]
    async fn test_non_v1_paths_are_not_proxied() {
        let backend = echo_backend().await;
        let app = router(state_for(&backend, PathBuf::from("frontend")));
        let response = app
            .oneshot(Request::get("/v2/models").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

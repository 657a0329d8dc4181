//! Records method, normalized path, status, and latency for every response,
//! including framework-level rejections (404, 405, 415) that never reach a
//! handler.

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::observability::metrics::record_http_request;

/// Outermost layer: time the request and record its outcome.
pub async fn http_metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    record_http_request(&method, &path, response.status().as_u16(), start.elapsed());

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware,
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    async fn ok_handler() -> &'static str {
        "OK"
    }

    async fn conflict_handler() -> StatusCode {
        StatusCode::CONFLICT
    }

    fn test_app() -> Router {
        Router::new()
            .route("/api/v1/rooms/:code", get(ok_handler))
            .route("/api/v1/rooms/:code/start", get(conflict_handler))
            .layer(middleware::from_fn(http_metrics_middleware))
    }

    #[tokio::test]
    async fn test_middleware_passes_responses_through() {
        let app = test_app();

        let request = HttpRequest::builder()
            .uri("/api/v1/rooms/K3ZQ9A")
            .body(Body::empty())
            .expect("request builder should succeed");
        let response = app.clone().oneshot(request).await.expect("request should succeed");
        assert_eq!(response.status(), StatusCode::OK);

        let request = HttpRequest::builder()
            .uri("/api/v1/rooms/K3ZQ9A/start")
            .body(Body::empty())
            .expect("request builder should succeed");
        let response = app.oneshot(request).await.expect("request should succeed");
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_middleware_sees_unrouted_requests() {
        let request = HttpRequest::builder()
            .uri("/nowhere")
            .body(Body::empty())
            .expect("request builder should succeed");
        let response = test_app()
            .oneshot(request)
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

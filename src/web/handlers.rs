use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
};
use std::fmt::Write;

use super::AppState;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Prometheus scrape endpoint
pub async fn prometheus_metrics(State(state): State<AppState>) -> Response {
    match state.sink.render() {
        Ok(output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
            output,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Liveness probe
pub async fn health_check() -> &'static str {
    "OK"
}

/// Landing page listing the monitored feeds
pub async fn index(State(state): State<AppState>) -> Html<String> {
    let streams = state.fleet.stream_states().await;

    let mut rows = String::new();
    for (target, supervisor_state) in &streams {
        let _ = write!(
            rows,
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape_html(&target.address),
            escape_html(&target.description),
            supervisor_state
        );
    }

    Html(format!(
        "<html><head><title>TS Monitor</title></head><body>\
         <h1>TS Monitor</h1>\
         <p>Monitoring {} streams. Metrics at <a href=\"/metrics\">/metrics</a>.</p>\
         <table><tr><th>Stream</th><th>Description</th><th>State</th></tr>{}</table>\
         </body></html>",
        streams.len(),
        rows
    ))
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::metrics::MetricsSink;
    use crate::services::FleetCoordinator;
    use crate::web::WebServer;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> axum::Router {
        let mut config = Config::from_toml_str(
            r#"
interface = "127.0.0.1"
metrics_port = 9090
[[streams]]
url = "239.0.0.1:1234"
description = "News <HD>"
"#,
        )
        .unwrap();
        config.validate().unwrap();

        let sink = Arc::new(MetricsSink::new().unwrap());
        let fleet = Arc::new(FleetCoordinator::new(&config, sink.clone()));
        WebServer::create_router(AppState { sink, fleet })
    }

    async fn get(uri: &str) -> (StatusCode, Option<String>, String) {
        let response = app()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string());
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, content_type, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, _, body) = get("/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn test_metrics_content_type() {
        let (status, content_type, _) = get("/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some(PROMETHEUS_CONTENT_TYPE));
    }

    #[tokio::test]
    async fn test_index_lists_streams() {
        let (status, _, body) = get("/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Monitoring 1 streams"));
        assert!(body.contains("News &lt;HD&gt;"));
        assert!(body.contains("idle"));
    }
}

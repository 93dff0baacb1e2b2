//! Public status page identifying the instance.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;

use crate::AppState;

/// Structured status.
#[derive(Debug, Serialize)]
pub struct Status {
    name: String,
    version: String,
}

/// Public server status.
pub async fn status(State(state): State<AppState>) -> Json<Status> {
    Json(Status {
        name: state.config.name.clone(),
        version: state.config.version().to_owned(),
    })
}

/// Prometheus text exposition, when a recorder is installed.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, String::new()),
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use http_body_util::BodyExt;

    use crate::ldap::facade::tests::MockConnector;
    use crate::router::tests::state;
    use crate::*;

    #[tokio::test]
    async fn test_status() {
        let response = make_request(
            app(state(MockConnector::default())),
            Method::GET,
            "/status.json",
            String::default(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["name"], env!("CARGO_PKG_NAME"));
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_metrics_without_recorder() {
        let response = make_request(
            app(state(MockConnector::default())),
            Method::GET,
            "/metrics",
            String::default(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

//! Health check endpoint reporting the state of every supervised role in the
//! process.

use std::net::SocketAddr;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::supervisor::InstanceState;

/// Receivers for each supervisor in the process.
#[derive(Clone, Default)]
pub struct HealthState {
    instances: Vec<watch::Receiver<InstanceState>>,
}

impl HealthState {
    pub fn new(instances: Vec<watch::Receiver<InstanceState>>) -> Self {
        Self { instances }
    }

    pub fn snapshot(&self) -> Vec<InstanceState> {
        self.instances.iter().map(|rx| rx.borrow().clone()).collect()
    }
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .with_state(state)
}

async fn health_check(State(state): State<HealthState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "services": state.snapshot(),
    }))
}

/// Serve `/health` on `addr` until `shutdown` fires.
pub async fn serve(
    addr: SocketAddr,
    state: HealthState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = router(state).layer(TraceLayer::new_for_http());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Health endpoint listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::supervisor::InstanceStatus;

    #[tokio::test]
    async fn test_health_reports_instances() {
        let (_tx, rx) = watch::channel(InstanceState {
            service_name: "blockchain_follower".into(),
            instance: Uuid::new_v4(),
            service_id: Some(7),
            status: InstanceStatus::Enabled,
            last_heartbeat: None,
        });
        let app = router(HealthState::new(vec![rx]));

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["services"][0]["service_name"], "blockchain_follower");
        assert_eq!(json["services"][0]["service_id"], 7);
        assert_eq!(json["services"][0]["status"], "enabled");
    }
}

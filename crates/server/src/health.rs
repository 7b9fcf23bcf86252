use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info};
use wrench_slack::App;

#[derive(Clone)]
pub struct HealthState {
    app: App,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub flows: HealthCheck,
    pub registered_flows: Vec<String>,
    pub checked_at: String,
}

pub fn router(app: App) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { app })
}

pub async fn spawn(bind_address: &str, port: u16, app: App) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(app)).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let registered_flows = state.app.flow_registry().names();
    let ready = !registered_flows.is_empty();

    let flows = if ready {
        HealthCheck {
            status: "ready",
            detail: format!(
                "{} flow(s) with {} listener(s)",
                registered_flows.len(),
                state.app.listener_count()
            ),
        }
    } else {
        HealthCheck { status: "degraded", detail: "no interaction flows registered".to_string() }
    };

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "wrench-server runtime initialized".to_string(),
        },
        flows,
        registered_flows,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::{extract::State, Json};
    use tower::ServiceExt;
    use wrench_slack::App;

    use crate::health::{health, router, HealthState};
    use crate::wizard::define_wizard;

    #[tokio::test]
    async fn health_is_ready_once_flows_are_registered() {
        let app = App::default();
        define_wizard(None)(&app).expect("wizard");

        let (status, Json(payload)) = health(State(HealthState { app })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.flows.status, "ready");
        assert_eq!(payload.registered_flows, vec!["wizard"]);
    }

    #[tokio::test]
    async fn health_is_degraded_without_flows() {
        let (status, Json(payload)) = health(State(HealthState { app: App::default() })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.service.status, "ready");
    }

    #[tokio::test]
    async fn health_route_serves_json() {
        let app = App::default();
        define_wizard(None)(&app).expect("wizard");

        let response = router(app)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let payload: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(payload["registered_flows"][0], "wizard");
    }
}

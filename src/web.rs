//! Axum-based HTTP API with optional OpenAPI (utoipa) and Swagger UI

use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::WatchStream;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::Config;
use crate::controller::ControllerHandle;
use crate::dispatcher::{CommandDispatcher, CommandOrigin, PowerCommand};
use crate::telemetry::TelemetryHub;

pub mod logs;

pub use logs::{logs_recent, logs_stream};

/// Shared handles for request handlers
#[derive(Clone)]
pub struct AppState {
    pub controller: ControllerHandle,
    pub dispatcher: Arc<CommandDispatcher>,
    pub telemetry: TelemetryHub,
    pub config: Arc<Config>,
}

#[derive(Debug, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PowerPctBody {
    pub percent: u8,
}

#[derive(Debug, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PowerLimitBody {
    pub watts: u32,
}

#[cfg_attr(feature = "openapi", utoipa::path(get, path = "/api/health", responses(
    (status = 200, description = "Service is healthy")
)))]
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("APP_VERSION"),
        "commit": env!("APP_COMMIT"),
    }))
}

#[cfg_attr(feature = "openapi", utoipa::path(get, path = "/api/status", responses(
    (status = 200, description = "Controller, battery, miner and dispatcher status")
)))]
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let now = Utc::now();
    let battery_status = state.telemetry.battery_status.get().unwrap_or_default();
    let miner_status = state.telemetry.miner_status.get().unwrap_or_default();
    let mut root = serde_json::json!({
        "timestamp": now.to_rfc3339(),
        "autocontrol": *state.controller.status(),
        "operation": state.dispatcher.operation_status(),
        "battery": state.telemetry.battery.get(),
        "miner": state.telemetry.miner.get(),
        "connections": {
            "battery": battery_status,
            "miner": miner_status,
        },
        "base_watts": state.dispatcher.base_watts(),
    });

    if let Some(age) = battery_status.seconds_since_seen(now) {
        root["connections"]["battery"]["seconds_since_seen"] = age.into();
    }
    if let Some(age) = miner_status.seconds_since_seen(now) {
        root["connections"]["miner"]["seconds_since_seen"] = age.into();
    }
    Json(root)
}

#[cfg_attr(feature = "openapi", utoipa::path(get, path = "/api/autocontrol", responses((status = 200))))]
pub async fn autocontrol(State(state): State<AppState>) -> impl IntoResponse {
    Json((*state.controller.status()).clone())
}

#[cfg_attr(feature = "openapi", utoipa::path(post, path = "/api/autocontrol/enable", responses((status = 200), (status = 503))))]
pub async fn autocontrol_enable(State(state): State<AppState>) -> impl IntoResponse {
    match state.controller.enable() {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({"ok": true, "enabled": true})),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"ok": false, "error": e.to_string()})),
        ),
    }
}

#[cfg_attr(feature = "openapi", utoipa::path(post, path = "/api/autocontrol/disable", responses((status = 200), (status = 503))))]
pub async fn autocontrol_disable(State(state): State<AppState>) -> impl IntoResponse {
    match state.controller.disable() {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({"ok": true, "enabled": false})),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"ok": false, "error": e.to_string()})),
        ),
    }
}

#[cfg_attr(feature = "openapi", utoipa::path(post, path = "/api/miner/power_pct", request_body = PowerPctBody, responses((status = 200), (status = 400), (status = 502))))]
pub async fn set_power_pct(
    State(state): State<AppState>,
    Json(body): Json<PowerPctBody>,
) -> impl IntoResponse {
    if body.percent > 100 {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"ok": false, "error": "percent must be 0-100"})),
        );
    }
    let cmd = PowerCommand::percent(
        state.dispatcher.base_watts(),
        body.percent,
        CommandOrigin::Manual,
        Utc::now(),
    );
    dispatch(&state, cmd).await
}

#[cfg_attr(feature = "openapi", utoipa::path(post, path = "/api/miner/power_limit", request_body = PowerLimitBody, responses((status = 200), (status = 400), (status = 502))))]
pub async fn set_power_limit(
    State(state): State<AppState>,
    Json(body): Json<PowerLimitBody>,
) -> impl IntoResponse {
    let base = state.dispatcher.base_watts();
    if body.watts > base {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "ok": false,
                "error": format!("watts must be 0-{base}"),
            })),
        );
    }
    let cmd = PowerCommand::limit(base, body.watts, CommandOrigin::Manual, Utc::now());
    dispatch(&state, cmd).await
}

#[cfg_attr(feature = "openapi", utoipa::path(post, path = "/api/miner/power_on", responses((status = 200), (status = 502))))]
pub async fn power_on(State(state): State<AppState>) -> impl IntoResponse {
    let cmd = PowerCommand::switch(
        true,
        state.dispatcher.base_watts(),
        CommandOrigin::Manual,
        Utc::now(),
    );
    dispatch(&state, cmd).await
}

#[cfg_attr(feature = "openapi", utoipa::path(post, path = "/api/miner/power_off", responses((status = 200), (status = 502))))]
pub async fn power_off(State(state): State<AppState>) -> impl IntoResponse {
    let cmd = PowerCommand::switch(
        false,
        state.dispatcher.base_watts(),
        CommandOrigin::Manual,
        Utc::now(),
    );
    dispatch(&state, cmd).await
}

async fn dispatch(state: &AppState, cmd: PowerCommand) -> (StatusCode, Json<serde_json::Value>) {
    let done = state.dispatcher.submit(cmd).await;
    let code = if done.is_applied() {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    (
        code,
        Json(serde_json::json!({
            "ok": code == StatusCode::OK,
            "command": done,
        })),
    )
}

#[cfg_attr(feature = "openapi", utoipa::path(get, path = "/api/miner/op_status", responses((status = 200))))]
pub async fn op_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.dispatcher.operation_status())
}

#[cfg_attr(feature = "openapi", utoipa::path(get, path = "/api/config", responses((status = 200))))]
pub async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(
        serde_json::to_value(state.config.as_ref())
            .unwrap_or(serde_json::json!({"error":"serialization"})),
    )
}

#[cfg(feature = "openapi")]
#[utoipa::path(get, path = "/api/config/schema", responses((status = 200)))]
pub async fn get_config_schema() -> impl IntoResponse {
    let schema = schemars::schema_for!(crate::config::Config);
    Json(serde_json::to_value(&schema).unwrap_or(serde_json::json!({"error":"schema"})))
}

/// Control snapshots as server-sent events, one per published change
#[cfg_attr(feature = "openapi", utoipa::path(get, path = "/api/events", responses((status = 200))))]
pub async fn events(State(state): State<AppState>) -> impl IntoResponse {
    let stream = WatchStream::new(state.controller.subscribe()).map(|snapshot| {
        let payload = serde_json::to_string(snapshot.as_ref()).unwrap_or_default();
        Ok::<Event, std::convert::Infallible>(Event::default().event("status").data(payload))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(feature = "openapi")]
#[derive(utoipa::OpenApi)]
#[openapi(
    paths(
        health, status, autocontrol, autocontrol_enable, autocontrol_disable,
        set_power_pct, set_power_limit, power_on, power_off, op_status,
        get_config, get_config_schema, events,
        logs::logs_recent, logs::logs_stream,
    ),
    components(schemas(PowerPctBody, PowerLimitBody, logs::RecentParams)),
    tags((name = "sunmine", description = "Sunmine miner power controller API"))
)]
pub struct ApiDoc;

pub fn build_router(state: AppState) -> Router {
    let router = Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(status))
        .route("/api/autocontrol", get(autocontrol))
        .route("/api/autocontrol/enable", post(autocontrol_enable))
        .route("/api/autocontrol/disable", post(autocontrol_disable))
        .route("/api/miner/power_pct", post(set_power_pct))
        .route("/api/miner/power_limit", post(set_power_limit))
        .route("/api/miner/power_on", post(power_on))
        .route("/api/miner/power_off", post(power_off))
        .route("/api/miner/op_status", get(op_status))
        .route("/api/config", get(get_config))
        .route("/api/events", get(events))
        .merge(logs::routes());

    #[cfg(feature = "openapi")]
    let router = {
        use utoipa::OpenApi as _;
        router
            .route("/api/config/schema", get(get_config_schema))
            .merge(utoipa_swagger_ui::SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
    };

    router
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve until `shutdown` flips to true
pub async fn serve(
    state: AppState,
    host: &str,
    port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let router = build_router(state);

    let logger = crate::logging::get_logger("web");
    logger.info(&format!(
        "Starting web server; requested host={host}, port={port}"
    ));

    let (addr, parsed_ok): (SocketAddr, bool) = match host.parse::<IpAddr>() {
        Ok(ip) => (SocketAddr::new(ip, port), true),
        Err(_) => (([127, 0, 0, 1], port).into(), false),
    };
    if !parsed_ok {
        logger.warn(&format!("Invalid host '{host}'; falling back to 127.0.0.1"));
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    logger.info(&format!(
        "Web server listening at http://{}:{} (API /api)",
        local_addr.ip(),
        local_addr.port()
    ));

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            while shutdown.changed().await.is_ok() {
                if *shutdown.borrow() {
                    break;
                }
            }
        })
        .await?;
    logger.info("Web server stopped");
    Ok(())
}

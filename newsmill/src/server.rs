use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rocket::figment::Figment;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::response::stream::{Event, EventStream};
use rocket::serde::json::Json;
use rocket::tokio::select;
use rocket::{get, post, routes, Build, Rocket, Shutdown, State};
use serde::Serialize;

use crate::engine::{Engine, EngineError};
use crate::events::EventBroadcaster;

/// Application state stored inside Rocket managed state.
#[derive(Clone)]
pub struct AppState {
    pub started_at: DateTime<Utc>,
    pub engine: Arc<Engine>,
    pub broadcaster: EventBroadcaster,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, broadcaster: EventBroadcaster) -> Self {
        Self {
            started_at: Utc::now(),
            engine,
            broadcaster,
        }
    }
}

#[derive(Debug, Serialize)]
struct ControlResponse {
    status: &'static str,
    running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    running: bool,
    stopping: bool,
    uptime_seconds: i64,
    log_subscribers: usize,
}

#[get("/health")]
async fn health() -> &'static str {
    "OK"
}

#[get("/api/v1/generator/status")]
async fn generator_status(state: &State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        running: state.engine.is_running().await,
        stopping: state.engine.is_stopping().await,
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
        log_subscribers: state.broadcaster.subscriber_count(),
    })
}

fn control_error(e: EngineError, running: bool) -> Custom<Json<ControlResponse>> {
    let status = match e {
        EngineError::AlreadyRunning | EngineError::NotRunning | EngineError::Stopping => {
            Status::Conflict
        }
        EngineError::Startup(_) => Status::InternalServerError,
    };
    Custom(
        status,
        Json(ControlResponse {
            status: "rejected",
            running,
            error: Some(e.to_string()),
        }),
    )
}

#[post("/api/v1/generator/start")]
async fn start_generator(state: &State<AppState>) -> Custom<Json<ControlResponse>> {
    match state.engine.start().await {
        Ok(()) => Custom(
            Status::Ok,
            Json(ControlResponse {
                status: "started",
                running: true,
                error: None,
            }),
        ),
        Err(e) => {
            let running = state.engine.is_running().await;
            control_error(e, running)
        }
    }
}

#[post("/api/v1/generator/stop")]
async fn stop_generator(state: &State<AppState>) -> Custom<Json<ControlResponse>> {
    match state.engine.stop().await {
        Ok(()) => Custom(
            Status::Ok,
            Json(ControlResponse {
                status: "stopped",
                running: false,
                error: None,
            }),
        ),
        Err(e) => control_error(e, false),
    }
}

/// Server-sent log lines: recent history first, then live events.
#[get("/api/v1/generator/logs")]
fn generator_logs(state: &State<AppState>, mut shutdown: Shutdown) -> EventStream![] {
    let mut subscription = state.broadcaster.subscribe();
    EventStream! {
        loop {
            let event = select! {
                event = subscription.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                _ = &mut shutdown => break,
            };
            yield Event::data(event.to_line()).event(event.severity.as_str().to_lowercase());
        }
    }
}

/// Rocket instance with managed state and routes, not yet launched.
pub fn build_rocket(state: AppState, figment: Figment) -> Rocket<Build> {
    rocket::custom(figment).manage(state).mount(
        "/",
        routes![
            health,
            generator_status,
            start_generator,
            stop_generator,
            generator_logs,
        ],
    )
}

/// Launches the control surface and blocks until Rocket shuts down (ctrl-c included).
///
/// `[server] bind` and `port` override Rocket's own configuration.
pub async fn launch_control_server(
    state: AppState,
    server: Option<&common::ServerConfig>,
) -> Result<()> {
    let mut fig = rocket::Config::figment();
    if let Some(server) = server {
        if let Some(bind) = &server.bind {
            fig = fig.merge(("address", bind.clone()));
        }
        if let Some(port) = server.port {
            fig = fig.merge(("port", port));
        }
    }

    tracing::info!("starting control server");
    build_rocket(state, fig)
        .launch()
        .await
        .map_err(|e| anyhow!("Rocket failed: {}", e))?;

    tracing::info!("control server has shut down");
    Ok(())
}

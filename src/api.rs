use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::JoinHandle;

use crate::cycle::{Cycle, RunOutcome};
use crate::routes::RouteSummary;
use crate::scanner::{HarvestScanner, HarvestTarget};
use crate::state::{AppStateInner, RunControl, RunPhase, Shared};

pub fn router(shared: Shared) -> Router {
    Router::new()
        .route("/start", post(start_run))
        .route("/stop", post(stop_run))
        .route("/status", get(get_status))
        .route("/routes", get(get_routes))
        .route("/screenshot", get(get_screenshot))
        .route("/detect", get(detect_target))
        .with_state(shared)
}

fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), StatusCode> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if let Some(token) = auth.strip_prefix("Bearer ")
        && token == expected_token
    {
        return Ok(());
    }

    Err(StatusCode::UNAUTHORIZED)
}

async fn authorize(shared: &Shared, headers: &HeaderMap) -> Result<(), StatusCode> {
    let token = shared.app.lock().await.config.auth_token.clone();
    check_auth(headers, &token)
}

/// How long a run may go before it is stopped automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum RunDuration {
    #[serde(rename = "30m")]
    HalfHour,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "2h")]
    TwoHours,
    #[default]
    #[serde(rename = "max", alias = "Max")]
    Max,
}

impl RunDuration {
    pub fn limit(self) -> Option<Duration> {
        match self {
            RunDuration::HalfHour => Some(Duration::from_secs(30 * 60)),
            RunDuration::OneHour => Some(Duration::from_secs(60 * 60)),
            RunDuration::TwoHours => Some(Duration::from_secs(2 * 60 * 60)),
            RunDuration::Max => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub duration: RunDuration,
    pub starting_map: Option<String>,
}

async fn start_run(
    State(shared): State<Shared>,
    headers: HeaderMap,
    body: Option<Json<StartRequest>>,
) -> Result<impl IntoResponse, StatusCode> {
    authorize(&shared, &headers).await?;
    let request = body.map(|Json(r)| r).unwrap_or_default();

    let mut state = shared.app.lock().await;

    // A stopped run may still be finishing its last sleep
    if state.worker_active() {
        return Err(StatusCode::CONFLICT);
    }
    state.disarm_auto_stop();

    let starting_map = request
        .starting_map
        .or_else(|| state.config.starting_map.clone())
        .unwrap_or_else(|| shared.rig.routes.starting_map().to_string());

    shared.control.start();
    state.phase = RunPhase::Running;
    state.started_at = Some(Utc::now());
    state.finished_at = None;

    let worker = shared.clone();
    let config = state.config.clone();
    let map = starting_map.clone();
    state.run_handle = Some(tokio::spawn(async move {
        let outcome = match Cycle::new(&worker.rig, worker.control.clone(), &config, &map) {
            Ok(mut cycle) => cycle.run().await,
            Err(e) => {
                let reason = format!("Configuration error: {e}");
                tracing::error!("{reason}");
                worker.control.request_stop(Some(&reason));
                RunOutcome::Failed(reason)
            }
        };

        let mut state = worker.app.lock().await;
        state.phase = match outcome {
            RunOutcome::Stopped => RunPhase::Stopped,
            RunOutcome::Failed(_) => RunPhase::Failed,
        };
        state.finished_at = Some(Utc::now());
        state.disarm_auto_stop();
        tracing::info!("run finished: {outcome:?}");
    }));

    if let Some(limit) = request.duration.limit() {
        state.auto_stop_handle = Some(arm_auto_stop(shared.control.clone(), limit));
    }

    tracing::info!(
        "run started at {starting_map}, duration {:?}",
        request.duration
    );
    Ok(Json(json!({"status": "started", "starting_map": starting_map})))
}

/// Request a stop once `limit` has passed.
fn arm_auto_stop(control: Arc<RunControl>, limit: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(limit).await;
        control.request_stop(Some("Run time limit reached"));
    })
}

async fn stop_run(
    State(shared): State<Shared>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    authorize(&shared, &headers).await?;

    let mut state = shared.app.lock().await;
    state.disarm_auto_stop();
    let stopped = shared.control.request_stop(None);

    Ok(Json(json!({
        "status": if stopped { "stopping" } else { "not_running" }
    })))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub phase: RunPhase,
    pub running: bool,
    pub current_map: Option<String>,
    pub resources_collected: u64,
    pub status: String,
    pub stop_reason: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub elapsed_secs: Option<i64>,
}

/// Line shown to the operator: live status while running, the stop reason after.
pub fn display_status(phase: RunPhase, live: &str, stop_reason: Option<&str>) -> String {
    match phase {
        RunPhase::Idle | RunPhase::Running => live.to_string(),
        RunPhase::Stopped | RunPhase::Failed => stop_reason
            .unwrap_or("Stopped collecting water")
            .to_string(),
    }
}

fn status_response(state: &AppStateInner, shared: &Shared) -> StatusResponse {
    let stop_reason = shared.control.stop_reason();
    StatusResponse {
        phase: state.phase,
        running: shared.control.is_running(),
        current_map: shared.control.current_map(),
        resources_collected: shared.control.resource_count(),
        status: display_status(state.phase, &shared.operator.current(), stop_reason.as_deref()),
        stop_reason,
        started_at: state.started_at,
        elapsed_secs: state.elapsed_secs(Utc::now()),
    }
}

async fn get_status(
    State(shared): State<Shared>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    let state = shared.app.lock().await;
    check_auth(&headers, &state.config.auth_token)?;
    Ok(Json(status_response(&state, &shared)))
}

#[derive(Serialize)]
struct RoutesResponse {
    starting_map: String,
    map_order: Vec<String>,
    routes: Vec<RouteSummary>,
}

async fn get_routes(
    State(shared): State<Shared>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    authorize(&shared, &headers).await?;

    let routes = &shared.rig.routes;
    Ok(Json(RoutesResponse {
        starting_map: routes.starting_map().to_string(),
        map_order: routes.order().to_vec(),
        routes: routes.summary(),
    }))
}

async fn get_screenshot(
    State(shared): State<Shared>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    authorize(&shared, &headers).await?;

    let screen = shared.rig.screen.clone();
    let png_bytes = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<u8>> {
        let frame = screen.capture()?;
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(frame).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        Ok(bytes)
    })
    .await
    .map_err(|e| {
        tracing::error!("screenshot task panicked: {e}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|e| {
        tracing::error!("screenshot failed: {e:#}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok((
        [
            (header::CONTENT_TYPE, "image/png".to_owned()),
            (header::CONTENT_DISPOSITION, "inline; filename=\"screenshot.png\"".to_owned()),
        ],
        png_bytes,
    ))
}

#[derive(Serialize)]
struct DetectResponse {
    found: bool,
    threshold: f32,
    target: Option<HarvestTarget>,
}

async fn detect_target(
    State(shared): State<Shared>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    let config = {
        let state = shared.app.lock().await;
        check_auth(&headers, &state.config.auth_token)?;
        state.config.clone()
    };

    let scanner = HarvestScanner::new(
        shared.rig.screen.clone(),
        shared.rig.templates.clone(),
        shared.control.clone(),
        config.matching.clone(),
        config.timing.clone(),
    );

    let target = scanner.locate_first().await.map_err(|e| {
        tracing::error!("detect failed: {e:#}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(DetectResponse {
        found: target.is_some(),
        threshold: config.matching.confidence,
        target,
    }))
}

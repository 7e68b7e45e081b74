//! HTTP request handlers

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::activation::event::ActivationFeed;
use crate::activation::fsm::ActivationState;
use crate::activation::request::ActivationRequest;
use crate::activation::reset::ResetOutcome;
use crate::errors::AgentError;
use crate::server::state::ServerState;
use crate::status::reconciler::{DeviceStatus, StatusSnapshot};
use crate::system::power::{request_power_action, PowerAction};
use crate::utils::version_info;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        let status = match &self {
            AgentError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AgentError::Busy(_) => StatusCode::CONFLICT,
            AgentError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "molly-wizard".to_string(),
        version: version_info().version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    Json(version_info())
}

/// Which view the presentation layer should show
#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceViewResponse {
    pub configured: bool,
    pub device_name: Option<String>,
    pub view: String,
}

/// Setup form until a device config exists, dashboard afterwards. Health of
/// the network or stack does not matter here.
pub async fn device_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let device_name = match state.config_store.load().await {
        Ok(config) => config.map(|c| c.device_name),
        Err(e) => {
            warn!("Device config unreadable: {}", e);
            None
        }
    };
    let configured = state.config_store.exists().await;

    Json(DeviceViewResponse {
        configured,
        device_name,
        view: (if configured { "dashboard" } else { "setup" }).to_string(),
    })
}

/// Online flag and overlay address
pub async fn status_handler(State(state): State<Arc<ServerState>>) -> Json<DeviceStatus> {
    Json(state.reconciler.get_status().await)
}

/// Full snapshot plus the activation pipeline state
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusDetailResponse {
    #[serde(flatten)]
    pub snapshot: StatusSnapshot,
    pub activation: ActivationState,
    pub activation_in_progress: bool,
}

pub async fn status_detail_handler(
    State(state): State<Arc<ServerState>>,
) -> Json<StatusDetailResponse> {
    let snapshot = state.reconciler.query().await;
    Json(StatusDetailResponse {
        snapshot,
        activation: state.orchestrator.state().await,
        activation_in_progress: state.orchestrator.is_busy(),
    })
}

/// Query string of the streaming endpoint
#[derive(Debug, Default, Deserialize)]
pub struct ActivateQuery {
    pub key: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub test: bool,
}

/// JSON body of the activation endpoint
#[derive(Debug, Default, Deserialize)]
pub struct ActivateBody {
    #[serde(default)]
    pub auth_token: String,
    #[serde(default)]
    pub device_name: String,
    #[serde(default)]
    pub test_mode: bool,
}

/// `GET /activate/stream?key=..&name=..[&test=true]`, for `EventSource`
pub async fn activate_stream_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<ActivateQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AgentError> {
    let body = ActivateBody {
        auth_token: query.key.unwrap_or_default(),
        device_name: query.name.unwrap_or_default(),
        test_mode: query.test,
    };
    start_activation(&state, body).await
}

/// `POST /activate` with a JSON body
pub async fn activate_handler(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<ActivateBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AgentError> {
    start_activation(&state, body).await
}

async fn start_activation(
    state: &ServerState,
    body: ActivateBody,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AgentError> {
    let request = if body.test_mode {
        ActivationRequest::test_run(Some(body.device_name.as_str()))
    } else {
        let device_name = match body.device_name.trim() {
            "" => state.default_device_name.as_str(),
            name => name,
        };
        ActivationRequest::new(body.auth_token, device_name, false)?
    };

    let feed = state.orchestrator.activate(request).await?;
    Ok(sse_feed(feed))
}

/// One SSE event per activation event: id = sequence, event = channel
fn sse_feed(feed: ActivationFeed) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = feed.map(|event| {
        Ok(Event::default()
            .id(event.sequence.to_string())
            .event(event.channel.as_str())
            .data(event.text))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Reset handler
pub async fn reset_handler(State(state): State<Arc<ServerState>>) -> Json<ResetOutcome> {
    Json(state.orchestrator.reset_device().await)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PowerResponse {
    pub status: String,
}

/// `POST /system/{action}`, acknowledged as soon as the command is dispatched
pub async fn power_handler(
    State(state): State<Arc<ServerState>>,
    Path(action): Path<String>,
) -> Result<Json<PowerResponse>, AgentError> {
    let action: PowerAction = action.parse()?;
    request_power_action(state.runner.as_ref(), state.use_sudo, action)?;
    info!("{} command sent", action);
    Ok(Json(PowerResponse {
        status: "command_sent".to_string(),
    }))
}

//! HTTP handlers: publish an event and health.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::json;
use std::time::Duration;
use validator::Validate;

use crate::error::AppError;
use crate::models::channel::{Channel, ChannelKind};
use crate::models::event::RelayEvent;
use crate::services::ChannelService;

/// Shared application state for the HTTP and SSE handlers.
#[derive(Clone)]
pub struct AppState {
    pub channel_service: ChannelService,
    pub sse_keepalive: Duration,
}

pub(crate) fn parse_channel(name: &str) -> Result<Channel, AppError> {
    Channel::from_name(name).ok_or_else(|| AppError::InvalidChannel(name.to_string()))
}

/// POST /api/events/:channel — publish one event to every stream on the channel.
///
/// The body is a single event object. Events on a `project.*` channel without
/// a `projectId` are stamped with the channel's id.
pub async fn publish(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: String,
) -> Result<Json<serde_json::Value>, AppError> {
    let channel = parse_channel(&name)?;
    let mut event = RelayEvent::from_json(&body)?;
    event
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    if !event.progress_in_range() {
        return Err(AppError::Validation(
            "progress must be between 0 and 100".to_string(),
        ));
    }
    if event.project_id.is_none() && channel.kind == ChannelKind::Project {
        event.project_id = Some(channel.id.clone());
    }

    let count = state.channel_service.publish(&channel, &event).await?;

    Ok(Json(json!({
        "ok": true,
        "channel": channel.to_string(),
        "type": event.type_name(),
        "subscriber_count": count
    })))
}

/// GET /health — liveness probe.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let channels = state.channel_service.channel_count().await;
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "service": "relay", "channels": channels })),
    )
}

//! SSE handler: stream a channel's events to one client.

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream, StreamExt};
use std::convert::Infallible;
use tokio::sync::broadcast::{error::RecvError, Receiver};
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::handlers::http::{parse_channel, AppState};
use crate::models::channel::{Channel, ChannelKind};
use crate::models::event::{EventKind, RelayEvent};
use crate::services::ChannelService;

/// GET /api/events/:channel — open an event stream for `file.<id>` or `project.<id>`.
///
/// The first frame is a `connected` event; every published event follows as
/// an unnamed `data:` frame.
pub async fn events(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let channel = parse_channel(&name)?;
    let rx = state.channel_service.subscribe(&channel).await?;
    info!(channel = %channel, "sse connected");

    let hello = Event::default()
        .json_data(connected_event(&channel))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("encode connected event: {}", e)))?;

    let guard = ReleaseOnDrop {
        service: state.channel_service.clone(),
        channel,
    };
    let live = stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let payload = next_payload(&mut rx, &guard.channel).await?;
        Some((Ok::<_, Infallible>(Event::default().data(payload)), (rx, guard)))
    });
    let stream = stream::once(async move { Ok::<_, Infallible>(hello) }).chain(live);

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(state.sse_keepalive)))
}

fn connected_event(channel: &Channel) -> RelayEvent {
    let mut event = RelayEvent::new(EventKind::Connected);
    match channel.kind {
        ChannelKind::Project => event.project_id = Some(channel.id.clone()),
        ChannelKind::File => event.id = Some(channel.id.clone()),
    }
    event
}

async fn next_payload(rx: &mut Receiver<String>, channel: &Channel) -> Option<String> {
    loop {
        match rx.recv().await {
            Ok(payload) => return Some(payload),
            Err(RecvError::Lagged(skipped)) => {
                warn!(channel = %channel, skipped, "sse client lagging, events skipped");
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

/// Releases the channel once a client's stream is dropped.
struct ReleaseOnDrop {
    service: ChannelService,
    channel: Channel,
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        debug!(channel = %self.channel, "sse disconnected");
        let service = self.service.clone();
        let channel = self.channel.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { service.release(&channel).await });
        }
    }
}

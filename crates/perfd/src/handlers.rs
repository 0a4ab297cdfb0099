//! HTTP request handlers: API endpoints and SSE event streaming.

use std::convert::Infallible;
use std::sync::atomic::Ordering;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use perfd_core::command::{Command, CommandError};
use perfd_core::event::{Event, EventGroup};
use perfd_core::event_buffer::EventWriter;
use perfd_core::service::{EventsRequest, ExecuteResponse, GroupsRequest};
use perfd_core::session::SessionInfo;

use crate::state::{AppState, SSE_CONNECTIONS};

/// Events buffered per stream between the reader thread and the socket.
const STREAM_CHANNEL_SIZE: usize = 256;

// ============================================================
// Health and time
// ============================================================

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
    version: &'static str,
    started_at: String,
    uptime_secs: i64,
    active_sessions: usize,
    buffered_events: usize,
    events_added: u64,
    stream_connections: usize,
}

pub(crate) async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let daemon = state.service.daemon();
    let active_sessions = daemon
        .sessions()
        .iter()
        .filter(|info| info.is_active())
        .count();
    Json(HealthResponse {
        status: "ok",
        version: perfd_core::VERSION,
        started_at: state.started_at.to_rfc3339(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        active_sessions,
        buffered_events: daemon.buffer().size(),
        events_added: daemon.buffer().events_added(),
        stream_connections: SSE_CONNECTIONS.load(Ordering::Relaxed),
    })
}

#[derive(Serialize)]
pub(crate) struct TimeResponse {
    timestamp: i64,
}

pub(crate) async fn handle_time(State(state): State<AppState>) -> Json<TimeResponse> {
    Json(TimeResponse {
        timestamp: state.service.get_current_time(),
    })
}

// ============================================================
// Queries and commands
// ============================================================

pub(crate) async fn handle_groups(
    State(state): State<AppState>,
    Query(request): Query<GroupsRequest>,
) -> Json<Vec<EventGroup>> {
    Json(state.service.get_event_groups(&request))
}

pub(crate) async fn handle_sessions(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(state.service.sessions())
}

fn command_status(e: &CommandError) -> StatusCode {
    match e {
        CommandError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        CommandError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
    }
}

pub(crate) async fn handle_execute(
    State(state): State<AppState>,
    Json(command): Json<Command>,
) -> Result<Json<ExecuteResponse>, (StatusCode, String)> {
    // Ending a session joins its sampler threads.
    let service = state.service.clone();
    let result = tokio::task::spawn_blocking(move || service.execute(command))
        .await
        .map_err(|e| {
            error!(error = %e, "command task failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;
    result
        .map(Json)
        .map_err(|e| (command_status(&e), e.to_string()))
}

// ============================================================
// Event stream
// ============================================================

struct SseGuard;

impl Drop for SseGuard {
    fn drop(&mut self) {
        let active = SSE_CONNECTIONS.fetch_sub(1, Ordering::Relaxed) - 1;
        info!(active_connections = active, "event stream disconnected");
    }
}

fn to_sse(event: &Event) -> Option<SseEvent> {
    match serde_json::to_string(event) {
        Ok(json) => Some(SseEvent::default().event(event.kind.as_str()).data(json)),
        Err(e) => {
            error!(error = %e, "failed to serialize event");
            None
        }
    }
}

/// Feeds a connection's channel from the blocking reader thread.
struct ChannelWriter {
    tx: mpsc::Sender<Event>,
}

impl EventWriter for ChannelWriter {
    fn write(&mut self, event: &Event) -> bool {
        self.tx.blocking_send(event.clone()).is_ok()
    }

    fn is_connected(&mut self) -> bool {
        !self.tx.is_closed()
    }
}

/// Streams buffered and live events as server-sent events.
///
/// Each connection parks one blocking thread in the event buffer. The thread
/// exits on daemon shutdown, or soon after the client left, whether or not
/// its filter matches anything.
pub(crate) async fn handle_events(
    State(state): State<AppState>,
    Query(request): Query<EventsRequest>,
) -> Sse<impl futures_core::Stream<Item = Result<SseEvent, Infallible>>> {
    let active = SSE_CONNECTIONS.fetch_add(1, Ordering::Relaxed) + 1;
    info!(active_connections = active, live_only = request.live_only, "event stream connected");

    let (tx, mut rx) = mpsc::channel::<Event>(STREAM_CHANNEL_SIZE);
    let service = state.service.clone();
    tokio::task::spawn_blocking(move || {
        let end = service.get_events(&request, &mut ChannelWriter { tx });
        debug!(?end, "event writer detached");
    });

    let stream = async_stream::stream! {
        let _guard = SseGuard;
        while let Some(event) = rx.recv().await {
            if let Some(sse) = to_sse(&event) {
                yield Ok(sse);
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use perfd_core::event::{EventKind, EventPayload};

    #[test]
    fn test_command_errors_map_to_status() {
        assert_eq!(command_status(&CommandError::SessionNotFound(1)), StatusCode::NOT_FOUND);
        assert_eq!(
            command_status(&CommandError::InvalidArgument("x".into())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_channel_writer_reports_closed_client() {
        let (tx, rx) = mpsc::channel::<Event>(1);
        let mut writer = ChannelWriter { tx };
        assert!(writer.is_connected());
        assert!(writer.write(&Event::new(EventKind::Echo, 1)));

        drop(rx);
        assert!(!writer.is_connected());
        assert!(!writer.write(&Event::new(EventKind::Echo, 2)));
    }

    #[test]
    fn test_event_serializes_for_stream() {
        let event = Event::new(EventKind::Echo, 3).with_payload(EventPayload::Echo { data: "hi".into() });
        assert!(to_sse(&event).is_some());

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "ECHO");
        assert_eq!(json["payload"]["type"], "echo");
        assert_eq!(json["payload"]["data"], "hi");
    }
}

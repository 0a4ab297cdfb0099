//! Transport-neutral facade over the daemon.
//!
//! Network layers bind their endpoints to [`TransportService`]; nothing here
//! knows about sockets or wire formats beyond serde derives.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::command::{Command, CommandError};
use crate::daemon::Daemon;
use crate::event::{Event, EventGroup, EventKind};
use crate::event_buffer::{EventWriter, StreamEnd};
use crate::session::SessionInfo;

/// Filters of an event stream. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsRequest {
    pub kind: Option<EventKind>,
    pub pid: Option<i32>,
    pub session_id: Option<i64>,
    /// Skip the replay of retained events.
    pub live_only: bool,
}

impl EventsRequest {
    fn matches(&self, event: &Event) -> bool {
        self.kind.is_none_or(|kind| kind == event.kind)
            && self.pid.is_none_or(|pid| pid == event.pid)
            && self.session_id.is_none_or(|id| id == event.session_id)
    }
}

/// Group query over the window `(from, to]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupsRequest {
    pub kind: EventKind,
    #[serde(default = "default_from")]
    pub from: i64,
    #[serde(default = "default_to")]
    pub to: i64,
    #[serde(default)]
    pub pid: Option<i32>,
    #[serde(default)]
    pub group_id: Option<i64>,
}

fn default_from() -> i64 {
    i64::MIN
}

fn default_to() -> i64 {
    i64::MAX
}

impl GroupsRequest {
    /// Every group of `kind`, unbounded in time.
    pub fn all(kind: EventKind) -> Self {
        Self {
            kind,
            from: default_from(),
            to: default_to(),
            pid: None,
            group_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    /// Daemon time after the command was applied.
    pub timestamp: i64,
    /// Active session of the command's stream after the command.
    pub session: Option<SessionInfo>,
}

/// Forwards the events a request matches. Skipped events still check that
/// the inner writer is connected.
struct Filtered<'a, W: ?Sized> {
    request: &'a EventsRequest,
    writer: &'a mut W,
}

impl<W: EventWriter + ?Sized> EventWriter for Filtered<'_, W> {
    fn write(&mut self, event: &Event) -> bool {
        if self.request.matches(event) {
            self.writer.write(event)
        } else {
            self.writer.is_connected()
        }
    }

    fn is_connected(&mut self) -> bool {
        self.writer.is_connected()
    }
}

#[derive(Clone)]
pub struct TransportService {
    daemon: Arc<Daemon>,
}

impl TransportService {
    pub fn new(daemon: Arc<Daemon>) -> Self {
        Self { daemon }
    }

    pub fn daemon(&self) -> &Arc<Daemon> {
        &self.daemon
    }

    /// Streams matching events into `writer` until it disconnects or the
    /// daemon shuts down. Blocks the calling thread.
    pub fn get_events<W: EventWriter + ?Sized>(&self, request: &EventsRequest, writer: &mut W) -> StreamEnd {
        let mut filtered = Filtered { request, writer };
        let buffer = self.daemon.buffer();
        if request.live_only {
            buffer.write_live_events_to(&mut filtered)
        } else {
            buffer.write_events_to(&mut filtered)
        }
    }

    pub fn get_event_groups(&self, request: &GroupsRequest) -> Vec<EventGroup> {
        let mut groups = self
            .daemon
            .buffer()
            .get(request.kind, request.from, request.to);
        if let Some(group_id) = request.group_id {
            groups.retain(|group| group.group_id == group_id);
        }
        // Groups such as network traffic mix processes; keep only `pid`'s events.
        if let Some(pid) = request.pid {
            for group in &mut groups {
                group.events.retain(|event| event.pid == pid);
            }
            groups.retain(|group| !group.events.is_empty());
        }
        groups
    }

    pub fn execute(&self, command: Command) -> Result<ExecuteResponse, CommandError> {
        let stream_id = command.stream_id;
        self.daemon.execute(command)?;
        Ok(ExecuteResponse {
            timestamp: self.get_current_time(),
            session: self.daemon.get_active_session(stream_id),
        })
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.daemon.sessions()
    }

    pub fn get_current_time(&self) -> i64 {
        self.daemon.clock().get_current_time()
    }

    pub fn shutdown(&self) {
        self.daemon.shutdown();
    }
}

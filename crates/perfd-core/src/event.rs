//! Telemetry event model.
//!
//! An [`Event`] is immutable once stored. Events sharing `(kind, group_id)`
//! form an [`EventGroup`], reconstructed on demand by the event buffer.

use serde::{Deserialize, Serialize};

/// Group id shared by all outgoing-traffic network speed events.
pub const NETWORK_TX_GROUP: i64 = 1;
/// Group id shared by all incoming-traffic network speed events.
pub const NETWORK_RX_GROUP: i64 = 2;

/// Payload type of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Session,
    Process,
    Agent,
    Echo,
    CpuUsage,
    CpuThread,
    MemoryUsage,
    MemoryHeapDump,
    NetworkSpeed,
    NetworkConnections,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Session => "SESSION",
            EventKind::Process => "PROCESS",
            EventKind::Agent => "AGENT",
            EventKind::Echo => "ECHO",
            EventKind::CpuUsage => "CPU_USAGE",
            EventKind::CpuThread => "CPU_THREAD",
            EventKind::MemoryUsage => "MEMORY_USAGE",
            EventKind::MemoryHeapDump => "MEMORY_HEAP_DUMP",
            EventKind::NetworkSpeed => "NETWORK_SPEED",
            EventKind::NetworkConnections => "NETWORK_CONNECTIONS",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s.to_ascii_uppercase().as_str() {
            "SESSION" => EventKind::Session,
            "PROCESS" => EventKind::Process,
            "AGENT" => EventKind::Agent,
            "ECHO" => EventKind::Echo,
            "CPU_USAGE" => EventKind::CpuUsage,
            "CPU_THREAD" => EventKind::CpuThread,
            "MEMORY_USAGE" => EventKind::MemoryUsage,
            "MEMORY_HEAP_DUMP" => EventKind::MemoryHeapDump,
            "NETWORK_SPEED" => EventKind::NetworkSpeed,
            "NETWORK_CONNECTIONS" => EventKind::NetworkConnections,
            other => return Err(format!("unknown event kind '{}'", other)),
        };
        Ok(kind)
    }
}

/// Scheduling state of a thread as reported by `/proc/<pid>/task/<tid>/stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreadState {
    Running,
    Sleeping,
    Waiting,
    Zombie,
    Stopped,
    Tracing,
    Paging,
    Dead,
    Unspecified,
}

impl ThreadState {
    /// Maps the single-letter state code of a stat file.
    pub fn from_code(code: char) -> Self {
        match code {
            'R' => ThreadState::Running,
            'S' => ThreadState::Sleeping,
            'D' => ThreadState::Waiting,
            'Z' => ThreadState::Zombie,
            'T' => ThreadState::Stopped,
            't' => ThreadState::Tracing,
            'W' => ThreadState::Paging,
            'X' | 'x' => ThreadState::Dead,
            _ => ThreadState::Unspecified,
        }
    }
}

/// Liveness of the in-app agent of a profiled process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    #[default]
    Unspecified,
    Attaching,
    Attached,
    Detached,
    Unattachable,
}

/// Kind-specific event data.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    #[default]
    None,
    SessionStarted {
        stream_id: i64,
        pid: i32,
        start_timestamp: i64,
        process_name: String,
    },
    SessionEnded,
    Process {
        name: String,
        state: String,
    },
    AgentStatus {
        status: AgentStatus,
    },
    Echo {
        data: String,
    },
    CpuUsage {
        /// CPU time consumed by the whole system, all cores.
        system_cpu_time_ms: u64,
        /// CPU time consumed by the profiled process.
        app_cpu_time_ms: u64,
        /// Wall time covered by the two counters above.
        elapsed_time_ms: u64,
    },
    CpuThread {
        tid: i32,
        name: String,
        state: ThreadState,
    },
    MemoryUsage {
        rss_kb: u64,
        swap_kb: u64,
        vm_size_kb: u64,
        threads: u32,
    },
    HeapDump {
        start_time: i64,
        end_time: i64,
        success: bool,
    },
    NetworkSpeed {
        throughput_bytes_per_sec: u64,
    },
    NetworkConnections {
        num_connections: u32,
    },
}

/// A single telemetry record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    /// Nanoseconds, assigned by the event buffer when stored.
    pub timestamp: i64,
    pub group_id: i64,
    /// Marks the terminal event of a group.
    pub is_ended: bool,
    pub pid: i32,
    pub session_id: i64,
    pub payload: EventPayload,
}

impl Event {
    /// Creates an open event with no payload and no scoping.
    pub fn new(kind: EventKind, group_id: i64) -> Self {
        Self {
            kind,
            timestamp: 0,
            group_id,
            is_ended: false,
            pid: 0,
            session_id: 0,
            payload: EventPayload::None,
        }
    }

    pub fn with_payload(mut self, payload: EventPayload) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_pid(mut self, pid: i32) -> Self {
        self.pid = pid;
        self
    }

    pub fn with_session(mut self, session_id: i64) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn ended(mut self) -> Self {
        self.is_ended = true;
        self
    }
}

/// All retained events of one `(kind, group_id)` pair, in storage order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventGroup {
    pub group_id: i64,
    pub kind: EventKind,
    pub events: Vec<Event>,
}

impl EventGroup {
    /// True once any retained event of the group is a terminal event.
    pub fn is_closed(&self) -> bool {
        self.events.iter().any(|e| e.is_ended)
    }

    pub fn first_timestamp(&self) -> Option<i64> {
        self.events.first().map(|e| e.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.events.last().map(|e| e.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in [
            EventKind::Session,
            EventKind::CpuThread,
            EventKind::MemoryHeapDump,
            EventKind::NetworkConnections,
        ] {
            assert_eq!(kind.as_str().parse::<EventKind>(), Ok(kind));
        }
        assert_eq!("cpu_usage".parse::<EventKind>(), Ok(EventKind::CpuUsage));
        assert!("bogus".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_thread_state_codes() {
        assert_eq!(ThreadState::from_code('R'), ThreadState::Running);
        assert_eq!(ThreadState::from_code('S'), ThreadState::Sleeping);
        assert_eq!(ThreadState::from_code('D'), ThreadState::Waiting);
        assert_eq!(ThreadState::from_code('X'), ThreadState::Dead);
        assert_eq!(ThreadState::from_code('?'), ThreadState::Unspecified);
    }

    #[test]
    fn test_group_closed_and_span() {
        let mut first = Event::new(EventKind::CpuThread, 5);
        first.timestamp = 10;
        let mut last = Event::new(EventKind::CpuThread, 5).ended();
        last.timestamp = 30;

        let group = EventGroup {
            group_id: 5,
            kind: EventKind::CpuThread,
            events: vec![first, last],
        };
        assert!(group.is_closed());
        assert_eq!(group.first_timestamp(), Some(10));
        assert_eq!(group.last_timestamp(), Some(30));
    }

    #[test]
    fn test_event_json_shape() {
        let event = Event::new(EventKind::Echo, 7)
            .with_pid(42)
            .with_payload(EventPayload::Echo {
                data: "hi".to_string(),
            });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "ECHO");
        assert_eq!(json["payload"]["type"], "echo");
        assert_eq!(json["payload"]["data"], "hi");
    }
}

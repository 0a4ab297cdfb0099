//! Commands accepted by the daemon.

use serde::{Deserialize, Serialize};

/// A request addressed to the daemon by a connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Device stream the command targets.
    pub stream_id: i64,
    /// Process the command targets.
    pub pid: i32,
    #[serde(flatten)]
    pub kind: CommandKind,
}

impl Command {
    pub fn new(stream_id: i64, pid: i32, kind: CommandKind) -> Self {
        Self {
            stream_id,
            pid,
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandKind {
    BeginSession {
        #[serde(default)]
        process_name: String,
    },
    EndSession {
        session_id: i64,
    },
    Echo {
        data: String,
    },
    AttachAgent {
        agent_lib: String,
    },
    AgentHeartbeat,
    DetachAgent,
}

impl CommandKind {
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::BeginSession { .. } => "begin_session",
            CommandKind::EndSession { .. } => "end_session",
            CommandKind::Echo { .. } => "echo",
            CommandKind::AttachAgent { .. } => "attach_agent",
            CommandKind::AgentHeartbeat => "agent_heartbeat",
            CommandKind::DetachAgent => "detach_agent",
        }
    }
}

/// Why a command was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    SessionNotFound(i64),
    InvalidArgument(String),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::SessionNotFound(id) => write!(f, "session {} not found", id),
            CommandError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
        }
    }
}

impl std::error::Error for CommandError {}

//! Liveness tracking for in-app agents.
//!
//! One registry is owned by the daemon and shared with every session's agent
//! status sampler. An attached agent that stops sending heartbeats for longer
//! than the timeout is reported as detached.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::event::AgentStatus;

#[derive(Debug, Clone, Copy)]
struct AgentRecord {
    status: AgentStatus,
    last_heartbeat: i64,
}

/// Registry of agent states keyed by process id.
#[derive(Debug)]
pub struct AgentRegistry {
    heartbeat_timeout_ns: i64,
    agents: Mutex<HashMap<i32, AgentRecord>>,
}

impl AgentRegistry {
    pub fn new(heartbeat_timeout_ns: i64) -> Self {
        Self {
            heartbeat_timeout_ns,
            agents: Mutex::new(HashMap::new()),
        }
    }

    fn update(&self, pid: i32, status: AgentStatus, now: i64) {
        let mut agents = self.agents.lock().unwrap_or_else(|e| e.into_inner());
        agents.insert(
            pid,
            AgentRecord {
                status,
                last_heartbeat: now,
            },
        );
    }

    /// Records that an attach request was sent to `pid`.
    pub fn mark_attaching(&self, pid: i32, now: i64) {
        self.update(pid, AgentStatus::Attaching, now);
    }

    /// Records a heartbeat; an agent that sends one is attached.
    pub fn heartbeat(&self, pid: i32, now: i64) {
        self.update(pid, AgentStatus::Attached, now);
    }

    pub fn mark_unattachable(&self, pid: i32, now: i64) {
        self.update(pid, AgentStatus::Unattachable, now);
    }

    pub fn detach(&self, pid: i32, now: i64) {
        self.update(pid, AgentStatus::Detached, now);
    }

    /// Current status of the agent of `pid` as of `now`.
    pub fn status(&self, pid: i32, now: i64) -> AgentStatus {
        let agents = self.agents.lock().unwrap_or_else(|e| e.into_inner());
        match agents.get(&pid) {
            None => AgentStatus::Unspecified,
            Some(record)
                if record.status == AgentStatus::Attached
                    && now - record.last_heartbeat > self.heartbeat_timeout_ns =>
            {
                AgentStatus::Detached
            }
            Some(record) => record.status,
        }
    }

    /// Forgets the agent of `pid`.
    pub fn remove(&self, pid: i32) {
        let mut agents = self.agents.lock().unwrap_or_else(|e| e.into_inner());
        agents.remove(&pid);
    }
}

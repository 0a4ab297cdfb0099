//! Agent liveness sampler.

use crate::event::{AgentStatus, Event, EventKind, EventPayload};
use crate::session::SessionInfo;

use super::{SampleError, SampleTask, SamplerContext};

/// Publishes an `AGENT` event whenever the agent status of the session's
/// process changes, including heartbeat timeouts.
///
/// The status is compared with the latest `AGENT` event of the process, so
/// changes already published by command handlers are not repeated.
pub struct AgentStatusSampler {
    ctx: SamplerContext,
    pid: i32,
    session_id: i64,
}

impl AgentStatusSampler {
    pub fn new(ctx: SamplerContext, session: &SessionInfo) -> Self {
        Self {
            ctx,
            pid: session.pid,
            session_id: session.session_id,
        }
    }

    fn published(&self) -> AgentStatus {
        self.ctx
            .buffer
            .get_group(EventKind::Agent, self.pid as i64)
            .and_then(|group| group.events.last().map(|event| event.payload.clone()))
            .map(|payload| match payload {
                EventPayload::AgentStatus { status } => status,
                _ => AgentStatus::Unspecified,
            })
            .unwrap_or_default()
    }
}

impl SampleTask for AgentStatusSampler {
    fn name(&self) -> &str {
        "agent-status"
    }

    fn sample(&mut self) -> Result<(), SampleError> {
        let now = self.ctx.clock.get_current_time();
        let status = self.ctx.agents.status(self.pid, now);
        if status == self.published() {
            return Ok(());
        }

        let event = Event::new(EventKind::Agent, self.pid as i64)
            .with_pid(self.pid)
            .with_session(self.session_id)
            .with_payload(EventPayload::AgentStatus { status });
        self.ctx.buffer.add(event);
        Ok(())
    }
}

//! Process memory sampler.

use crate::event::{Event, EventKind, EventPayload};
use crate::procfs::parser::parse_proc_status;
use crate::session::SessionInfo;

use super::{SampleError, SampleTask, SamplerContext};

/// Publishes resident, swapped and virtual memory of the profiled process.
pub struct MemoryUsageSampler {
    ctx: SamplerContext,
    pid: i32,
    session_id: i64,
}

impl MemoryUsageSampler {
    pub fn new(ctx: SamplerContext, session: &SessionInfo) -> Self {
        Self {
            ctx,
            pid: session.pid,
            session_id: session.session_id,
        }
    }
}

impl SampleTask for MemoryUsageSampler {
    fn name(&self) -> &str {
        "memory-usage"
    }

    fn sample(&mut self) -> Result<(), SampleError> {
        let status = parse_proc_status(&self.ctx.read(format!("{}/status", self.pid))?)?;

        let event = Event::new(EventKind::MemoryUsage, self.pid as i64)
            .with_pid(self.pid)
            .with_session(self.session_id)
            .with_payload(EventPayload::MemoryUsage {
                rss_kb: status.vm_rss,
                swap_kb: status.vm_swap,
                vm_size_kb: status.vm_size,
                threads: status.threads,
            });
        self.ctx.buffer.add(event);
        Ok(())
    }
}

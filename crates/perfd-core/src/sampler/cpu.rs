//! CPU usage and per-thread state samplers.

use std::collections::HashMap;
use std::io;

use crate::event::{Event, EventKind, EventPayload, ThreadState};
use crate::procfs::parser::{parse_cpu_ticks, parse_task_stat};
use crate::procfs::ticks_to_ms;
use crate::session::SessionInfo;

use super::{SampleError, SampleTask, SamplerContext};

/// Publishes cumulative system and process CPU time.
///
/// One `CPU_USAGE` event per sample, grouped by pid. Consumers derive usage
/// percentages from the deltas of consecutive events.
pub struct CpuUsageSampler {
    ctx: SamplerContext,
    pid: i32,
    session_id: i64,
}

impl CpuUsageSampler {
    pub fn new(ctx: SamplerContext, session: &SessionInfo) -> Self {
        Self {
            ctx,
            pid: session.pid,
            session_id: session.session_id,
        }
    }
}

impl SampleTask for CpuUsageSampler {
    fn name(&self) -> &str {
        "cpu-usage"
    }

    fn sample(&mut self) -> Result<(), SampleError> {
        let system = parse_cpu_ticks(&self.ctx.read("stat")?)?;
        let process = parse_task_stat(&self.ctx.read(format!("{}/stat", self.pid))?)?;

        let event = Event::new(EventKind::CpuUsage, self.pid as i64)
            .with_pid(self.pid)
            .with_session(self.session_id)
            .with_payload(EventPayload::CpuUsage {
                system_cpu_time_ms: ticks_to_ms(system.busy()),
                app_cpu_time_ms: ticks_to_ms(process.utime + process.stime),
                elapsed_time_ms: ticks_to_ms(system.total),
            });
        self.ctx.buffer.add(event);
        Ok(())
    }
}

/// Publishes thread state transitions of the profiled process.
///
/// Each thread is a group keyed by its tid. An event is emitted only when a
/// thread appears or changes state; a thread that disappears is closed with
/// a `DEAD` event.
pub struct CpuThreadSampler {
    ctx: SamplerContext,
    pid: i32,
    session_id: i64,
    /// Last published state and name per tid.
    previous: HashMap<i32, (ThreadState, String)>,
}

impl CpuThreadSampler {
    pub fn new(ctx: SamplerContext, session: &SessionInfo) -> Self {
        Self {
            ctx,
            pid: session.pid,
            session_id: session.session_id,
            previous: HashMap::new(),
        }
    }

    fn publish(&self, tid: i32, name: String, state: ThreadState) {
        let mut event = Event::new(EventKind::CpuThread, tid as i64)
            .with_pid(self.pid)
            .with_session(self.session_id)
            .with_payload(EventPayload::CpuThread { tid, name, state });
        if state == ThreadState::Dead {
            event = event.ended();
        }
        self.ctx.buffer.add(event);
    }
}

impl SampleTask for CpuThreadSampler {
    fn name(&self) -> &str {
        "cpu-threads"
    }

    fn sample(&mut self) -> Result<(), SampleError> {
        let task_dir = self.ctx.proc_path.join(format!("{}/task", self.pid));
        let mut entries = match self.ctx.fs.read_dir(&task_dir) {
            Ok(entries) => entries,
            // Process exited: every known thread is now dead.
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        entries.sort();

        let mut current = HashMap::new();
        for entry in entries {
            // A thread can exit between listing and reading.
            let Ok(content) = self.ctx.fs.read_to_string(&entry.join("stat")) else {
                continue;
            };
            let stat = parse_task_stat(&content)?;
            let state = ThreadState::from_code(stat.state);

            let changed = self
                .previous
                .get(&stat.id)
                .is_none_or(|(previous, _)| *previous != state);
            if changed {
                self.publish(stat.id, stat.comm.clone(), state);
            }
            // Dead threads stay tracked so they are reported once.
            current.insert(stat.id, (state, stat.comm));
        }

        let mut vanished: Vec<(i32, String)> = self
            .previous
            .iter()
            .filter(|(tid, _)| !current.contains_key(tid))
            .filter(|(_, (state, _))| *state != ThreadState::Dead)
            .map(|(tid, (_, name))| (*tid, name.clone()))
            .collect();
        vanished.sort();
        for (tid, name) in vanished {
            self.publish(tid, name, ThreadState::Dead);
        }

        self.previous = current;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentRegistry;
    use crate::clock::FakeClock;
    use crate::event_buffer::EventBuffer;
    use crate::procfs::MockFs;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn context(fs: &MockFs) -> (SamplerContext, Arc<FakeClock>) {
        let clock = Arc::new(FakeClock::new(0));
        let ctx = SamplerContext {
            buffer: Arc::new(EventBuffer::new(clock.clone(), 100, 100)),
            clock: clock.clone(),
            fs: Arc::new(fs.clone()),
            agents: Arc::new(AgentRegistry::new(1_000)),
            proc_path: PathBuf::from("/proc"),
        };
        (ctx, clock)
    }

    fn session() -> SessionInfo {
        SessionInfo::new(1, 42, 0)
    }

    #[test]
    fn test_cpu_usage_event() {
        let fs = MockFs::new();
        fs.add_file("/proc/stat", "cpu  100 0 100 700 100 0 0 0 0 0\n");
        fs.add_file(
            "/proc/42/stat",
            "42 (app) S 1 42 0 0 -1 0 0 0 0 0 30 20 0 0 20 0 5 0",
        );
        let (ctx, _clock) = context(&fs);
        let info = session();
        let mut sampler = CpuUsageSampler::new(ctx.clone(), &info);

        sampler.sample().unwrap();

        let group = ctx.buffer.get_group(EventKind::CpuUsage, 42).unwrap();
        let event = &group.events[0];
        assert_eq!(event.session_id, info.session_id);
        assert_eq!(
            event.payload,
            EventPayload::CpuUsage {
                system_cpu_time_ms: 2_000,
                app_cpu_time_ms: 500,
                elapsed_time_ms: 10_000,
            }
        );
    }

    #[test]
    fn test_cpu_usage_missing_process_fails() {
        let fs = MockFs::new();
        fs.add_file("/proc/stat", "cpu  1 2 3 4\n");
        let (ctx, _clock) = context(&fs);
        let mut sampler = CpuUsageSampler::new(ctx.clone(), &session());

        assert!(matches!(sampler.sample(), Err(SampleError::Io(_))));
        assert_eq!(ctx.buffer.size(), 0);
    }

    #[test]
    fn test_thread_events_only_on_change() {
        let fs = MockFs::new();
        fs.add_thread(42, 42, "main", 'R');
        fs.add_thread(42, 43, "worker", 'S');
        let (ctx, clock) = context(&fs);
        let mut sampler = CpuThreadSampler::new(ctx.clone(), &session());

        sampler.sample().unwrap();
        assert_eq!(ctx.buffer.size(), 2);

        clock.elapse(10);
        sampler.sample().unwrap();
        assert_eq!(ctx.buffer.size(), 2);

        clock.elapse(10);
        fs.add_thread(42, 43, "worker", 'R');
        sampler.sample().unwrap();
        let worker = ctx.buffer.get_group(EventKind::CpuThread, 43).unwrap();
        let states: Vec<_> = worker
            .events
            .iter()
            .map(|e| match &e.payload {
                EventPayload::CpuThread { state, .. } => *state,
                other => panic!("unexpected payload {:?}", other),
            })
            .collect();
        assert_eq!(states, vec![ThreadState::Sleeping, ThreadState::Running]);
        assert!(!worker.is_closed());
    }

    #[test]
    fn test_dead_thread_is_reported_once() {
        let fs = MockFs::new();
        fs.add_thread(42, 42, "main", 'R');
        fs.add_thread(42, 44, "reaped", 'X');
        let (ctx, clock) = context(&fs);
        let mut sampler = CpuThreadSampler::new(ctx.clone(), &session());

        for _ in 0..3 {
            sampler.sample().unwrap();
            clock.elapse(10);
        }
        let dead = ctx.buffer.get_group(EventKind::CpuThread, 44).unwrap();
        assert_eq!(dead.events.len(), 1);
        assert!(dead.is_closed());

        // Leaving the listing afterwards adds nothing either.
        fs.remove("/proc/42/task/44");
        sampler.sample().unwrap();
        assert_eq!(ctx.buffer.get_group(EventKind::CpuThread, 44).unwrap().events.len(), 1);
        assert_eq!(ctx.buffer.size(), 2);
    }

    #[test]
    fn test_vanished_thread_is_closed() {
        let fs = MockFs::new();
        fs.add_thread(42, 42, "main", 'R');
        fs.add_thread(42, 44, "short-lived", 'R');
        let (ctx, clock) = context(&fs);
        let mut sampler = CpuThreadSampler::new(ctx.clone(), &session());
        sampler.sample().unwrap();

        clock.elapse(10);
        fs.remove("/proc/42/task/44");
        sampler.sample().unwrap();

        let group = ctx.buffer.get_group(EventKind::CpuThread, 44).unwrap();
        assert_eq!(group.events.len(), 2);
        assert!(group.is_closed());
        assert!(group.events[1].is_ended);

        // Already reported dead: not reported again.
        sampler.sample().unwrap();
        assert_eq!(ctx.buffer.size(), 3);
    }

    #[test]
    fn test_exited_process_closes_all_threads() {
        let fs = MockFs::new();
        fs.add_thread(42, 42, "main", 'R');
        fs.add_thread(42, 43, "worker", 'S');
        let (ctx, _clock) = context(&fs);
        let mut sampler = CpuThreadSampler::new(ctx.clone(), &session());
        sampler.sample().unwrap();

        fs.remove("/proc/42");
        sampler.sample().unwrap();

        let closed = ctx.buffer.get(EventKind::CpuThread, i64::MIN, i64::MAX);
        assert_eq!(closed.len(), 2);
        assert!(closed.iter().all(|group| group.is_closed()));
    }
}

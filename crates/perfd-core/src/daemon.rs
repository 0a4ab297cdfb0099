//! Composition root of the profiler daemon.
//!
//! The daemon owns the event buffer, the clock, the filesystem, the agent
//! registry and every session. Command handlers call [`Daemon::execute`] from
//! their own threads.
//!
//! Session transitions run under the session table lock, so the end event of
//! a replaced session is always stored before the start event of its
//! successor.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::agent::AgentRegistry;
use crate::clock::Clock;
use crate::command::{Command, CommandError, CommandKind};
use crate::config::DaemonConfig;
use crate::event::{AgentStatus, Event, EventKind, EventPayload};
use crate::event_buffer::EventBuffer;
use crate::procfs::FileSystem;
use crate::sampler::SamplerContext;
use crate::session::{Session, SessionInfo};

#[derive(Default)]
struct SessionTable {
    /// Sessions per stream, oldest first. At most one is active.
    by_stream: HashMap<i64, Vec<Session>>,
    /// `(stream_id, session_id)` of ended sessions, in end order.
    ended: VecDeque<(i64, i64)>,
    /// Sessions begun so far. Mixed into session ids.
    begun: u64,
}

impl SessionTable {
    fn active_mut(&mut self, stream_id: i64) -> Option<&mut Session> {
        self.by_stream
            .get_mut(&stream_id)?
            .iter_mut()
            .find(|session| session.is_active())
    }

    /// The session `session_id`, preferring an active one, then the newest.
    fn find_mut(&mut self, session_id: i64) -> Option<&mut Session> {
        let mut newest: Option<&mut Session> = None;
        for session in self.by_stream.values_mut().flatten() {
            if session.session_id() != session_id {
                continue;
            }
            if session.is_active() {
                return Some(session);
            }
            if newest
                .as_ref()
                .is_none_or(|found| found.info().start_timestamp <= session.info().start_timestamp)
            {
                newest = Some(session);
            }
        }
        newest
    }

    /// Forgets the oldest ended sessions beyond `max`.
    fn trim_ended(&mut self, max: usize) {
        while self.ended.len() > max {
            let Some((stream_id, session_id)) = self.ended.pop_front() else {
                break;
            };
            if let Some(sessions) = self.by_stream.get_mut(&stream_id) {
                sessions.retain(|session| session.session_id() != session_id);
                if sessions.is_empty() {
                    self.by_stream.remove(&stream_id);
                }
            }
        }
    }
}

pub struct Daemon {
    config: DaemonConfig,
    ctx: SamplerContext,
    sessions: Mutex<SessionTable>,
}

impl Daemon {
    /// Creates a daemon with an empty event buffer sized from `config`.
    pub fn new(config: DaemonConfig, clock: Arc<dyn Clock>, fs: Arc<dyn FileSystem>) -> Self {
        let buffer = Arc::new(EventBuffer::new(
            clock.clone(),
            config.event_capacity,
            config.group_capacity,
        ));
        let agents = Arc::new(AgentRegistry::new(config.agent_heartbeat_timeout_ns()));
        let ctx = SamplerContext {
            buffer,
            clock,
            fs,
            agents,
            proc_path: config.proc_path.clone(),
        };
        Self {
            config,
            ctx,
            sessions: Mutex::new(SessionTable::default()),
        }
    }

    fn lock_sessions(&self) -> MutexGuard<'_, SessionTable> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn now(&self) -> i64 {
        self.ctx.clock.get_current_time()
    }

    pub fn buffer(&self) -> &Arc<EventBuffer> {
        &self.ctx.buffer
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.ctx.clock
    }

    pub fn agents(&self) -> &Arc<AgentRegistry> {
        &self.ctx.agents
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Applies a command.
    pub fn execute(&self, command: Command) -> Result<(), CommandError> {
        debug!(
            command = command.kind.name(),
            stream_id = command.stream_id,
            pid = command.pid,
            "executing command"
        );
        let result = match command.kind {
            CommandKind::BeginSession { process_name } => self
                .begin_session(command.stream_id, command.pid, process_name)
                .map(|_| ()),
            CommandKind::EndSession { session_id } => self.end_session(session_id).map(|_| ()),
            CommandKind::Echo { data } => {
                self.ctx.buffer.add(
                    Event::new(EventKind::Echo, command.pid as i64)
                        .with_pid(command.pid)
                        .with_payload(EventPayload::Echo { data }),
                );
                Ok(())
            }
            CommandKind::AttachAgent { agent_lib } => self.attach_agent(command.pid, &agent_lib),
            CommandKind::AgentHeartbeat => {
                self.ctx.agents.heartbeat(command.pid, self.now());
                Ok(())
            }
            CommandKind::DetachAgent => {
                self.ctx.agents.detach(command.pid, self.now());
                self.publish_agent_status(command.pid, AgentStatus::Detached);
                Ok(())
            }
        };
        if let Err(e) = &result {
            warn!(stream_id = command.stream_id, pid = command.pid, error = %e, "command failed");
        }
        result
    }

    /// Starts profiling `pid` on `stream_id`, ending the stream's active
    /// session first.
    pub fn begin_session(
        &self,
        stream_id: i64,
        pid: i32,
        process_name: String,
    ) -> Result<SessionInfo, CommandError> {
        if pid <= 0 {
            return Err(CommandError::InvalidArgument(format!("invalid pid {}", pid)));
        }

        let mut table = self.lock_sessions();
        if let Some(previous) = table.active_mut(stream_id) {
            let ended = self.finish(previous);
            table.ended.push_back((stream_id, ended.session_id));
        }

        table.begun += 1;
        let info = SessionInfo::with_sequence(stream_id, pid, self.now(), table.begun);
        let mut session = Session::new(info, &self.ctx, &self.config.samplers);

        self.ctx.buffer.add(
            Event::new(EventKind::Session, info.session_id)
                .with_pid(pid)
                .with_session(info.session_id)
                .with_payload(EventPayload::SessionStarted {
                    stream_id,
                    pid,
                    start_timestamp: info.start_timestamp,
                    process_name: process_name.clone(),
                }),
        );
        session.start_samplers();
        info!(
            session_id = info.session_id,
            stream_id,
            pid,
            process = %process_name,
            samplers = session.samplers().len(),
            "session started"
        );

        table.by_stream.entry(stream_id).or_default().push(session);
        table.trim_ended(self.config.max_ended_sessions);
        Ok(info)
    }

    /// Ends the session `session_id`. Ending an ended session is a no-op.
    pub fn end_session(&self, session_id: i64) -> Result<SessionInfo, CommandError> {
        let mut table = self.lock_sessions();
        let session = table
            .find_mut(session_id)
            .ok_or(CommandError::SessionNotFound(session_id))?;
        if !session.is_active() {
            return Ok(session.info());
        }

        let info = self.finish(session);
        table.ended.push_back((info.stream_id, session_id));
        table.trim_ended(self.config.max_ended_sessions);
        Ok(info)
    }

    /// Marks `session` ended, publishes its end event and stops its samplers.
    fn finish(&self, session: &mut Session) -> SessionInfo {
        session.end(self.now());
        let info = session.info();

        self.ctx.buffer.add(
            Event::new(EventKind::Session, info.session_id)
                .with_pid(info.pid)
                .with_session(info.session_id)
                .with_payload(EventPayload::SessionEnded)
                .ended(),
        );
        session.stop_samplers();
        info
    }

    fn attach_agent(&self, pid: i32, agent_lib: &str) -> Result<(), CommandError> {
        if agent_lib.is_empty() {
            self.ctx.agents.mark_unattachable(pid, self.now());
            self.publish_agent_status(pid, AgentStatus::Unattachable);
            return Err(CommandError::InvalidArgument("agent_lib is empty".into()));
        }
        self.ctx.agents.mark_attaching(pid, self.now());
        self.publish_agent_status(pid, AgentStatus::Attaching);
        info!(pid, agent_lib, "agent attach requested");
        Ok(())
    }

    fn publish_agent_status(&self, pid: i32, status: AgentStatus) {
        let session_id = self
            .lock_sessions()
            .by_stream
            .values()
            .flatten()
            .find(|session| session.is_active() && session.info().pid == pid)
            .map(|session| session.session_id())
            .unwrap_or(0);
        self.ctx.buffer.add(
            Event::new(EventKind::Agent, pid as i64)
                .with_pid(pid)
                .with_session(session_id)
                .with_payload(EventPayload::AgentStatus { status }),
        );
    }

    /// The active session of `stream_id`, if any.
    pub fn get_active_session(&self, stream_id: i64) -> Option<SessionInfo> {
        self.lock_sessions()
            .active_mut(stream_id)
            .map(|session| session.info())
    }

    /// Every retained session, ordered by start time.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let table = self.lock_sessions();
        let mut infos: Vec<SessionInfo> = table
            .by_stream
            .values()
            .flatten()
            .map(|session| session.info())
            .collect();
        infos.sort_by_key(|info| (info.start_timestamp, info.stream_id));
        infos
    }

    /// Ends every active session and releases every streaming reader.
    ///
    /// Idempotent. The buffer stays readable afterwards.
    pub fn shutdown(&self) {
        let mut table = self.lock_sessions();
        let mut ended = Vec::new();
        for sessions in table.by_stream.values_mut() {
            for session in sessions.iter_mut().filter(|session| session.is_active()) {
                let info = self.finish(session);
                ended.push((info.stream_id, info.session_id));
            }
        }
        let count = ended.len();
        table.ended.extend(ended);
        drop(table);

        self.ctx.buffer.interrupt_write_events();
        info!(ended_sessions = count, "daemon shut down");
    }
}

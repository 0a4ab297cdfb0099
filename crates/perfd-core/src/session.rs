//! Profiling sessions.
//!
//! A session binds one process on one device stream to the set of samplers
//! that watch it. Samplers receive a copy of the session's [`SessionInfo`]
//! and never reach back into the session.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::config::SamplerConfig;
use crate::sampler::{
    AgentStatusSampler, CpuThreadSampler, CpuUsageSampler, MemoryUsageSampler,
    NetworkConnectionSampler, NetworkSpeedSampler, Sampler, SamplerContext,
};

/// Immutable identity of a session plus its end time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: i64,
    pub stream_id: i64,
    pub pid: i32,
    pub start_timestamp: i64,
    /// `i64::MAX` while the session is active.
    pub end_timestamp: i64,
}

impl SessionInfo {
    pub fn new(stream_id: i64, pid: i32, start_timestamp: i64) -> Self {
        Self::with_sequence(stream_id, pid, start_timestamp, 0)
    }

    /// Like [`SessionInfo::new`], mixing a daemon-wide `sequence` into the
    /// id so sessions begun on the same clock tick stay distinct.
    pub fn with_sequence(stream_id: i64, pid: i32, start_timestamp: i64, sequence: u64) -> Self {
        Self {
            session_id: session_id(stream_id, pid, start_timestamp, sequence),
            stream_id,
            pid,
            start_timestamp,
            end_timestamp: i64::MAX,
        }
    }

    pub fn is_active(&self) -> bool {
        self.end_timestamp == i64::MAX
    }
}

fn session_id(stream_id: i64, pid: i32, start_timestamp: i64, sequence: u64) -> i64 {
    let mut bytes = [0u8; 28];
    bytes[..8].copy_from_slice(&stream_id.to_le_bytes());
    bytes[8..12].copy_from_slice(&pid.to_le_bytes());
    bytes[12..20].copy_from_slice(&start_timestamp.to_le_bytes());
    bytes[20..].copy_from_slice(&sequence.to_le_bytes());
    xxh3_64(&bytes) as i64
}

/// A profiling session and the samplers it owns.
///
/// Dropping a session stops its samplers.
pub struct Session {
    info: SessionInfo,
    samplers: Vec<Sampler>,
}

impl Session {
    /// Creates a session and its (stopped) samplers as enabled in `config`.
    pub fn new(info: SessionInfo, ctx: &SamplerContext, config: &SamplerConfig) -> Self {
        let mut samplers = Vec::new();

        if config.cpu_usage {
            let task = CpuUsageSampler::new(ctx.clone(), &info);
            samplers.push(Sampler::new(Box::new(task), config.cpu_interval()));
        }
        if config.cpu_threads {
            let task = CpuThreadSampler::new(ctx.clone(), &info);
            samplers.push(Sampler::new(Box::new(task), config.cpu_interval()));
        }
        if config.memory_usage {
            let task = MemoryUsageSampler::new(ctx.clone(), &info);
            samplers.push(Sampler::new(Box::new(task), config.memory_interval()));
        }
        if config.network {
            let speed = NetworkSpeedSampler::new(ctx.clone(), &info);
            samplers.push(Sampler::new(Box::new(speed), config.network_interval()));
            let connections = NetworkConnectionSampler::new(ctx.clone(), &info);
            samplers.push(Sampler::new(Box::new(connections), config.network_interval()));
        }
        if config.agent_status {
            let task = AgentStatusSampler::new(ctx.clone(), &info);
            samplers.push(Sampler::new(Box::new(task), config.agent_interval()));
        }

        Self { info, samplers }
    }

    pub fn info(&self) -> SessionInfo {
        self.info
    }

    pub fn session_id(&self) -> i64 {
        self.info.session_id
    }

    pub fn is_active(&self) -> bool {
        self.info.is_active()
    }

    pub fn samplers(&self) -> &[Sampler] {
        &self.samplers
    }

    /// Starts every sampler that is not running yet.
    pub fn start_samplers(&mut self) {
        for sampler in &mut self.samplers {
            if let Err(e) = sampler.start() {
                warn!(
                    session_id = self.info.session_id,
                    sampler = sampler.name(),
                    error = %e,
                    "failed to start sampler"
                );
            }
        }
    }

    /// Stops every running sampler and waits for their threads.
    pub fn stop_samplers(&mut self) {
        for sampler in &mut self.samplers {
            sampler.stop();
        }
    }

    /// Marks the session ended at `timestamp`.
    ///
    /// Returns `false` if it had already ended. Samplers keep running until
    /// [`Session::stop_samplers`] is called.
    pub fn end(&mut self, timestamp: i64) -> bool {
        if !self.info.is_active() {
            return false;
        }
        self.info.end_timestamp = timestamp;
        info!(
            session_id = self.info.session_id,
            pid = self.info.pid,
            duration_ns = timestamp - self.info.start_timestamp,
            "session ended"
        );
        true
    }
}

//! Periodic sampling on dedicated worker threads.
//!
//! A [`Sampler`] owns one thread that repeatedly runs a [`SampleTask`] at a
//! fixed cadence. The time a sample takes is subtracted from the following
//! sleep; a sample that overruns the interval is followed immediately by the
//! next one. Samples of one sampler never overlap.
//!
//! ```text
//! Session ──owns──▶ Sampler ──thread──▶ SampleTask::sample() ──▶ EventBuffer::add
//! ```

mod agent_status;
mod cpu;
mod memory;
mod network;

pub use agent_status::AgentStatusSampler;
pub use cpu::{CpuThreadSampler, CpuUsageSampler};
pub use memory::MemoryUsageSampler;
pub use network::{NetworkConnectionSampler, NetworkSpeedSampler};

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace};

use crate::agent::AgentRegistry;
use crate::clock::Clock;
use crate::event_buffer::EventBuffer;
use crate::procfs::{FileSystem, ParseError};

/// Failure of a single sample. Logged by the sampler loop, never propagated.
#[derive(Debug)]
pub enum SampleError {
    /// I/O error reading a source file.
    Io(io::Error),
    /// Parse error in a source file.
    Parse(ParseError),
}

impl std::fmt::Display for SampleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleError::Io(e) => write!(f, "I/O error: {}", e),
            SampleError::Parse(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SampleError {}

impl From<io::Error> for SampleError {
    fn from(e: io::Error) -> Self {
        SampleError::Io(e)
    }
}

impl From<ParseError> for SampleError {
    fn from(e: ParseError) -> Self {
        SampleError::Parse(e)
    }
}

/// The periodic work of a sampler.
///
/// `sample` runs on the sampler's own thread and must not block beyond a
/// bounded system call. It publishes its results through
/// [`EventBuffer::add`].
pub trait SampleTask: Send + 'static {
    fn name(&self) -> &str;

    fn sample(&mut self) -> Result<(), SampleError>;
}

/// Collaborators shared by every sampler of the daemon.
#[derive(Clone)]
pub struct SamplerContext {
    pub buffer: Arc<EventBuffer>,
    pub clock: Arc<dyn Clock>,
    pub fs: Arc<dyn FileSystem>,
    pub agents: Arc<AgentRegistry>,
    /// Base path of the proc filesystem, usually `/proc`.
    pub proc_path: PathBuf,
}

impl SamplerContext {
    pub(crate) fn read(&self, relative: impl AsRef<Path>) -> io::Result<String> {
        self.fs.read_to_string(&self.proc_path.join(relative))
    }
}

/// Running flag plus the condition variable the worker sleeps on.
#[derive(Debug, Default)]
struct Control {
    running: Mutex<bool>,
    wake: Condvar,
}

impl Control {
    fn set_running(&self, running: bool) {
        *self.running.lock().unwrap_or_else(|e| e.into_inner()) = running;
        self.wake.notify_all();
    }

    fn is_running(&self) -> bool {
        *self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sleeps for `duration` or until the running flag is cleared.
    fn sleep(&self, duration: Duration) {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        let _unused = self
            .wake
            .wait_timeout_while(running, duration, |running| *running)
            .unwrap_or_else(|e| e.into_inner());
    }
}

/// Lifecycle handle of one periodic worker thread.
///
/// The task lives on the worker while running and comes back on `stop`, so
/// a sampler can be started again. Dropping a sampler stops it.
pub struct Sampler {
    name: String,
    interval: Duration,
    control: Arc<Control>,
    task: Option<Box<dyn SampleTask>>,
    worker: Option<JoinHandle<Box<dyn SampleTask>>>,
}

impl Sampler {
    /// Creates a stopped sampler.
    pub fn new(task: Box<dyn SampleTask>, interval: Duration) -> Self {
        Self {
            name: task.name().to_string(),
            interval,
            control: Arc::new(Control::default()),
            task: Some(task),
            worker: None,
        }
    }

    /// Creates a sampler and starts its thread.
    pub fn spawn(task: Box<dyn SampleTask>, interval: Duration) -> io::Result<Self> {
        let mut sampler = Self::new(task, interval);
        sampler.start()?;
        Ok(sampler)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Starts the worker thread. No-op when already running.
    pub fn start(&mut self) -> io::Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let Some(task) = self.task.take() else {
            // The task was lost to a panic in an earlier run.
            return Ok(());
        };

        self.control.set_running(true);
        let control = self.control.clone();
        let interval = self.interval;
        let spawned = thread::Builder::new()
            .name(format!("sampler-{}", self.name))
            .spawn(move || run(task, interval, control));

        match spawned {
            Ok(worker) => {
                debug!(sampler = %self.name, interval_ms = interval.as_millis() as u64, "sampler started");
                self.worker = Some(worker);
                Ok(())
            }
            Err(e) => {
                self.control.set_running(false);
                Err(e)
            }
        }
    }

    /// Stops the worker and waits for it to exit.
    ///
    /// Blocks for at most the duration of the sample in progress. Idempotent.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.control.set_running(false);
        match worker.join() {
            Ok(task) => {
                self.task = Some(task);
                debug!(sampler = %self.name, "sampler stopped");
            }
            Err(_) => error!(sampler = %self.name, "sampler thread panicked"),
        }
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(mut task: Box<dyn SampleTask>, interval: Duration, control: Arc<Control>) -> Box<dyn SampleTask> {
    let mut failures: u64 = 0;
    while control.is_running() {
        let started = Instant::now();
        match task.sample() {
            Ok(()) => {
                if failures > 0 {
                    info!(sampler = task.name(), failures, "sampler recovered");
                    failures = 0;
                }
            }
            Err(e) => {
                failures += 1;
                if failures == 1 {
                    debug!(sampler = task.name(), error = %e, "sample failed");
                } else {
                    trace!(sampler = task.name(), error = %e, failures, "sample failed");
                }
            }
        }

        if let Some(remaining) = interval.checked_sub(started.elapsed()) {
            control.sleep(remaining);
        }
    }
    task
}

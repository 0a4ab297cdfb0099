//! perfd-core - event pipeline of the on-device profiler daemon.
//!
//! Provides:
//! - `clock` - monotonic nanosecond time source and a fake for tests
//! - `circular_buffer` - fixed-capacity ring with overwrite-on-full
//! - `event` - telemetry event model and reconstructed event groups
//! - `event_buffer` - the shared time-ordered store and its streaming readers
//! - `sampler` - periodic worker threads and the concrete metric samplers
//! - `procfs` - filesystem abstraction and minimal `/proc` readers
//! - `session` - sampler sets bound to one profiled process
//! - `agent` - in-app agent liveness tracking
//! - `command` - state-changing requests dispatched by the daemon
//! - `daemon` - composition root
//! - `service` - transport-neutral facade for the network layer
//! - `config` - daemon configuration

pub mod agent;
pub mod circular_buffer;
pub mod clock;
pub mod command;
pub mod config;
pub mod daemon;
pub mod event;
pub mod event_buffer;
pub mod procfs;
pub mod sampler;
pub mod service;
pub mod session;

/// Crate version, reported by the daemon on startup and by the health endpoint.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

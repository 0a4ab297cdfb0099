//! Network throughput and open connection samplers.

use std::io;

use crate::event::{Event, EventKind, EventPayload, NETWORK_RX_GROUP, NETWORK_TX_GROUP};
use crate::procfs::parser::{NetTotals, count_tcp_connections, parse_net_dev_totals};
use crate::session::SessionInfo;

use super::{SampleError, SampleTask, SamplerContext};

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Publishes transmit and receive speed of the process's network namespace.
///
/// Speeds are computed from the byte counters of two consecutive samples,
/// so the first sample only records a baseline.
pub struct NetworkSpeedSampler {
    ctx: SamplerContext,
    pid: i32,
    session_id: i64,
    previous: Option<(i64, NetTotals)>,
}

impl NetworkSpeedSampler {
    pub fn new(ctx: SamplerContext, session: &SessionInfo) -> Self {
        Self {
            ctx,
            pid: session.pid,
            session_id: session.session_id,
            previous: None,
        }
    }

    fn publish(&self, group_id: i64, throughput_bytes_per_sec: u64) {
        let event = Event::new(EventKind::NetworkSpeed, group_id)
            .with_pid(self.pid)
            .with_session(self.session_id)
            .with_payload(EventPayload::NetworkSpeed {
                throughput_bytes_per_sec,
            });
        self.ctx.buffer.add(event);
    }
}

/// Bytes per second, tolerating counter resets.
fn speed(previous: u64, current: u64, elapsed_ns: i64) -> u64 {
    let bytes = current.saturating_sub(previous) as u128;
    (bytes * NANOS_PER_SEC / elapsed_ns as u128) as u64
}

impl SampleTask for NetworkSpeedSampler {
    fn name(&self) -> &str {
        "network-speed"
    }

    fn sample(&mut self) -> Result<(), SampleError> {
        let totals = parse_net_dev_totals(&self.ctx.read(format!("{}/net/dev", self.pid))?)?;
        let now = self.ctx.clock.get_current_time();

        if let Some((then, previous)) = self.previous {
            let elapsed = now - then;
            if elapsed > 0 {
                self.publish(NETWORK_TX_GROUP, speed(previous.tx_bytes, totals.tx_bytes, elapsed));
                self.publish(NETWORK_RX_GROUP, speed(previous.rx_bytes, totals.rx_bytes, elapsed));
            }
        }
        self.previous = Some((now, totals));
        Ok(())
    }
}

/// Publishes the number of open TCP sockets (IPv4 and IPv6).
pub struct NetworkConnectionSampler {
    ctx: SamplerContext,
    pid: i32,
    session_id: i64,
}

impl NetworkConnectionSampler {
    pub fn new(ctx: SamplerContext, session: &SessionInfo) -> Self {
        Self {
            ctx,
            pid: session.pid,
            session_id: session.session_id,
        }
    }

    fn count(&self, table: &str) -> io::Result<Option<u32>> {
        match self.ctx.read(format!("{}/net/{}", self.pid, table)) {
            Ok(content) => Ok(Some(count_tcp_connections(&content))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl SampleTask for NetworkConnectionSampler {
    fn name(&self) -> &str {
        "network-connections"
    }

    fn sample(&mut self) -> Result<(), SampleError> {
        let (v4, v6) = (self.count("tcp")?, self.count("tcp6")?);
        if v4.is_none() && v6.is_none() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no tcp tables for pid {}", self.pid),
            )
            .into());
        }

        let event = Event::new(EventKind::NetworkConnections, self.pid as i64)
            .with_pid(self.pid)
            .with_session(self.session_id)
            .with_payload(EventPayload::NetworkConnections {
                num_connections: v4.unwrap_or(0) + v6.unwrap_or(0),
            });
        self.ctx.buffer.add(event);
        Ok(())
    }
}

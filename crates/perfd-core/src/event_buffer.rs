//! Central time-ordered event store.
//!
//! All producers (samplers, command handlers) call [`EventBuffer::add`]; all
//! consumers either query reconstructed groups or block in
//! [`EventBuffer::write_events_to`] to receive a live stream.
//!
//! One mutex guards both rings and every cursor, one condition variable wakes
//! streaming readers. Timestamps are assigned inside the critical section, so
//! storage order and timestamp order always agree.
//!
//! Memory is bounded by ring eviction. A reader that falls more than the ring
//! capacity behind silently skips the evicted events.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use tracing::debug;

use crate::circular_buffer::CircularBuffer;
use crate::clock::Clock;
use crate::event::{Event, EventGroup, EventKind};

/// Sink that a streaming reader pushes events into.
pub trait EventWriter {
    /// Delivers one event. Returning `false` detaches the writer.
    fn write(&mut self, event: &Event) -> bool;

    /// Polled while no events arrive. Returning `false` detaches the writer.
    fn is_connected(&mut self) -> bool {
        true
    }
}

impl<F> EventWriter for F
where
    F: FnMut(&Event) -> bool,
{
    fn write(&mut self, event: &Event) -> bool {
        self(event)
    }
}

/// Why a streaming call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// [`EventBuffer::interrupt_write_events`] was called.
    Interrupted,
    /// The writer returned `false`.
    Disconnected,
}

#[derive(Debug, Clone, Copy)]
enum StreamStart {
    Oldest,
    Latest,
}

type GroupKey = (EventKind, i64);

/// How long a streaming reader sleeps before polling its writer.
const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Bookkeeping for one `(kind, group_id)` pair.
#[derive(Debug)]
struct GroupEntry {
    kind: EventKind,
    group_id: i64,
    /// Absolute sequence numbers of the group's events, ascending.
    seqs: VecDeque<u64>,
}

struct Inner {
    events: CircularBuffer<Event>,
    groups: CircularBuffer<GroupEntry>,
    /// Live group entries by key, valued by absolute group sequence.
    group_index: HashMap<GroupKey, u64>,
    groups_added: u64,
    events_added: u64,
    last_timestamp: i64,
    interrupted: bool,
}

impl Inner {
    fn first_retained_seq(&self) -> u64 {
        self.events_added - self.events.size() as u64
    }

    fn event_at(&self, seq: u64) -> &Event {
        self.events.get((seq - self.first_retained_seq()) as usize)
    }

    fn group_position(&self, key: &GroupKey) -> Option<usize> {
        let group_seq = *self.group_index.get(key)?;
        let first_group = self.groups_added - self.groups.size() as u64;
        group_seq
            .checked_sub(first_group)
            .map(|position| position as usize)
    }

    /// Retained events of a group, in storage order.
    fn retained<'a>(&'a self, entry: &'a GroupEntry) -> impl Iterator<Item = &'a Event> + 'a {
        let first = self.first_retained_seq();
        entry
            .seqs
            .iter()
            .filter(move |seq| **seq >= first)
            .map(move |seq| self.event_at(*seq))
    }

    fn reconstruct(&self, entry: &GroupEntry) -> Option<EventGroup> {
        let events: Vec<Event> = self.retained(entry).cloned().collect();
        if events.is_empty() {
            return None;
        }
        Some(EventGroup {
            group_id: entry.group_id,
            kind: entry.kind,
            events,
        })
    }

    /// Drops the sequence numbers the ring no longer holds from the group of
    /// an evicted event.
    fn forget_evicted(&mut self, evicted: &Event) {
        let first_retained = self.first_retained_seq();
        if let Some(position) = self.group_position(&(evicted.kind, evicted.group_id)) {
            let entry = self.groups.get_mut(position);
            while entry.seqs.front().is_some_and(|s| *s < first_retained) {
                entry.seqs.pop_front();
            }
        }
    }

    fn fold_into_group(&mut self, key: GroupKey, seq: u64) {
        if let Some(position) = self.group_position(&key) {
            self.groups.get_mut(position).seqs.push_back(seq);
            return;
        }

        let entry = GroupEntry {
            kind: key.0,
            group_id: key.1,
            seqs: VecDeque::from([seq]),
        };
        if let Some(evicted) = self.groups.add(entry) {
            self.group_index.remove(&(evicted.kind, evicted.group_id));
        }
        self.group_index.insert(key, self.groups_added);
        self.groups_added += 1;
    }
}

/// Thread-safe, bounded, time-ordered store of telemetry events.
pub struct EventBuffer {
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
    event_added: Condvar,
}

impl EventBuffer {
    /// Creates a buffer retaining at most `event_capacity` events and
    /// tracking at most `group_capacity` distinct groups.
    ///
    /// # Panics
    /// Panics if either capacity is zero.
    pub fn new(clock: Arc<dyn Clock>, event_capacity: usize, group_capacity: usize) -> Self {
        Self {
            clock,
            inner: Mutex::new(Inner {
                events: CircularBuffer::new(event_capacity),
                groups: CircularBuffer::new(group_capacity),
                group_index: HashMap::new(),
                groups_added: 0,
                events_added: 0,
                last_timestamp: i64::MIN,
                interrupted: false,
            }),
            event_added: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stores an event, stamping it with the current time.
    ///
    /// Timestamps never decrease across calls: when the clock reports a time
    /// earlier than the last stored event, the last timestamp is reused and
    /// storage position breaks the tie. Never blocks on capacity; a full ring
    /// evicts its oldest event. Returns the assigned timestamp.
    pub fn add(&self, mut event: Event) -> i64 {
        let timestamp = {
            let mut guard = self.lock();
            let inner = &mut *guard;

            let timestamp = self.clock.get_current_time().max(inner.last_timestamp);
            inner.last_timestamp = timestamp;
            event.timestamp = timestamp;

            let key = (event.kind, event.group_id);
            let seq = inner.events_added;
            let evicted = inner.events.add(event);
            inner.events_added += 1;
            if let Some(evicted) = evicted {
                inner.forget_evicted(&evicted);
            }
            inner.fold_into_group(key, seq);
            timestamp
        };
        self.event_added.notify_all();
        timestamp
    }

    /// Streams every retained event, then every new event, into `writer`.
    ///
    /// Blocks until [`interrupt_write_events`](Self::interrupt_write_events)
    /// is called, the writer returns `false`, or the writer stops reporting
    /// [`EventWriter::is_connected`] while idle. Each call keeps its own
    /// cursor, and events are written outside the lock, so a slow writer
    /// never delays producers or other writers.
    pub fn write_events_to<W: EventWriter + ?Sized>(&self, writer: &mut W) -> StreamEnd {
        self.stream(writer, StreamStart::Oldest)
    }

    /// Like [`write_events_to`](Self::write_events_to) but skips the replay:
    /// only events added after the call starts are delivered.
    pub fn write_live_events_to<W: EventWriter + ?Sized>(&self, writer: &mut W) -> StreamEnd {
        self.stream(writer, StreamStart::Latest)
    }

    fn stream<W: EventWriter + ?Sized>(&self, writer: &mut W, start: StreamStart) -> StreamEnd {
        let mut cursor: Option<u64> = None;
        loop {
            let batch = {
                let mut inner = self.lock();
                let mut next = match (cursor, start) {
                    (Some(next), _) => next,
                    (None, StreamStart::Oldest) => inner.first_retained_seq(),
                    (None, StreamStart::Latest) => inner.events_added,
                };
                cursor = Some(next);
                loop {
                    if inner.interrupted {
                        return StreamEnd::Interrupted;
                    }
                    if next < inner.events_added {
                        break;
                    }
                    let (guard, wait) = self
                        .event_added
                        .wait_timeout(inner, IDLE_POLL_INTERVAL)
                        .unwrap_or_else(|e| e.into_inner());
                    inner = guard;
                    if wait.timed_out() && next >= inner.events_added && !inner.interrupted {
                        break;
                    }
                }

                if next >= inner.events_added {
                    // Idle: nothing arrived within the poll interval.
                    Vec::new()
                } else {
                    let first = inner.first_retained_seq();
                    if next < first {
                        debug!(missed = first - next, "event writer fell behind the ring");
                        next = first;
                    }
                    let batch: Vec<Event> = (next..inner.events_added)
                        .map(|seq| inner.event_at(seq).clone())
                        .collect();
                    cursor = Some(inner.events_added);
                    batch
                }
            };

            if batch.is_empty() && !writer.is_connected() {
                return StreamEnd::Disconnected;
            }
            for event in &batch {
                if !writer.write(event) {
                    return StreamEnd::Disconnected;
                }
            }
        }
    }

    /// Wakes every streaming call and makes it return.
    ///
    /// The interrupt is global and permanent for this buffer: calls started
    /// afterwards return immediately without writing.
    pub fn interrupt_write_events(&self) {
        self.lock().interrupted = true;
        self.event_added.notify_all();
    }

    pub fn is_interrupted(&self) -> bool {
        self.lock().interrupted
    }

    /// Returns the groups of `kind` whose span intersects `(from, to]`.
    ///
    /// A group spans from its first event to its last one, or to infinity
    /// while it has no terminal event. Each returned group carries its
    /// events with timestamps in `(from, to]`. A group that spans the window
    /// without an event inside it carries its latest event before the window
    /// instead, so callers still see its state. Groups come back in creation
    /// order.
    pub fn get(&self, kind: EventKind, from: i64, to: i64) -> Vec<EventGroup> {
        let inner = self.lock();
        let mut result = Vec::new();

        for entry in inner.groups.iter().filter(|entry| entry.kind == kind) {
            let mut first_ts = None;
            let mut last_ts = None;
            let mut closed = false;
            let mut anchor: Option<&Event> = None;
            let mut in_window = Vec::new();

            for event in inner.retained(entry) {
                first_ts.get_or_insert(event.timestamp);
                last_ts = Some(event.timestamp);
                closed |= event.is_ended;
                if event.timestamp <= from {
                    anchor = Some(event);
                } else if event.timestamp <= to {
                    in_window.push(event.clone());
                }
            }

            let (Some(first_ts), Some(last_ts)) = (first_ts, last_ts) else {
                continue;
            };
            if first_ts > to || (closed && last_ts <= from) {
                continue;
            }
            if in_window.is_empty()
                && let Some(anchor) = anchor
            {
                in_window.push(anchor.clone());
            }

            result.push(EventGroup {
                group_id: entry.group_id,
                kind: entry.kind,
                events: in_window,
            });
        }

        result
    }

    /// Reconstructs the group identified by `(kind, group_id)`.
    pub fn get_group(&self, kind: EventKind, group_id: i64) -> Option<EventGroup> {
        let inner = self.lock();
        let position = inner.group_position(&(kind, group_id))?;
        inner.reconstruct(inner.groups.get(position))
    }

    /// Reconstructs the most recently created group with `group_id`, of any kind.
    pub fn find_group(&self, group_id: i64) -> Option<EventGroup> {
        let inner = self.lock();
        inner
            .groups
            .iter()
            .rev()
            .filter(|entry| entry.group_id == group_id)
            .find_map(|entry| inner.reconstruct(entry))
    }

    /// Number of retained events.
    pub fn size(&self) -> usize {
        self.lock().events.size()
    }

    /// Total number of events ever added, including evicted ones.
    pub fn events_added(&self) -> u64 {
        self.lock().events_added
    }

    pub fn capacity(&self) -> usize {
        self.lock().events.capacity()
    }

    /// Copies the retained events, oldest first.
    pub fn snapshot(&self) -> Vec<Event> {
        self.lock().events.iter().cloned().collect()
    }

    #[cfg(test)]
    fn tracked_seqs(&self) -> usize {
        self.lock().groups.iter().map(|entry| entry.seqs.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::event::EventPayload;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Barrier, mpsc};
    use std::thread;
    use std::time::Duration;

    fn buffer_with_clock(capacity: usize) -> (Arc<FakeClock>, Arc<EventBuffer>) {
        let clock = Arc::new(FakeClock::new(0));
        let buffer = Arc::new(EventBuffer::new(clock.clone(), capacity, capacity));
        (clock, buffer)
    }

    fn add_at(clock: &FakeClock, buffer: &EventBuffer, time: i64, event: Event) {
        clock.set_current_time(time);
        buffer.add(event);
    }

    /// Spawns a streaming reader that forwards into a channel.
    fn spawn_reader(
        buffer: &Arc<EventBuffer>,
        live: bool,
    ) -> (mpsc::Receiver<Event>, thread::JoinHandle<StreamEnd>) {
        let (tx, rx) = mpsc::channel();
        let buffer = buffer.clone();
        let handle = thread::spawn(move || {
            let mut writer = |event: &Event| tx.send(event.clone()).is_ok();
            if live {
                buffer.write_live_events_to(&mut writer)
            } else {
                buffer.write_events_to(&mut writer)
            }
        });
        (rx, handle)
    }

    fn recv(rx: &mpsc::Receiver<Event>) -> Event {
        rx.recv_timeout(Duration::from_secs(5))
            .expect("event not delivered in time")
    }

    #[test]
    fn test_add_assigns_clock_timestamp() {
        let (clock, buffer) = buffer_with_clock(10);
        clock.set_current_time(42);
        let mut event = Event::new(EventKind::Echo, 1);
        event.timestamp = 1234;

        assert_eq!(buffer.add(event), 42);
        assert_eq!(buffer.snapshot()[0].timestamp, 42);
        assert_eq!(buffer.events_added(), 1);
    }

    #[test]
    fn test_timestamps_never_decrease() {
        let (clock, buffer) = buffer_with_clock(10);
        add_at(&clock, &buffer, 100, Event::new(EventKind::Echo, 1));
        add_at(&clock, &buffer, 50, Event::new(EventKind::Echo, 2));
        add_at(&clock, &buffer, 100, Event::new(EventKind::Echo, 3));

        let stored = buffer.snapshot();
        let timestamps: Vec<i64> = stored.iter().map(|e| e.timestamp).collect();
        assert_eq!(timestamps, vec![100, 100, 100]);
        let groups: Vec<i64> = stored.iter().map(|e| e.group_id).collect();
        assert_eq!(groups, vec![1, 2, 3]);
    }

    #[test]
    fn test_concurrent_adds_are_monotonic() {
        let clock: Arc<dyn Clock> = Arc::new(crate::clock::SteadyClock::new());
        let buffer = Arc::new(EventBuffer::new(clock, 4000, 100));

        let producers: Vec<_> = (0..8)
            .map(|producer| {
                let buffer = buffer.clone();
                thread::spawn(move || {
                    for _ in 0..250 {
                        buffer.add(Event::new(EventKind::CpuUsage, producer));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let stored = buffer.snapshot();
        assert_eq!(stored.len(), 2000);
        assert!(stored.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_ring_keeps_most_recent_events() {
        let (clock, buffer) = buffer_with_clock(3);
        for i in 0..5 {
            add_at(&clock, &buffer, i * 10, Event::new(EventKind::Echo, i));
        }

        assert_eq!(buffer.size(), 3);
        assert_eq!(buffer.events_added(), 5);
        let retained: Vec<i64> = buffer.snapshot().iter().map(|e| e.group_id).collect();
        assert_eq!(retained, vec![2, 3, 4]);
    }

    #[test]
    fn test_group_closing() {
        let (clock, buffer) = buffer_with_clock(10);
        add_at(&clock, &buffer, 1, Event::new(EventKind::CpuThread, 5));
        add_at(&clock, &buffer, 2, Event::new(EventKind::CpuThread, 5));
        add_at(&clock, &buffer, 3, Event::new(EventKind::CpuThread, 5).ended());

        let groups = buffer.get(EventKind::CpuThread, 0, i64::MAX);
        assert_eq!(groups.len(), 1);
        let group = &groups[0];
        assert_eq!(group.group_id, 5);
        assert!(group.is_closed());
        let timestamps: Vec<i64> = group.events.iter().map(|e| e.timestamp).collect();
        assert_eq!(timestamps, vec![1, 2, 3]);
    }

    #[test]
    fn test_range_is_exclusive_start_inclusive_end() {
        let (clock, buffer) = buffer_with_clock(10);
        for t in [10, 20, 30] {
            add_at(&clock, &buffer, t, Event::new(EventKind::MemoryUsage, 1));
        }

        let groups = buffer.get(EventKind::MemoryUsage, 10, 20);
        assert_eq!(groups.len(), 1);
        let timestamps: Vec<i64> = groups[0].events.iter().map(|e| e.timestamp).collect();
        assert_eq!(timestamps, vec![20]);

        let groups = buffer.get(EventKind::MemoryUsage, 9, 30);
        let timestamps: Vec<i64> = groups[0].events.iter().map(|e| e.timestamp).collect();
        assert_eq!(timestamps, vec![10, 20, 30]);
    }

    #[test]
    fn test_range_filters_groups_outside_window() {
        let (clock, buffer) = buffer_with_clock(20);
        // Closed before the window.
        add_at(&clock, &buffer, 1, Event::new(EventKind::CpuThread, 1));
        add_at(&clock, &buffer, 5, Event::new(EventKind::CpuThread, 1).ended());
        // Closed exactly at the window start: excluded by (from, to].
        add_at(&clock, &buffer, 6, Event::new(EventKind::CpuThread, 2));
        add_at(&clock, &buffer, 10, Event::new(EventKind::CpuThread, 2).ended());
        // Another kind inside the window.
        add_at(&clock, &buffer, 15, Event::new(EventKind::Echo, 4));
        // Starts after the window.
        add_at(&clock, &buffer, 25, Event::new(EventKind::CpuThread, 3));

        assert!(buffer.get(EventKind::CpuThread, 10, 20).is_empty());
        assert_eq!(buffer.get(EventKind::Echo, 10, 20).len(), 1);
    }

    #[test]
    fn test_open_group_spanning_window_carries_latest_prior_event() {
        let (clock, buffer) = buffer_with_clock(10);
        add_at(&clock, &buffer, 1, Event::new(EventKind::CpuThread, 9));
        add_at(&clock, &buffer, 3, Event::new(EventKind::CpuThread, 9));
        add_at(&clock, &buffer, 40, Event::new(EventKind::Echo, 0));

        let groups = buffer.get(EventKind::CpuThread, 10, 20);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].events.len(), 1);
        assert_eq!(groups[0].events[0].timestamp, 3);
    }

    #[test]
    fn test_get_group_and_find_group() {
        let (clock, buffer) = buffer_with_clock(10);
        add_at(&clock, &buffer, 1, Event::new(EventKind::Session, 77));
        add_at(&clock, &buffer, 2, Event::new(EventKind::Agent, 77));
        add_at(&clock, &buffer, 3, Event::new(EventKind::Session, 77).ended());

        let session = buffer.get_group(EventKind::Session, 77).unwrap();
        assert_eq!(session.events.len(), 2);
        assert!(session.is_closed());

        let latest = buffer.find_group(77).unwrap();
        assert_eq!(latest.kind, EventKind::Agent);

        assert!(buffer.get_group(EventKind::Session, 78).is_none());
        assert!(buffer.find_group(78).is_none());
    }

    #[test]
    fn test_reopened_group_folds_into_one() {
        let (clock, buffer) = buffer_with_clock(10);
        add_at(&clock, &buffer, 1, Event::new(EventKind::CpuThread, 3));
        add_at(&clock, &buffer, 2, Event::new(EventKind::CpuThread, 3).ended());
        add_at(&clock, &buffer, 3, Event::new(EventKind::CpuThread, 3));

        let groups = buffer.get(EventKind::CpuThread, 0, i64::MAX);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].events.len(), 3);
        assert!(groups[0].is_closed());
    }

    #[test]
    fn test_groups_only_hold_retained_events() {
        let (clock, buffer) = buffer_with_clock(2);
        add_at(&clock, &buffer, 1, Event::new(EventKind::Echo, 1));
        add_at(&clock, &buffer, 2, Event::new(EventKind::Echo, 2));
        add_at(&clock, &buffer, 3, Event::new(EventKind::Echo, 2));

        assert!(buffer.get_group(EventKind::Echo, 1).is_none());
        let group = buffer.get_group(EventKind::Echo, 2).unwrap();
        assert_eq!(group.events.len(), 2);
    }

    #[test]
    fn test_idle_groups_release_evicted_events() {
        let clock = Arc::new(FakeClock::new(0));
        let buffer = EventBuffer::new(clock.clone(), 4, 100);
        // Many short-lived groups that never receive another event.
        for i in 0..50 {
            add_at(&clock, &buffer, i, Event::new(EventKind::CpuThread, i));
            add_at(&clock, &buffer, i, Event::new(EventKind::CpuThread, i).ended());
            assert!(buffer.tracked_seqs() <= 4);
        }
        assert_eq!(buffer.tracked_seqs(), 4);

        let groups = buffer.get(EventKind::CpuThread, i64::MIN, i64::MAX);
        let ids: Vec<i64> = groups.iter().map(|g| g.group_id).collect();
        assert_eq!(ids, vec![48, 49]);
        assert!(groups.iter().all(|g| g.events.len() == 2 && g.is_closed()));
    }

    #[test]
    fn test_evicted_group_is_recreated() {
        let clock = Arc::new(FakeClock::new(0));
        let buffer = EventBuffer::new(clock.clone(), 10, 2);
        add_at(&clock, &buffer, 1, Event::new(EventKind::Echo, 1));
        add_at(&clock, &buffer, 2, Event::new(EventKind::Echo, 2));
        add_at(&clock, &buffer, 3, Event::new(EventKind::Echo, 3));
        assert!(buffer.get_group(EventKind::Echo, 1).is_none());

        add_at(&clock, &buffer, 4, Event::new(EventKind::Echo, 1));
        let group = buffer.get_group(EventKind::Echo, 1).unwrap();
        assert_eq!(group.events.len(), 1);
        assert_eq!(group.events[0].timestamp, 4);
    }

    #[test]
    fn test_write_events_replays_then_streams() {
        let (clock, buffer) = buffer_with_clock(10);
        add_at(&clock, &buffer, 1, Event::new(EventKind::Echo, 1));
        add_at(&clock, &buffer, 2, Event::new(EventKind::Echo, 2));

        let (rx, handle) = spawn_reader(&buffer, false);
        assert_eq!(recv(&rx).group_id, 1);
        assert_eq!(recv(&rx).group_id, 2);

        add_at(&clock, &buffer, 3, Event::new(EventKind::Echo, 3));
        assert_eq!(recv(&rx).group_id, 3);

        buffer.interrupt_write_events();
        assert_eq!(handle.join().unwrap(), StreamEnd::Interrupted);
    }

    #[test]
    fn test_lagging_writer_skips_to_oldest_retained() {
        let (clock, buffer) = buffer_with_clock(3);
        add_at(&clock, &buffer, 0, Event::new(EventKind::Echo, 0));

        let paused = Arc::new(Barrier::new(2));
        let resume = Arc::new(Barrier::new(2));
        let (tx, rx) = mpsc::channel();
        let handle = {
            let buffer = buffer.clone();
            let paused = paused.clone();
            let resume = resume.clone();
            thread::spawn(move || {
                let mut first = true;
                let mut writer = |event: &Event| {
                    let sent = tx.send(event.group_id).is_ok();
                    if first {
                        first = false;
                        paused.wait();
                        resume.wait();
                    }
                    sent
                };
                buffer.write_events_to(&mut writer)
            })
        };

        // The writer is stuck on its first event while the ring wraps.
        paused.wait();
        for i in 1..=5 {
            add_at(&clock, &buffer, i, Event::new(EventKind::Echo, i));
        }
        resume.wait();

        let received: Vec<i64> = (0..4)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(received, vec![0, 3, 4, 5]);

        add_at(&clock, &buffer, 6, Event::new(EventKind::Echo, 6));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 6);

        buffer.interrupt_write_events();
        assert_eq!(handle.join().unwrap(), StreamEnd::Interrupted);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_multi_consumer_independence() {
        let (clock, buffer) = buffer_with_clock(100);
        let (rx_a, handle_a) = spawn_reader(&buffer, false);

        for i in 0..5 {
            add_at(&clock, &buffer, i, Event::new(EventKind::Echo, i));
        }
        for i in 0..5 {
            assert_eq!(recv(&rx_a).group_id, i);
        }

        let (rx_b, handle_b) = spawn_reader(&buffer, true);
        // Wait until B is parked on the condition variable before adding.
        thread::sleep(Duration::from_millis(100));
        for i in 5..8 {
            add_at(&clock, &buffer, i, Event::new(EventKind::Echo, i));
        }

        for i in 5..8 {
            assert_eq!(recv(&rx_a).group_id, i);
            assert_eq!(recv(&rx_b).group_id, i);
        }

        buffer.interrupt_write_events();
        handle_a.join().unwrap();
        handle_b.join().unwrap();
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_interrupt_terminates_all_writers() {
        let (_clock, buffer) = buffer_with_clock(10);
        let (done_tx, done_rx) = mpsc::channel();
        for _ in 0..3 {
            let buffer = buffer.clone();
            let done_tx = done_tx.clone();
            thread::spawn(move || {
                let mut writer = |_: &Event| true;
                let end = buffer.write_events_to(&mut writer);
                done_tx.send(end).unwrap();
            });
        }

        thread::sleep(Duration::from_millis(50));
        buffer.interrupt_write_events();
        for _ in 0..3 {
            let end = done_rx.recv_timeout(Duration::from_secs(1)).unwrap();
            assert_eq!(end, StreamEnd::Interrupted);
        }
    }

    #[test]
    fn test_interrupted_buffer_rejects_new_writers() {
        let (clock, buffer) = buffer_with_clock(10);
        add_at(&clock, &buffer, 1, Event::new(EventKind::Echo, 1));
        buffer.interrupt_write_events();

        let mut written = 0;
        let mut writer = |_: &Event| {
            written += 1;
            true
        };
        assert_eq!(buffer.write_events_to(&mut writer), StreamEnd::Interrupted);
        assert_eq!(written, 0);
        assert!(buffer.is_interrupted());
    }

    #[test]
    fn test_writer_disconnect_ends_stream() {
        let (clock, buffer) = buffer_with_clock(10);
        add_at(&clock, &buffer, 1, Event::new(EventKind::Echo, 1));
        add_at(&clock, &buffer, 2, Event::new(EventKind::Echo, 2));

        let mut seen = Vec::new();
        let mut writer = |event: &Event| {
            seen.push(event.group_id);
            false
        };
        assert_eq!(buffer.write_events_to(&mut writer), StreamEnd::Disconnected);
        assert_eq!(seen, vec![1]);
    }

    struct FlagWriter {
        connected: Arc<AtomicBool>,
        written: usize,
    }

    impl EventWriter for FlagWriter {
        fn write(&mut self, _event: &Event) -> bool {
            self.written += 1;
            true
        }

        fn is_connected(&mut self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_idle_writer_detaches_once_disconnected() {
        let (clock, buffer) = buffer_with_clock(10);
        add_at(&clock, &buffer, 1, Event::new(EventKind::Echo, 1));
        let connected = Arc::new(AtomicBool::new(true));
        let (done_tx, done_rx) = mpsc::channel();
        {
            let buffer = buffer.clone();
            let connected = connected.clone();
            thread::spawn(move || {
                let mut writer = FlagWriter { connected, written: 0 };
                let end = buffer.write_events_to(&mut writer);
                done_tx.send((end, writer.written)).unwrap();
            });
        }

        assert!(done_rx.recv_timeout(Duration::from_millis(200)).is_err());
        connected.store(false, Ordering::SeqCst);
        let (end, written) = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(end, StreamEnd::Disconnected);
        assert_eq!(written, 1);
        assert!(!buffer.is_interrupted());
    }

    #[test]
    fn test_payload_is_preserved() {
        let (clock, buffer) = buffer_with_clock(4);
        let event = Event::new(EventKind::Echo, 1).with_payload(EventPayload::Echo {
            data: "ping".to_string(),
        });
        add_at(&clock, &buffer, 9, event);

        let group = buffer.get_group(EventKind::Echo, 1).unwrap();
        assert_eq!(
            group.events[0].payload,
            EventPayload::Echo {
                data: "ping".to_string()
            }
        );
    }
}

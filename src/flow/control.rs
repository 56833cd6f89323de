//! Priority scheduler feeding the writer.
//!
//! All registered data sources live inside one mutex-guarded state, grouped
//! into FIFO buckets by their current priority. The writer blocks in
//! [`FlowControl::wait_for_data`] and fills each packet with
//! [`FlowControl::write_data_to_stream`], which always drains the most urgent
//! visible bucket first. A throttling floor hides every bucket below it.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::core::PACKET_HEADROOM;

use super::completion::Completions;
use super::priority::Priority;

/// Something the scheduler can drain bytes from.
pub trait DataSource: Send {
    /// Priority of the most urgent pending data, or `None` when idle.
    fn priority(&self) -> Option<Priority>;

    /// Append at most `limit` bytes of encoded frames to `out`, pushing the
    /// completion of every fully written unit. Returns bytes written.
    fn write_data(&mut self, out: &mut Vec<u8>, limit: usize, completions: &mut Completions)
    -> usize;
}

/// Identifies a registered source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

struct Entry<S> {
    source: S,
    placed: Option<Priority>,
    retiring: bool,
}

struct SchedulerState<S> {
    sources: HashMap<SourceId, Entry<S>>,
    buckets: BTreeMap<Priority, VecDeque<SourceId>>,
    floor: Priority,
    next_id: u64,
    interrupted: bool,
    shutdown: bool,
}

impl<S: DataSource> SchedulerState<S> {
    /// Most urgent non-empty bucket at or above the floor.
    fn top_visible(&self) -> Option<Priority> {
        self.buckets
            .range(self.floor..)
            .next_back()
            .map(|(priority, _)| *priority)
    }

    fn unplace(&mut self, id: SourceId, priority: Priority) {
        if let Some(bucket) = self.buckets.get_mut(&priority) {
            bucket.retain(|queued| *queued != id);
            if bucket.is_empty() {
                self.buckets.remove(&priority);
            }
        }
    }

    /// Re-evaluate a source's bucket after it changed. Sources whose
    /// priority is unchanged keep their position.
    fn relocate(&mut self, id: SourceId) {
        let Some(entry) = self.sources.get(&id) else {
            return;
        };
        let current = entry.source.priority();
        let placed = entry.placed;
        if current == placed {
            return;
        }
        if let Some(old) = placed {
            self.unplace(id, old);
        }
        self.settle(id, current);
    }

    /// Record `priority` as the source's placement, appending it to the tail
    /// of that bucket. Idle retiring sources are dropped.
    fn settle(&mut self, id: SourceId, priority: Option<Priority>) {
        let Some(entry) = self.sources.get_mut(&id) else {
            return;
        };
        entry.placed = priority;
        match priority {
            Some(priority) => self.buckets.entry(priority).or_default().push_back(id),
            None if entry.retiring => {
                self.sources.remove(&id);
            }
            None => {}
        }
    }
}

/// The output scheduler.
pub struct FlowControl<S> {
    state: Mutex<SchedulerState<S>>,
    ready: Notify,
}

impl<S: DataSource> Default for FlowControl<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: DataSource> FlowControl<S> {
    /// Create an empty scheduler with no throttling.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SchedulerState {
                sources: HashMap::new(),
                buckets: BTreeMap::new(),
                floor: Priority::MIN,
                next_id: 0,
                interrupted: false,
                shutdown: false,
            }),
            ready: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState<S>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn wake_if_ready(&self, state: &SchedulerState<S>) {
        if state.top_visible().is_some() {
            self.ready.notify_one();
        }
    }

    /// Register a source. The returned token is how the owner mutates the
    /// source and announces new data.
    pub fn register_data_source(self: &Arc<Self>, source: S) -> DataSourceToken<S> {
        let mut state = self.lock();
        let id = SourceId(state.next_id);
        state.next_id += 1;
        state.sources.insert(
            id,
            Entry {
                source,
                placed: None,
                retiring: false,
            },
        );
        state.relocate(id);
        self.wake_if_ready(&state);
        drop(state);

        DataSourceToken {
            flow: Arc::clone(self),
            id,
        }
    }

    /// Run `f` on a registered source, then re-evaluate its placement.
    /// Returns `None` if the source is gone.
    pub fn with_source<R>(&self, id: SourceId, f: impl FnOnce(&mut S) -> R) -> Option<R> {
        let mut state = self.lock();
        let result = f(&mut state.sources.get_mut(&id)?.source);
        state.relocate(id);
        self.wake_if_ready(&state);
        Some(result)
    }

    /// Announce that a source's data may have changed.
    pub fn data_available(&self, id: SourceId) {
        let mut state = self.lock();
        state.relocate(id);
        self.wake_if_ready(&state);
    }

    /// Remove a source once it has nothing left to send.
    pub fn retire(&self, id: SourceId) {
        let mut state = self.lock();
        let Some(entry) = state.sources.get_mut(&id) else {
            return;
        };
        entry.retiring = true;
        if entry.placed.is_none() {
            state.sources.remove(&id);
        }
    }

    #[cfg(test)]
    pub(crate) fn source_count(&self) -> usize {
        self.lock().sources.len()
    }

    /// Wait until a source at or above the throttling floor has data.
    ///
    /// Returns `Some(true)` when data is ready, `Some(false)` on timeout or
    /// [`interrupt`](Self::interrupt), `None` after shutdown.
    pub async fn wait_for_data(&self, timeout: Duration) -> Option<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.lock();
                if state.shutdown {
                    return None;
                }
                if state.interrupted {
                    state.interrupted = false;
                    return Some(false);
                }
                if state.top_visible().is_some() {
                    return Some(true);
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Some(false);
            }
        }
    }

    /// Fill `out` with frames from the most urgent sources, using at most
    /// `size_limit - PACKET_HEADROOM` bytes.
    ///
    /// Within a bucket sources take turns: after writing, a source whose
    /// priority is unchanged goes to the tail of its bucket, one whose
    /// priority changed goes to the tail of the new bucket, and an idle one
    /// is unplaced. A source that could not write anything keeps the head of
    /// its bucket and ends the drain.
    pub fn write_data_to_stream(&self, out: &mut Vec<u8>, size_limit: usize) -> (usize, Completions) {
        let budget = size_limit.saturating_sub(PACKET_HEADROOM);
        let mut completions = Completions::new();
        let mut written = 0;

        let mut state = self.lock();
        if state.shutdown {
            return (0, completions);
        }
        while written < budget {
            let Some(priority) = state.top_visible() else {
                break;
            };
            let Some(id) = state.buckets.get_mut(&priority).and_then(VecDeque::pop_front) else {
                state.buckets.remove(&priority);
                continue;
            };
            if state.buckets.get(&priority).is_some_and(VecDeque::is_empty) {
                state.buckets.remove(&priority);
            }
            let Some(entry) = state.sources.get_mut(&id) else {
                continue;
            };

            let n = entry
                .source
                .write_data(out, budget - written, &mut completions);
            written += n;
            let after = entry.source.priority();

            if n == 0 && after == Some(priority) {
                state.buckets.entry(priority).or_default().push_front(id);
                break;
            }
            state.settle(id, after);
            if n == 0 {
                break;
            }
        }
        (written, completions)
    }

    /// Hide buckets below `floor` from the writer.
    pub fn start_throttling(&self, floor: Priority) {
        let mut state = self.lock();
        let lowered = floor < state.floor;
        state.floor = floor;
        if lowered {
            self.wake_if_ready(&state);
        }
    }

    /// Make every bucket visible again.
    pub fn stop_throttling(&self) {
        self.start_throttling(Priority::MIN);
    }

    /// Current throttling floor, if throttled.
    pub fn throttling_floor(&self) -> Option<Priority> {
        let floor = self.lock().floor;
        (floor > Priority::MIN).then_some(floor)
    }

    /// Wake the writer so it re-evaluates its timers.
    pub fn interrupt(&self) {
        self.lock().interrupted = true;
        self.ready.notify_one();
    }

    /// Stop scheduling. Idempotent; drops every source and wakes the writer.
    pub fn shutdown(&self) {
        let sources = {
            let mut state = self.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            state.buckets.clear();
            std::mem::take(&mut state.sources)
        };
        drop(sources);
        self.ready.notify_one();
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutdown(&self) -> bool {
        self.lock().shutdown
    }
}

/// Handle held by a source's owner.
pub struct DataSourceToken<S> {
    flow: Arc<FlowControl<S>>,
    id: SourceId,
}

impl<S> Clone for DataSourceToken<S> {
    fn clone(&self) -> Self {
        Self {
            flow: Arc::clone(&self.flow),
            id: self.id,
        }
    }
}

impl<S: DataSource> DataSourceToken<S> {
    /// The source's id.
    pub fn id(&self) -> SourceId {
        self.id
    }

    /// The scheduler this source is registered with.
    pub fn flow(&self) -> &Arc<FlowControl<S>> {
        &self.flow
    }

    /// Mutate the source, then re-evaluate its placement.
    pub fn update<R>(&self, f: impl FnOnce(&mut S) -> R) -> Option<R> {
        self.flow.with_source(self.id, f)
    }

    /// Announce that data may be available.
    pub fn data_available(&self) {
        self.flow.data_available(self.id);
    }

    /// Deregister once drained.
    pub fn retire(&self) {
        self.flow.retire(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Emits fixed-size chunks tagged with its name.
    struct Chunks {
        name: u8,
        priority: Priority,
        remaining: usize,
        chunk: usize,
        demote_to: Option<Priority>,
    }

    impl Chunks {
        fn new(name: u8, level: u8, remaining: usize) -> Self {
            Self {
                name,
                priority: Priority::new(level).unwrap(),
                remaining,
                chunk: 4,
                demote_to: None,
            }
        }

        /// Drops to `level` once its first chunk is out.
        fn demoting(mut self, level: u8) -> Self {
            self.demote_to = Priority::new(level);
            self
        }
    }

    impl DataSource for Chunks {
        fn priority(&self) -> Option<Priority> {
            (self.remaining > 0).then_some(self.priority)
        }

        fn write_data(
            &mut self,
            out: &mut Vec<u8>,
            limit: usize,
            completions: &mut Completions,
        ) -> usize {
            let mut written = 0;
            while self.remaining > 0 && limit - written >= self.chunk {
                out.extend(std::iter::repeat_n(self.name, self.chunk));
                written += self.chunk;
                self.remaining -= 1;
            }
            if written > 0 {
                if let Some(lower) = self.demote_to.take() {
                    self.priority = lower;
                }
            }
            if self.remaining == 0 && written > 0 {
                completions.push(Box::new(|| {}));
            }
            written
        }
    }

    fn drain(flow: &FlowControl<Chunks>, size: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let (n, _) = flow.write_data_to_stream(&mut out, size);
        assert_eq!(n, out.len());
        out
    }

    #[test]
    fn test_higher_priority_drains_first() {
        let flow = Arc::new(FlowControl::new());
        let _a = flow.register_data_source(Chunks::new(b'a', 1, 3));
        let _b = flow.register_data_source(Chunks::new(b'b', 4, 3));

        let first = drain(&flow, 8 + 8);
        assert_eq!(first, b"bbbbbbbb");
        let second = drain(&flow, 8 + 8);
        assert_eq!(second, b"bbbbaaaa");
        let third = drain(&flow, 8 + 8);
        assert_eq!(third, b"aaaaaaaa");
        assert!(drain(&flow, 16).is_empty());
    }

    #[test]
    fn test_headroom_respected() {
        let flow = Arc::new(FlowControl::new());
        let _a = flow.register_data_source(Chunks::new(b'a', 3, 100));
        let out = drain(&flow, 20);
        assert!(out.len() <= 20 - PACKET_HEADROOM);
        assert_eq!(out.len(), 12);
    }

    #[test]
    fn test_round_robin_within_bucket() {
        let flow = Arc::new(FlowControl::new());
        // One chunk per call: limit leaves room for exactly one.
        let _a = flow.register_data_source(Chunks::new(b'a', 2, 2));
        let _b = flow.register_data_source(Chunks::new(b'b', 2, 2));

        assert_eq!(drain(&flow, 4 + 8), b"aaaa");
        assert_eq!(drain(&flow, 4 + 8), b"bbbb");
        assert_eq!(drain(&flow, 4 + 8), b"aaaa");
        assert_eq!(drain(&flow, 4 + 8), b"bbbb");
    }

    #[test]
    fn test_changed_priority_goes_to_tail_of_new_bucket() {
        let flow = Arc::new(FlowControl::new());
        let _b = flow.register_data_source(Chunks::new(b'b', 1, 1));
        let _c = flow.register_data_source(Chunks::new(b'c', 1, 1));
        let _a = flow.register_data_source(Chunks::new(b'a', 6, 2).demoting(1));

        assert_eq!(drain(&flow, 4 + 8), b"aaaa");
        // Now at priority 1, behind the sources already waiting there.
        assert_eq!(drain(&flow, 4 + 8), b"bbbb");
        assert_eq!(drain(&flow, 4 + 8), b"cccc");
        assert_eq!(drain(&flow, 4 + 8), b"aaaa");
        assert!(drain(&flow, 64).is_empty());
    }

    #[test]
    fn test_throttling_hides_low_buckets() {
        let flow = Arc::new(FlowControl::new());
        let _low = flow.register_data_source(Chunks::new(b'l', 1, 1));
        flow.start_throttling(Priority::new(4).unwrap());
        assert_eq!(flow.throttling_floor(), Priority::new(4));
        assert!(drain(&flow, 64).is_empty());

        let _high = flow.register_data_source(Chunks::new(b'h', 6, 1));
        assert_eq!(drain(&flow, 64), b"hhhh");

        flow.stop_throttling();
        assert_eq!(drain(&flow, 64), b"llll");
    }

    #[test]
    fn test_update_relocates() {
        let flow = Arc::new(FlowControl::new());
        let a = flow.register_data_source(Chunks::new(b'a', 1, 1));
        let _b = flow.register_data_source(Chunks::new(b'b', 3, 1));
        a.update(|source| source.priority = Priority::new(5).unwrap());
        assert_eq!(drain(&flow, 12), b"aaaa");
    }

    #[test]
    fn test_retire_after_drain() {
        let flow = Arc::new(FlowControl::new());
        let a = flow.register_data_source(Chunks::new(b'a', 1, 1));
        a.retire();
        assert_eq!(flow.source_count(), 1);
        drain(&flow, 64);
        assert_eq!(flow.source_count(), 0);
        assert!(a.update(|_| ()).is_none());
    }

    #[tokio::test]
    async fn test_wait_for_data() {
        let flow = Arc::new(FlowControl::new());
        assert_eq!(
            flow.wait_for_data(Duration::from_millis(10)).await,
            Some(false)
        );

        let waiter = {
            let flow = flow.clone();
            tokio::spawn(async move { flow.wait_for_data(Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        let _a = flow.register_data_source(Chunks::new(b'a', 0, 1));
        assert_eq!(waiter.await.unwrap(), Some(true));
    }

    #[tokio::test]
    async fn test_wait_respects_throttling() {
        let flow = Arc::new(FlowControl::new());
        flow.start_throttling(Priority::MAX);
        let _a = flow.register_data_source(Chunks::new(b'a', 2, 1));
        assert_eq!(
            flow.wait_for_data(Duration::from_millis(10)).await,
            Some(false)
        );
        flow.stop_throttling();
        assert_eq!(
            flow.wait_for_data(Duration::from_millis(10)).await,
            Some(true)
        );
    }

    #[tokio::test]
    async fn test_interrupt_and_shutdown() {
        let flow: Arc<FlowControl<Chunks>> = Arc::new(FlowControl::new());
        flow.interrupt();
        assert_eq!(flow.wait_for_data(Duration::from_secs(5)).await, Some(false));

        flow.shutdown();
        flow.shutdown();
        assert!(flow.is_shutdown());
        assert_eq!(flow.wait_for_data(Duration::from_secs(5)).await, None);
    }
}

//! Ordered buffer of pending events with an optional persistence mirror.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::events::{Event, PipelineStats};
use crate::storage::StorageBackend;

/// FIFO buffer between the tracker facade and the delivery thread.
///
/// `enqueue` never blocks and never drops below the hard cap; past the cap the oldest events are
/// evicted first and counted. Draining moves events into an in-flight slot owned by the single
/// consumer (the delivery thread), which must resolve it with [`commit_in_flight`],
/// [`requeue_in_flight`], or [`discard_in_flight`] before the next drain.
///
/// When a mirror storage is configured, every enqueue and every resolved drain is reflected to it
/// so a reload reconstructs the queue exactly as it stood at last mutation. In-flight events stay
/// in the mirror until committed or discarded, so a crash mid-delivery loses nothing.
///
/// [`commit_in_flight`]: EventQueue::commit_in_flight
/// [`requeue_in_flight`]: EventQueue::requeue_in_flight
/// [`discard_in_flight`]: EventQueue::discard_in_flight
pub struct EventQueue {
    max_size: usize,
    storage: Option<Arc<dyn StorageBackend>>,
    storage_key: String,
    stats: Arc<PipelineStats>,
    state: Mutex<QueueState>,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<Event>,
    in_flight: Vec<Event>,
    /// Cleared on the first failed mirror write; the queue then runs memory-only.
    storage_ok: bool,
}

impl EventQueue {
    /// Create a queue, reconstructing pending events from the mirror if one exists.
    pub fn new(
        max_size: usize,
        storage: Option<Arc<dyn StorageBackend>>,
        storage_key: impl Into<String>,
        stats: Arc<PipelineStats>,
    ) -> EventQueue {
        let storage_key = storage_key.into();
        let pending = match &storage {
            Some(storage) => load_mirror(storage.as_ref(), &storage_key),
            None => VecDeque::new(),
        };

        EventQueue {
            max_size,
            storage,
            storage_key,
            stats,
            state: Mutex::new(QueueState {
                pending,
                in_flight: Vec::new(),
                storage_ok: true,
            }),
        }
    }

    /// Append an event to the tail. Never blocks; evicts the oldest pending events past the cap.
    pub fn enqueue(&self, event: Event) {
        let mut state = self.lock();

        state.pending.push_back(event);
        self.stats.record_enqueue();

        while state.pending.len() + state.in_flight.len() > self.max_size {
            let Some(dropped) = state.pending.pop_front() else {
                break;
            };
            self.stats.record_eviction();
            log::warn!(target: "founderos",
                       name = dropped.name.as_deref().unwrap_or("");
                       "evicted oldest event, queue is over capacity");
        }

        self.mirror(&mut state);
    }

    /// Atomically remove and return up to `n` events from the head, in original order. The
    /// returned events are in flight until resolved.
    pub fn drain_up_to(&self, n: usize) -> Vec<Event> {
        let mut state = self.lock();

        // A leftover in-flight batch means the consumer forgot to resolve it; fold it back so
        // nothing is lost or reordered.
        if !state.in_flight.is_empty() {
            let leftovers: Vec<Event> = state.in_flight.drain(..).collect();
            for event in leftovers.into_iter().rev() {
                state.pending.push_front(event);
            }
        }

        let count = n.min(state.pending.len());
        let batch: Vec<Event> = state.pending.drain(..count).collect();
        state.in_flight = batch.clone();
        batch
    }

    /// The in-flight batch was delivered; drop it durably. Returns the number of events.
    pub fn commit_in_flight(&self) -> usize {
        let mut state = self.lock();
        let count = state.in_flight.len();
        state.in_flight.clear();
        self.mirror(&mut state);
        count
    }

    /// Delivery failed; put the in-flight batch back at the head, preserving relative order, so
    /// it is retried before newer events.
    pub fn requeue_in_flight(&self) {
        let mut state = self.lock();
        let batch: Vec<Event> = state.in_flight.drain(..).collect();
        for event in batch.into_iter().rev() {
            state.pending.push_front(event);
        }
        // Mirror content is unchanged: it already listed these events ahead of pending ones.
    }

    /// The in-flight batch is undeliverable; drop it durably. Returns the number of events.
    pub fn discard_in_flight(&self) -> usize {
        let mut state = self.lock();
        let count = state.in_flight.len();
        state.in_flight.clear();
        self.mirror(&mut state);
        count
    }

    /// Number of events waiting to be drained (excludes the in-flight batch).
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    /// True when no events are pending or in flight.
    pub fn is_empty(&self) -> bool {
        let state = self.lock();
        state.pending.is_empty() && state.in_flight.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().expect("thread holding queue lock should not panic")
    }

    fn mirror(&self, state: &mut QueueState) {
        let Some(storage) = &self.storage else {
            return;
        };
        if !state.storage_ok {
            return;
        }

        let everything: Vec<&Event> = state.in_flight.iter().chain(state.pending.iter()).collect();
        let payload = serde_json::to_string(&everything)
            .expect("events should always be serializable to JSON");

        if let Err(err) = storage.set(&self.storage_key, &payload) {
            log::warn!(target: "founderos",
                       "failed to mirror event queue, continuing in memory only: {err}");
            state.storage_ok = false;
        }
    }
}

fn load_mirror(storage: &dyn StorageBackend, key: &str) -> VecDeque<Event> {
    let raw = match storage.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return VecDeque::new(),
        Err(err) => {
            log::warn!(target: "founderos", "failed to read event queue mirror: {err}");
            return VecDeque::new();
        }
    };

    match serde_json::from_str::<Vec<Event>>(&raw) {
        Ok(events) => events.into(),
        Err(err) => {
            // A mirror we can't parse is treated as a first run.
            log::warn!(target: "founderos", "discarding unreadable event queue mirror: {err}");
            VecDeque::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::test_event;
    use crate::storage::MemoryStorage;

    fn plain_queue(max_size: usize) -> EventQueue {
        EventQueue::new(max_size, None, "fos_events", Arc::new(PipelineStats::default()))
    }

    fn names(events: &[Event]) -> Vec<&str> {
        events.iter().map(|e| e.name.as_deref().unwrap_or("")).collect()
    }

    #[test]
    fn drains_in_enqueue_order() {
        let queue = plain_queue(100);
        for name in ["a", "b", "c"] {
            queue.enqueue(test_event(name));
        }

        let batch = queue.drain_up_to(2);
        assert_eq!(names(&batch), vec!["a", "b"]);
        queue.commit_in_flight();

        let batch = queue.drain_up_to(10);
        assert_eq!(names(&batch), vec!["c"]);
    }

    #[test]
    fn requeue_preserves_order_ahead_of_newer_events() {
        let queue = plain_queue(100);
        for name in ["a", "b"] {
            queue.enqueue(test_event(name));
        }

        let batch = queue.drain_up_to(2);
        assert_eq!(names(&batch), vec!["a", "b"]);

        queue.enqueue(test_event("c"));
        queue.requeue_in_flight();

        let batch = queue.drain_up_to(10);
        assert_eq!(names(&batch), vec!["a", "b", "c"]);
    }

    #[test]
    fn evicts_oldest_past_the_cap() {
        let stats = Arc::new(PipelineStats::default());
        let queue = EventQueue::new(3, None, "fos_events", Arc::clone(&stats));

        for name in ["a", "b", "c", "d", "e"] {
            queue.enqueue(test_event(name));
        }

        assert_eq!(queue.len(), 3);
        assert_eq!(stats.snapshot().evicted_events, 2);
        let batch = queue.drain_up_to(10);
        assert_eq!(names(&batch), vec!["c", "d", "e"]);
    }

    #[test]
    fn reload_reconstructs_pending_events_in_order() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());

        let queue = EventQueue::new(
            100,
            Some(Arc::clone(&storage)),
            "fos_events",
            Arc::new(PipelineStats::default()),
        );
        for name in ["a", "b", "c"] {
            queue.enqueue(test_event(name));
        }
        drop(queue);

        let reloaded = EventQueue::new(
            100,
            Some(Arc::clone(&storage)),
            "fos_events",
            Arc::new(PipelineStats::default()),
        );
        let batch = reloaded.drain_up_to(10);
        assert_eq!(names(&batch), vec!["a", "b", "c"]);
    }

    #[test]
    fn in_flight_events_stay_mirrored_until_committed() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());

        let queue = EventQueue::new(
            100,
            Some(Arc::clone(&storage)),
            "fos_events",
            Arc::new(PipelineStats::default()),
        );
        queue.enqueue(test_event("a"));
        queue.enqueue(test_event("b"));
        let _ = queue.drain_up_to(1);

        // Simulated crash before the batch resolves: the mirror still holds both events.
        let reloaded = EventQueue::new(
            100,
            Some(Arc::clone(&storage)),
            "fos_events",
            Arc::new(PipelineStats::default()),
        );
        assert_eq!(reloaded.len(), 2);
    }

    #[test]
    fn commit_drops_events_from_the_mirror() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());

        let queue = EventQueue::new(
            100,
            Some(Arc::clone(&storage)),
            "fos_events",
            Arc::new(PipelineStats::default()),
        );
        queue.enqueue(test_event("a"));
        queue.enqueue(test_event("b"));
        let _ = queue.drain_up_to(1);
        assert_eq!(queue.commit_in_flight(), 1);

        let reloaded = EventQueue::new(
            100,
            Some(storage),
            "fos_events",
            Arc::new(PipelineStats::default()),
        );
        let batch = reloaded.drain_up_to(10);
        assert_eq!(names(&batch), vec!["b"]);
    }

    #[test]
    fn unreadable_mirror_is_treated_as_first_run() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        storage.set("fos_events", "not json at all").unwrap();

        let queue = EventQueue::new(
            100,
            Some(storage),
            "fos_events",
            Arc::new(PipelineStats::default()),
        );

        assert!(queue.is_empty());
    }

    #[test]
    fn save_load_is_idempotent_without_mutation() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());

        let queue = EventQueue::new(
            100,
            Some(Arc::clone(&storage)),
            "fos_events",
            Arc::new(PipelineStats::default()),
        );
        queue.enqueue(test_event("a"));
        let first = storage.get("fos_events").unwrap();
        drop(queue);

        let _reloaded = EventQueue::new(
            100,
            Some(Arc::clone(&storage)),
            "fos_events",
            Arc::new(PipelineStats::default()),
        );
        let second = storage.get("fos_events").unwrap();
        assert_eq!(first, second);
    }
}

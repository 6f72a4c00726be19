//! Bounded, priority-ordered request queue.
//!
//! Requests wait in the queue until a concurrency slot is free, then the
//! strongest one is dispatched. When the queue is full, a new request is
//! admitted only if it is strictly stronger than the weakest queued one,
//! which is then evicted.
//!
//! # Ordering
//!
//! Priorities are compared with a pluggable comparator (numeric ascending by
//! default, so larger values win). Among equal priorities the earliest
//! admitted request is dispatched first and the latest admitted is evicted
//! first.
//!
//! # Locking
//!
//! The queue lock may be held while a request's own lock is taken, never the
//! other way round. Sources and hooks always run after the queue lock has
//! been released.

use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::{AsyncRequest, Priority, RequestId};

// =============================================================================
// Sequence Number Generator
// =============================================================================

/// Global admission counter for tie-breaking within a priority.
static SEQUENCE_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_sequence() -> u64 {
    SEQUENCE_COUNTER.fetch_add(1, AtomicOrdering::Relaxed)
}

// =============================================================================
// Types
// =============================================================================

type PriorityCompare = Arc<dyn Fn(Priority, Priority) -> Ordering + Send + Sync>;
type ReadyHook = Arc<dyn Fn(&AsyncRequest) + Send + Sync>;

/// Result of [`RequestQueue::push`].
#[derive(Debug, Default)]
pub struct PushOutcome {
    /// Whether the pushed request entered the queue.
    pub admitted: bool,

    /// Queued requests evicted to make room, now `Rejected`.
    pub victims: Vec<AsyncRequest>,
}

struct QueuedEntry {
    request: AsyncRequest,
    /// Priority snapshot used for ordering until the queue is marked dirty.
    priority: Priority,
    sequence: u64,
}

struct QueueState {
    /// Sorted weakest first; the strongest entry is at the back.
    queued: Vec<QueuedEntry>,
    ongoing: Vec<AsyncRequest>,
    dirty: bool,
    held: bool,
    compare: PriorityCompare,
    on_ready: Option<ReadyHook>,
}

pub(crate) struct QueueShared {
    max_ongoing: usize,
    max_queued: usize,
    state: Mutex<QueueState>,
}

// =============================================================================
// RequestQueue
// =============================================================================

/// Shared handle to a request queue.
///
/// `max_ongoing` bounds concurrently dispatched requests and `max_queued`
/// bounds waiting ones; `0` means unbounded for either.
#[derive(Clone)]
pub struct RequestQueue {
    shared: Arc<QueueShared>,
}

impl RequestQueue {
    pub fn new(max_ongoing: usize, max_queued: usize) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                max_ongoing,
                max_queued,
                state: Mutex::new(QueueState {
                    queued: Vec::new(),
                    ongoing: Vec::new(),
                    dirty: false,
                    held: false,
                    compare: Arc::new(|a: Priority, b: Priority| a.total_cmp(&b)),
                    on_ready: None,
                }),
            }),
        }
    }

    pub(crate) fn from_shared(shared: Arc<QueueShared>) -> Self {
        Self { shared }
    }

    pub fn max_ongoing(&self) -> usize {
        self.shared.max_ongoing
    }

    pub fn max_queued(&self) -> usize {
        self.shared.max_queued
    }

    /// Offers a request to the queue.
    ///
    /// Requests that already belong to a queue, or are queued or ongoing, are
    /// refused without any state change. On a full queue a request that is
    /// not strictly stronger than the weakest queued one becomes `Rejected`.
    /// Otherwise the request is admitted, the weakest entries beyond capacity
    /// are evicted, and dispatch runs.
    pub fn push(&self, request: &AsyncRequest) -> PushOutcome {
        let mut outcome = PushOutcome::default();

        let started = {
            let mut state = self.shared.state.lock();
            if !request.is_admissible() {
                trace!(request = %request.id(), "Push refused: request is busy");
                return outcome;
            }
            ensure_sorted(&mut state);

            let priority = request.priority();
            if self.is_full(&state) {
                let weakest = state.queued.first().map(|entry| entry.priority);
                let stronger = weakest
                    .map(|weakest| (state.compare)(priority, weakest) == Ordering::Greater)
                    .unwrap_or(true);
                if !stronger {
                    request.mark_rejected();
                    trace!(request = %request.id(), priority, "Push rejected: queue full");
                    return outcome;
                }
            }

            if !request.enter_queue(Arc::downgrade(&self.shared)) {
                return outcome;
            }
            insert_sorted(
                &mut state,
                QueuedEntry {
                    request: request.clone(),
                    priority,
                    sequence: next_sequence(),
                },
            );
            outcome.admitted = true;

            while self.shared.max_queued > 0 && state.queued.len() > self.shared.max_queued {
                let victim = state.queued.remove(0).request;
                victim.mark_rejected();
                trace!(request = %victim.id(), "Evicted from full queue");
                outcome.victims.push(victim);
            }

            self.dispatch_locked(&mut state)
        };

        launch_all(started);
        outcome
    }

    /// Stops dispatching until [`RequestQueue::resume`].
    pub fn hold(&self) {
        self.shared.state.lock().held = true;
    }

    /// Restarts dispatching and fills the free slots.
    pub fn resume(&self) {
        let started = {
            let mut state = self.shared.state.lock();
            state.held = false;
            self.dispatch_locked(&mut state)
        };
        launch_all(started);
    }

    pub fn is_held(&self) -> bool {
        self.shared.state.lock().held
    }

    /// Cancels every queued request and aborts every ongoing one.
    ///
    /// Returns the number of requests affected.
    pub fn cancel_all(&self) -> usize {
        let (queued, ongoing) = {
            let state = self.shared.state.lock();
            let queued: Vec<AsyncRequest> =
                state.queued.iter().map(|entry| entry.request.clone()).collect();
            (queued, state.ongoing.clone())
        };

        let cancelled = queued.iter().filter(|request| request.cancel()).count();
        let aborted = ongoing.iter().filter(|request| request.abort()).count();
        cancelled + aborted
    }

    /// Total number of queued and ongoing requests.
    pub fn len(&self) -> usize {
        let state = self.shared.state.lock();
        state.queued.len() + state.ongoing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn queued_len(&self) -> usize {
        self.shared.state.lock().queued.len()
    }

    pub fn ongoing_len(&self) -> usize {
        self.shared.state.lock().ongoing.len()
    }

    /// Priority of the weakest queued request.
    pub fn min_priority(&self) -> Option<Priority> {
        let mut state = self.shared.state.lock();
        ensure_sorted(&mut state);
        state.queued.first().map(|entry| entry.priority)
    }

    /// Queued requests in dispatch order (strongest first).
    pub fn queued_requests(&self) -> Vec<AsyncRequest> {
        let mut state = self.shared.state.lock();
        ensure_sorted(&mut state);
        state
            .queued
            .iter()
            .rev()
            .map(|entry| entry.request.clone())
            .collect()
    }

    /// Ongoing requests in dispatch order.
    pub fn ongoing_requests(&self) -> Vec<AsyncRequest> {
        self.shared.state.lock().ongoing.clone()
    }

    /// Installs a hook that runs whenever an ongoing request becomes ready,
    /// before its own listeners.
    pub fn set_on_ready<F>(&self, hook: F)
    where
        F: Fn(&AsyncRequest) + Send + Sync + 'static,
    {
        self.shared.state.lock().on_ready = Some(Arc::new(hook));
    }

    /// Replaces the priority comparator. `Greater` means stronger.
    pub fn set_priority_compare<F>(&self, compare: F)
    where
        F: Fn(Priority, Priority) -> Ordering + Send + Sync + 'static,
    {
        let mut state = self.shared.state.lock();
        state.compare = Arc::new(compare);
        state.dirty = true;
    }

    /// Compares two priorities with the current comparator.
    pub fn compare_priorities(&self, a: Priority, b: Priority) -> Ordering {
        let compare = self.shared.state.lock().compare.clone();
        compare(a, b)
    }

    fn is_full(&self, state: &QueueState) -> bool {
        self.shared.max_queued > 0 && state.queued.len() >= self.shared.max_queued
    }

    /// Moves requests from queued to ongoing while the budget allows.
    /// The returned requests must be launched after the lock is released.
    fn dispatch_locked(&self, state: &mut QueueState) -> Vec<AsyncRequest> {
        let mut started = Vec::new();
        if state.held {
            return started;
        }
        ensure_sorted(state);

        while self.shared.max_ongoing == 0 || state.ongoing.len() < self.shared.max_ongoing {
            let Some(entry) = state.queued.pop() else {
                break;
            };
            if entry.request.begin_dispatch() {
                trace!(request = %entry.request.id(), priority = entry.priority, "Dispatching");
                state.ongoing.push(entry.request.clone());
                started.push(entry.request);
            }
        }
        started
    }
}

impl QueueShared {
    /// An ongoing request reached `Succeeded` or `Failed`.
    pub(crate) fn request_ready(self: &Arc<Self>, request: &AsyncRequest) {
        let queue = RequestQueue::from_shared(self.clone());
        let (hook, started) = {
            let mut state = self.state.lock();
            state.ongoing.retain(|ongoing| ongoing != request);
            let hook = state.on_ready.clone();
            (hook, queue.dispatch_locked(&mut state))
        };
        if let Some(hook) = hook {
            hook(request);
        }
        launch_all(started);
    }

    /// A queued request was cancelled.
    pub(crate) fn remove_queued(&self, id: RequestId) {
        self.state
            .lock()
            .queued
            .retain(|entry| entry.request.id() != id);
    }

    /// An ongoing request was aborted; its slot is backfilled.
    pub(crate) fn remove_ongoing(self: &Arc<Self>, request: &AsyncRequest) {
        let queue = RequestQueue::from_shared(self.clone());
        let started = {
            let mut state = self.state.lock();
            state.ongoing.retain(|ongoing| ongoing != request);
            queue.dispatch_locked(&mut state)
        };
        launch_all(started);
    }

    /// A queued request changed priority.
    pub(crate) fn request_reprioritized(&self) {
        self.state.lock().dirty = true;
    }
}

impl fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("RequestQueue")
            .field("max_ongoing", &self.shared.max_ongoing)
            .field("max_queued", &self.shared.max_queued)
            .field("queued", &state.queued.len())
            .field("ongoing", &state.ongoing.len())
            .field("held", &state.held)
            .finish()
    }
}

// =============================================================================
// Ordering helpers
// =============================================================================

/// Weakest first; among equal priorities the later admission is weaker.
fn entry_order(compare: &PriorityCompare, a: &QueuedEntry, b: &QueuedEntry) -> Ordering {
    compare(a.priority, b.priority).then_with(|| b.sequence.cmp(&a.sequence))
}

/// Re-snapshots priorities and re-sorts when the queue is dirty.
fn ensure_sorted(state: &mut QueueState) {
    if !state.dirty {
        return;
    }
    for entry in &mut state.queued {
        entry.priority = entry.request.priority();
    }
    let compare = state.compare.clone();
    state.queued.sort_by(|a, b| entry_order(&compare, a, b));
    state.dirty = false;
}

fn insert_sorted(state: &mut QueueState, entry: QueuedEntry) {
    let compare = state.compare.clone();
    let index = state
        .queued
        .partition_point(|existing| entry_order(&compare, existing, &entry) == Ordering::Less);
    state.queued.insert(index, entry);
}

fn launch_all(requests: Vec<AsyncRequest>) {
    for request in requests {
        request.launch();
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{manual_request, ManualSource};
    use super::super::RequestStatus;
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn request_with_priority(priority: Priority) -> (AsyncRequest, ManualSource) {
        let (request, source) = manual_request(&format!("p{}", priority));
        request.set_priority(priority);
        (request, source)
    }

    #[test]
    fn test_push_dispatches_within_budget() {
        let queue = RequestQueue::new(2, 0);
        let requests: Vec<_> = (0..3).map(|p| request_with_priority(p as f64)).collect();
        for (request, _) in &requests {
            assert!(queue.push(request).admitted);
        }
        assert_eq!(queue.ongoing_len(), 2);
        assert_eq!(queue.queued_len(), 1);
        assert_eq!(requests[2].0.status(), RequestStatus::Queued);
    }

    #[test]
    fn test_push_refuses_request_already_queued() {
        let queue = RequestQueue::new(1, 0);
        queue.hold();
        let (request, _) = request_with_priority(1.0);
        assert!(queue.push(&request).admitted);

        let outcome = queue.push(&request);
        assert!(!outcome.admitted);
        assert_eq!(queue.queued_len(), 1);
        assert_eq!(request.status(), RequestStatus::Queued);

        let other = RequestQueue::new(1, 0);
        assert!(!other.push(&request).admitted);
        assert_eq!(request.queue().unwrap().queued_len(), 1);
    }

    #[test]
    fn test_push_refuses_ongoing_request() {
        let queue = RequestQueue::new(1, 0);
        let (request, _) = request_with_priority(1.0);
        request.send();
        assert!(!queue.push(&request).admitted);
        assert_eq!(request.status(), RequestStatus::Ongoing);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_queue_rejects_weaker_request() {
        let queue = RequestQueue::new(1, 2);
        queue.hold();
        let (a, _) = request_with_priority(3.0);
        let (b, _) = request_with_priority(5.0);
        queue.push(&a);
        queue.push(&b);

        let (weak, _) = request_with_priority(2.0);
        let outcome = queue.push(&weak);
        assert!(!outcome.admitted);
        assert!(outcome.victims.is_empty());
        assert_eq!(weak.status(), RequestStatus::Rejected);
        assert_eq!(queue.queued_len(), 2);

        // Equal to the minimum is not strictly better.
        let (equal, _) = request_with_priority(3.0);
        assert!(!queue.push(&equal).admitted);
        assert_eq!(equal.status(), RequestStatus::Rejected);
        assert_eq!(queue.queued_len(), 2);
    }

    #[test]
    fn test_full_queue_evicts_weakest() {
        let queue = RequestQueue::new(1, 2);
        queue.hold();
        let (a, _) = request_with_priority(3.0);
        let (b, _) = request_with_priority(5.0);
        queue.push(&a);
        queue.push(&b);

        let (strong, _) = request_with_priority(4.0);
        let outcome = queue.push(&strong);
        assert!(outcome.admitted);
        assert_eq!(outcome.victims, vec![a.clone()]);
        assert_eq!(a.status(), RequestStatus::Rejected);
        assert!(a.queue().is_none());
        assert_eq!(queue.queued_len(), 2);
        assert_eq!(queue.min_priority(), Some(4.0));
    }

    #[test]
    fn test_ties_dispatch_earliest_and_evict_latest() {
        let queue = RequestQueue::new(1, 2);
        queue.hold();
        let (first, _) = request_with_priority(1.0);
        let (second, _) = request_with_priority(1.0);
        queue.push(&first);
        queue.push(&second);
        assert_eq!(queue.queued_requests(), vec![first.clone(), second.clone()]);

        let (strong, _) = request_with_priority(2.0);
        let outcome = queue.push(&strong);
        assert_eq!(outcome.victims, vec![second.clone()]);

        queue.resume();
        assert_eq!(strong.status(), RequestStatus::Ongoing);
        assert_eq!(first.status(), RequestStatus::Queued);
    }

    #[test]
    fn test_completion_backfills() {
        let queue = RequestQueue::new(1, 0);
        let (a, source_a) = request_with_priority(2.0);
        let (b, _) = request_with_priority(1.0);
        queue.push(&a);
        queue.push(&b);
        assert_eq!(b.status(), RequestStatus::Queued);

        source_a.succeed(b"done");
        assert!(a.succeeded());
        assert!(a.queue().is_none());
        assert_eq!(b.status(), RequestStatus::Ongoing);
        assert_eq!(queue.ongoing_requests(), vec![b]);
    }

    #[test]
    fn test_failure_backfills() {
        let queue = RequestQueue::new(1, 0);
        let (a, source_a) = request_with_priority(2.0);
        let (b, _) = request_with_priority(1.0);
        queue.push(&a);
        queue.push(&b);
        source_a.fail();
        assert!(a.failed());
        assert_eq!(b.status(), RequestStatus::Ongoing);
    }

    #[test]
    fn test_on_ready_runs_before_listeners() {
        let queue = RequestQueue::new(1, 0);
        let order = Arc::new(Mutex::new(Vec::new()));
        let hook_order = order.clone();
        queue.set_on_ready(move |_| hook_order.lock().push("queue"));

        let (request, source) = request_with_priority(1.0);
        let listener_order = order.clone();
        request.add_ready_listener(move |_| listener_order.lock().push("listener"));
        queue.push(&request);
        source.succeed(b"x");

        assert_eq!(*order.lock(), vec!["queue", "listener"]);
    }

    #[test]
    fn test_cancel_removes_from_queue() {
        let queue = RequestQueue::new(1, 0);
        queue.hold();
        let (request, source) = request_with_priority(1.0);
        queue.push(&request);
        assert!(request.cancel());
        assert_eq!(request.status(), RequestStatus::Cancelled);
        assert!(queue.is_empty());

        queue.resume();
        assert_eq!(source.started(), 0);
    }

    #[test]
    fn test_abort_ongoing_backfills() {
        let queue = RequestQueue::new(1, 0);
        let (a, source_a) = request_with_priority(2.0);
        let (b, _) = request_with_priority(1.0);
        queue.push(&a);
        queue.push(&b);

        assert!(a.abort());
        assert!(source_a.was_aborted());
        assert_eq!(a.status(), RequestStatus::Aborted);
        assert_eq!(b.status(), RequestStatus::Ongoing);
        assert_eq!(queue.ongoing_len(), 1);
    }

    #[test]
    fn test_reprioritize_changes_dispatch_order() {
        let queue = RequestQueue::new(1, 0);
        queue.hold();
        let (a, _) = request_with_priority(1.0);
        let (b, _) = request_with_priority(2.0);
        queue.push(&a);
        queue.push(&b);

        a.set_priority(10.0);
        assert_eq!(queue.min_priority(), Some(2.0));
        queue.resume();
        assert_eq!(a.status(), RequestStatus::Ongoing);
        assert_eq!(b.status(), RequestStatus::Queued);
    }

    #[test]
    fn test_reprioritize_is_seen_by_admission() {
        let queue = RequestQueue::new(1, 1);
        queue.hold();
        let (a, _) = request_with_priority(5.0);
        queue.push(&a);
        a.set_priority(1.0);

        let (b, _) = request_with_priority(2.0);
        let outcome = queue.push(&b);
        assert!(outcome.admitted);
        assert_eq!(outcome.victims, vec![a]);
    }

    #[test]
    fn test_custom_comparator_inverts_order() {
        let queue = RequestQueue::new(1, 0);
        queue.set_priority_compare(|a, b| b.total_cmp(&a));
        queue.hold();
        let (low, _) = request_with_priority(1.0);
        let (high, _) = request_with_priority(9.0);
        queue.push(&high);
        queue.push(&low);
        queue.resume();
        assert_eq!(low.status(), RequestStatus::Ongoing);
        assert_eq!(queue.compare_priorities(1.0, 9.0), Ordering::Greater);
    }

    #[test]
    fn test_cancel_all() {
        let queue = RequestQueue::new(1, 0);
        let (a, source_a) = request_with_priority(2.0);
        let (b, _) = request_with_priority(1.0);
        queue.push(&a);
        queue.push(&b);

        assert_eq!(queue.cancel_all(), 2);
        assert_eq!(a.status(), RequestStatus::Aborted);
        assert_eq!(b.status(), RequestStatus::Cancelled);
        assert!(source_a.was_aborted());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_refused_start_frees_slot() {
        let queue = RequestQueue::new(1, 0);
        let broken = AsyncRequest::new(ManualSource::refusing(""));
        broken.set_priority(5.0);
        let (good, _) = request_with_priority(1.0);
        queue.hold();
        queue.push(&broken);
        queue.push(&good);
        queue.resume();

        assert!(broken.failed());
        assert_eq!(good.status(), RequestStatus::Ongoing);
    }

    #[test]
    fn test_unbounded_queue_dispatches_everything() {
        let queue = RequestQueue::new(0, 0);
        let fired = Arc::new(AtomicUsize::new(0));
        for p in 0..10 {
            let (request, _) = request_with_priority(p as f64);
            let counter = fired.clone();
            request.add_ready_listener(move |_| {
                counter.fetch_add(1, AtomicOrdering::SeqCst);
            });
            queue.push(&request);
        }
        assert_eq!(queue.ongoing_len(), 10);
        assert_eq!(queue.queued_len(), 0);
        assert_eq!(fired.load(AtomicOrdering::SeqCst), 0);
    }

    #[test]
    fn test_end_to_end_batch_admission() {
        let queue = RequestQueue::new(2, 4);
        queue.hold();
        let requests: Vec<_> = [1.0, 5.0, 3.0, 2.0, 4.0]
            .iter()
            .map(|&p| request_with_priority(p))
            .collect();
        for (request, _) in &requests {
            queue.push(request);
        }
        queue.resume();

        let status = |p: usize| requests[p].0.status();
        assert_eq!(status(0), RequestStatus::Rejected);
        assert_eq!(status(1), RequestStatus::Ongoing);
        assert_eq!(status(4), RequestStatus::Ongoing);
        assert_eq!(status(2), RequestStatus::Queued);
        assert_eq!(status(3), RequestStatus::Queued);
        assert_eq!(queue.queued_len(), 2);
        assert_eq!(queue.ongoing_len(), 2);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_capacity_is_never_exceeded(
                priorities in proptest::collection::vec(0u8..20, 1..40),
                max_queued in 1usize..6
            ) {
                let queue = RequestQueue::new(1, max_queued);
                queue.hold();
                for p in priorities {
                    let (request, _) = request_with_priority(p as f64);
                    let before = queue.queued_len();
                    let min = queue.min_priority();
                    let outcome = queue.push(&request);
                    prop_assert!(queue.queued_len() <= max_queued);
                    if before == max_queued && min.map_or(false, |m| (p as f64) <= m) {
                        prop_assert!(!outcome.admitted);
                        prop_assert_eq!(request.status(), RequestStatus::Rejected);
                        prop_assert_eq!(queue.queued_len(), before);
                    }
                    for victim in &outcome.victims {
                        prop_assert_eq!(victim.status(), RequestStatus::Rejected);
                        prop_assert!(victim.queue().is_none());
                    }
                }
            }
        }
    }
}

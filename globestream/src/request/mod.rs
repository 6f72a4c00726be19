//! Cancellable, observable asynchronous requests.
//!
//! An [`AsyncRequest`] wraps one unit of asynchronous work (normally an HTTP
//! image fetch) behind a small state machine:
//!
//! ```text
//! Idle ──push──► Queued ──dispatch──► Ongoing ──► Succeeded | Failed
//!                  │                     │
//!                  ├──► Cancelled        └──► Aborted
//!                  └──► Rejected
//! ```
//!
//! The actual I/O is delegated to a [`RequestSource`]. Sources report their
//! outcome through a [`Completion`], which may be used from any thread. Ready
//! listeners fire once the request reaches `Succeeded` or `Failed`.
//!
//! Requests are cheap cloneable handles; all clones observe the same state.

pub mod http;
pub mod queue;
pub mod watcher;

pub use http::{HttpImageSource, HttpTileFetcher};
pub use queue::{PushOutcome, RequestQueue};
pub use watcher::RequestWatcher;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, trace};

use queue::QueueShared;

/// Request priority. Larger values are more important under the default
/// comparator.
pub type Priority = f64;

// =============================================================================
// Identifiers
// =============================================================================

/// Global counter for request identifiers.
static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique request identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    fn next() -> Self {
        Self(REQUEST_COUNTER.fetch_add(1, AtomicOrdering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Handle returned by [`AsyncRequest::add_ready_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

// =============================================================================
// Status and errors
// =============================================================================

/// Lifecycle state of an [`AsyncRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestStatus {
    /// Created but never queued or sent.
    Idle,
    /// Waiting in a [`RequestQueue`] for a concurrency slot.
    Queued,
    /// Work has been handed to the source.
    Ongoing,
    /// The source delivered a payload.
    Succeeded,
    /// The source reported an error, or could not start.
    Failed,
    /// Stopped by [`AsyncRequest::abort`] while ongoing.
    Aborted,
    /// Removed from its queue by [`AsyncRequest::cancel`].
    Cancelled,
    /// Refused or evicted by a full queue.
    Rejected,
}

impl RequestStatus {
    /// Returns true for the two states that fire ready listeners.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Returns true when no further transition will happen without a new
    /// `send()` or `push()`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Aborted | Self::Cancelled | Self::Rejected
        )
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Queued => "queued",
            Self::Ongoing => "ongoing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// Why a request failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The source refused to start (for example an empty URL).
    #[error("Request could not be started: {0}")]
    NotStarted(String),

    /// Connection, DNS, TLS or timeout failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server answered with a non-success status code.
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// The response body could not be read.
    #[error("Failed to read response body: {0}")]
    Body(String),
}

// =============================================================================
// Source trait and completion
// =============================================================================

/// Performs the I/O behind a request.
///
/// `start` must not block. It hands the [`Completion`] to whatever runs the
/// work and returns `true`, or returns `false` when the work cannot begin at
/// all, in which case the request fails immediately with
/// [`FetchError::NotStarted`].
pub trait RequestSource: Send + Sync + 'static {
    /// Human-readable target, usually a URL.
    fn target(&self) -> &str;

    /// Begins the work.
    fn start(&self, completion: Completion) -> bool;

    /// Stops in-flight work after the request was aborted.
    fn abort(&self) {}
}

/// One-shot outcome channel handed to [`RequestSource::start`].
///
/// Only the delivery belonging to the current attempt counts, and only while
/// the request is still ongoing. Late deliveries after an abort are ignored.
pub struct Completion {
    request: Weak<RequestInner>,
    attempt: u64,
}

impl Completion {
    /// Completes the request with a payload.
    pub fn succeed(self, payload: Bytes) {
        self.deliver(Ok(payload));
    }

    /// Completes the request with an error.
    pub fn fail(self, error: FetchError) {
        self.deliver(Err(error));
    }

    fn deliver(self, result: Result<Bytes, FetchError>) {
        if let Some(inner) = self.request.upgrade() {
            AsyncRequest { inner }.finish(self.attempt, result);
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("attempt", &self.attempt)
            .finish()
    }
}

// =============================================================================
// AsyncRequest
// =============================================================================

type ReadyListener = Box<dyn FnOnce(&AsyncRequest) + Send>;

struct RequestState {
    status: RequestStatus,
    priority: Priority,
    queue: Option<Weak<QueueShared>>,
    listeners: Vec<(ListenerId, ReadyListener)>,
    next_listener: u64,
    attempt: u64,
    payload: Option<Bytes>,
    error: Option<FetchError>,
}

struct RequestInner {
    id: RequestId,
    source: Box<dyn RequestSource>,
    state: Mutex<RequestState>,
}

/// Shared handle to one asynchronous request.
#[derive(Clone)]
pub struct AsyncRequest {
    inner: Arc<RequestInner>,
}

impl AsyncRequest {
    /// Creates an idle request with priority 0.
    pub fn new(source: impl RequestSource) -> Self {
        Self {
            inner: Arc::new(RequestInner {
                id: RequestId::next(),
                source: Box::new(source),
                state: Mutex::new(RequestState {
                    status: RequestStatus::Idle,
                    priority: 0.0,
                    queue: None,
                    listeners: Vec::new(),
                    next_listener: 0,
                    attempt: 0,
                    payload: None,
                    error: None,
                }),
            }),
        }
    }

    pub fn id(&self) -> RequestId {
        self.inner.id
    }

    pub fn target(&self) -> &str {
        self.inner.source.target()
    }

    pub fn status(&self) -> RequestStatus {
        self.inner.state.lock().status
    }

    pub fn priority(&self) -> Priority {
        self.inner.state.lock().priority
    }

    pub fn succeeded(&self) -> bool {
        self.status() == RequestStatus::Succeeded
    }

    pub fn failed(&self) -> bool {
        self.status() == RequestStatus::Failed
    }

    pub fn is_ready(&self) -> bool {
        self.status().is_ready()
    }

    /// Payload of a succeeded request.
    pub fn payload(&self) -> Option<Bytes> {
        self.inner.state.lock().payload.clone()
    }

    /// Error of a failed request.
    pub fn error(&self) -> Option<FetchError> {
        self.inner.state.lock().error.clone()
    }

    /// The queue this request currently belongs to.
    pub fn queue(&self) -> Option<RequestQueue> {
        let weak = self.inner.state.lock().queue.clone()?;
        weak.upgrade().map(RequestQueue::from_shared)
    }

    /// Sets the priority. A queued request asks its queue to re-rank.
    pub fn set_priority(&self, priority: Priority) {
        let queue = {
            let mut state = self.inner.state.lock();
            state.priority = priority;
            if state.status == RequestStatus::Queued {
                state.queue.clone()
            } else {
                None
            }
        };
        if let Some(shared) = queue.and_then(|weak| weak.upgrade()) {
            shared.request_reprioritized();
        }
    }

    /// Starts the work directly, bypassing any queue.
    ///
    /// Returns whether the source started. `false` while the request is
    /// queued or ongoing, and when the source refuses to start, in which case
    /// the request has already failed with [`FetchError::NotStarted`].
    pub fn send(&self) -> bool {
        {
            let mut state = self.inner.state.lock();
            if matches!(state.status, RequestStatus::Ongoing | RequestStatus::Queued) {
                return false;
            }
            state.status = RequestStatus::Ongoing;
            state.attempt += 1;
            state.payload = None;
            state.error = None;
        }
        self.launch()
    }

    /// Removes a queued request from its queue. No-op in any other state.
    pub fn cancel(&self) -> bool {
        let (queue, dropped) = {
            let mut state = self.inner.state.lock();
            if state.status != RequestStatus::Queued {
                return false;
            }
            state.status = RequestStatus::Cancelled;
            (state.queue.take(), std::mem::take(&mut state.listeners))
        };
        drop(dropped);

        if let Some(shared) = queue.and_then(|weak| weak.upgrade()) {
            shared.remove_queued(self.id());
        }
        debug!(request = %self.id(), target = self.target(), "Request cancelled");
        true
    }

    /// Cancels a queued request or stops an ongoing one.
    ///
    /// An ongoing request is detached from its queue (which backfills the
    /// freed slot) before the source's abort hook runs.
    pub fn abort(&self) -> bool {
        loop {
            let detached = {
                let mut state = self.inner.state.lock();
                match state.status {
                    RequestStatus::Queued => None,
                    RequestStatus::Ongoing => {
                        state.status = RequestStatus::Aborted;
                        Some((state.queue.take(), std::mem::take(&mut state.listeners)))
                    }
                    _ => return false,
                }
            };

            let Some((queue, dropped)) = detached else {
                // Queued: cancel, unless it was dispatched in between.
                if self.cancel() {
                    return true;
                }
                continue;
            };
            drop(dropped);

            if let Some(shared) = queue.and_then(|weak| weak.upgrade()) {
                shared.remove_ongoing(self);
            }
            self.inner.source.abort();
            debug!(request = %self.id(), target = self.target(), "Request aborted");
            return true;
        }
    }

    /// Registers a listener for `Succeeded`/`Failed`.
    ///
    /// Fires immediately when the request is already ready. Listeners of a
    /// cancelled, aborted or rejected request are dropped without firing.
    pub fn add_ready_listener<F>(&self, listener: F) -> ListenerId
    where
        F: FnOnce(&AsyncRequest) + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        let id = ListenerId(state.next_listener);
        state.next_listener += 1;

        if state.status.is_ready() {
            drop(state);
            listener(self);
        } else {
            state.listeners.push((id, Box::new(listener)));
        }
        id
    }

    /// Unregisters a listener that has not fired yet.
    pub fn remove_ready_listener(&self, id: ListenerId) -> bool {
        let removed = {
            let mut state = self.inner.state.lock();
            state
                .listeners
                .iter()
                .position(|(listener_id, _)| *listener_id == id)
                .map(|index| state.listeners.remove(index))
        };
        removed.is_some()
    }

    // -------------------------------------------------------------------------
    // Queue-facing internals.
    // -------------------------------------------------------------------------

    /// Whether the request could be admitted by a queue right now.
    pub(crate) fn is_admissible(&self) -> bool {
        let state = self.inner.state.lock();
        state.queue.is_none()
            && !matches!(state.status, RequestStatus::Ongoing | RequestStatus::Queued)
    }

    /// Moves the request into `queue`. Returns `false` if it is no longer
    /// admissible.
    pub(crate) fn enter_queue(&self, queue: Weak<QueueShared>) -> bool {
        let mut state = self.inner.state.lock();
        if state.queue.is_some()
            || matches!(state.status, RequestStatus::Ongoing | RequestStatus::Queued)
        {
            return false;
        }
        state.status = RequestStatus::Queued;
        state.queue = Some(queue);
        state.payload = None;
        state.error = None;
        true
    }

    /// Queued → Ongoing. Returns `false` if the request left the queued state
    /// (for example a concurrent cancel).
    pub(crate) fn begin_dispatch(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.status != RequestStatus::Queued {
            return false;
        }
        state.status = RequestStatus::Ongoing;
        state.attempt += 1;
        true
    }

    /// Marks the request rejected and detaches it from any queue.
    pub(crate) fn mark_rejected(&self) {
        let dropped = {
            let mut state = self.inner.state.lock();
            state.status = RequestStatus::Rejected;
            state.queue = None;
            std::mem::take(&mut state.listeners)
        };
        drop(dropped);
    }

    /// Hands the ongoing request to its source. Returns whether it started.
    pub(crate) fn launch(&self) -> bool {
        let attempt = {
            let state = self.inner.state.lock();
            if state.status != RequestStatus::Ongoing {
                return false;
            }
            state.attempt
        };
        trace!(request = %self.id(), target = self.target(), "Starting request");

        let completion = Completion {
            request: Arc::downgrade(&self.inner),
            attempt,
        };
        if self.inner.source.start(completion) {
            return true;
        }
        let target = self.target().to_string();
        self.finish(attempt, Err(FetchError::NotStarted(target)));
        false
    }

    fn finish(&self, attempt: u64, result: Result<Bytes, FetchError>) {
        let (queue, listeners) = {
            let mut state = self.inner.state.lock();
            if state.status != RequestStatus::Ongoing || state.attempt != attempt {
                return;
            }
            match result {
                Ok(payload) => {
                    debug!(request = %self.id(), target = self.target(), bytes = payload.len(), "Request succeeded");
                    state.status = RequestStatus::Succeeded;
                    state.payload = Some(payload);
                }
                Err(error) => {
                    debug!(request = %self.id(), target = self.target(), error = %error, "Request failed");
                    state.status = RequestStatus::Failed;
                    state.error = Some(error);
                }
            }
            (state.queue.take(), std::mem::take(&mut state.listeners))
        };

        if let Some(shared) = queue.and_then(|weak| weak.upgrade()) {
            shared.request_ready(self);
        }
        for (_, listener) in listeners {
            listener(self);
        }
    }
}

impl PartialEq for AsyncRequest {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for AsyncRequest {}

impl fmt::Debug for AsyncRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("AsyncRequest")
            .field("id", &self.inner.id)
            .field("target", &self.inner.source.target())
            .field("status", &state.status)
            .field("priority", &state.priority)
            .finish()
    }
}

// =============================================================================
// Test support
// =============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    struct ManualState {
        target: String,
        accept: bool,
        started: AtomicUsize,
        aborted: AtomicBool,
        pending: Mutex<Vec<Completion>>,
    }

    /// Source whose completions are delivered by the test.
    #[derive(Clone)]
    pub(crate) struct ManualSource {
        state: Arc<ManualState>,
    }

    impl ManualSource {
        pub(crate) fn new(target: &str) -> Self {
            Self::with_accept(target, true)
        }

        /// A source whose `start` refuses to begin.
        pub(crate) fn refusing(target: &str) -> Self {
            Self::with_accept(target, false)
        }

        fn with_accept(target: &str, accept: bool) -> Self {
            Self {
                state: Arc::new(ManualState {
                    target: target.to_string(),
                    accept,
                    started: AtomicUsize::new(0),
                    aborted: AtomicBool::new(false),
                    pending: Mutex::new(Vec::new()),
                }),
            }
        }

        pub(crate) fn started(&self) -> usize {
            self.state.started.load(AtomicOrdering::SeqCst)
        }

        pub(crate) fn was_aborted(&self) -> bool {
            self.state.aborted.load(AtomicOrdering::SeqCst)
        }

        /// Delivers a payload for the oldest pending start.
        pub(crate) fn succeed(&self, payload: &[u8]) -> bool {
            match self.take() {
                Some(completion) => {
                    completion.succeed(Bytes::copy_from_slice(payload));
                    true
                }
                None => false,
            }
        }

        /// Delivers a transport failure for the oldest pending start.
        pub(crate) fn fail(&self) -> bool {
            match self.take() {
                Some(completion) => {
                    completion.fail(FetchError::Transport("connection reset".to_string()));
                    true
                }
                None => false,
            }
        }

        fn take(&self) -> Option<Completion> {
            let mut pending = self.state.pending.lock();
            if pending.is_empty() {
                None
            } else {
                Some(pending.remove(0))
            }
        }
    }

    impl RequestSource for ManualSource {
        fn target(&self) -> &str {
            &self.state.target
        }

        fn start(&self, completion: Completion) -> bool {
            if !self.state.accept {
                return false;
            }
            self.state.started.fetch_add(1, AtomicOrdering::SeqCst);
            self.state.pending.lock().push(completion);
            true
        }

        fn abort(&self) {
            self.state.aborted.store(true, AtomicOrdering::SeqCst);
        }
    }

    /// Creates a request together with a handle to its source.
    pub(crate) fn manual_request(target: &str) -> (AsyncRequest, ManualSource) {
        let source = ManualSource::new(target);
        (AsyncRequest::new(source.clone()), source)
    }
}

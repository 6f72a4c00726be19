//! Aggregate completion of a batch of requests.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::AsyncRequest;

type WatcherCallback = Box<dyn FnOnce(&RequestWatcher) + Send>;

struct WatcherState {
    waiting: usize,
    succeeded: usize,
    failed: usize,
    on_ready: Option<WatcherCallback>,
}

struct WatcherInner {
    requests: Vec<AsyncRequest>,
    state: Mutex<WatcherState>,
}

/// Fires one callback once every request in a fixed batch is ready.
///
/// Only `Succeeded` and `Failed` count as ready; a member that is cancelled,
/// aborted or rejected keeps the watcher waiting. The member listeners hold
/// the watcher weakly, so the aggregate callback is dropped together with
/// the last watcher handle.
#[derive(Clone)]
pub struct RequestWatcher {
    inner: Arc<WatcherInner>,
}

impl RequestWatcher {
    /// Starts watching `requests`.
    ///
    /// When every member is already ready (including the empty batch),
    /// `on_ready` runs before this returns.
    pub fn new<F>(requests: Vec<AsyncRequest>, on_ready: F) -> Self
    where
        F: FnOnce(&RequestWatcher) + Send + 'static,
    {
        let watcher = Self {
            inner: Arc::new(WatcherInner {
                state: Mutex::new(WatcherState {
                    waiting: requests.len(),
                    succeeded: 0,
                    failed: 0,
                    on_ready: Some(Box::new(on_ready)),
                }),
                requests,
            }),
        };

        for request in &watcher.inner.requests {
            let weak = Arc::downgrade(&watcher.inner);
            request.add_ready_listener(move |request| member_ready(&weak, request));
        }
        if watcher.inner.requests.is_empty() {
            watcher.fire();
        }
        watcher
    }

    /// True once every member is ready and none failed.
    pub fn succeeded(&self) -> bool {
        let state = self.inner.state.lock();
        state.waiting == 0 && state.failed == 0
    }

    /// True once every member is ready and at least one failed.
    pub fn failed(&self) -> bool {
        let state = self.inner.state.lock();
        state.waiting == 0 && state.failed > 0
    }

    pub fn is_ready(&self) -> bool {
        self.inner.state.lock().waiting == 0
    }

    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().waiting
    }

    pub fn succeeded_count(&self) -> usize {
        self.inner.state.lock().succeeded
    }

    pub fn failed_count(&self) -> usize {
        self.inner.state.lock().failed
    }

    pub fn len(&self) -> usize {
        self.inner.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.requests.is_empty()
    }

    pub fn requests(&self) -> &[AsyncRequest] {
        &self.inner.requests
    }

    /// Sends every member directly. Returns how many were started.
    pub fn send(&self) -> usize {
        self.inner.requests.iter().filter(|r| r.send()).count()
    }

    /// Cancels every queued member. Returns how many were cancelled.
    pub fn cancel(&self) -> usize {
        self.inner.requests.iter().filter(|r| r.cancel()).count()
    }

    /// Aborts every queued or ongoing member. Returns how many were affected.
    pub fn abort(&self) -> usize {
        self.inner.requests.iter().filter(|r| r.abort()).count()
    }

    /// Replaces the aggregate callback. Runs it immediately when the batch is
    /// already ready.
    pub fn set_on_ready<F>(&self, on_ready: F)
    where
        F: FnOnce(&RequestWatcher) + Send + 'static,
    {
        {
            let mut state = self.inner.state.lock();
            if state.waiting > 0 {
                state.on_ready = Some(Box::new(on_ready));
                return;
            }
        }
        on_ready(self);
    }

    fn fire(&self) {
        let callback = self.inner.state.lock().on_ready.take();
        if let Some(callback) = callback {
            callback(self);
        }
    }
}

fn member_ready(weak: &Weak<WatcherInner>, request: &AsyncRequest) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let done = {
        let mut state = inner.state.lock();
        if state.waiting == 0 {
            return;
        }
        state.waiting -= 1;
        if request.succeeded() {
            state.succeeded += 1;
        } else {
            state.failed += 1;
        }
        state.waiting == 0
    };
    if done {
        RequestWatcher { inner }.fire();
    }
}

impl fmt::Debug for RequestWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("RequestWatcher")
            .field("requests", &self.inner.requests.len())
            .field("waiting", &state.waiting)
            .field("succeeded", &state.succeeded)
            .field("failed", &state.failed)
            .finish()
    }
}

//! The tile texture cache.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use super::node::{node_order, NodeId, TileNode};
use super::{CacheConfig, CacheStats, TextureBackend, TileFetcher};
use crate::request::{AsyncRequest, RequestId, RequestQueue, RequestWatcher};
use crate::tile::{TileKey, TileRegistry};

/// Updates a node may go unreferenced, without texture or fetch, before it
/// is dropped.
pub const IDLE_NODE_FRAMES: u64 = 64;

/// State shared with fetch completions, which may run on any thread.
#[derive(Default)]
struct Inbox {
    /// Fetches issued and not yet completed.
    ongoing: AtomicUsize,
    /// Nodes whose fetch completed since the last update.
    ready: Mutex<Vec<NodeId>>,
}

/// Streams tile textures on demand and keeps the most relevant ones resident.
///
/// Relevance is the last update in which a key was referenced, ties going to
/// the node created first. At most `max_cache_size` textures are resident;
/// every texture the backend creates is released exactly once, on eviction or
/// when the cache is dropped.
pub struct TileCache<B: TextureBackend, F: TileFetcher> {
    config: CacheConfig,
    backend: B,
    fetcher: F,
    queue: RequestQueue,
    nodes: HashMap<NodeId, TileNode<B::Texture>>,
    next_id: usize,
    index: HashMap<TileKey, NodeId>,
    timestamp: u64,
    /// Resident nodes in ranking order.
    hot: Vec<NodeId>,
    referenced: Vec<NodeId>,
    in_flight: HashMap<RequestId, NodeId>,
    inbox: Arc<Inbox>,
    stats: CacheStats,
}

impl<B: TextureBackend, F: TileFetcher> TileCache<B, F> {
    pub fn new(config: CacheConfig, backend: B, fetcher: F) -> Self {
        Self {
            queue: RequestQueue::new(config.max_ongoing_requests, config.max_queued_requests),
            config,
            backend,
            fetcher,
            nodes: HashMap::new(),
            next_id: 0,
            index: HashMap::new(),
            timestamp: 0,
            hot: Vec::new(),
            referenced: Vec::new(),
            in_flight: HashMap::new(),
            inbox: Arc::new(Inbox::default()),
            stats: CacheStats::default(),
        }
    }

    /// Returns the node for `key`, creating it on first use, and marks the
    /// key as wanted for the next [`TileCache::update`].
    pub fn get_entry(&mut self, key: &TileKey) -> &TileNode<B::Texture> {
        let id = match self.index.get(key) {
            Some(&id) => id,
            None => {
                let id = NodeId(self.next_id);
                self.next_id += 1;
                self.nodes.insert(id, TileNode::new(id, *key));
                self.index.insert(*key, id);
                trace!(tile = %key, node = %id, "Created cache node");
                id
            }
        };

        if let Some(node) = self.nodes.get_mut(&id) {
            if !node.referenced {
                node.referenced = true;
                self.referenced.push(id);
            }
        }
        &self.nodes[&id]
    }

    /// Runs one frame: refresh referenced nodes, merge completed fetches into
    /// the hot set, then issue new fetches.
    pub fn update(&mut self) {
        self.timestamp += 1;
        let candidates = self.collect_referenced();
        self.merge_completed();
        self.request_candidates(candidates);
        self.prune_idle();
    }

    /// Resident texture for `key`.
    pub fn texture(&self, key: &TileKey) -> Option<&B::Texture> {
        self.peek(key).and_then(|node| node.data())
    }

    /// Node for `key` without creating or referencing it.
    pub fn peek(&self, key: &TileKey) -> Option<&TileNode<B::Texture>> {
        self.index.get(key).and_then(|id| self.nodes.get(id))
    }

    pub fn node(&self, id: NodeId) -> Option<&TileNode<B::Texture>> {
        self.nodes.get(&id)
    }

    /// Resident nodes, most relevant first.
    pub fn hot_nodes(&self) -> impl Iterator<Item = &TileNode<B::Texture>> + '_ {
        self.hot.iter().filter_map(move |id| self.nodes.get(id))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn hot_len(&self) -> usize {
        self.hot.len()
    }

    /// Fetches issued and not yet completed.
    pub fn ongoing(&self) -> usize {
        self.inbox.ongoing.load(AtomicOrdering::SeqCst)
    }

    /// Number of completed updates.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    // =========================================================================
    // Update passes
    // =========================================================================

    /// Stamps every node referenced since the last update and returns those
    /// that need a fetch.
    fn collect_referenced(&mut self) -> Vec<NodeId> {
        let mut candidates = Vec::new();
        for id in std::mem::take(&mut self.referenced) {
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            node.referenced = false;
            node.timestamp = self.timestamp;
            if node.data.is_none() && node.watcher.is_none() {
                candidates.push(id);
            }
        }
        candidates
    }

    /// Merges fetches completed since the last update with the hot set and
    /// trims it to `max_cache_size`.
    fn merge_completed(&mut self) {
        let ready = std::mem::take(&mut *self.inbox.ready.lock());
        let mut fresh: HashMap<NodeId, Bytes> = HashMap::new();

        for id in ready {
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            let Some(watcher) = node.watcher.take() else {
                continue;
            };
            let Some(request) = watcher.requests().first() else {
                continue;
            };
            self.in_flight.remove(&request.id());

            match request.payload() {
                Some(payload) if watcher.succeeded() => {
                    fresh.insert(id, payload);
                }
                _ => {
                    self.stats.failed += 1;
                    let error = request.error().map(|e| e.to_string()).unwrap_or_default();
                    warn!(tile = %node.key, error = %error, "Tile fetch failed");
                }
            }
        }

        if fresh.is_empty() && self.hot.len() <= self.config.max_cache_size {
            self.sort_hot();
            return;
        }

        let mut combined = self.hot.clone();
        combined.extend(fresh.keys().copied());
        let nodes = &self.nodes;
        combined.sort_by(|a, b| node_order(&nodes[a], &nodes[b]));

        let mut hot = Vec::with_capacity(self.config.max_cache_size.min(combined.len()));
        for id in combined {
            let fits = hot.len() < self.config.max_cache_size;
            match fresh.remove(&id) {
                Some(payload) if fits => {
                    let Some(node) = self.nodes.get_mut(&id) else {
                        continue;
                    };
                    match self.backend.create(&node.key, &payload) {
                        Ok(texture) => {
                            node.data = Some(texture);
                            hot.push(id);
                            self.stats.loaded += 1;
                            info!(tile = %node.key, bytes = payload.len(), "Tile loaded");
                        }
                        Err(e) => {
                            self.stats.decode_failures += 1;
                            warn!(tile = %node.key, error = %e, "Tile decode failed");
                        }
                    }
                }
                Some(_) => {
                    self.stats.discarded += 1;
                    trace!(tile = %self.nodes[&id].key, "Discarded payload outside cache");
                }
                None if fits => hot.push(id),
                None => {
                    let Some(node) = self.nodes.get_mut(&id) else {
                        continue;
                    };
                    if let Some(texture) = node.data.take() {
                        self.backend.release(texture);
                        self.stats.evicted += 1;
                        debug!(tile = %node.key, "Evicted tile texture");
                    }
                }
            }
        }
        self.hot = hot;
    }

    /// Issues fetches for the best candidates within the concurrency budget.
    fn request_candidates(&mut self, mut candidates: Vec<NodeId>) {
        if candidates.is_empty() {
            return;
        }
        let nodes = &self.nodes;
        candidates.sort_by(|a, b| node_order(&nodes[a], &nodes[b]));

        let max_ongoing = self.config.max_ongoing_requests;
        let mut budget = if max_ongoing == 0 {
            usize::MAX
        } else {
            max_ongoing.saturating_sub(self.ongoing())
        };

        let full = self.hot.len() >= self.config.max_cache_size;
        let last = if full { self.hot.last().copied() } else { None };
        if full && last.is_none() {
            // Nothing can ever become resident.
            return;
        }

        for id in candidates {
            if budget == 0 {
                break;
            }
            let node = &self.nodes[&id];
            if node.watcher.is_some() || node.data.is_some() {
                continue;
            }
            if let Some(last) = last {
                if node_order(node, &self.nodes[&last]) != Ordering::Less {
                    continue;
                }
            }
            self.request_node(id);
            budget -= 1;
        }
    }

    fn request_node(&mut self, id: NodeId) {
        let (key, timestamp) = {
            let node = &self.nodes[&id];
            (node.key, node.timestamp)
        };
        let request = self.fetcher.request(&key);
        request.set_priority(timestamp as f64);

        let inbox = self.inbox.clone();
        let watcher = RequestWatcher::new(vec![request.clone()], move |_| {
            inbox.ongoing.fetch_sub(1, AtomicOrdering::SeqCst);
            inbox.ready.lock().push(id);
        });

        self.inbox.ongoing.fetch_add(1, AtomicOrdering::SeqCst);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.watcher = Some(watcher);
        }
        self.in_flight.insert(request.id(), id);
        self.stats.requested += 1;
        debug!(tile = %key, target = request.target(), priority = timestamp, "Requesting tile");

        let outcome = self.queue.push(&request);
        for victim in &outcome.victims {
            self.forget_rejected(victim);
        }
        if !outcome.admitted {
            self.forget_rejected(&request);
        }
    }

    /// Frees the node of a request the queue refused or evicted, so it can
    /// be retried on a later update.
    fn forget_rejected(&mut self, request: &AsyncRequest) {
        let Some(id) = self.in_flight.remove(&request.id()) else {
            return;
        };
        self.inbox.ongoing.fetch_sub(1, AtomicOrdering::SeqCst);
        self.stats.rejected += 1;
        if let Some(node) = self.nodes.get_mut(&id) {
            node.watcher = None;
            debug!(tile = %node.key, "Tile request rejected by queue");
        }
    }

    /// Drops nodes that hold no texture, have no fetch in flight and have not
    /// been wanted for [`IDLE_NODE_FRAMES`] updates. Referencing the key again
    /// creates a fresh node.
    fn prune_idle(&mut self) {
        let horizon = self.timestamp.saturating_sub(IDLE_NODE_FRAMES);
        let before = self.nodes.len();
        let index = &mut self.index;
        self.nodes.retain(|_, node| {
            let keep = node.data.is_some()
                || node.watcher.is_some()
                || node.referenced
                || node.timestamp > horizon;
            if !keep {
                index.remove(&node.key);
            }
            keep
        });

        let pruned = before - self.nodes.len();
        if pruned > 0 {
            self.stats.pruned += pruned as u64;
            trace!(pruned, remaining = self.nodes.len(), "Pruned idle cache nodes");
        }
    }

    fn sort_hot(&mut self) {
        let nodes = &self.nodes;
        self.hot.sort_by(|a, b| node_order(&nodes[a], &nodes[b]));
    }
}

impl<B: TextureBackend, F: TileFetcher> TileRegistry for TileCache<B, F> {
    fn reference(&mut self, key: &TileKey) {
        self.get_entry(key);
    }
}

impl<B: TextureBackend, F: TileFetcher> Drop for TileCache<B, F> {
    fn drop(&mut self) {
        let cancelled = self.queue.cancel_all();
        let mut released = 0;
        for node in self.nodes.values_mut() {
            if let Some(texture) = node.data.take() {
                self.backend.release(texture);
                released += 1;
            }
        }
        debug!(cancelled, released, "Tile cache dropped");
    }
}

impl<B: TextureBackend, F: TileFetcher> fmt::Debug for TileCache<B, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileCache")
            .field("config", &self.config)
            .field("timestamp", &self.timestamp)
            .field("nodes", &self.nodes.len())
            .field("hot", &self.hot.len())
            .field("ongoing", &self.ongoing())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TextureError;
    use crate::request::testing::ManualSource;
    use crate::request::RequestStatus;

    /// Fetcher recording one manual source per request.
    #[derive(Clone, Default)]
    struct ManualFetcher {
        sources: Arc<Mutex<Vec<(TileKey, ManualSource)>>>,
    }

    impl ManualFetcher {
        fn latest(&self, key: &TileKey) -> ManualSource {
            self.sources
                .lock()
                .iter()
                .rev()
                .find(|(k, _)| k == key)
                .map(|(_, source)| source.clone())
                .unwrap()
        }

        fn request_count(&self) -> usize {
            self.sources.lock().len()
        }
    }

    impl TileFetcher for ManualFetcher {
        fn request(&self, key: &TileKey) -> AsyncRequest {
            let source = ManualSource::new(&key.path());
            self.sources.lock().push((*key, source.clone()));
            AsyncRequest::new(source)
        }
    }

    #[derive(Default)]
    struct BackendLog {
        created: Vec<TileKey>,
        released: Vec<TileKey>,
    }

    /// Backend whose textures are their keys. Payload `bad` fails to decode.
    #[derive(Clone, Default)]
    struct TrackingBackend {
        log: Arc<Mutex<BackendLog>>,
    }

    impl TextureBackend for TrackingBackend {
        type Texture = TileKey;

        fn create(&mut self, key: &TileKey, data: &[u8]) -> Result<TileKey, TextureError> {
            if data == b"bad" {
                return Err(TextureError::Decode("bad".to_string()));
            }
            self.log.lock().created.push(*key);
            Ok(*key)
        }

        fn release(&mut self, texture: TileKey) {
            self.log.lock().released.push(texture);
        }
    }

    type TestCache = TileCache<TrackingBackend, ManualFetcher>;

    fn cache(max_cache_size: usize, max_ongoing: usize) -> (TestCache, ManualFetcher, TrackingBackend) {
        let fetcher = ManualFetcher::default();
        let backend = TrackingBackend::default();
        let config = CacheConfig {
            max_cache_size,
            max_ongoing_requests: max_ongoing,
            max_queued_requests: 2,
        };
        (
            TileCache::new(config, backend.clone(), fetcher.clone()),
            fetcher,
            backend,
        )
    }

    fn key(col: u32) -> TileKey {
        TileKey::new(0, col, 0)
    }

    /// References `cols` and runs one update.
    fn frame(cache: &mut TestCache, cols: &[u32]) {
        for &col in cols {
            cache.reference(&key(col));
        }
        cache.update();
    }

    #[test]
    fn test_get_entry_is_idempotent() {
        let (mut cache, _, _) = cache(4, 2);
        let first = cache.get_entry(&key(1)).id();
        let second = cache.get_entry(&key(1)).id();
        assert_eq!(first, second);
        assert_eq!(cache.node_count(), 1);
        assert!(!cache.peek(&key(1)).unwrap().has_data());
    }

    #[test]
    fn test_update_requests_within_budget() {
        let (mut cache, fetcher, _) = cache(8, 2);
        frame(&mut cache, &[1, 2, 3]);
        assert_eq!(fetcher.request_count(), 2);
        assert_eq!(cache.ongoing(), 2);
        assert!(cache.peek(&key(1)).unwrap().is_in_flight());
        assert!(cache.peek(&key(2)).unwrap().is_in_flight());
        assert!(!cache.peek(&key(3)).unwrap().is_in_flight());
        assert_eq!(cache.stats().requested, 2);
    }

    #[test]
    fn test_in_flight_node_is_not_requested_twice() {
        let (mut cache, fetcher, _) = cache(8, 4);
        frame(&mut cache, &[1]);
        frame(&mut cache, &[1]);
        frame(&mut cache, &[1]);
        assert_eq!(fetcher.request_count(), 1);
    }

    #[test]
    fn test_completion_loads_texture() {
        let (mut cache, fetcher, backend) = cache(8, 2);
        frame(&mut cache, &[1]);
        assert!(fetcher.latest(&key(1)).succeed(b"png"));
        assert_eq!(cache.ongoing(), 0);
        assert!(cache.texture(&key(1)).is_none());

        frame(&mut cache, &[1]);
        assert_eq!(cache.texture(&key(1)), Some(&key(1)));
        assert!(!cache.peek(&key(1)).unwrap().is_in_flight());
        assert_eq!(cache.hot_len(), 1);
        assert_eq!(cache.stats().loaded, 1);
        assert_eq!(backend.log.lock().created, vec![key(1)]);
    }

    #[test]
    fn test_failed_fetch_is_retried_later() {
        let (mut cache, fetcher, _) = cache(8, 2);
        frame(&mut cache, &[1]);
        fetcher.latest(&key(1)).fail();

        frame(&mut cache, &[1]);
        let node = cache.peek(&key(1)).unwrap();
        assert!(!node.has_data());
        assert!(!node.is_in_flight());
        assert_eq!(cache.stats().failed, 1);
        assert_eq!(cache.hot_len(), 0);

        frame(&mut cache, &[1]);
        assert_eq!(fetcher.request_count(), 2);
        assert!(cache.peek(&key(1)).unwrap().is_in_flight());
    }

    #[test]
    fn test_eviction_releases_exactly_once() {
        let (mut cache, fetcher, backend) = cache(2, 4);
        frame(&mut cache, &[1, 2]);
        fetcher.latest(&key(1)).succeed(b"1");
        fetcher.latest(&key(2)).succeed(b"2");
        frame(&mut cache, &[1, 2]);
        assert_eq!(cache.hot_len(), 2);

        frame(&mut cache, &[3]);
        assert!(cache.peek(&key(3)).unwrap().is_in_flight());
        fetcher.latest(&key(3)).succeed(b"3");
        frame(&mut cache, &[3]);

        assert_eq!(cache.hot_len(), 2);
        assert!(cache.texture(&key(3)).is_some());
        assert!(cache.texture(&key(1)).is_some());
        assert!(cache.texture(&key(2)).is_none());
        assert_eq!(backend.log.lock().released, vec![key(2)]);
        assert_eq!(cache.stats().evicted, 1);

        drop(cache);
        let log = backend.log.lock();
        let mut released = log.released.clone();
        released.sort();
        assert_eq!(released, vec![key(1), key(2), key(3)]);
        assert_eq!(log.created.len(), 3);
    }

    #[test]
    fn test_decode_failure_gives_slot_to_next() {
        let (mut cache, fetcher, _) = cache(1, 4);
        frame(&mut cache, &[1]);
        fetcher.latest(&key(1)).succeed(b"1");
        frame(&mut cache, &[1]);
        assert!(cache.texture(&key(1)).is_some());

        // Key 2 ranks first but its payload is broken; key 1 keeps the slot.
        frame(&mut cache, &[2]);
        assert!(cache.peek(&key(2)).unwrap().is_in_flight());
        fetcher.latest(&key(2)).succeed(b"bad");
        frame(&mut cache, &[2]);

        assert!(cache.texture(&key(1)).is_some());
        assert!(!cache.peek(&key(2)).unwrap().has_data());
        assert_eq!(cache.stats().decode_failures, 1);
        assert_eq!(cache.stats().evicted, 0);
    }

    #[test]
    fn test_payload_outside_cache_is_discarded() {
        let (mut cache, fetcher, backend) = cache(1, 4);
        frame(&mut cache, &[1, 2]);
        fetcher.latest(&key(1)).succeed(b"1");
        fetcher.latest(&key(2)).succeed(b"2");
        frame(&mut cache, &[1, 2]);

        assert!(cache.texture(&key(1)).is_some());
        assert!(cache.texture(&key(2)).is_none());
        assert_eq!(cache.stats().discarded, 1);
        assert_eq!(backend.log.lock().created, vec![key(1)]);
    }

    #[test]
    fn test_full_cache_does_not_request_weaker_nodes() {
        let (mut cache, fetcher, _) = cache(1, 4);
        frame(&mut cache, &[1]);
        fetcher.latest(&key(1)).succeed(b"1");
        frame(&mut cache, &[1]);
        assert_eq!(fetcher.request_count(), 1);

        // Same timestamp as key 1 but created later: not strictly ahead.
        frame(&mut cache, &[1, 2]);
        assert_eq!(fetcher.request_count(), 1);
        assert!(!cache.peek(&key(2)).unwrap().is_in_flight());

        // Wanted more recently than key 1: requested.
        frame(&mut cache, &[2]);
        assert_eq!(fetcher.request_count(), 2);
    }

    #[test]
    fn test_queue_rejection_leaves_node_retryable() {
        let (mut cache, fetcher, _) = cache(8, 4);
        cache.queue().hold();
        frame(&mut cache, &[1, 2, 3, 4]);

        // Two fit the queue, the equal-priority rest are rejected.
        assert_eq!(cache.stats().requested, 4);
        assert_eq!(cache.stats().rejected, 2);
        assert_eq!(cache.ongoing(), 2);
        assert!(!cache.peek(&key(3)).unwrap().is_in_flight());

        cache.queue().resume();
        fetcher.latest(&key(1)).succeed(b"1");
        fetcher.latest(&key(2)).succeed(b"2");
        frame(&mut cache, &[1, 2, 3, 4]);
        assert_eq!(cache.hot_len(), 2);
        frame(&mut cache, &[1, 2, 3, 4]);
        assert!(cache.peek(&key(3)).unwrap().is_in_flight());
        assert!(cache.peek(&key(4)).unwrap().is_in_flight());
    }

    #[test]
    fn test_drop_aborts_in_flight_requests() {
        let (mut cache, fetcher, _) = cache(8, 1);
        frame(&mut cache, &[1]);
        let source = fetcher.latest(&key(1));
        let request = cache.peek(&key(1)).unwrap().watcher.as_ref().unwrap().requests()[0].clone();

        drop(cache);
        assert!(source.was_aborted());
        assert_eq!(request.status(), RequestStatus::Aborted);
    }

    #[test]
    fn test_hot_set_order_and_eviction() {
        let (mut cache, fetcher, backend) = cache(3, 8);
        frame(&mut cache, &[1, 2, 3]);
        frame(&mut cache, &[3, 4]);

        for col in [4, 2, 3, 1] {
            assert!(fetcher.latest(&key(col)).succeed(b"png"));
        }
        frame(&mut cache, &[2]);

        // Most recent first, equal timestamps by creation order.
        let hot: Vec<TileKey> = cache.hot_nodes().map(|node| *node.key()).collect();
        assert_eq!(hot, vec![key(2), key(3), key(4)]);
        assert_eq!(cache.stats().discarded, 1);
        assert!(cache.texture(&key(1)).is_none());

        frame(&mut cache, &[1]);
        assert!(cache.peek(&key(1)).unwrap().is_in_flight());
        fetcher.latest(&key(1)).succeed(b"png");
        frame(&mut cache, &[1]);

        let hot: Vec<TileKey> = cache.hot_nodes().map(|node| *node.key()).collect();
        assert_eq!(hot, vec![key(1), key(2), key(3)]);
        assert_eq!(backend.log.lock().released, vec![key(4)]);
        assert_eq!(cache.stats().evicted, 1);
    }

    #[test]
    fn test_idle_nodes_are_pruned() {
        let (mut cache, fetcher, _) = cache(8, 2);
        frame(&mut cache, &[1, 2]);
        fetcher.latest(&key(1)).fail();
        fetcher.latest(&key(2)).succeed(b"png");

        while cache.timestamp() < IDLE_NODE_FRAMES {
            cache.update();
        }
        assert!(cache.peek(&key(1)).is_some());
        assert_eq!(cache.node_count(), 2);

        cache.update();
        assert!(cache.peek(&key(1)).is_none());
        assert_eq!(cache.node_count(), 1);
        assert_eq!(cache.stats().pruned, 1);
        // Resident textures are never pruned.
        assert!(cache.texture(&key(2)).is_some());

        frame(&mut cache, &[1]);
        assert!(cache.peek(&key(1)).unwrap().is_in_flight());
        assert_eq!(fetcher.request_count(), 3);
    }
}

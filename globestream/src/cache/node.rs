//! Per-key cache entries.

use std::cmp::Ordering;
use std::fmt;

use crate::request::RequestWatcher;
use crate::tile::TileKey;

/// Identifier of a cache node, assigned in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// Cache entry for one tile key.
///
/// A node is dataless until its image has been fetched and decoded, and
/// becomes dataless again when it falls out of the hot set. Nodes left idle
/// for long enough are dropped by the cache.
pub struct TileNode<T> {
    pub(crate) id: NodeId,
    pub(crate) key: TileKey,
    /// Last update in which the key was wanted; 0 means never.
    pub(crate) timestamp: u64,
    pub(crate) watcher: Option<RequestWatcher>,
    pub(crate) data: Option<T>,
    /// Referenced since the last update.
    pub(crate) referenced: bool,
}

impl<T> TileNode<T> {
    pub(crate) fn new(id: NodeId, key: TileKey) -> Self {
        Self {
            id,
            key,
            timestamp: 0,
            watcher: None,
            data: None,
            referenced: false,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn key(&self) -> &TileKey {
        &self.key
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Whether a fetch for this node has not been collected yet.
    pub fn is_in_flight(&self) -> bool {
        self.watcher.is_some()
    }

    /// The resident texture, if any.
    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }
}

impl<T> fmt::Debug for TileNode<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileNode")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("timestamp", &self.timestamp)
            .field("in_flight", &self.is_in_flight())
            .field("has_data", &self.has_data())
            .finish()
    }
}

/// Cache ranking: most recently wanted first, then oldest node first.
pub fn node_order<T>(a: &TileNode<T>, b: &TileNode<T>) -> Ordering {
    b.timestamp
        .cmp(&a.timestamp)
        .then_with(|| a.id.cmp(&b.id))
}

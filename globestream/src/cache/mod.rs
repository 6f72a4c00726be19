//! Texture cache for streamed tiles.
//!
//! [`TileCache`] keeps one [`TileNode`] per tile key, fetches missing images
//! through a bounded [`RequestQueue`](crate::request::RequestQueue), decodes
//! them with a [`TextureBackend`] and keeps the most recently wanted
//! `max_cache_size` textures resident.
//!
//! # Frame cycle
//!
//! 1. The tile grid references the keys it wants ([`TileRegistry`]).
//! 2. [`TileCache::update`] refreshes timestamps, merges completed fetches
//!    into the hot set (evicting the least relevant textures), then issues
//!    new fetches within the concurrency budget.
//! 3. The renderer reads [`TileCache::texture`].
//!
//! Fetch completions may arrive on any thread; they only record the node in
//! an inbox that the next `update` drains.
//!
//! [`TileRegistry`]: crate::tile::TileRegistry

mod backend;
mod node;
mod texture_cache;

pub use backend::{DecodedImageBackend, DecodedTexture, TextureBackend, TextureError};
pub use node::{node_order, NodeId, TileNode};
pub use texture_cache::{TileCache, IDLE_NODE_FRAMES};

use std::fmt;

use crate::request::AsyncRequest;
use crate::tile::TileKey;

/// Default number of resident textures.
pub const DEFAULT_MAX_CACHE_SIZE: usize = 1024;

/// Default number of concurrent fetches.
pub const DEFAULT_MAX_ONGOING_REQUESTS: usize = 2;

/// Default number of fetches waiting for a slot.
pub const DEFAULT_MAX_QUEUED_REQUESTS: usize = 2;

/// Creates the request that fetches a tile's image.
pub trait TileFetcher: Send + Sync {
    fn request(&self, key: &TileKey) -> AsyncRequest;
}

/// Cache sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Resident textures kept in the hot set.
    pub max_cache_size: usize,
    /// Concurrent fetches; 0 means unbounded.
    pub max_ongoing_requests: usize,
    /// Fetches waiting for a slot; 0 means unbounded.
    pub max_queued_requests: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            max_ongoing_requests: DEFAULT_MAX_ONGOING_REQUESTS,
            max_queued_requests: DEFAULT_MAX_QUEUED_REQUESTS,
        }
    }
}

/// Running totals since the cache was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Fetches issued.
    pub requested: u64,
    /// Textures created and admitted to the hot set.
    pub loaded: u64,
    /// Fetches that completed with an error.
    pub failed: u64,
    /// Fetches refused or evicted by the request queue.
    pub rejected: u64,
    /// Payloads the backend could not turn into a texture.
    pub decode_failures: u64,
    /// Resident textures released to make room.
    pub evicted: u64,
    /// Fetched payloads dropped because they ranked outside the hot set.
    pub discarded: u64,
    /// Idle nodes dropped from the cache.
    pub pruned: u64,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "requested {}, loaded {}, failed {}, rejected {}, decode failures {}, evicted {}, discarded {}, pruned {}",
            self.requested,
            self.loaded,
            self.failed,
            self.rejected,
            self.decode_failures,
            self.evicted,
            self.discarded,
            self.pruned
        )
    }
}

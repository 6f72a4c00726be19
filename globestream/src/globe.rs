//! Per-frame driver tying the camera, the tile grid and the cache together.

use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::runtime::Handle;
use tracing::info;

use crate::cache::{DecodedImageBackend, TextureBackend, TileCache, TileFetcher};
use crate::camera::Camera;
use crate::config::{ConfigError, GlobeConfig};
use crate::math::LatLon;
use crate::request::{FetchError, HttpTileFetcher};
use crate::tile::{grid_indices, Pyramid, Tile, TileMesh};

/// How often the frame rate is logged.
pub const FRAME_RATE_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum GlobeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to create tile fetcher: {0}")]
    Fetcher(#[from] FetchError),
}

/// A streamed-imagery globe.
///
/// Each [`Globe::update`] re-centres the tile window, references every
/// visible key in the cache and advances the cache one frame. Renderers then
/// draw [`Globe::tiles`] with [`Globe::texture`] and [`Globe::tile_mesh`].
pub struct Globe<B: TextureBackend, F: TileFetcher> {
    pyramid: Pyramid,
    cache: TileCache<B, F>,
    grid_resolution: u32,
    planet_radius: f64,
    indices: Vec<u32>,
    frame_rate: FrameRate,
}

impl<B: TextureBackend, F: TileFetcher> Globe<B, F> {
    pub fn new(config: &GlobeConfig, backend: B, fetcher: F) -> Result<Self, ConfigError> {
        let pyramid = config.pyramid()?;
        info!(
            levels = pyramid.len(),
            base_tile_size = config.base_tile_size,
            max_cache_size = config.cache.max_cache_size,
            "Globe created"
        );
        Ok(Self {
            pyramid,
            cache: TileCache::new(config.cache, backend, fetcher),
            grid_resolution: config.grid_resolution,
            planet_radius: config.planet_radius,
            indices: grid_indices(config.grid_resolution),
            frame_rate: FrameRate::new(Instant::now()),
        })
    }

    /// Centres every level on the point the camera faces.
    pub fn follow(&mut self, camera: &Camera) {
        self.set_center(camera.center_lat_lon());
    }

    pub fn set_center(&mut self, center: LatLon) {
        let (lat, lon) = center.to_microdegrees();
        self.pyramid.set_center(lon, lat);
    }

    /// Runs one frame.
    pub fn update(&mut self) {
        self.pyramid.update(&mut self.cache);
        self.cache.update();

        if let Some(fps) = self.frame_rate.tick(Instant::now()) {
            let stats = self.cache.stats();
            info!(
                fps = format!("{:.1}", fps),
                resident = self.cache.hot_len(),
                ongoing = self.cache.ongoing(),
                loaded = stats.loaded,
                failed = stats.failed,
                "Frame rate"
            );
        }
    }

    /// Visible tiles of every level, coarse first.
    pub fn tiles(&self) -> impl Iterator<Item = &Tile> {
        self.pyramid.visible_tiles()
    }

    /// Resident texture of a tile, if loaded.
    pub fn texture(&self, tile: &Tile) -> Option<&B::Texture> {
        tile.key().and_then(|key| self.cache.texture(&key))
    }

    pub fn tile_mesh(&self, tile: &Tile) -> TileMesh {
        TileMesh::build(tile, self.grid_resolution, self.planet_radius)
    }

    /// Index buffer shared by every tile mesh.
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn pyramid(&self) -> &Pyramid {
        &self.pyramid
    }

    pub fn cache(&self) -> &TileCache<B, F> {
        &self.cache
    }

    pub fn planet_radius(&self) -> f64 {
        self.planet_radius
    }
}

impl Globe<DecodedImageBackend, HttpTileFetcher> {
    /// Globe fetching from `config.tms_server` on `runtime` and decoding
    /// images in memory.
    pub fn connect(config: &GlobeConfig, runtime: Handle) -> Result<Self, GlobeError> {
        let fetcher =
            HttpTileFetcher::with_timeout(config.tms_server.clone(), config.request_timeout, runtime)?;
        info!(server = %config.tms_server, "Connecting to tile server");
        Ok(Self::new(config, DecodedImageBackend::new(), fetcher)?)
    }
}

/// Counts frames and reports the rate once per [`FRAME_RATE_INTERVAL`].
#[derive(Debug)]
pub struct FrameRate {
    frames: u32,
    since: Instant,
}

impl FrameRate {
    pub fn new(now: Instant) -> Self {
        Self { frames: 0, since: now }
    }

    /// Counts a frame. Returns frames per second once an interval has passed.
    pub fn tick(&mut self, now: Instant) -> Option<f64> {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.since);
        if elapsed < FRAME_RATE_INTERVAL {
            return None;
        }
        let fps = f64::from(self.frames) / elapsed.as_secs_f64();
        self.frames = 0;
        self.since = now;
        Some(fps)
    }
}

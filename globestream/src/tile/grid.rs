//! Tile windows per level and the level pyramid.
//!
//! A [`Level`] covers the globe with tiles of a fixed angular size and keeps
//! a window of at most [`MAX_WINDOW_TILES`] tiles per axis around its centre.
//! Each [`Level::update`] positions the window, wraps longitudes across the
//! antimeridian, hides tiles that fall outside ±90° latitude and references
//! the visible keys in a [`TileRegistry`].

use thiserror::Error;

use super::{TileKey, TileRegistry, FULL_LATITUDE, FULL_LONGITUDE};

/// Largest window, in tiles, along either axis.
pub const MAX_WINDOW_TILES: i64 = 8;

const HALF_LONGITUDE: i64 = FULL_LONGITUDE / 2;
const HALF_LATITUDE: i64 = FULL_LATITUDE / 2;

/// Errors building a tile grid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    /// Tile size is not positive or does not divide the globe evenly.
    #[error("Invalid tile size {width}x{height} microdegrees: must be positive and divide 360°x180° evenly")]
    InvalidTileSize { width: i64, height: i64 },
}

// =============================================================================
// Tile
// =============================================================================

/// One slot of a level's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    key: Option<TileKey>,
    lon: i64,
    lat: i64,
    width: i64,
    height: i64,
}

impl Tile {
    fn hidden(width: i64, height: i64) -> Self {
        Self {
            key: None,
            lon: 0,
            lat: 0,
            width,
            height,
        }
    }

    /// Key of the imagery for this tile; `None` while hidden.
    pub fn key(&self) -> Option<TileKey> {
        self.key
    }

    /// Western edge in microdegrees.
    pub fn lon(&self) -> i64 {
        self.lon
    }

    /// Southern edge in microdegrees.
    pub fn lat(&self) -> i64 {
        self.lat
    }

    pub fn width(&self) -> i64 {
        self.width
    }

    pub fn height(&self) -> i64 {
        self.height
    }

    pub fn is_visible(&self) -> bool {
        self.key.is_some()
    }
}

// =============================================================================
// Level
// =============================================================================

/// Window of tiles of one size around a centre point.
#[derive(Debug, Clone)]
pub struct Level {
    id: u32,
    tile_width: i64,
    tile_height: i64,
    half_lon: i64,
    half_lat: i64,
    center_lon: i64,
    center_lat: i64,
    tiles: Vec<Tile>,
}

impl Level {
    /// Creates a level with tiles of `tile_width` × `tile_height` microdegrees.
    ///
    /// The window spans `min(8, tiles around the globe)` tiles per axis,
    /// rounded down to an even count and at least two. An axis with three
    /// tiles around the globe gets a window of two; [`Level::window`] reports
    /// the actual size.
    pub fn new(id: u32, tile_width: i64, tile_height: i64) -> Result<Self, GridError> {
        if tile_width <= 0
            || tile_height <= 0
            || FULL_LONGITUDE % tile_width != 0
            || FULL_LATITUDE % tile_height != 0
        {
            return Err(GridError::InvalidTileSize {
                width: tile_width,
                height: tile_height,
            });
        }

        let window_lon = MAX_WINDOW_TILES.min(FULL_LONGITUDE / tile_width);
        let window_lat = MAX_WINDOW_TILES.min(FULL_LATITUDE / tile_height);
        let half_lon = (window_lon / 2).max(1);
        let half_lat = (window_lat / 2).max(1);
        let slots = (2 * half_lon * 2 * half_lat) as usize;

        Ok(Self {
            id,
            tile_width,
            tile_height,
            half_lon,
            half_lat,
            center_lon: 0,
            center_lat: 0,
            tiles: vec![Tile::hidden(tile_width, tile_height); slots],
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn tile_width(&self) -> i64 {
        self.tile_width
    }

    pub fn tile_height(&self) -> i64 {
        self.tile_height
    }

    /// Tile columns around the globe.
    pub fn columns(&self) -> i64 {
        FULL_LONGITUDE / self.tile_width
    }

    /// Tile rows from pole to pole.
    pub fn rows(&self) -> i64 {
        FULL_LATITUDE / self.tile_height
    }

    /// Window size as `(columns, rows)`.
    pub fn window(&self) -> (i64, i64) {
        (2 * self.half_lon, 2 * self.half_lat)
    }

    /// Snapped centre as `(lon, lat)` microdegrees.
    pub fn center(&self) -> (i64, i64) {
        (self.center_lon, self.center_lat)
    }

    /// Moves the window centre to the tile corner at or below `(lon, lat)`.
    pub fn set_center(&mut self, lon: i64, lat: i64) {
        let lon = wrap_longitude(lon);
        let lat = lat.clamp(-HALF_LATITUDE, HALF_LATITUDE);
        self.center_lon =
            (lon + HALF_LONGITUDE).div_euclid(self.tile_width) * self.tile_width - HALF_LONGITUDE;
        self.center_lat =
            (lat + HALF_LATITUDE).div_euclid(self.tile_height) * self.tile_height - HALF_LATITUDE;
    }

    /// Lays out the window and references every visible key.
    pub fn update(&mut self, registry: &mut dyn TileRegistry) {
        let mut slot = 0;
        for j in -self.half_lat..self.half_lat {
            let lat = self.center_lat + j * self.tile_height;
            let visible = lat >= -HALF_LATITUDE && lat + self.tile_height <= HALF_LATITUDE;

            for i in -self.half_lon..self.half_lon {
                let lon = wrap_longitude(self.center_lon + i * self.tile_width);
                let key = visible.then(|| self.key_at(lon, lat));
                if let Some(key) = &key {
                    registry.reference(key);
                }
                self.tiles[slot] = Tile {
                    key,
                    lon,
                    lat,
                    width: self.tile_width,
                    height: self.tile_height,
                };
                slot += 1;
            }
        }
    }

    /// Key of the tile containing `(lon, lat)`. `None` beyond the poles.
    pub fn key_for(&self, lon: i64, lat: i64) -> Option<TileKey> {
        if !(-HALF_LATITUDE..=HALF_LATITUDE).contains(&lat) {
            return None;
        }
        let col = (wrap_longitude(lon) + HALF_LONGITUDE).div_euclid(self.tile_width);
        let row = ((lat + HALF_LATITUDE) / self.tile_height).min(self.rows() - 1);
        Some(TileKey::new(self.id, col as u32, row as u32))
    }

    /// Every window slot, visible or not, as of the last update.
    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn visible_tiles(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.iter().filter(|tile| tile.is_visible())
    }

    fn key_at(&self, lon: i64, lat: i64) -> TileKey {
        TileKey::new(
            self.id,
            ((lon + HALF_LONGITUDE) / self.tile_width) as u32,
            ((lat + HALF_LATITUDE) / self.tile_height) as u32,
        )
    }
}

/// Maps a longitude into `[-180°, 180°)`.
fn wrap_longitude(lon: i64) -> i64 {
    (lon + HALF_LONGITUDE).rem_euclid(FULL_LONGITUDE) - HALF_LONGITUDE
}

// =============================================================================
// Pyramid
// =============================================================================

/// Levels ordered coarse to fine.
#[derive(Debug, Clone, Default)]
pub struct Pyramid {
    levels: Vec<Level>,
}

impl Pyramid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds `count` square levels, halving `base_tile_size` each step.
    /// Level `k` gets id `k`.
    pub fn with_levels(base_tile_size: i64, count: u32) -> Result<Self, GridError> {
        let mut pyramid = Self::new();
        for k in 0..count {
            let divisor = 1i64.checked_shl(k).unwrap_or(0);
            if divisor == 0 || base_tile_size % divisor != 0 {
                return Err(GridError::InvalidTileSize {
                    width: base_tile_size,
                    height: base_tile_size,
                });
            }
            let size = base_tile_size / divisor;
            pyramid.add_level(Level::new(k, size, size)?);
        }
        Ok(pyramid)
    }

    pub fn add_level(&mut self, level: Level) {
        self.levels.push(level);
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn level(&self, id: u32) -> Option<&Level> {
        self.levels.iter().find(|level| level.id() == id)
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn set_center(&mut self, lon: i64, lat: i64) {
        for level in &mut self.levels {
            level.set_center(lon, lat);
        }
    }

    pub fn update(&mut self, registry: &mut dyn TileRegistry) {
        for level in &mut self.levels {
            level.update(registry);
        }
    }

    /// Visible tiles of every level, coarse first.
    pub fn visible_tiles(&self) -> impl Iterator<Item = &Tile> {
        self.levels.iter().flat_map(|level| level.visible_tiles())
    }
}

//! GlobeStream - on-demand imagery streaming for 3D globe renderers
//!
//! The globe surface is split into a pyramid of fixed-size tile grids. Each
//! frame the grid window follows the camera, every visible tile key is
//! referenced in a [`TileCache`], and the cache fetches missing images from a
//! TMS server through a bounded, prioritised [`RequestQueue`]. Loaded images
//! become textures through a pluggable [`TextureBackend`]; at most a fixed
//! number of them stay resident.
//!
//! ```no_run
//! use globestream::{Camera, Globe, GlobeConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = tokio::runtime::Runtime::new()?;
//! let config = GlobeConfig::load_default()?;
//! let _logging = globestream::logging::init(&config.logging)?;
//!
//! let mut globe = Globe::connect(&config, runtime.handle().clone())?;
//! let camera = Camera::new(config.planet_radius, config.planet_radius * 3.0);
//! loop {
//!     globe.follow(&camera);
//!     globe.update();
//!     for tile in globe.tiles() {
//!         if let Some(_texture) = globe.texture(tile) {
//!             let _mesh = globe.tile_mesh(tile);
//!         }
//!     }
//! #   break;
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod camera;
pub mod config;
pub mod globe;
pub mod logging;
pub mod math;
pub mod request;
pub mod tile;

pub use cache::{CacheConfig, CacheStats, TextureBackend, TileCache, TileFetcher};
pub use camera::{Camera, MatrixStack};
pub use config::{ConfigError, GlobeConfig};
pub use globe::{Globe, GlobeError};
pub use math::{Angle, LatLon, Matrix, Position, Quaternion, Vector4};
pub use request::{
    AsyncRequest, FetchError, Priority, RequestQueue, RequestSource, RequestStatus,
    RequestWatcher,
};
pub use tile::{Level, Pyramid, Tile, TileKey, TileMesh};

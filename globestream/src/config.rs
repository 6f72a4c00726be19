//! INI configuration.
//!
//! ```ini
//! [tms]
//! server = https://tiles.example.com/imagery
//!
//! [cache]
//! max_size = 1024
//! max_ongoing_requests = 2
//! max_queued_requests = 2
//! request_timeout_secs = 30
//!
//! [globe]
//! grid_resolution = 16
//! planet_radius = 6378137.0
//! level_count = 1
//! base_tile_size = 45000000
//!
//! [logging]
//! filter = info
//! directory = /var/log/globestream
//! ```
//!
//! Every key is optional.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::{Ini, Properties};
use thiserror::Error;

use crate::cache::{
    CacheConfig, DEFAULT_MAX_CACHE_SIZE, DEFAULT_MAX_ONGOING_REQUESTS,
    DEFAULT_MAX_QUEUED_REQUESTS,
};
use crate::logging::DEFAULT_LOG_FILTER;
pub use crate::logging::LogConfig;
use crate::request::http::DEFAULT_TIMEOUT_SECS;
use crate::tile::Pyramid;

/// Default TMS server: tiles relative to the working directory.
pub const DEFAULT_TMS_SERVER: &str = ".";

/// Default mesh subdivisions per tile edge.
pub const DEFAULT_GRID_RESOLUTION: u32 = 16;

/// WGS 84 equatorial radius in metres.
pub const DEFAULT_PLANET_RADIUS: f64 = 6_378_137.0;

pub const DEFAULT_LEVEL_COUNT: u32 = 1;

/// 45° tiles.
pub const DEFAULT_BASE_TILE_SIZE: i64 = 45_000_000;

/// Directory name under the platform config directory.
pub const CONFIG_DIR_NAME: &str = "globestream";

pub const CONFIG_FILE_NAME: &str = "config.ini";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Could not determine the user config directory")]
    MissingConfigDir,
}

/// Complete runtime configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobeConfig {
    /// Base URL tile paths are appended to.
    pub tms_server: String,
    pub cache: CacheConfig,
    pub request_timeout: Duration,
    /// Mesh subdivisions per tile edge.
    pub grid_resolution: u32,
    pub planet_radius: f64,
    pub level_count: u32,
    /// Tile edge of level 0 in microdegrees.
    pub base_tile_size: i64,
    pub logging: LogConfig,
}

impl Default for GlobeConfig {
    fn default() -> Self {
        Self {
            tms_server: DEFAULT_TMS_SERVER.to_string(),
            cache: CacheConfig::default(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            grid_resolution: DEFAULT_GRID_RESOLUTION,
            planet_radius: DEFAULT_PLANET_RADIUS,
            level_count: DEFAULT_LEVEL_COUNT,
            base_tile_size: DEFAULT_BASE_TILE_SIZE,
            logging: LogConfig::default(),
        }
    }
}

impl GlobeConfig {
    /// `<config dir>/globestream/config.ini`.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
            .ok_or(ConfigError::MissingConfigDir)
    }

    /// Loads the file at [`GlobeConfig::default_path`], or the defaults when
    /// it does not exist.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        contents.parse()
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(tms) = ini.section(Some("tms")) {
            if let Some(server) = tms.get("server") {
                if server.trim().is_empty() {
                    return Err(invalid("tms.server", server, "must not be empty"));
                }
                config.tms_server = server.trim().to_string();
            }
        }

        if let Some(cache) = ini.section(Some("cache")) {
            config.cache.max_cache_size =
                parse_or(cache, "cache", "max_size", DEFAULT_MAX_CACHE_SIZE)?;
            config.cache.max_ongoing_requests = parse_or(
                cache,
                "cache",
                "max_ongoing_requests",
                DEFAULT_MAX_ONGOING_REQUESTS,
            )?;
            config.cache.max_queued_requests = parse_or(
                cache,
                "cache",
                "max_queued_requests",
                DEFAULT_MAX_QUEUED_REQUESTS,
            )?;
            let secs: u64 = parse_or(cache, "cache", "request_timeout_secs", DEFAULT_TIMEOUT_SECS)?;
            if secs == 0 {
                return Err(invalid("cache.request_timeout_secs", "0", "must be positive"));
            }
            config.request_timeout = Duration::from_secs(secs);
        }

        if let Some(globe) = ini.section(Some("globe")) {
            config.grid_resolution =
                parse_or(globe, "globe", "grid_resolution", DEFAULT_GRID_RESOLUTION)?;
            if config.grid_resolution == 0 {
                return Err(invalid("globe.grid_resolution", "0", "must be positive"));
            }
            config.planet_radius =
                parse_or(globe, "globe", "planet_radius", DEFAULT_PLANET_RADIUS)?;
            if !(config.planet_radius.is_finite() && config.planet_radius > 0.0) {
                return Err(invalid(
                    "globe.planet_radius",
                    &config.planet_radius.to_string(),
                    "must be a positive number",
                ));
            }
            config.level_count = parse_or(globe, "globe", "level_count", DEFAULT_LEVEL_COUNT)?;
            config.base_tile_size =
                parse_or(globe, "globe", "base_tile_size", DEFAULT_BASE_TILE_SIZE)?;
            if config.level_count == 0 {
                return Err(invalid("globe.level_count", "0", "must be at least 1"));
            }
            if let Err(e) = Pyramid::with_levels(config.base_tile_size, config.level_count) {
                return Err(invalid(
                    "globe.base_tile_size",
                    &config.base_tile_size.to_string(),
                    &e.to_string(),
                ));
            }
        }

        if let Some(logging) = ini.section(Some("logging")) {
            config.logging.filter = logging
                .get("filter")
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .unwrap_or(DEFAULT_LOG_FILTER)
                .to_string();
            config.logging.directory = logging
                .get("directory")
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(PathBuf::from);
        }

        Ok(config)
    }

    /// Builds the tile pyramid these settings describe.
    pub fn pyramid(&self) -> Result<Pyramid, ConfigError> {
        Pyramid::with_levels(self.base_tile_size, self.level_count).map_err(|e| {
            invalid(
                "globe.base_tile_size",
                &self.base_tile_size.to_string(),
                &e.to_string(),
            )
        })
    }
}

impl FromStr for GlobeConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ini = Ini::load_from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_ini(&ini)
    }
}

fn parse_or<T: FromStr>(
    section: &Properties,
    section_name: &str,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match section.get(key).map(str::trim) {
        None | Some("") => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|e: T::Err| invalid(&format!("{}.{}", section_name, key), value, &e.to_string())),
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config: GlobeConfig = "".parse().unwrap();
        assert_eq!(config, GlobeConfig::default());
        assert_eq!(config.tms_server, ".");
        assert_eq!(config.cache.max_cache_size, 1024);
        assert_eq!(config.cache.max_ongoing_requests, 2);
        assert_eq!(config.cache.max_queued_requests, 2);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.grid_resolution, 16);
        assert_eq!(config.base_tile_size, 45_000_000);
    }

    #[test]
    fn test_full_file() {
        let config: GlobeConfig = "\
[tms]
server = https://tiles.example.com/imagery

[cache]
max_size = 64
max_ongoing_requests = 4
max_queued_requests = 8
request_timeout_secs = 5

[globe]
grid_resolution = 8
planet_radius = 1.0
level_count = 3
base_tile_size = 30000000

[logging]
filter = debug
directory = /var/log/globestream
"
        .parse()
        .unwrap();

        assert_eq!(config.tms_server, "https://tiles.example.com/imagery");
        assert_eq!(
            config.cache,
            CacheConfig {
                max_cache_size: 64,
                max_ongoing_requests: 4,
                max_queued_requests: 8,
            }
        );
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.grid_resolution, 8);
        assert_eq!(config.planet_radius, 1.0);
        assert_eq!(config.pyramid().unwrap().len(), 3);
        assert_eq!(config.logging.filter, "debug");
        assert_eq!(
            config.logging.directory,
            Some(PathBuf::from("/var/log/globestream"))
        );
    }

    #[test]
    fn test_invalid_number() {
        let err = "[cache]\nmax_size = lots\n"
            .parse::<GlobeConfig>()
            .unwrap_err();
        match err {
            ConfigError::InvalidValue { key, value, .. } => {
                assert_eq!(key, "cache.max_size");
                assert_eq!(value, "lots");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_tile_size_must_divide_globe() {
        let err = "[globe]\nbase_tile_size = 7000000\n"
            .parse::<GlobeConfig>()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "globe.base_tile_size"));
    }

    #[test]
    fn test_tile_size_must_divide_latitude_span() {
        // 40° divides 360° but leaves half a tile over 180°.
        let err = "[globe]\nbase_tile_size = 40000000\n"
            .parse::<GlobeConfig>()
            .unwrap_err();
        match err {
            ConfigError::InvalidValue { key, value, .. } => {
                assert_eq!(key, "globe.base_tile_size");
                assert_eq!(value, "40000000");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_levels_must_halve_evenly() {
        // 45° halves evenly six times; the seventh halving leaves a fraction.
        assert!("[globe]\nlevel_count = 7\n".parse::<GlobeConfig>().is_ok());
        assert!("[globe]\nbase_tile_size = 45000000\nlevel_count = 8\n"
            .parse::<GlobeConfig>()
            .is_err());
    }

    #[test]
    fn test_zero_values_rejected() {
        assert!("[cache]\nrequest_timeout_secs = 0\n".parse::<GlobeConfig>().is_err());
        assert!("[globe]\ngrid_resolution = 0\n".parse::<GlobeConfig>().is_err());
        assert!("[globe]\nlevel_count = 0\n".parse::<GlobeConfig>().is_err());
        assert!("[globe]\nplanet_radius = -1\n".parse::<GlobeConfig>().is_err());
    }

    #[test]
    fn test_zero_limits_mean_unbounded() {
        let config: GlobeConfig = "[cache]\nmax_ongoing_requests = 0\nmax_queued_requests = 0\n"
            .parse()
            .unwrap();
        assert_eq!(config.cache.max_ongoing_requests, 0);
        assert_eq!(config.cache.max_queued_requests, 0);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[tms]\nserver = http://localhost:8080/").unwrap();
        let config = GlobeConfig::load(file.path()).unwrap();
        assert_eq!(config.tms_server, "http://localhost:8080/");
    }

    #[test]
    fn test_load_missing_file() {
        let err = GlobeConfig::load(Path::new("/nonexistent/globestream.ini")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_default_path() {
        if let Ok(path) = GlobeConfig::default_path() {
            assert!(path.ends_with("globestream/config.ini"));
        }
    }
}

//! Configuration structs with sensible defaults and RON persistence.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const MIB: u64 = 1024 * 1024;

/// Top-level streamer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Level-of-detail selection and memory budget.
    pub streaming: StreamingConfig,
    /// Request throttling and fetch workers.
    pub requests: RequestConfig,
    /// Viewport and camera settings.
    pub view: ViewConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// How foveated deferral relaxes the screen-space error towards the screen edge.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum FoveatedCurve {
    #[default]
    Linear,
    SmoothStep,
}

/// Level-of-detail selection and memory budget.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamingConfig {
    /// Screen-space error in pixels above which a tile is refined.
    pub maximum_screen_space_error: f64,
    /// Loaded content above this many bytes is evicted when untouched.
    pub cache_bytes: u64,
    /// Extra bytes tolerated before the screen-space error is raised.
    pub maximum_cache_overflow_bytes: u64,
    /// Allow refinement to skip intermediate levels.
    pub skip_level_of_detail: bool,
    /// Load leaves before their ancestors.
    pub prefer_leaves: bool,
    /// Defer tiles at the edge of the screen.
    pub foveated_screen_space_error: bool,
    /// Fraction of the field of view (0..=1) that is never deferred.
    pub foveated_cone_size: f64,
    /// Screen-space error relaxation at the edge of the cone.
    pub foveated_minimum_screen_space_error_relaxation: f64,
    /// Interpolation from the cone edge to the screen edge.
    pub foveated_curve: FoveatedCurve,
    /// Reduce the screen-space error of distant tiles with a fog term.
    pub dynamic_screen_space_error: bool,
    /// Fog density for the dynamic screen-space error.
    pub dynamic_screen_space_error_density: f64,
    /// Fog scale for the dynamic screen-space error.
    pub dynamic_screen_space_error_factor: f64,
    /// Fraction of the viewport height used for the first low-resolution pass (0 disables).
    pub progressive_resolution_height_fraction: f64,
    /// Height exaggeration applied to bounding volumes.
    pub vertical_exaggeration: f64,
    /// Height in meters that exaggeration scales from.
    pub vertical_exaggeration_relative_height: f64,
    /// Skip requests for tiles that will leave the view while the camera moves.
    pub cull_requests_while_moving: bool,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            maximum_screen_space_error: 16.0,
            cache_bytes: 512 * MIB,
            maximum_cache_overflow_bytes: 512 * MIB,
            skip_level_of_detail: false,
            prefer_leaves: false,
            foveated_screen_space_error: true,
            foveated_cone_size: 0.1,
            foveated_minimum_screen_space_error_relaxation: 0.0,
            foveated_curve: FoveatedCurve::Linear,
            dynamic_screen_space_error: false,
            dynamic_screen_space_error_density: 2.0e-4,
            dynamic_screen_space_error_factor: 24.0,
            progressive_resolution_height_fraction: 0.3,
            vertical_exaggeration: 1.0,
            vertical_exaggeration_relative_height: 0.0,
            cull_requests_while_moving: true,
        }
    }
}

/// Request throttling and fetch workers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RequestConfig {
    /// Maximum concurrent throttled requests.
    pub max_requests: usize,
    /// Maximum concurrent requests to one server.
    pub max_requests_per_server: usize,
    /// Maximum queued requests waiting for a slot.
    pub priority_heap_length: usize,
    /// Apply the limits above at all.
    pub throttle_requests: bool,
    /// Number of background fetch threads.
    pub worker_threads: usize,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            max_requests: 50,
            max_requests_per_server: 18,
            priority_heap_length: 20,
            throttle_requests: true,
            worker_threads: 4,
        }
    }
}

/// Viewport and camera settings for the headless driver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ViewConfig {
    /// Viewport width in pixels.
    pub viewport_width: u32,
    /// Viewport height in pixels.
    pub viewport_height: u32,
    /// Vertical field of view in degrees.
    pub fov_y_degrees: f64,
    /// Device pixel ratio.
    pub pixel_ratio: f64,
    /// Near clip distance in meters.
    pub near: f64,
    /// Far clip distance in meters.
    pub far: f64,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            viewport_width: 1280,
            viewport_height: 720,
            fov_y_degrees: 60.0,
            pixel_ratio: 1.0,
            near: 1.0,
            far: 5.0e8,
        }
    }
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Also write a JSON log file.
    pub json_log: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_log: true,
        }
    }
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("config.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .map_err(|source| ConfigError::Read { path: config_path.clone(), source })?;
            let config: Config = ron::from_str(&contents)
                .map_err(|source| ConfigError::Parse { path: config_path.clone(), source })?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(|source| ConfigError::Write {
            path: config_dir.to_path_buf(),
            source,
        })?;

        let config_path = config_dir.join("config.ron");
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::Encode)?;

        std::fs::write(&config_path, serialized)
            .map_err(|source| ConfigError::Write { path: config_path, source })?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join("config.ron");
        let contents = std::fs::read_to_string(&config_path)
            .map_err(|source| ConfigError::Read { path: config_path.clone(), source })?;
        let new_config: Config = ron::from_str(&contents)
            .map_err(|source| ConfigError::Parse { path: config_path, source })?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }
}

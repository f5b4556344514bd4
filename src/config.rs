//! Configuration management
//!
//! Engine tuning knobs plus the demo runner settings, loaded from TOML.
//! All values are fixed for the lifetime of a capture session; changing
//! them means tearing the session down and building a new one.

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Upper bound on the per-tile smoothing window
pub const MAX_AVERAGE_WINDOW: usize = 4;

/// Tile-difference engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Side of one square tile in pixels
    #[serde(default = "default_tile_size")]
    pub tile_size: u32,

    /// Per-channel difference (0-255) above which a pixel counts as changed
    #[serde(default = "default_pixel_delta")]
    pub pixel_delta: u8,

    /// Recent per-tile signals averaged before the decision pass (1..=4)
    #[serde(default = "default_average_window")]
    pub average_window: usize,

    /// Consecutive changed ticks required before a tile becomes eligible
    #[serde(default = "default_stable_frames")]
    pub stable_frames_required: u32,

    /// Extra eligibility delay applied to a tile's first-ever refresh
    #[serde(default = "default_first_refresh_extra_delay")]
    pub first_refresh_extra_delay: u32,

    /// Ticks after emission during which a tile may not be re-emitted
    #[serde(default = "default_protection_frames")]
    pub protection_frames: u32,

    /// Additional cooldown ticks beyond the overlay display duration
    #[serde(default = "default_additional_cooldown")]
    pub additional_cooldown_frames: u32,

    /// Bounding-area scroll suppression settings
    #[serde(default)]
    pub bounding_area: BoundingAreaConfig,
}

fn default_tile_size() -> u32 {
    32
}

fn default_pixel_delta() -> u8 {
    10
}

fn default_average_window() -> usize {
    2
}

fn default_stable_frames() -> u32 {
    4
}

fn default_first_refresh_extra_delay() -> u32 {
    1
}

fn default_protection_frames() -> u32 {
    2
}

fn default_additional_cooldown() -> u32 {
    2
}

/// Scroll suppression configuration
///
/// Tiles are grouped into rectangular bounding areas; an area whose
/// history shows sustained wide change has all its tiles blocked from
/// refresh candidacy until the motion stops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingAreaConfig {
    /// Area width in tiles
    #[serde(default = "default_area_width")]
    pub width: u32,

    /// Area height in tiles
    #[serde(default = "default_area_height")]
    pub height: u32,

    /// Length of the per-area history ring in ticks (1..=64)
    #[serde(default = "default_history_frames")]
    pub history_frames: u32,

    /// Changed-tile count at which an area is "significant" for one tick
    #[serde(default = "default_change_threshold")]
    pub change_threshold: u32,

    /// Tile-count threshold deriving the blocked fraction of the history
    /// window (e.g. 1518 over a 45x45 area = 75%)
    #[serde(default = "default_refresh_block_threshold")]
    pub refresh_block_threshold: u32,
}

fn default_area_width() -> u32 {
    45
}

fn default_area_height() -> u32 {
    45
}

fn default_history_frames() -> u32 {
    3
}

fn default_change_threshold() -> u32 {
    20
}

fn default_refresh_block_threshold() -> u32 {
    1518
}

impl Default for BoundingAreaConfig {
    fn default() -> Self {
        Self {
            width: default_area_width(),
            height: default_area_height(),
            history_frames: default_history_frames(),
            change_threshold: default_change_threshold(),
            refresh_block_threshold: default_refresh_block_threshold(),
        }
    }
}

impl BoundingAreaConfig {
    /// Fraction of the history window that must be significant before an
    /// area is blocked, derived from the nominal area size
    pub fn block_ratio(&self) -> f64 {
        let nominal = (self.width * self.height) as f64;
        if nominal == 0.0 {
            return 1.0;
        }
        (self.refresh_block_threshold as f64 / nominal).min(1.0)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tile_size: default_tile_size(),
            pixel_delta: default_pixel_delta(),
            average_window: default_average_window(),
            stable_frames_required: default_stable_frames(),
            first_refresh_extra_delay: default_first_refresh_extra_delay(),
            protection_frames: default_protection_frames(),
            additional_cooldown_frames: default_additional_cooldown(),
            bounding_area: BoundingAreaConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Validate configuration
    ///
    /// Called at session construction; a session is never built from an
    /// invalid configuration.
    pub fn validate(&self) -> Result<()> {
        if self.tile_size == 0 {
            return Err(EngineError::InvalidConfig("tile_size must be > 0".into()));
        }
        if self.tile_size > 1024 {
            return Err(EngineError::InvalidConfig(format!(
                "tile_size {} exceeds maximum 1024",
                self.tile_size
            )));
        }
        if self.average_window == 0 || self.average_window > MAX_AVERAGE_WINDOW {
            return Err(EngineError::InvalidConfig(format!(
                "average_window must be 1..={}, got {}",
                MAX_AVERAGE_WINDOW, self.average_window
            )));
        }
        if self.stable_frames_required == 0 {
            return Err(EngineError::InvalidConfig(
                "stable_frames_required must be > 0".into(),
            ));
        }
        let area = &self.bounding_area;
        if area.width == 0 || area.height == 0 {
            return Err(EngineError::InvalidConfig(
                "bounding area dimensions must be > 0".into(),
            ));
        }
        if area.history_frames == 0 || area.history_frames > 64 {
            return Err(EngineError::InvalidConfig(format!(
                "history_frames must be 1..=64, got {}",
                area.history_frames
            )));
        }
        if area.change_threshold == 0 {
            return Err(EngineError::InvalidConfig(
                "change_threshold must be > 0".into(),
            ));
        }
        if area.refresh_block_threshold == 0 {
            return Err(EngineError::InvalidConfig(
                "refresh_block_threshold must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Tick runner configuration (demo binary)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Milliseconds between ticks
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Bounded wait for a new frame before the tick is skipped
    #[serde(default = "default_capture_timeout_ms")]
    pub capture_timeout_ms: u64,

    /// Capacity of the tick-output channel to the overlay consumer
    #[serde(default = "default_output_capacity")]
    pub output_capacity: usize,

    /// Ticks an emitted overlay batch stays visible before expiry
    #[serde(default = "default_overlay_ticks")]
    pub overlay_ticks: u32,
}

fn default_tick_interval_ms() -> u64 {
    100
}

fn default_capture_timeout_ms() -> u64 {
    40
}

fn default_output_capacity() -> usize {
    16
}

fn default_overlay_ticks() -> u32 {
    2
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            capture_timeout_ms: default_capture_timeout_ms(),
            output_capacity: default_output_capacity(),
            overlay_ticks: default_overlay_ticks(),
        }
    }
}

/// Top-level configuration file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Runner configuration
    #[serde(default)]
    pub runner: RunnerConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path))?;
        let config: Config =
            toml::from_str(&content).context("Failed to parse config file")?;
        config
            .engine
            .validate()
            .context("Invalid engine configuration")?;
        Ok(config)
    }
}

//! Tunables for every stage of the anchor pipeline.
//!
//! All fields carry defaults, so a config file only needs the keys it overrides.

use crate::error::TourError;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "TOUR_ANCHORS_CONFIG";
pub const STORE_DIR_ENV: &str = "TOUR_ANCHORS_STORE_DIR";
pub const DEFAULT_STORE_DIR: &str = ".tour-anchors";

/// How an anchor id is built when the element carries an explicit marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MarkerIdStyle {
    /// `{route}.{region}.{marker}-{kind}`
    #[default]
    Composed,
    /// `{route}.{marker}`
    Short,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TourConfig {
    pub marker_attribute: String,
    pub marker_id_style: MarkerIdStyle,
    pub text_limit: usize,
    pub slug_text_limit: usize,
    pub friendly_name_limit: usize,
    pub spotlight: SpotlightConfig,
    pub recovery: RecoveryConfig,
    pub reindex: ReindexConfig,
    pub thumbnail: ThumbnailConfig,
    pub validation: ValidationConfig,
    pub pick: PickConfig,
}

impl Default for TourConfig {
    fn default() -> Self {
        Self {
            marker_attribute: "data-tour-id".to_string(),
            marker_id_style: MarkerIdStyle::Composed,
            text_limit: 100,
            slug_text_limit: 30,
            friendly_name_limit: 50,
            spotlight: SpotlightConfig::default(),
            recovery: RecoveryConfig::default(),
            reindex: ReindexConfig::default(),
            thumbnail: ThumbnailConfig::default(),
            validation: ValidationConfig::default(),
            pick: PickConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotlightConfig {
    pub retry_base_ms: u64,
    pub retry_factor: f64,
    pub retry_cap_ms: u64,
    pub max_retries: u32,
    pub settle_ms: u64,
    pub padding: f64,
    pub spacing: f64,
    pub tooltip_width: f64,
    pub tooltip_height: f64,
    pub viewport_margin: f64,
}

impl Default for SpotlightConfig {
    fn default() -> Self {
        Self {
            retry_base_ms: 200,
            retry_factor: 1.5,
            retry_cap_ms: 2_000,
            max_retries: 8,
            settle_ms: 350,
            padding: 8.0,
            spacing: 16.0,
            tooltip_width: 320.0,
            tooltip_height: 200.0,
            viewport_margin: 12.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub text_weight: f64,
    pub role_weight: f64,
    pub position_weight: f64,
    pub neutral_position: f64,
    pub min_total: f64,
    pub max_suggestions: usize,
    pub text_reason_threshold: f64,
    pub role_reason_threshold: f64,
    pub position_reason_threshold: f64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            text_weight: 0.5,
            role_weight: 0.3,
            position_weight: 0.2,
            neutral_position: 0.5,
            min_total: 0.3,
            max_suggestions: 5,
            text_reason_threshold: 0.7,
            role_reason_threshold: 0.8,
            position_reason_threshold: 0.6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReindexConfig {
    pub throttle_ms: u64,
    pub stale_after_days: i64,
}

impl Default for ReindexConfig {
    fn default() -> Self {
        Self {
            throttle_ms: 50,
            stale_after_days: 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    pub max_width: u32,
    pub max_height: u32,
    pub render_scale: f64,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            max_width: 400,
            max_height: 300,
            render_scale: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub verify_max_age_days: i64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            verify_max_age_days: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PickConfig {
    pub hover_throttle_ms: u64,
    pub cancel_key: String,
}

impl Default for PickConfig {
    fn default() -> Self {
        Self {
            hover_throttle_ms: 50,
            cancel_key: "Escape".to_string(),
        }
    }
}

impl TourConfig {
    /// Loads from `explicit`, else from `$TOUR_ANCHORS_CONFIG`, else defaults.
    /// A path that was asked for but cannot be read is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self, TourError> {
        let requested = explicit.map(Path::to_path_buf).or_else(|| {
            env::var(CONFIG_ENV)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
        });
        match requested {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, TourError> {
        let raw = fs::read_to_string(path).map_err(|err| {
            TourError::Config(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_json(&raw)
            .map_err(|err| TourError::Config(format!("{}: {err}", path.display())))
    }

    pub fn from_json(raw: &str) -> Result<Self, TourError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|err| TourError::Config(err.to_string()))?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<(), TourError> {
        if self.marker_attribute.trim().is_empty() {
            return Err(TourError::Config("marker_attribute must not be empty".into()));
        }
        if self.spotlight.max_retries == 0 {
            return Err(TourError::Config("spotlight.max_retries must be >= 1".into()));
        }
        if self.spotlight.retry_factor < 1.0 {
            return Err(TourError::Config("spotlight.retry_factor must be >= 1.0".into()));
        }
        if self.thumbnail.max_width == 0 || self.thumbnail.max_height == 0 {
            return Err(TourError::Config("thumbnail bounds must be non-zero".into()));
        }
        Ok(())
    }
}

/// Store root: `explicit`, then `$TOUR_ANCHORS_STORE_DIR`, then `.tour-anchors`.
pub fn store_root(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| {
            env::var(STORE_DIR_ENV)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
        })
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_DIR))
}

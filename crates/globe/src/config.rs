//! Startup configuration, loaded from JSON. Every field has a default, so a partial file only names
//! what it changes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use fetch::{FetchQueueConfig, HttpTransportConfig};
use geodesy::Ellipsoid;
use imagery::{
    GeographicTilingScheme, ImageryProvider, TilingScheme, UrlTemplateImageryProvider,
    WebMercatorTilingScheme,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::LogConfig;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read config {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unknown log level `{0}`")]
    InvalidLogLevel(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TilingSchemeKind {
    Geographic,
    WebMercator,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerConfig {
    pub url_template: String,
    pub tiling_scheme: TilingSchemeKind,
    pub minimum_level: u32,
    pub maximum_level: u32,
    pub subdomains: Vec<String>,
    pub headers: BTreeMap<String, String>,
    pub params: BTreeMap<String, String>,
    pub show: bool,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            url_template: "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png".to_owned(),
            tiling_scheme: TilingSchemeKind::WebMercator,
            minimum_level: 0,
            maximum_level: 18,
            subdomains: vec!["a".to_owned(), "b".to_owned(), "c".to_owned()],
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
            show: true,
        }
    }
}

impl LayerConfig {
    pub fn tiling_scheme(&self, ellipsoid: Ellipsoid) -> Box<dyn TilingScheme> {
        match self.tiling_scheme {
            TilingSchemeKind::Geographic => Box::new(GeographicTilingScheme::new(ellipsoid)),
            TilingSchemeKind::WebMercator => Box::new(WebMercatorTilingScheme::new(ellipsoid)),
        }
    }

    pub fn build_provider(&self, ellipsoid: Ellipsoid) -> Box<dyn ImageryProvider> {
        Box::new(
            UrlTemplateImageryProvider::new(self.url_template.clone(), self.tiling_scheme(ellipsoid))
                .with_subdomains(self.subdomains.clone())
                .with_levels(self.minimum_level, self.maximum_level)
                .with_headers(self.headers.clone())
                .with_params(self.params.clone()),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub workers: usize,
    pub capacity: usize,
    pub request_timeout_secs: u64,
    pub max_idle_connections_per_host: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        let queue = FetchQueueConfig::default();
        let transport = HttpTransportConfig::default();
        Self {
            workers: queue.workers,
            capacity: queue.capacity,
            request_timeout_secs: transport.request_timeout.as_secs(),
            max_idle_connections_per_host: transport.max_idle_connections_per_host,
        }
    }
}

impl FetchSettings {
    pub fn queue_config(&self) -> FetchQueueConfig {
        FetchQueueConfig {
            workers: self.workers,
            capacity: self.capacity,
        }
    }

    pub fn transport_config(&self) -> HttpTransportConfig {
        HttpTransportConfig {
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            max_idle_connections_per_host: self.max_idle_connections_per_host,
            ..HttpTransportConfig::default()
        }
    }
}

/// Initial camera, looking at the ellipsoid center.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    pub longitude_degrees: f64,
    pub latitude_degrees: f64,
    /// Meters above the ellipsoid.
    pub height: f64,
    pub fov_y_degrees: f64,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            longitude_degrees: 0.0,
            latitude_degrees: 20.0,
            height: 2.0e7,
            fov_y_degrees: 60.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub with_target: bool,
    pub with_ansi: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            with_target: false,
            with_ansi: true,
        }
    }
}

impl LogSettings {
    pub fn log_config(&self) -> Result<LogConfig, ConfigError> {
        let level = tracing::Level::from_str(&self.level)
            .map_err(|_| ConfigError::InvalidLogLevel(self.level.clone()))?;
        Ok(LogConfig {
            level,
            with_target: self.with_target,
            with_ansi: self.with_ansi,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobeConfig {
    pub width: u32,
    pub height: u32,
    /// Linear RGBA.
    pub clear_color: [f64; 4],
    /// Frames rendered by the headless binary.
    pub frames: u64,
    /// Every tile of this level is requested at startup and kept referenced.
    pub base_level: u32,
    pub max_frames_in_flight: usize,
    pub decode_workers: usize,
    pub sky_atmosphere: bool,
    pub depth_plane: bool,
    pub layers: Vec<LayerConfig>,
    pub fetch: FetchSettings,
    pub camera: CameraSettings,
    pub log: LogSettings,
}

impl Default for GlobeConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            frames: 120,
            base_level: 1,
            max_frames_in_flight: frame_sync::MAX_FRAMES_IN_FLIGHT,
            decode_workers: 2,
            sky_atmosphere: true,
            depth_plane: true,
            layers: vec![LayerConfig::default()],
            fetch: FetchSettings::default(),
            camera: CameraSettings::default(),
            log: LogSettings::default(),
        }
    }
}

impl GlobeConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "viewport {}x{} is empty",
                self.width, self.height
            )));
        }
        if self.max_frames_in_flight == 0 {
            return Err(ConfigError::Invalid(
                "max_frames_in_flight must be positive".to_owned(),
            ));
        }
        if self.decode_workers == 0 {
            return Err(ConfigError::Invalid(
                "decode_workers must be positive".to_owned(),
            ));
        }
        if !(self.camera.fov_y_degrees > 0.0 && self.camera.fov_y_degrees < 180.0) {
            return Err(ConfigError::Invalid(format!(
                "camera fov {} is outside (0, 180) degrees",
                self.camera.fov_y_degrees
            )));
        }
        if self.base_level > imagery::MAXIMUM_LEVEL {
            return Err(ConfigError::Invalid(format!(
                "base level {} exceeds the deepest level {}",
                self.base_level,
                imagery::MAXIMUM_LEVEL
            )));
        }
        for (index, layer) in self.layers.iter().enumerate() {
            if layer.maximum_level > imagery::MAXIMUM_LEVEL {
                return Err(ConfigError::Invalid(format!(
                    "layer {index} maximum level {} exceeds the deepest level {}",
                    layer.maximum_level,
                    imagery::MAXIMUM_LEVEL
                )));
            }
            if layer.minimum_level > layer.maximum_level {
                return Err(ConfigError::Invalid(format!(
                    "layer {index} minimum level {} exceeds maximum level {}",
                    layer.minimum_level, layer.maximum_level
                )));
            }
        }
        self.log.log_config()?;
        Ok(())
    }

    pub fn clear_color(&self) -> wgpu::Color {
        let [r, g, b, a] = self.clear_color;
        wgpu::Color { r, g, b, a }
    }
}

use serde::Deserialize;
use std::path::Path;
use tracing::debug;

/// Smallest thumbnail edge the similarity window fits into.
pub const MIN_THUMBNAIL_EDGE: u32 = 7;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Options recognised by the keyframe pipeline and slide renderer.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Frames between similarity evaluations.
    #[serde(default = "default_sample_stride")]
    pub sample_stride: u32,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_thumbnail_width")]
    pub thumbnail_width: u32,
    #[serde(default = "default_thumbnail_height")]
    pub thumbnail_height: u32,
    #[serde(default)]
    pub brightness_region: RegionConfig,
    /// Mean luma below this renders a white label, otherwise black.
    #[serde(default = "default_brightness_split")]
    pub brightness_split: u8,
    #[serde(default = "default_label_font_size")]
    pub label_font_size: f32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    /// Optional wall-clock budget for a single run.
    #[serde(default)]
    pub max_run_secs: Option<u64>,
}

/// Rectangle in image pixels, origin at the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RegionConfig {
    #[serde(default = "default_region_x")]
    pub x: u32,
    #[serde(default = "default_region_y")]
    pub y: u32,
    #[serde(default = "default_region_width")]
    pub width: u32,
    #[serde(default = "default_region_height")]
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Downloader executable, resolved on PATH when not absolute.
    #[serde(default = "default_downloader")]
    pub downloader: String,
    #[serde(default = "default_format")]
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_stride: default_sample_stride(),
            similarity_threshold: default_similarity_threshold(),
            thumbnail_width: default_thumbnail_width(),
            thumbnail_height: default_thumbnail_height(),
            brightness_region: RegionConfig::default(),
            brightness_split: default_brightness_split(),
            label_font_size: default_label_font_size(),
            jpeg_quality: default_jpeg_quality(),
            max_run_secs: None,
        }
    }
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            x: default_region_x(),
            y: default_region_y(),
            width: default_region_width(),
            height: default_region_height(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            downloader: default_downloader(),
            format: default_format(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        let config = Self::parse(&content)?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Parses and validates a TOML document.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.pipeline.validate()?;
        Ok(config)
    }
}

impl PipelineConfig {
    /// Rejects out-of-range options before any frame is decoded.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_stride == 0 {
            return Err(ConfigError::Invalid("sample_stride must be at least 1".into()));
        }
        let t = self.similarity_threshold;
        if !t.is_finite() || !(-1.0..=1.0).contains(&t) {
            return Err(ConfigError::Invalid(format!(
                "similarity_threshold must be within [-1, 1], got {t}"
            )));
        }
        if self.thumbnail_width < MIN_THUMBNAIL_EDGE || self.thumbnail_height < MIN_THUMBNAIL_EDGE {
            return Err(ConfigError::Invalid(format!(
                "thumbnail must be at least {MIN_THUMBNAIL_EDGE}x{MIN_THUMBNAIL_EDGE}, got {}x{}",
                self.thumbnail_width, self.thumbnail_height
            )));
        }
        if self.brightness_region.width == 0 || self.brightness_region.height == 0 {
            return Err(ConfigError::Invalid("brightness_region must have a non-zero size".into()));
        }
        if !self.label_font_size.is_finite() || self.label_font_size <= 0.0 {
            return Err(ConfigError::Invalid("label_font_size must be positive".into()));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ConfigError::Invalid(format!(
                "jpeg_quality must be within 1..=100, got {}",
                self.jpeg_quality
            )));
        }
        if self.max_run_secs == Some(0) {
            return Err(ConfigError::Invalid("max_run_secs must be positive when set".into()));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// Default value functions
fn default_sample_stride() -> u32 {
    3
}
fn default_similarity_threshold() -> f64 {
    0.8
}
fn default_thumbnail_width() -> u32 {
    128
}
fn default_thumbnail_height() -> u32 {
    72
}
fn default_region_x() -> u32 {
    5
}
fn default_region_y() -> u32 {
    5
}
fn default_region_width() -> u32 {
    60
}
fn default_region_height() -> u32 {
    15
}
fn default_brightness_split() -> u8 {
    64
}
fn default_label_font_size() -> f32 {
    12.0
}
fn default_jpeg_quality() -> u8 {
    85
}
fn default_bind() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    5000
}
fn default_downloader() -> String {
    "yt-dlp".into()
}
fn default_format() -> String {
    "best".into()
}
fn default_log_level() -> String {
    "info".into()
}

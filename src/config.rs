use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub camera: CameraConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub motion: MotionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    /// MJPEG stream URL of the camera, e.g. `http://192.168.1.20:8554/stream`.
    pub url: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    #[serde(default = "default_frames_to_confirm")]
    pub frames_to_confirm: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MotionConfig {
    /// Minimum foreground region size (in pixels) to count as motion.
    #[serde(default = "default_min_area")]
    pub min_area: usize,
    /// Background model window; the EMA update rate is 1/history.
    #[serde(default = "default_history")]
    pub history: u32,
    /// Per-pixel difference above which a pixel is foreground.
    #[serde(default = "default_var_threshold")]
    pub var_threshold: f32,
    /// Binarization cutoff applied to the graded foreground mask.
    #[serde(default = "default_mask_threshold")]
    pub mask_threshold: u8,
    /// Detections are suppressed while the background model warms up.
    #[serde(default = "default_warmup_frames")]
    pub warmup_frames: u64,
    /// DBSCAN neighborhood radius when clustering foreground pixels.
    #[serde(default = "default_cluster_tolerance")]
    pub cluster_tolerance: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            cooldown_secs: default_cooldown(),
            frames_to_confirm: default_frames_to_confirm(),
        }
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            min_area: default_min_area(),
            history: default_history(),
            var_threshold: default_var_threshold(),
            mask_threshold: default_mask_threshold(),
            warmup_frames: default_warmup_frames(),
            cluster_tolerance: default_cluster_tolerance(),
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
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
}

// Default value functions
fn default_port() -> u16 {
    8000
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_output_dir() -> String {
    "./captured_images".into()
}
fn default_cooldown() -> u64 {
    5
}
fn default_frames_to_confirm() -> u32 {
    3
}
fn default_min_area() -> usize {
    5000
}
fn default_history() -> u32 {
    500
}
fn default_var_threshold() -> f32 {
    50.0
}
fn default_mask_threshold() -> u8 {
    250
}
fn default_warmup_frames() -> u64 {
    30
}
fn default_cluster_tolerance() -> f64 {
    20.0
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [camera]
            url = "http://127.0.0.1:8554/stream"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.capture.cooldown_secs, 5);
        assert_eq!(config.capture.frames_to_confirm, 3);
        assert_eq!(config.motion.min_area, 5000);
        assert_eq!(config.motion.history, 500);
        assert_eq!(config.motion.mask_threshold, 250);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn overrides_are_respected() {
        let config: Config = toml::from_str(
            r#"
            [camera]
            url = "http://cam.local/stream"

            [capture]
            output_dir = "/var/captures"
            cooldown_secs = 10

            [motion]
            min_area = 1200
            warmup_frames = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.capture.output_dir, "/var/captures");
        assert_eq!(config.capture.cooldown_secs, 10);
        assert_eq!(config.motion.min_area, 1200);
        assert_eq!(config.motion.warmup_frames, 5);
    }

    #[test]
    fn missing_camera_url_is_an_error() {
        let result: Result<Config, _> = toml::from_str("[server]\nport = 9000\n");
        assert!(result.is_err());
    }
}

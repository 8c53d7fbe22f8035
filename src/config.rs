// =============================================================================
// CONFIGURATION - Load settings from frameline.toml
// =============================================================================
//
// Every section is optional; missing keys take their defaults. A file that
// cannot be read or parsed is reported and replaced by the defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "frameline.toml";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "frameline".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PresentMode {
    #[default]
    Fifo,
    FifoRelaxed,
    Mailbox,
    Immediate,
}

/// Graphics settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: PresentMode,
    pub clear_color: [f32; 4],
    pub frames_in_flight: usize,
    /// Secondary command buffers pre-allocated per frame slot.
    pub secondary_pool_size: usize,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: PresentMode::Fifo,
            clear_color: [0.0, 0.0, 0.0, 0.0],
            frames_in_flight: 2,
            secondary_pool_size: 10,
        }
    }
}

impl GraphicsConfig {
    pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

    /// `frames_in_flight` clamped to what the frame ring supports.
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight.clamp(1, Self::MAX_FRAMES_IN_FLIGHT)
    }
}

/// Debug settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    /// `env_logger` filter; `RUST_LOG` takes precedence.
    pub log_filter: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: cfg!(debug_assertions),
            log_filter: "info".to_string(),
            show_fps: true,
        }
    }
}

impl Config {
    /// Load `frameline.toml` from the working directory, falling back to
    /// defaults on any error.
    pub fn load() -> Self {
        Self::load_from_path(DEFAULT_CONFIG_PATH).unwrap_or_else(|e| {
            log::warn!("Failed to load {}: {:#}. Using defaults.", DEFAULT_CONFIG_PATH, e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        if config.graphics.frames_in_flight != config.graphics.frames_in_flight() {
            log::warn!(
                "frames_in_flight = {} is out of range, using {}",
                config.graphics.frames_in_flight,
                config.graphics.frames_in_flight()
            );
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.graphics.present_mode, PresentMode::Fifo);
        assert_eq!(config.graphics.frames_in_flight(), 2);
        assert_eq!(config.graphics.secondary_pool_size, 10);
        assert_eq!(config.window.width, 1280);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [graphics]
            present_mode = "mailbox"
            clear_color = [0.1, 0.2, 0.3, 1.0]

            [debug]
            log_filter = "frameline=trace"
            "#,
        )
        .unwrap();

        assert_eq!(config.graphics.present_mode, PresentMode::Mailbox);
        assert_eq!(config.graphics.clear_color, [0.1, 0.2, 0.3, 1.0]);
        assert_eq!(config.graphics.frames_in_flight, 2);
        assert_eq!(config.debug.log_filter, "frameline=trace");
        assert!(config.debug.show_fps);
        assert_eq!(config.window.title, "frameline");
    }

    #[test]
    fn frames_in_flight_is_clamped() {
        let config = Config::parse("[graphics]\nframes_in_flight = 8\n").unwrap();
        assert_eq!(config.graphics.frames_in_flight(), 3);

        let config = Config::parse("[graphics]\nframes_in_flight = 0\n").unwrap();
        assert_eq!(config.graphics.frames_in_flight(), 1);
    }

    #[test]
    fn unknown_present_mode_is_an_error() {
        assert!(Config::parse("[graphics]\npresent_mode = \"vsync\"\n").is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let config = Config::load_from_path("does/not/exist.toml").unwrap();
        assert_eq!(config.graphics.frames_in_flight, 2);
    }
}

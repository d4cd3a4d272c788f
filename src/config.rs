// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides sensible defaults if config file is missing or has errors.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Frame rate the loop paces itself to when the config does not say otherwise
pub const DEFAULT_TARGET_FPS: u32 = 240;

const CONFIG_PATH: &str = "config.toml";

/// Where the active configuration came from
#[derive(Debug)]
pub enum ConfigSource {
    File(PathBuf),
    Missing(PathBuf),
    /// The file exists but could not be read or parsed; defaults are in use
    Invalid(anyhow::Error),
}

impl ConfigSource {
    /// Report the outcome of [`Config::load`] once logging is up
    pub fn log(&self) {
        match self {
            ConfigSource::File(path) => log::info!("Loaded configuration from {:?}", path),
            ConfigSource::Missing(path) => {
                log::info!("Config file not found at {:?}, using defaults", path)
            }
            ConfigSource::Invalid(e) => {
                log::warn!("Failed to load {}: {:#}. Using defaults.", CONFIG_PATH, e)
            }
        }
    }
}

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub shaders: ShaderConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Spinning Triangle".to_string(),
            width: 768,
            height: 768,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub target_fps: u32,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            target_fps: DEFAULT_TARGET_FPS,
        }
    }
}

/// Compiled SPIR-V locations
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("shaders/triangle.vert.spv"),
            fragment: PathBuf::from("shaders/triangle.frag.spv"),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_to_file: false,
            log_file: "spinning_triangle.log".to_string(),
            show_fps: false,
        }
    }
}

impl Config {
    /// Load `config.toml` from the working directory, falling back to
    /// defaults if it is missing or invalid.
    ///
    /// Runs before logging exists, so nothing is logged here; the returned
    /// [`ConfigSource`] says what happened and logs it later.
    pub fn load() -> (Self, ConfigSource) {
        Self::load_or_default(CONFIG_PATH)
    }

    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, ConfigSource) {
        let path = path.as_ref();
        if !path.exists() {
            return (Config::default(), ConfigSource::Missing(path.to_path_buf()));
        }

        match Self::load_from_path(path) {
            Ok(config) => (config, ConfigSource::File(path.to_path_buf())),
            Err(e) => (Config::default(), ConfigSource::Invalid(e)),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::parse(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Time allotted to one loop iteration before the pacing sleep ends
    pub fn frame_budget(&self) -> Duration {
        let fps = match self.graphics.target_fps {
            0 => {
                log::warn!(
                    "target_fps = 0 is not a valid pacing target, using {}",
                    DEFAULT_TARGET_FPS
                );
                DEFAULT_TARGET_FPS
            }
            fps => fps,
        };
        Duration::from_nanos(1_000_000_000 / u64::from(fps))
    }

    /// Get present mode as Vulkan enum
    pub fn get_present_mode(&self) -> ash::vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => ash::vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => ash::vk::PresentModeKHR::MAILBOX,
            "fifo" => ash::vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => ash::vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to MAILBOX",
                    self.graphics.present_mode
                );
                ash::vk::PresentModeKHR::MAILBOX
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.window.width, 768);
        assert_eq!(config.window.height, 768);
        assert_eq!(config.graphics.target_fps, 240);
        assert_eq!(config.shaders.vertex, PathBuf::from("shaders/triangle.vert.spv"));
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = Config::parse(
            r#"
            [window]
            title = "demo"

            [graphics]
            target_fps = 60
            "#,
        )
        .unwrap();

        assert_eq!(config.window.title, "demo");
        assert_eq!(config.window.width, 768);
        assert_eq!(config.graphics.target_fps, 60);
        assert_eq!(config.graphics.present_mode, "mailbox");
        assert!(!config.debug.log_to_file);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(Config::parse("[window\nwidth = ").is_err());
    }

    fn temp_config(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("{}-{}", std::process::id(), name));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn invalid_file_falls_back_and_keeps_the_error() {
        let path = temp_config("invalid.toml", "[window\nwidth = ");

        let (config, source) = Config::load_or_default(&path);
        assert_eq!(config.window.width, 768);
        match source {
            ConfigSource::Invalid(e) => assert!(format!("{:#}", e).contains("invalid.toml")),
            other => panic!("expected an invalid source, got {:?}", other),
        }

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn missing_and_valid_files_are_told_apart() {
        let (_, source) = Config::load_or_default("does/not/exist.toml");
        assert!(matches!(source, ConfigSource::Missing(_)));

        let path = temp_config("valid.toml", "[graphics]\ntarget_fps = 120\n");
        let (config, source) = Config::load_or_default(&path);
        assert_eq!(config.graphics.target_fps, 120);
        assert!(matches!(source, ConfigSource::File(ref p) if *p == path));

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn frame_budget_matches_target_rate() {
        let config = Config::default();
        assert_eq!(config.frame_budget(), Duration::from_nanos(4_166_666));

        let mut slow = Config::default();
        slow.graphics.target_fps = 60;
        assert_eq!(slow.frame_budget(), Duration::from_nanos(16_666_666));
    }

    #[test]
    fn zero_target_fps_falls_back_to_default_rate() {
        let mut config = Config::default();
        config.graphics.target_fps = 0;
        assert_eq!(config.frame_budget(), Duration::from_nanos(4_166_666));
    }

    #[test]
    fn present_mode_names_are_case_insensitive() {
        let mut config = Config::default();
        config.graphics.present_mode = "FIFO".to_string();
        assert_eq!(config.get_present_mode(), ash::vk::PresentModeKHR::FIFO);

        config.graphics.present_mode = "bogus".to_string();
        assert_eq!(config.get_present_mode(), ash::vk::PresentModeKHR::MAILBOX);
    }
}

//! Configuration system
//!
//! Graphics and font settings, loadable from TOML or RON files. The defaults
//! carry the constants the rendering core has always used, so an empty file
//! (or no file at all) gives the stock behaviour.

pub use serde::{Deserialize, Serialize};

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

        // Try different formats
        if path.ends_with(".toml") {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A value was parsed but is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// # Font Configuration
///
/// Glyph atlas sizing and spacing. The texture ceilings are further clamped by
/// whatever maximum texture size the backend reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FontConfig {
    /// Width and height of the first atlas surface before size fitting
    pub initial_texture_size: u32,
    /// Empty texels kept around every packed glyph
    pub texture_padding: u32,
    /// Advance of a synthesised tab, in spaces
    pub spaces_per_tab: u32,
    /// Hard ceiling on atlas surface width
    pub max_texture_width: u32,
    /// Hard ceiling on atlas surface height
    pub max_texture_height: u32,
    /// Line height multiplier given to newly created fonts
    pub default_line_height: f32,
}

impl Default for FontConfig {
    fn default() -> Self {
        Self {
            initial_texture_size: 128,
            texture_padding: 2,
            spaces_per_tab: 4,
            max_texture_width: 8192,
            max_texture_height: 4096,
            default_line_height: 1.0,
        }
    }
}

/// # Graphics Configuration
///
/// Settings for one graphics subsystem instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// Treat colours as sRGB and blend in linear space
    pub gamma_correct: bool,
    /// Maximum number of nested `push` calls
    pub max_stack_depth: usize,
    /// Font and atlas settings
    pub font: FontConfig,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            gamma_correct: false,
            max_stack_depth: 128,
            font: FontConfig::default(),
        }
    }
}

impl Config for GraphicsConfig {}

impl GraphicsConfig {
    /// Check that every value is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_stack_depth == 0 {
            return Err(ConfigError::Invalid("max_stack_depth must be at least 1".into()));
        }

        let size = self.font.initial_texture_size;
        if size == 0 || !size.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "initial_texture_size must be a power of two, got {size}"
            )));
        }

        if self.font.max_texture_width < size || self.font.max_texture_height < size {
            return Err(ConfigError::Invalid(
                "maximum atlas dimensions are smaller than the initial size".into(),
            ));
        }

        if self.font.default_line_height <= 0.0 {
            return Err(ConfigError::Invalid("default_line_height must be positive".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = GraphicsConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.font.initial_texture_size, 128);
        assert_eq!(config.font.spaces_per_tab, 4);
    }

    #[test]
    fn test_toml_partial_overrides_keep_defaults() {
        let config: GraphicsConfig = toml::from_str(
            "gamma_correct = true\n[font]\ntexture_padding = 1\n",
        )
        .unwrap();

        assert!(config.gamma_correct);
        assert_eq!(config.font.texture_padding, 1);
        assert_eq!(config.font.max_texture_width, 8192);
        assert_eq!(config.max_stack_depth, 128);
    }

    #[test]
    fn test_ron_round_trip_through_file() {
        let path = std::env::temp_dir().join("gfx_core_config_test.ron");
        let path = path.to_string_lossy().to_string();

        let mut config = GraphicsConfig::default();
        config.max_stack_depth = 16;
        config.save_to_file(&path).unwrap();

        let loaded = GraphicsConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = GraphicsConfig::default();
        config.font.initial_texture_size = 100;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = GraphicsConfig::default();
        config.max_stack_depth = 0;
        assert!(config.validate().is_err());

        assert!(matches!(
            GraphicsConfig::load_from_file("settings.ini"),
            Err(ConfigError::Io(_) | ConfigError::UnsupportedFormat(_))
        ));
    }
}

//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Configuration for agribot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model to use for live sessions
    pub model: Option<String>,
    /// Prebuilt voice name for spoken responses
    pub voice: Option<String>,
    /// Custom system prompt file path
    pub system_prompt_file: Option<String>,
    /// Home district, used as a default for crop price lookups
    pub district: Option<String>,
    /// API keys (alternative to environment variables)
    #[serde(default)]
    pub api_keys: ApiKeys,
}

/// API key configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeys {
    pub gemini: Option<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("agribot")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        // Check for AGRIBOT_CONFIG_PATH env var first
        if let Ok(path) = std::env::var("AGRIBOT_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        let dir = path.parent().unwrap();
        fs::create_dir_all(dir)?;

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            model: None,
            voice: Some("Zephyr".to_string()),
            system_prompt_file: None,
            district: None,
            api_keys: ApiKeys::default(),
        };

        default_config.save()?;
        Ok(path)
    }

    /// Get the Gemini API key, checking config then env
    pub fn get_api_key(&self) -> Option<String> {
        if let Some(key) = self.api_keys.gemini.clone() {
            return Some(key);
        }
        std::env::var("GEMINI_API_KEY").ok()
    }

    /// Read the custom system prompt, if one is configured
    pub fn system_prompt(&self) -> Option<String> {
        let path = self.system_prompt_file.as_ref()?;
        match fs::read_to_string(path) {
            Ok(content) => Some(content),
            Err(e) => {
                eprintln!("Warning: Failed to read system prompt file: {}", e);
                None
            }
        }
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# agribot configuration file
# Place at ~/.config/agribot/config.toml (Linux/Mac) or %APPDATA%\agribot\config.toml (Windows)

# Model to use for live sessions (optional)
# model = "gemini-2.5-flash-native-audio-preview-09-2025"

# Prebuilt voice for spoken responses
voice = "Zephyr"

# Custom system prompt file (optional)
# system_prompt_file = "~/.config/agribot/system_prompt.txt"

# Home district, used as a default for crop price lookups (optional)
# district = "Nashik"

# API keys (optional - can also use environment variables)
# It's recommended to use environment variables instead for security
[api_keys]
# gemini = "..."
"#
}

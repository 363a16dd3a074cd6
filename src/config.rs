//! Configuration and settings management
//!
//! Loads settings from environment variables and defines processing constants.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    pub telegram_token: String,

    /// `PhotoRoom` API key (AI editing); the feature is disabled when absent
    pub photoroom_api_key: Option<String>,
    /// Remove.bg API key (background removal); the feature is disabled when absent
    pub removebg_api_key: Option<String>,

    /// Maximum admitted requests per user within one window
    #[serde(default = "default_max_requests")]
    pub max_requests_per_window: usize,
    /// Length of the trailing rate-limit window in seconds
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    /// Maximum accepted upload size in bytes
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,

    /// Comma-separated list of accepted MIME types for image documents
    #[serde(rename = "supported_formats")]
    pub supported_formats_str: Option<String>,

    /// `PhotoRoom` API base URL
    #[serde(default = "default_photoroom_url")]
    pub photoroom_api_url: String,
    /// Remove.bg API base URL
    #[serde(default = "default_removebg_url")]
    pub removebg_api_url: String,
}

const fn default_max_requests() -> usize {
    10
}

const fn default_window_seconds() -> u64 {
    3600
}

const fn default_max_file_size() -> u64 {
    20 * 1024 * 1024
}

fn default_photoroom_url() -> String {
    "https://image-api.photoroom.com".to_string()
}

fn default_removebg_url() -> String {
    "https://api.remove.bg/v1.0".to_string()
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use image_ai_bot::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start off by merging in the "default" configuration file
            .add_source(File::with_name("config/default").required(false))
            // Add in the current environment file
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            // Add in a local configuration file
            // This file shouldn't be checked into git
            .add_source(File::with_name("config/local").required(false))
            // Add in settings from the environment (with a prefix of APP)
            .add_source(Environment::with_prefix("APP").separator("__"))
            // Also add settings from environment variables directly (without prefix)
            // Note: Environment::default() auto-converts UPPER_SNAKE_CASE to snake_case
            // ignore_empty treats empty env vars as unset
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        let mut settings: Self = s.try_deserialize()?;

        // Fallback: Check environment variables directly if config didn't pick them up
        if settings.photoroom_api_key.is_none() {
            if let Ok(val) = std::env::var("PHOTOROOM_API_KEY") {
                if !val.is_empty() {
                    settings.photoroom_api_key = Some(val);
                }
            }
        }
        if settings.removebg_api_key.is_none() {
            if let Ok(val) = std::env::var("REMOVEBG_API_KEY") {
                if !val.is_empty() {
                    settings.removebg_api_key = Some(val);
                }
            }
        }

        Ok(settings)
    }

    /// Returns the set of accepted MIME types for image document uploads
    #[must_use]
    pub fn supported_formats(&self) -> HashSet<String> {
        self.supported_formats_str.as_ref().map_or_else(
            || {
                ["image/jpeg", "image/png", "image/webp"]
                    .iter()
                    .map(ToString::to_string)
                    .collect()
            },
            |s| {
                s.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
                    .filter(|token| !token.is_empty())
                    .map(str::to_lowercase)
                    .collect()
            },
        )
    }

    /// Rate-limit window as a `Duration`
    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    /// True if at least one vendor API key is configured
    #[must_use]
    pub const fn has_any_vendor(&self) -> bool {
        self.photoroom_api_key.is_some() || self.removebg_api_key.is_some()
    }
}

/// A quality-enhancement preset selectable from the bot menu
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityPreset {
    /// Stable key used in callback data
    pub key: &'static str,
    /// Target width in pixels
    pub width: u32,
    /// Target height in pixels
    pub height: u32,
    /// Human-readable label shown on the button
    pub label: &'static str,
}

/// All selectable quality presets, in menu order
pub const QUALITY_PRESETS: &[QualityPreset] = &[
    QualityPreset {
        key: "HD",
        width: 1280,
        height: 720,
        label: "HD (720p)",
    },
    QualityPreset {
        key: "1080p",
        width: 1920,
        height: 1080,
        label: "Full HD (1080p)",
    },
    QualityPreset {
        key: "4K",
        width: 3840,
        height: 2160,
        label: "4K UHD",
    },
    QualityPreset {
        key: "8K",
        width: 7680,
        height: 4320,
        label: "8K UHD",
    },
];

/// Look up a quality preset by its callback key
#[must_use]
pub fn quality_preset(key: &str) -> Option<&'static QualityPreset> {
    QUALITY_PRESETS.iter().find(|p| p.key == key)
}

// Vendor API configuration
/// Timeout for a single vendor API round-trip
pub const VENDOR_TIMEOUT_SECS: u64 = 60;

// Telegram file API retry configuration
/// Maximum retry attempts for Telegram file operations
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;
/// Initial backoff before the first retry
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Upper bound on the retry backoff
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;

// Processed-result cache configuration
/// Time-to-live for cached processing results
pub const RESULT_CACHE_TTL_SECS: u64 = 3600;
/// Maximum number of cached processing results
pub const RESULT_CACHE_MAX_ENTRIES: u64 = 50;

// Session store configuration
/// Upper bound on concurrently tracked user sessions; the
/// least-recently-touched session is evicted beyond this.
pub const MAX_TRACKED_SESSIONS: usize = 10_000;

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    // Tests run sequentially to avoid environment variable race conditions
    #[test]
    fn test_config_env_loading() -> Result<(), Box<dyn std::error::Error>> {
        // 1. Test standard loading
        env::set_var("PHOTOROOM_API_KEY", "pr-key");
        env::set_var("TELEGRAM_TOKEN", "dummy_token");

        let settings = Settings::new()?;
        assert_eq!(settings.photoroom_api_key, Some("pr-key".to_string()));
        assert_eq!(settings.max_requests_per_window, 10);
        assert_eq!(settings.window_seconds, 3600);
        assert_eq!(settings.max_file_size_bytes, 20 * 1024 * 1024);

        env::remove_var("PHOTOROOM_API_KEY");
        env::remove_var("TELEGRAM_TOKEN");

        // 2. Test empty env var: the fallback only sets non-empty values,
        // so the key should stay unset.
        env::set_var("PHOTOROOM_API_KEY", "");
        env::set_var("TELEGRAM_TOKEN", "dummy_token");

        let settings = Settings::new()?;
        assert_eq!(settings.photoroom_api_key, None);

        env::remove_var("PHOTOROOM_API_KEY");
        env::remove_var("TELEGRAM_TOKEN");

        // 3. Test numeric overrides
        env::set_var("TELEGRAM_TOKEN", "dummy_token");
        env::set_var("MAX_REQUESTS_PER_WINDOW", "3");
        env::set_var("WINDOW_SECONDS", "60");

        let settings = Settings::new()?;
        assert_eq!(settings.max_requests_per_window, 3);
        assert_eq!(settings.window(), Duration::from_secs(60));

        env::remove_var("TELEGRAM_TOKEN");
        env::remove_var("MAX_REQUESTS_PER_WINDOW");
        env::remove_var("WINDOW_SECONDS");
        Ok(())
    }

    fn dummy_settings() -> Settings {
        Settings {
            telegram_token: "dummy".to_string(),
            photoroom_api_key: None,
            removebg_api_key: None,
            max_requests_per_window: default_max_requests(),
            window_seconds: default_window_seconds(),
            max_file_size_bytes: default_max_file_size(),
            supported_formats_str: None,
            photoroom_api_url: default_photoroom_url(),
            removebg_api_url: default_removebg_url(),
        }
    }

    #[test]
    fn test_supported_formats_default() {
        let settings = dummy_settings();
        let formats = settings.supported_formats();
        assert!(formats.contains("image/jpeg"));
        assert!(formats.contains("image/png"));
        assert!(formats.contains("image/webp"));
        assert_eq!(formats.len(), 3);
    }

    #[test]
    fn test_supported_formats_parsing() {
        let mut settings = dummy_settings();

        // Comma separated, mixed case
        settings.supported_formats_str = Some("image/jpeg,IMAGE/PNG".to_string());
        let formats = settings.supported_formats();
        assert!(formats.contains("image/jpeg"));
        assert!(formats.contains("image/png"));
        assert_eq!(formats.len(), 2);

        // Semicolon and whitespace
        settings.supported_formats_str = Some("image/png; image/webp".to_string());
        let formats = settings.supported_formats();
        assert!(formats.contains("image/png"));
        assert!(formats.contains("image/webp"));
        assert_eq!(formats.len(), 2);
    }

    #[test]
    fn test_quality_preset_lookup() {
        let preset = quality_preset("4K").expect("4K preset exists");
        assert_eq!(preset.width, 3840);
        assert_eq!(preset.height, 2160);
        assert!(quality_preset("16K").is_none());
    }

    #[test]
    fn test_has_any_vendor() {
        let mut settings = dummy_settings();
        assert!(!settings.has_any_vendor());
        settings.removebg_api_key = Some("rb-key".to_string());
        assert!(settings.has_any_vendor());
    }
}

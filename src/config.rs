//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MBOXARCHIVE_CONFIG` (environment variable)
//! 2. `~/.config/mboxarchive/config.toml` (Linux/macOS)
//!    `%APPDATA%\mboxarchive\config.toml` (Windows)
//! 3. Built-in defaults

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// MBOX scanning and MIME decoding limits.
    pub parser: ParserConfig,
    /// HTML sanitizer policy.
    pub sanitize: SanitizeConfig,
    /// Output layout.
    pub output: OutputConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

/// MBOX scanning and MIME decoding limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Read buffer size in bytes (default: 1 MB).
    pub read_buffer_size: usize,
    /// Maximum message size in bytes; larger messages are truncated (default: 256 MB).
    pub max_message_size: usize,
    /// Maximum multipart nesting depth.
    pub max_part_depth: usize,
    /// How many bytes of a `text/plain` body are scanned for HTML markers.
    pub sniff_window: usize,
}

/// HTML sanitizer policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SanitizeConfig {
    /// Inline `data:` images with a larger decoded size are replaced by a placeholder.
    pub max_inline_image_bytes: usize,
    /// Images whose declared width and height are both at most this are tracking pixels.
    pub tracking_pixel_max_dimension: u32,
    /// The one `class` value that survives attribute stripping.
    pub wrapper_class: String,
    /// Drop comments and collapse whitespace.
    pub minify: bool,
}

/// Output layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Folder (inside the output dir) holding one HTML page per message.
    pub emails_dirname: String,
    /// Folder (inside the output dir) holding per-message attachment folders.
    pub attachments_dirname: String,
    /// Length of the plain-text preview, in characters.
    pub preview_length: usize,
    /// Log progress every N messages.
    pub progress_interval: u64,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            log_level: "warn".to_string(),
        }
    }
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 1024 * 1024,       // 1 MB
            max_message_size: 256 * 1024 * 1024, // 256 MB
            max_part_depth: 100,
            sniff_window: 8 * 1024,
        }
    }
}

impl Default for SanitizeConfig {
    fn default() -> Self {
        Self {
            max_inline_image_bytes: 100 * 1024, // 100 KB
            tracking_pixel_max_dimension: 2,
            wrapper_class: "body-html".to_string(),
            minify: true,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            emails_dirname: "emails".to_string(),
            attachments_dirname: "attachments".to_string(),
            preview_length: 200,
            progress_interval: 100,
        }
    }
}

// ── Load / save ─────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    if let Some(path) = config_file_path() {
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<Config>(&contents) {
                    Ok(cfg) => {
                        tracing::info!(path = %path.display(), "Loaded config");
                        return cfg;
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to parse config, using defaults"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to read config file, using defaults"
                    );
                }
            }
        }
    }
    Config::default()
}

/// Save configuration to the standard location.
pub fn save_config(config: &Config) -> anyhow::Result<()> {
    let path = config_file_path()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config file path"))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(&path, contents)?;
    tracing::info!(path = %path.display(), "Saved config");
    Ok(())
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MBOXARCHIVE_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("mboxarchive").join("config.toml"))
}

/// Return the cache directory used for the log file.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mboxarchive")
}

/// Return the log file path.
pub fn log_file_path(config: &Config) -> PathBuf {
    cache_dir(config).join("mboxarchive.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.parser.max_part_depth, 100);
        assert_eq!(cfg.sanitize.max_inline_image_bytes, 100 * 1024);
        assert_eq!(cfg.sanitize.tracking_pixel_max_dimension, 2);
        assert_eq!(cfg.sanitize.wrapper_class, "body-html");
        assert_eq!(cfg.output.attachments_dirname, "attachments");
    }

    #[test]
    fn test_serialize_deserialize_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let parsed: Config = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.parser.sniff_window, cfg.parser.sniff_window);
        assert_eq!(parsed.sanitize.minify, cfg.sanitize.minify);
        assert_eq!(parsed.output.emails_dirname, cfg.output.emails_dirname);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial = r#"
[sanitize]
max_inline_image_bytes = 2048

[output]
preview_length = 80
"#;
        let cfg: Config = toml::from_str(partial).expect("parse partial");
        assert_eq!(cfg.sanitize.max_inline_image_bytes, 2048);
        assert_eq!(cfg.output.preview_length, 80);
        assert_eq!(cfg.sanitize.tracking_pixel_max_dimension, 2);
        assert_eq!(cfg.general.log_level, "warn");
    }

    #[test]
    fn test_log_file_under_cache_dir() {
        let mut cfg = Config::default();
        cfg.general.cache_dir = Some(PathBuf::from("/tmp/mboxarchive-test"));
        assert_eq!(
            log_file_path(&cfg),
            PathBuf::from("/tmp/mboxarchive-test/mboxarchive.log")
        );
    }
}

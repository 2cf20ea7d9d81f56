//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::session::{SessionCode, DEFAULT_CODE};

/// Top-level Scene Relay configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<StoreConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub allocator: Option<AllocatorConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub canvas: Option<CanvasConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
}

fn default_port() -> u16 {
    18790
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Record file. `~` is expanded. Default: `~/.scene_relay/codes.json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocatorConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Hours after which an untouched code may be reused.
    #[serde(default = "default_stale_after_hours")]
    pub stale_after_hours: i64,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            stale_after_hours: default_stale_after_hours(),
        }
    }
}

fn default_max_attempts() -> u32 {
    crate::pairing::DEFAULT_MAX_ATTEMPTS
}

/// Ten years.
const MAX_STALE_AFTER_HOURS: i64 = 87_600;

/// One day.
const MAX_HEARTBEAT_INTERVAL_SECS: u64 = 86_400;

fn default_stale_after_hours() -> i64 {
    24
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasConfig {
    /// Base URL the canvas page is served from, with trailing slash.
    #[serde(default = "default_hosting_base_url")]
    pub hosting_base_url: String,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Reserved local-testing code; never subscribed to or written.
    #[serde(default = "default_code")]
    pub default_code: String,

    /// Script reference embedded in published documents.
    #[serde(default = "default_polyfill_src")]
    pub polyfill_src: String,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            hosting_base_url: default_hosting_base_url(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            default_code: default_code(),
            polyfill_src: default_polyfill_src(),
        }
    }
}

fn default_hosting_base_url() -> String {
    "http://localhost:18790/".into()
}

fn default_heartbeat_interval_secs() -> u64 {
    60
}

fn default_code() -> String {
    DEFAULT_CODE.into()
}

fn default_polyfill_src() -> String {
    "/js/canvasPolyfill.js".into()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "scene_relay_canvas=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    static RE: std::sync::LazyLock<regex::Regex> = std::sync::LazyLock::new(|| {
        regex::Regex::new(r"\$\{([^}]+)\}").expect("static env var pattern")
    });
    RE.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::SceneRelayError::Io)?;

        // Substitute ${ENV_VAR} references before parsing
        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::SceneRelayError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Resolve the default config file path.
    pub fn config_dir() -> PathBuf {
        data_dir().join("config.json")
    }

    /// Gateway port.
    pub fn gateway_port(&self) -> u16 {
        self.gateway
            .as_ref()
            .map(|g| g.port)
            .unwrap_or_else(default_port)
    }

    /// Gateway bind address.
    pub fn gateway_bind(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    /// Resolve the session record file.
    pub fn store_path(&self) -> PathBuf {
        self.store
            .as_ref()
            .and_then(|s| s.path.as_ref())
            .map(|p| {
                let expanded = shellexpand::tilde(p);
                PathBuf::from(expanded.as_ref())
            })
            .unwrap_or_else(crate::session_store::JsonSessionStore::default_path)
    }

    pub fn allocator(&self) -> AllocatorConfig {
        self.allocator.clone().unwrap_or_default()
    }

    pub fn canvas(&self) -> CanvasConfig {
        self.canvas.clone().unwrap_or_default()
    }

    /// Get a config value by dotted path (e.g. "gateway.port", "canvas.default_code").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if let Some(gw) = &self.gateway {
            if gw.port == 0 {
                errors.push("Gateway port cannot be 0".to_string());
            }
        }

        if let Some(alloc) = &self.allocator {
            if alloc.max_attempts == 0 {
                errors.push("allocator.max_attempts must be at least 1".to_string());
            }
            if alloc.stale_after_hours <= 0 {
                errors.push("allocator.stale_after_hours must be positive".to_string());
            } else if alloc.stale_after_hours > MAX_STALE_AFTER_HOURS {
                errors.push(format!(
                    "allocator.stale_after_hours cannot exceed {MAX_STALE_AFTER_HOURS}"
                ));
            }
        }

        if let Some(canvas) = &self.canvas {
            if SessionCode::parse(&canvas.default_code).is_err() {
                errors.push(format!(
                    "canvas.default_code '{}' is not a 4-digit code",
                    canvas.default_code
                ));
            }
            if !canvas.hosting_base_url.ends_with('/') {
                warnings.push(format!(
                    "canvas.hosting_base_url '{}' has no trailing slash",
                    canvas.hosting_base_url
                ));
            }
            if canvas.heartbeat_interval_secs == 0 {
                errors.push("canvas.heartbeat_interval_secs cannot be 0".to_string());
            } else if canvas.heartbeat_interval_secs > MAX_HEARTBEAT_INTERVAL_SECS {
                errors.push(format!(
                    "canvas.heartbeat_interval_secs cannot exceed {MAX_HEARTBEAT_INTERVAL_SECS}"
                ));
            }
        }

        (warnings, errors)
    }
}

/// Base directory for Scene Relay data: `~/.scene_relay/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".scene_relay")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        // SAFETY: test-only, single-threaded test runner
        unsafe { std::env::set_var("TEST_SR_URL", "https://relay.example/") };
        let input = r#"{"url": "${TEST_SR_URL}", "other": "plain"}"#;
        let result = substitute_env_vars(input);
        assert!(result.contains("https://relay.example/"));
        assert!(result.contains("plain"));
        unsafe { std::env::remove_var("TEST_SR_URL") };
    }

    #[test]
    fn test_env_var_missing() {
        let input = r#"{"key": "${NONEXISTENT_VAR_SR_TEST}"}"#;
        let result = substitute_env_vars(input);
        assert!(result.contains(r#""""#)); // empty string
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.gateway_port(), 18790);
        assert_eq!(config.allocator().max_attempts, 1000);
        assert_eq!(config.allocator().stale_after_hours, 24);
        assert_eq!(config.canvas().heartbeat_interval_secs, 60);
        assert_eq!(config.canvas().default_code, "1111");
        assert!(config.store_path().ends_with("codes.json"));
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("nope.json")).unwrap();
        assert!(config.gateway.is_none());
    }

    #[test]
    fn test_load_json5() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                // comments are fine
                gateway: { port: 9000 },
                store: { path: "/tmp/relay/codes.json" },
                canvas: { hosting_base_url: "https://relay.example/" },
            }"#,
        )
        .unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.gateway_port(), 9000);
        assert_eq!(config.store_path(), PathBuf::from("/tmp/relay/codes.json"));
        assert_eq!(config.canvas().hosting_base_url, "https://relay.example/");
        // Unset fields fall back to serde defaults.
        assert_eq!(config.canvas().heartbeat_interval_secs, 60);
    }

    #[test]
    fn test_get_path() {
        let config: Config = json5::from_str(r#"{ gateway: { port: 1234 } }"#).unwrap();
        assert_eq!(config.get_path("gateway.port"), Some(serde_json::json!(1234)));
        assert_eq!(config.get_path("gateway.nope"), None);
    }

    #[test]
    fn test_logging_config_defaults() {
        let json_str = r#"{ "logging": {} }"#;
        let config: Config = json5::from_str(json_str).unwrap();
        let logging = config.logging.expect("logging should be present");
        assert_eq!(logging.format, "plain");
        assert!(logging.level.is_none());
        assert_eq!(logging.output, "stderr");
        assert!(logging.filters.is_empty());
    }

    #[test]
    fn test_validate_bad_values() {
        let config = Config {
            allocator: Some(AllocatorConfig {
                max_attempts: 0,
                stale_after_hours: 24,
            }),
            canvas: Some(CanvasConfig {
                default_code: "abc".into(),
                hosting_base_url: "https://relay.example".into(),
                ..CanvasConfig::default()
            }),
            ..Config::default()
        };
        let (warnings, errors) = config.validate();
        assert!(errors.iter().any(|e| e.contains("max_attempts")));
        assert!(errors.iter().any(|e| e.contains("default_code")));
        assert!(warnings.iter().any(|w| w.contains("trailing slash")));
    }

    #[test]
    fn test_validate_rejects_huge_durations() {
        let config = Config {
            allocator: Some(AllocatorConfig {
                stale_after_hours: i64::MAX,
                ..AllocatorConfig::default()
            }),
            canvas: Some(CanvasConfig {
                heartbeat_interval_secs: u64::MAX,
                ..CanvasConfig::default()
            }),
            ..Config::default()
        };
        let (_, errors) = config.validate();
        assert!(errors.iter().any(|e| e.contains("stale_after_hours")));
        assert!(errors.iter().any(|e| e.contains("heartbeat_interval_secs")));
    }
}

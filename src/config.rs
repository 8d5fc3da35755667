//! # Configuration Management
//!
//! This module handles loading and managing relay configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Serialization/deserialization library for converting between Rust structs and data formats
//! - **derive macros**: Automatically generate code for common traits (Debug, Clone, Serialize, Deserialize)
//! - **Option<T>**: Values that may legitimately be absent (the upstream API key)
//! - **Result<T, E>**: Error handling that forces you to handle potential failures
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Platform variables (HOST, PORT, OPENAI_API_KEY)
//! 2. Environment variables (APP_SERVER__HOST, APP_RELAY__COMMIT_INTERVAL_MS, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::Result;              // Better error handling with context
use serde::{Deserialize, Serialize};  // For converting to/from TOML, JSON, etc.
use std::env;                    // For reading environment variables
use std::time::Duration;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// The downstream listener, the upstream peer, the relay timing and the
/// capacity limits change for different reasons, so each gets its own group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub relay: RelayConfig,
    pub performance: PerformanceConfig,
}

/// Downstream listener settings.
///
/// ## Common values:
/// - `host = "0.0.0.0"`: Accept audio clients from any interface (default)
/// - `host = "127.0.0.1"`: Only accept local clients
/// - `port = 3000`: The port audio clients are built against
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,  // u16 = unsigned 16-bit integer (0-65535), perfect for port numbers
}

/// Upstream conversational API settings.
///
/// ## Fields:
/// - `url`: WebSocket endpoint of the realtime API (must be ws:// or wss://)
/// - `model`: Sent as the `model` query parameter; empty means "let the peer decide"
/// - `api_key`: Bearer credential, normally supplied through `OPENAI_API_KEY`
/// - `beta_header`: Value of the protocol-version header (`OpenAI-Beta`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub beta_header: String,
}

/// Timing and bounds for each relay session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// How often pending audio is committed upstream (milliseconds)
    pub commit_interval_ms: u64,

    /// Upper bound on audio held while the upstream connection is not ready,
    /// and on audio queued for a slow upstream connection
    pub max_buffered_bytes: usize,

    /// Largest single WebSocket frame accepted from the client
    pub max_frame_bytes: usize,

    /// How often the downstream client is pinged (seconds)
    pub heartbeat_interval_secs: u64,

    /// Silence after which the downstream client is considered gone (seconds)
    pub client_timeout_secs: u64,
}

/// Capacity limits.
///
/// ## Tuning guidelines:
/// Every downstream client costs one upstream connection, so this limit is
/// also the number of concurrent upstream sessions the API key must support.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            upstream: UpstreamConfig {
                url: "wss://api.openai.com/v1/realtime".to_string(),
                model: "gpt-4o-realtime-preview-2024-10-01".to_string(),
                api_key: None,
                beta_header: "realtime=v1".to_string(),
            },
            relay: RelayConfig {
                commit_interval_ms: 500,
                max_buffered_bytes: 8 * 1024 * 1024,  // ~170s of 24kHz 16-bit mono
                max_frame_bytes: 100 * 1024 * 1024,
                heartbeat_interval_secs: 30,
                client_timeout_secs: 60,
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 10,
            },
        }
    }
}

impl RelayConfig {
    pub fn commit_interval(&self) -> Duration {
        Duration::from_millis(self.commit_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }
}

impl UpstreamConfig {
    /// Whether a bearer credential is available for the upstream handshake.
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().map_or(false, |key| !key.trim().is_empty())
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST, PORT and OPENAI_API_KEY
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=4000`: Override server port
    /// - `APP_RELAY__MAX_BUFFERED_BYTES=1048576`: Tighten the buffering bound
    /// - `APP_UPSTREAM__MODEL=gpt-4o-realtime-preview`: Pick another model
    /// - `OPENAI_API_KEY=sk-...`: The upstream credential
    ///
    /// Sections and keys are separated by a double underscore because the keys
    /// themselves contain single underscores.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        // Deployment platforms set these without the APP_ prefix
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(api_key) = env::var("OPENAI_API_KEY") {
            settings = settings.set_override("upstream.api_key", api_key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - Upstream URL uses a WebSocket scheme
    /// - Commit interval and buffering bound are positive
    /// - The heartbeat fires more often than the client timeout
    /// - At least one session is allowed
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if !(self.upstream.url.starts_with("ws://") || self.upstream.url.starts_with("wss://")) {
            return Err(anyhow::anyhow!(
                "Upstream URL must start with ws:// or wss:// (got '{}')",
                self.upstream.url
            ));
        }

        if self.relay.commit_interval_ms == 0 {
            return Err(anyhow::anyhow!("Commit interval must be greater than 0"));
        }

        if self.relay.max_buffered_bytes == 0 {
            return Err(anyhow::anyhow!("Max buffered bytes must be greater than 0"));
        }

        if self.relay.max_frame_bytes == 0 {
            return Err(anyhow::anyhow!("Max frame bytes must be greater than 0"));
        }

        if self.relay.heartbeat_interval_secs == 0
            || self.relay.heartbeat_interval_secs >= self.relay.client_timeout_secs
        {
            return Err(anyhow::anyhow!(
                "Heartbeat interval must be positive and shorter than the client timeout"
            ));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// ## Partial updates:
    /// Only the fields present in the JSON are changed, e.g.
    /// `{"relay": {"commit_interval_ms": 250}}`. Running sessions keep the
    /// settings they were created with; new sessions pick up the change.
    /// The API key is deliberately not updatable over HTTP.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        let mut updated = self.clone();

        if let Some(upstream) = partial_config.get("upstream") {
            if let Some(url) = upstream.get("url").and_then(|v| v.as_str()) {
                updated.upstream.url = url.to_string();
            }
            if let Some(model) = upstream.get("model").and_then(|v| v.as_str()) {
                updated.upstream.model = model.to_string();
            }
            if let Some(beta) = upstream.get("beta_header").and_then(|v| v.as_str()) {
                updated.upstream.beta_header = beta.to_string();
            }
        }

        if let Some(relay) = partial_config.get("relay") {
            if let Some(interval) = relay.get("commit_interval_ms").and_then(|v| v.as_u64()) {
                updated.relay.commit_interval_ms = interval;
            }
            if let Some(bound) = relay.get("max_buffered_bytes").and_then(|v| v.as_u64()) {
                updated.relay.max_buffered_bytes = bound as usize;
            }
            if let Some(frame) = relay.get("max_frame_bytes").and_then(|v| v.as_u64()) {
                updated.relay.max_frame_bytes = frame as usize;
            }
            if let Some(heartbeat) = relay.get("heartbeat_interval_secs").and_then(|v| v.as_u64()) {
                updated.relay.heartbeat_interval_secs = heartbeat;
            }
            if let Some(timeout) = relay.get("client_timeout_secs").and_then(|v| v.as_u64()) {
                updated.relay.client_timeout_secs = timeout;
            }
        }

        if let Some(performance) = partial_config.get("performance") {
            if let Some(sessions) = performance.get("max_concurrent_sessions").and_then(|v| v.as_u64()) {
                updated.performance.max_concurrent_sessions = sessions as usize;
            }
        }

        // Nothing is applied unless the whole update is valid
        updated.validate()?;
        *self = updated;
        Ok(())
    }
}

//! # Application State Management
//!
//! This module manages state shared by every HTTP handler and every relay
//! connection: the live configuration, request and relay metrics, and the
//! registry of active sessions.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - **Purpose**: Allows multiple parts of the program to safely share ownership of data
//! - **Why needed**: actix runs one App per worker thread, and all of them see the same state
//!
//! ### RwLock (Reader-Writer Lock)
//! - **Purpose**: Allows multiple readers OR one writer at a time (but not both)
//! - **Poisoning**: a panic while holding the lock "poisons" it; we keep using the
//!   data anyway (`PoisonError::into_inner`) because counters stay meaningful
//!
//! ## What is NOT here:
//! Per-connection relay state (audio buffer, commit flag, response tracker).
//! Each connection owns that itself so clients can never see each other's audio.

use crate::audio::session::SessionManager;
use crate::config::AppConfig;
use crate::realtime::protocol::UpstreamRequest;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

/// The main application state shared across handlers and relay connections.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// HTTP and relay metrics
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Live relay sessions
    pub sessions: Arc<SessionManager>,

    /// When the server started
    pub start_time: Instant,
}

/// Metrics collected across all HTTP requests and relay sessions.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of HTTP errors since server start
    pub error_count: u64,

    /// Current number of relay sessions
    pub active_sessions: u32,

    /// Relay traffic counters
    pub relay: RelayMetrics,

    /// Per-endpoint statistics, keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Counters for relay traffic, summed over all sessions.
#[derive(Debug, Default, Clone)]
pub struct RelayMetrics {
    pub sessions_opened: u64,
    pub sessions_rejected: u64,
    pub audio_bytes_forwarded: u64,
    pub append_messages: u64,
    pub commits_sent: u64,
    pub responses_requested: u64,
    pub transcripts_relayed: u64,
    pub upstream_errors: u64,
    pub frames_rejected: u64,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let sessions = Arc::new(SessionManager::new(config.performance.max_concurrent_sessions));
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            sessions,
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// ## Why clone:
    /// Cloning releases the lock immediately, so other threads aren't blocked.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replace the configuration after validating it.
    ///
    /// The session limit takes effect for the next connection; running
    /// sessions keep the relay settings they started with.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                self.sessions.set_max_sessions(new_config.performance.max_concurrent_sessions);
                *self.config.write().unwrap_or_else(PoisonError::into_inner) = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    fn with_metrics<F: FnOnce(&mut AppMetrics)>(&self, update: F) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        update(&mut metrics);
    }

    pub fn increment_request_count(&self) {
        self.with_metrics(|m| m.request_count += 1);
    }

    pub fn increment_error_count(&self) {
        self.with_metrics(|m| m.error_count += 1);
    }

    /// Record detailed metrics for a specific endpoint.
    ///
    /// The first time we see an endpoint, we create a new EndpointMetric with
    /// default values; later requests update it.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        self.with_metrics(|m| {
            let endpoint_metric = m.endpoint_metrics.entry(endpoint.to_string()).or_default();
            endpoint_metric.request_count += 1;
            endpoint_metric.total_duration_ms += duration_ms;
            if is_error {
                endpoint_metric.error_count += 1;
            }
        });
    }

    /// A relay session started.
    pub fn increment_active_sessions(&self) {
        self.with_metrics(|m| {
            m.active_sessions += 1;
            m.relay.sessions_opened += 1;
        });
    }

    /// A relay session ended. Guarded against underflow.
    pub fn decrement_active_sessions(&self) {
        self.with_metrics(|m| {
            if m.active_sessions > 0 {
                m.active_sessions -= 1;
            }
        });
    }

    /// A connection was refused because the relay is full.
    pub fn record_session_rejected(&self) {
        self.with_metrics(|m| m.relay.sessions_rejected += 1);
    }

    /// Count one message sent upstream.
    pub fn record_upstream_request(&self, request: &UpstreamRequest) {
        self.with_metrics(|m| match request {
            UpstreamRequest::AudioAppend { .. } => {
                m.relay.append_messages += 1;
                m.relay.audio_bytes_forwarded += request.audio_bytes() as u64;
            }
            UpstreamRequest::AudioCommit => m.relay.commits_sent += 1,
            UpstreamRequest::ResponseCreate { .. } => m.relay.responses_requested += 1,
        });
    }

    pub fn record_transcript_relayed(&self) {
        self.with_metrics(|m| m.relay.transcripts_relayed += 1);
    }

    pub fn record_upstream_error(&self) {
        self.with_metrics(|m| m.relay.upstream_errors += 1);
    }

    pub fn record_frame_rejected(&self) {
        self.with_metrics(|m| m.relay.frames_rejected += 1);
    }

    /// Get a snapshot of current metrics (cloned so no lock is held while serializing).
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average = Total Duration ÷ Number of Requests
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error Rate = Number of Errors ÷ Total Requests (0.0 to 1.0)
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_counters() {
        let state = AppState::new(AppConfig::default());
        state.increment_active_sessions();
        state.increment_active_sessions();
        state.decrement_active_sessions();
        state.decrement_active_sessions();
        state.decrement_active_sessions();

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.active_sessions, 0);
        assert_eq!(metrics.relay.sessions_opened, 2);
    }

    #[test]
    fn test_upstream_request_counters() {
        let state = AppState::new(AppConfig::default());
        state.record_upstream_request(&UpstreamRequest::append(&[0u8; 35]));
        state.record_upstream_request(&UpstreamRequest::AudioCommit);
        state.record_upstream_request(&UpstreamRequest::create_text_response());
        state.record_transcript_relayed();

        let relay = state.get_metrics_snapshot().relay;
        assert_eq!(relay.append_messages, 1);
        assert_eq!(relay.audio_bytes_forwarded, 35);
        assert_eq!(relay.commits_sent, 1);
        assert_eq!(relay.responses_requested, 1);
        assert_eq!(relay.transcripts_relayed, 1);
    }

    #[test]
    fn test_update_config_adjusts_session_limit() {
        let state = AppState::new(AppConfig::default());
        let mut config = state.get_config();
        config.performance.max_concurrent_sessions = 3;
        state.update_config(config).unwrap();
        assert_eq!(state.sessions.max_sessions(), 3);

        let mut invalid = state.get_config();
        invalid.server.port = 0;
        assert!(state.update_config(invalid).is_err());
        assert_eq!(state.get_config().server.port, 3000);
    }

    #[test]
    fn test_endpoint_metric_math() {
        let state = AppState::new(AppConfig::default());
        state.record_endpoint_request("GET /health", 10, false);
        state.record_endpoint_request("GET /health", 30, true);

        let metrics = state.get_metrics_snapshot();
        let metric = &metrics.endpoint_metrics["GET /health"];
        assert_eq!(metric.average_duration_ms(), 20.0);
        assert_eq!(metric.error_rate(), 0.5);
    }
}

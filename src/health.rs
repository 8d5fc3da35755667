use crate::config::AppConfig;
use crate::state::{AppMetrics, AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let active_sessions = state.sessions.active_session_count();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "upstream": {
            "url": config.upstream.url,
            "model": config.upstream.model,
            "api_key_configured": config.upstream.has_api_key()
        },
        "sessions": {
            "active": active_sessions,
            "max": state.sessions.max_sessions()
        },
        "memory": get_memory_info(),
        "system": get_system_status(&config, &metrics, active_sessions)
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats = Vec::new();
    for (endpoint, metric) in metrics.endpoint_metrics.iter() {
        endpoint_stats.push(json!({
            "endpoint": endpoint,
            "request_count": metric.request_count,
            "error_count": metric.error_count,
            "error_rate": metric.error_rate(),
            "average_duration_ms": metric.average_duration_ms(),
            "total_duration_ms": metric.total_duration_ms
        }));
    }

    let relay = &metrics.relay;

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "http": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "endpoints": endpoint_stats
        },
        "relay": {
            "active_sessions": metrics.active_sessions,
            "sessions_opened": relay.sessions_opened,
            "sessions_rejected": relay.sessions_rejected,
            "audio_bytes_forwarded": relay.audio_bytes_forwarded,
            "append_messages": relay.append_messages,
            "commits_sent": relay.commits_sent,
            "responses_requested": relay.responses_requested,
            "transcripts_relayed": relay.transcripts_relayed,
            "upstream_errors": relay.upstream_errors,
            "frames_rejected": relay.frames_rejected
        },
        "memory": get_memory_info()
    }))
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let read_kb = |key: &str| -> u64 {
                status
                    .lines()
                    .find(|line| line.starts_with(key))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .unwrap_or(0)
                    * 1024
            };

            return json!({
                "resident_memory_bytes": read_kb("VmRSS:"),
                "virtual_memory_bytes": read_kb("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": "Memory info not available on this platform"
    })
}

fn get_system_status(config: &AppConfig, metrics: &AppMetrics, active_sessions: usize) -> serde_json::Value {
    let max_sessions = config.performance.max_concurrent_sessions;
    let session_usage = if max_sessions > 0 {
        active_sessions as f64 / max_sessions as f64
    } else {
        0.0
    };

    let status = if session_usage >= 1.0 {
        "full"
    } else if session_usage > 0.7 {
        "high_load"
    } else {
        "normal"
    };

    let mut warnings = Vec::new();
    if !config.upstream.has_api_key() {
        warnings.push("No upstream API key configured - upstream will reject connections");
    }
    if metrics.relay.frames_rejected > 0 {
        warnings.push("Audio frames have been dropped while upstream was unavailable");
    }

    json!({
        "status": status,
        "session_usage_percent": (session_usage * 100.0).round(),
        "warnings": warnings
    })
}

//! # Relay Session Management
//!
//! A [`RelaySession`] is everything one downstream connection owns: its frame
//! buffer, the upstream readiness and pending-commit flags, and the response
//! tracker. It performs no I/O itself; every operation returns the message
//! the connection should send, which keeps the relay rules testable without
//! sockets.
//!
//! ## Session Lifecycle:
//! 1. **Created**: downstream connected, upstream handshake in progress (audio is buffered)
//! 2. **Open**: upstream handshake done, audio flows through on arrival
//! 3. **Closed**: either side went away; every operation becomes a no-op
//!
//! The [`SessionManager`] is the process-wide registry of live sessions used
//! for capacity limits and the sessions endpoint. It holds no relay state.

use crate::audio::buffer::FrameBuffer;
use crate::audio::tracker::{ResponseState, ResponseTracker};
use crate::error::RelayError;
use crate::realtime::protocol::{DownstreamMessage, UpstreamEvent, UpstreamRequest};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What the connection should send after an upstream event.
#[derive(Debug, Default, PartialEq)]
pub struct EventOutcome {
    pub upstream: Option<UpstreamRequest>,
    pub downstream: Option<DownstreamMessage>,
}

/// Per-session traffic counters, logged when the session closes.
#[derive(Debug, Default, Clone, Serialize)]
pub struct SessionStats {
    pub frames_received: u64,
    pub bytes_received: u64,
    pub frames_rejected: u64,
    pub bytes_forwarded: u64,
    pub appends_sent: u64,
    pub commits_sent: u64,
    pub responses_requested: u64,
    pub transcripts_relayed: u64,
    pub upstream_errors: u64,
}

/// Relay state for one downstream connection.
pub struct RelaySession {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    buffer: FrameBuffer,
    tracker: ResponseTracker,
    upstream_open: bool,
    pending_commit: bool,
    overflow_notified: bool,
    backlog_notified: bool,
    closed: bool,
    stats: SessionStats,
}

impl RelaySession {
    pub fn new(session_id: String, max_buffered_bytes: usize) -> Self {
        Self {
            session_id,
            created_at: Utc::now(),
            buffer: FrameBuffer::new(max_buffered_bytes),
            tracker: ResponseTracker::new(),
            upstream_open: false,
            pending_commit: false,
            overflow_notified: false,
            backlog_notified: false,
            closed: false,
            stats: SessionStats::default(),
        }
    }

    /// The upstream handshake completed.
    ///
    /// Audio that arrived during the handshake goes out immediately as a
    /// single append.
    pub fn upstream_opened(&mut self) -> Option<UpstreamRequest> {
        if self.closed {
            return None;
        }
        self.upstream_open = true;
        info!(session_id = %self.session_id, "Upstream connection ready");
        self.flush()
    }

    pub fn upstream_closed(&mut self) {
        self.upstream_open = false;
    }

    /// Accept one binary frame from the downstream client.
    ///
    /// ## Returns:
    /// - **Ok(Some(append))**: upstream is open; send this append now
    /// - **Ok(None)**: buffered (upstream not ready yet) or nothing to send
    /// - **Err(BufferOverflow)**: the frame was rejected; see [`Self::overflow_notice`]
    pub fn push_audio(&mut self, frame: Vec<u8>) -> Result<Option<UpstreamRequest>, RelayError> {
        if self.closed {
            return Ok(None);
        }

        let frame_len = frame.len();
        self.stats.frames_received += 1;
        self.stats.bytes_received += frame_len as u64;

        if let Err(err) = self.buffer.append(frame) {
            self.stats.frames_rejected += 1;
            return Err(err);
        }

        if !self.upstream_open {
            debug!(
                session_id = %self.session_id,
                buffered_bytes = self.buffer.buffered_bytes(),
                "Waiting for upstream to be ready"
            );
            return Ok(None);
        }

        Ok(self.flush())
    }

    /// A client message too large to ever fit the buffer was dropped before
    /// reaching it. Counted like any other rejected frame.
    pub fn frame_rejected(&mut self, bytes: usize) -> Option<DownstreamMessage> {
        if self.closed {
            return None;
        }
        self.stats.frames_received += 1;
        self.stats.bytes_received += bytes as u64;
        self.stats.frames_rejected += 1;
        self.overflow_notice()
    }

    /// A downstream notice for the current overflow episode.
    ///
    /// Only the first rejected frame of an episode produces a notice; the
    /// next successful flush starts a new episode.
    pub fn overflow_notice(&mut self) -> Option<DownstreamMessage> {
        if self.closed || self.overflow_notified {
            return None;
        }
        self.overflow_notified = true;
        Some(DownstreamMessage::Error {
            code: "buffer_overflow".to_string(),
            message: format!(
                "Upstream not ready and {} bytes already buffered; audio is being dropped",
                self.buffer.buffered_bytes()
            ),
        })
    }

    /// The upstream writer refused `request` because its queue is full.
    ///
    /// ## Recovery per request kind:
    /// - **append**: the audio is gone and counted as rejected. The client hears
    ///   about it once per backlog episode, which ends at the next append the
    ///   writer accepts (see [`Self::append_delivered`])
    /// - **commit**: re-armed so the next tick tries again
    /// - **response.create**: the tracker returns to Idle so the next commit
    ///   acknowledgment asks again
    pub fn request_dropped(&mut self, request: &UpstreamRequest) -> Option<DownstreamMessage> {
        if self.closed {
            return None;
        }

        match request {
            UpstreamRequest::AudioCommit => {
                self.stats.commits_sent = self.stats.commits_sent.saturating_sub(1);
                self.pending_commit = true;
                return None;
            }
            UpstreamRequest::ResponseCreate { .. } => {
                self.stats.responses_requested = self.stats.responses_requested.saturating_sub(1);
                self.tracker.on_error();
                return None;
            }
            UpstreamRequest::AudioAppend { .. } => {}
        }

        let bytes = request.audio_bytes();
        self.stats.bytes_forwarded = self.stats.bytes_forwarded.saturating_sub(bytes as u64);
        self.stats.appends_sent = self.stats.appends_sent.saturating_sub(1);
        self.stats.frames_rejected += 1;

        if self.backlog_notified {
            return None;
        }
        self.backlog_notified = true;
        Some(DownstreamMessage::Error {
            code: "buffer_overflow".to_string(),
            message: format!("Upstream is not keeping up; {} bytes of audio were dropped", bytes),
        })
    }

    /// The upstream writer accepted an append.
    pub fn append_delivered(&mut self) {
        self.backlog_notified = false;
    }

    fn flush(&mut self) -> Option<UpstreamRequest> {
        let payload = self.buffer.flush_if_ready(self.upstream_open)?;

        debug!(session_id = %self.session_id, bytes = payload.len(), "Flushing audio upstream");
        self.pending_commit = true;
        self.overflow_notified = false;
        self.stats.bytes_forwarded += payload.len() as u64;
        self.stats.appends_sent += 1;
        Some(UpstreamRequest::append(&payload))
    }

    /// One tick of the commit timer.
    ///
    /// A commit is produced only if audio was appended since the last one.
    pub fn commit_tick(&mut self) -> Option<UpstreamRequest> {
        if self.closed {
            return None;
        }

        if !self.upstream_open {
            debug!(session_id = %self.session_id, "Upstream not open; cannot commit");
            return None;
        }

        if !self.pending_commit {
            return None;
        }

        self.pending_commit = false;
        self.stats.commits_sent += 1;
        Some(UpstreamRequest::AudioCommit)
    }

    /// Apply one upstream event to the response lifecycle.
    pub fn handle_upstream_event(&mut self, event: UpstreamEvent) -> EventOutcome {
        let mut outcome = EventOutcome::default();
        if self.closed {
            return outcome;
        }

        match event {
            UpstreamEvent::BufferCommitted => {
                debug!(session_id = %self.session_id, "Audio buffer committed");
                if self.tracker.on_buffer_committed() {
                    self.stats.responses_requested += 1;
                    outcome.upstream = Some(UpstreamRequest::create_text_response());
                } else {
                    debug!(session_id = %self.session_id, "Response already active; not requesting another");
                }
            }
            UpstreamEvent::ResponseCreated => {
                debug!(session_id = %self.session_id, "Response creation acknowledged");
            }
            UpstreamEvent::TranscriptDone { transcript } => {
                info!(session_id = %self.session_id, transcript = %transcript, "Received transcript");
                self.stats.transcripts_relayed += 1;
                outcome.downstream = Some(DownstreamMessage::Transcript { text: transcript });
            }
            UpstreamEvent::ResponseDone => {
                debug!(session_id = %self.session_id, "Response processing done");
                self.tracker.on_response_done();
            }
            UpstreamEvent::Error { message } => {
                warn!(session_id = %self.session_id, error = %message, "Upstream reported an error");
                self.stats.upstream_errors += 1;
                self.tracker.on_error();
            }
            UpstreamEvent::Unrecognized { event_type } => {
                warn!(session_id = %self.session_id, event_type = %event_type, "Unhandled upstream event type");
            }
        }

        outcome
    }

    /// Mark the session terminated and drop pending audio.
    ///
    /// Returns `true` only for the call that actually closed it, so teardown
    /// can be triggered from either side without running twice.
    pub fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        self.upstream_open = false;
        self.pending_commit = false;
        self.buffer.clear();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    #[cfg(test)]
    pub fn has_pending_commit(&self) -> bool {
        self.pending_commit
    }

    #[cfg(test)]
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.buffered_bytes()
    }

    pub fn response_state(&self) -> ResponseState {
        self.tracker.state()
    }

    /// Seconds since the downstream client connected.
    pub fn age_seconds(&self) -> i64 {
        Utc::now().signed_duration_since(self.created_at).num_seconds()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }
}

/// Registry entry for a live session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub peer_addr: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Tracks which relay sessions are alive and enforces the concurrency limit.
///
/// ## Thread Safety:
/// HTTP workers run on several threads, so the map sits behind a RwLock.
/// Relay state itself never lives here; each connection owns its own.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, SessionInfo>>,
    max_concurrent_sessions: RwLock<usize>,
}

impl SessionManager {
    pub fn new(max_concurrent_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_concurrent_sessions: RwLock::new(max_concurrent_sessions),
        }
    }

    /// Reserve a slot for a new downstream connection.
    ///
    /// ## Returns:
    /// - **Ok(session_id)**: a fresh UUID for the session
    /// - **Err(SessionLimit)**: the relay is full
    pub fn register(&self, peer_addr: Option<String>) -> Result<String, RelayError> {
        let max = self.max_sessions();
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);

        if sessions.len() >= max {
            return Err(RelayError::SessionLimit(max));
        }

        let session_id = Uuid::new_v4().to_string();
        sessions.insert(
            session_id.clone(),
            SessionInfo {
                session_id: session_id.clone(),
                peer_addr,
                created_at: Utc::now(),
            },
        );
        Ok(session_id)
    }

    pub fn remove(&self, session_id: &str) -> bool {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id)
            .is_some()
    }

    pub fn get(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Live sessions, oldest first.
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        sessions.sort_by_key(|info| info.created_at);
        sessions
    }

    pub fn max_sessions(&self) -> usize {
        *self.max_concurrent_sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Change the limit for future registrations; live sessions are kept.
    pub fn set_max_sessions(&self, max: usize) {
        *self.max_concurrent_sessions.write().unwrap_or_else(PoisonError::into_inner) = max;
    }
}

//! # Response Lifecycle Tracker
//!
//! The upstream API generates one response at a time per connection, so the
//! relay must never have two `response.create` requests outstanding.
//!
//! ## States:
//! - **Idle** → **Active**: a buffer commit is acknowledged; request a response
//! - **Active** → **Idle**: `response.done` or `error`
//! - Commit acknowledgments while **Active** are ignored

/// Whether a response request is currently outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseState {
    #[default]
    Idle,
    Active,
}

impl ResponseState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseState::Idle => "idle",
            ResponseState::Active => "active",
        }
    }
}

#[derive(Debug, Default)]
pub struct ResponseTracker {
    state: ResponseState,
}

impl ResponseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle `input_audio_buffer.committed`.
    ///
    /// Returns `true` when the caller must send `response.create`.
    pub fn on_buffer_committed(&mut self) -> bool {
        match self.state {
            ResponseState::Idle => {
                self.state = ResponseState::Active;
                true
            }
            ResponseState::Active => false,
        }
    }

    /// Handle `response.done`.
    pub fn on_response_done(&mut self) {
        self.state = ResponseState::Idle;
    }

    /// Handle an upstream `error`. The failed response is not retried; the
    /// next commit acknowledgment starts a fresh one.
    pub fn on_error(&mut self) {
        self.state = ResponseState::Idle;
    }

    pub fn state(&self) -> ResponseState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_commit_starts_response() {
        let mut tracker = ResponseTracker::new();
        assert_eq!(tracker.state(), ResponseState::Idle);
        assert!(tracker.on_buffer_committed());
        assert_eq!(tracker.state(), ResponseState::Active);
    }

    #[test]
    fn test_commit_while_active_is_ignored() {
        let mut tracker = ResponseTracker::new();
        assert!(tracker.on_buffer_committed());
        assert!(!tracker.on_buffer_committed());
        assert!(!tracker.on_buffer_committed());
        assert_eq!(tracker.state(), ResponseState::Active);
    }

    #[test]
    fn test_done_and_error_always_return_to_idle() {
        let mut tracker = ResponseTracker::new();

        // From idle
        tracker.on_response_done();
        assert_eq!(tracker.state(), ResponseState::Idle);
        tracker.on_error();
        assert_eq!(tracker.state(), ResponseState::Idle);

        // From active
        tracker.on_buffer_committed();
        tracker.on_response_done();
        assert_eq!(tracker.state(), ResponseState::Idle);

        tracker.on_buffer_committed();
        tracker.on_error();
        assert_eq!(tracker.state(), ResponseState::Idle);

        // Exactly one new request per commit after each reset
        assert!(tracker.on_buffer_committed());
        assert!(!tracker.on_buffer_committed());
        assert_eq!(tracker.state().as_str(), "active");
    }

    #[test]
    fn test_never_two_outstanding_for_any_interleaving() {
        // 0 = committed, 1 = done, 2 = error; walk every sequence of length 6
        for mut seed in 0..3u32.pow(6) {
            let mut tracker = ResponseTracker::new();
            let mut outstanding = 0;
            for _ in 0..6 {
                match seed % 3 {
                    0 => {
                        if tracker.on_buffer_committed() {
                            outstanding += 1;
                        }
                    }
                    1 => {
                        tracker.on_response_done();
                        outstanding = 0;
                    }
                    _ => {
                        tracker.on_error();
                        outstanding = 0;
                    }
                }
                assert!(outstanding <= 1);
                seed /= 3;
            }
        }
    }
}

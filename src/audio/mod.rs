//! # Audio Relay Module
//!
//! Per-connection relay state between a downstream audio client and the
//! upstream realtime API.
//!
//! ## Key Components:
//! - **Message Assembler**: joins fragmented client messages into whole frames
//! - **Frame Buffer**: holds opaque audio frames until upstream can take them
//! - **Response Tracker**: at most one `response.create` outstanding at a time
//! - **Relay Session**: owns the buffer, flags and tracker for one connection
//! - **Session Manager**: registry of live sessions and the concurrency limit
//!
//! ## Audio Format:
//! Frames are relayed untouched. Whatever the client sends must already be in
//! the format the upstream session expects (PCM16 24kHz mono by default).

// WebSocket handler is in src/websocket.rs at the root level
pub mod assembler;    // Reassembly of fragmented client messages
pub mod buffer;       // Bounded, order-preserving frame buffer
pub mod session;      // Relay session state and registry
pub mod tracker;      // Response lifecycle state machine

//! # Realtime Module
//!
//! Everything that speaks the upstream conversational API's protocol.
//!
//! ## Key Components:
//! - **protocol**: request/event types and the downstream notification format
//! - **client**: handshake, connection split and the upstream write handle
//!
//! The upstream peer is treated as a black box: the relay only relies on the
//! handful of event types listed in `protocol`.

pub mod client;      // Upstream connection and writer task
pub mod protocol;    // Wire message types

pub use client::UpstreamHandle;
pub use protocol::{DownstreamMessage, UpstreamEvent, UpstreamRequest};

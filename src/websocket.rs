//! # Relay WebSocket Handler
//!
//! Bridges one downstream audio client to one upstream realtime API connection.
//! Clients connect to `/` (or `/ws`) and stream binary audio; the relay sends
//! transcripts back as JSON.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: client upgrades; the relay opens its own upstream connection
//! 2. **Audio Streaming**: every binary message is raw audio, buffered until upstream is ready
//! 3. **Commits**: a timer commits appended audio upstream every `commit_interval_ms`
//! 4. **Responses**: each acknowledged commit requests a text response, one at a time
//! 5. **Transcripts**: `{"type": "transcript", "text": ...}` is sent to the client
//!
//! ## Message Format:
//! - **Client → Server**: binary audio frames, fragmented or not, up to
//!   `max_frame_bytes` per frame (text frames are ignored)
//! - **Server → Client**: `transcript` messages, and an `error` message with code
//!   `buffer_overflow` when audio is dropped because upstream is unavailable
//!
//! ## Teardown:
//! Whichever side goes away first, the same teardown runs exactly once. It
//! cancels the commit timer before closing either socket, then releases the
//! registry slot.

use crate::audio::assembler::{Assembly, MessageAssembler};
use crate::audio::session::RelaySession;
use crate::config::AppConfig;
use crate::error::{AppError, RelayError};
use crate::realtime::client::{self, UpstreamSink, UpstreamStream};
use crate::realtime::{DownstreamMessage, UpstreamEvent, UpstreamHandle, UpstreamRequest};
use crate::state::AppState;

use actix::prelude::*;
use actix_http::ws::Item;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::time::Instant;
use tokio_tungstenite::tungstenite;
use tracing::{debug, error, info, warn};

/// WebSocket actor for one relay session.
///
/// ## Actor Model:
/// Every handler (client frame, upstream frame, timer tick) runs to
/// completion on the actor, one at a time, so the session state needs no locks.
pub struct RelayWebSocket {
    /// Buffer, flags and response tracker for this connection
    session: RelaySession,

    /// Partial fragmented client message
    assembler: MessageAssembler,

    /// Write side of the upstream connection, once the handshake is done
    upstream: Option<UpstreamHandle>,

    app_state: web::Data<AppState>,

    /// Configuration snapshot taken when the client connected
    config: AppConfig,

    /// Commit scheduler handle, cancelled on teardown
    commit_timer: Option<SpawnHandle>,

    /// Last time the client showed signs of life
    last_heartbeat: Instant,
}

impl RelayWebSocket {
    pub fn new(session_id: String, app_state: web::Data<AppState>) -> Self {
        let config = app_state.get_config();
        Self {
            session: RelaySession::new(session_id, config.relay.max_buffered_bytes),
            assembler: MessageAssembler::new(config.relay.max_buffered_bytes),
            upstream: None,
            app_state,
            config,
            commit_timer: None,
            last_heartbeat: Instant::now(),
        }
    }

    fn session_id(&self) -> &str {
        &self.session.session_id
    }

    /// Start the upstream handshake in the background.
    ///
    /// Audio arriving meanwhile is buffered by the session.
    fn connect_upstream(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        let upstream_config = self.config.upstream.clone();

        let connect = async move { client::connect(&upstream_config).await };

        ctx.spawn(connect.into_actor(self).map(|result, act, ctx| match result {
            Ok((sink, stream)) => act.on_upstream_connected(sink, stream, ctx),
            Err(err) => {
                error!(session_id = %act.session_id(), error = %err, "Failed to connect to upstream");
                act.teardown(ctx, "upstream connection failed", true);
            }
        }));
    }

    fn on_upstream_connected(
        &mut self,
        sink: UpstreamSink,
        stream: UpstreamStream,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        let handle = UpstreamHandle::spawn(
            self.session_id().to_string(),
            sink,
            client::writer_budget(self.config.relay.max_buffered_bytes),
        );

        if self.session.is_closed() {
            info!(session_id = %self.session_id(), "Client left during upstream handshake; closing upstream");
            handle.close();
            return;
        }

        info!(session_id = %self.session_id(), "Connected to upstream");
        self.upstream = Some(handle);
        ctx.add_stream(stream);

        if let Some(append) = self.session.upstream_opened() {
            self.send_upstream(append, ctx);
        }
    }

    /// Handle one binary frame from the client.
    fn on_audio_frame(&mut self, frame: Vec<u8>, ctx: &mut ws::WebsocketContext<Self>) {
        debug!(session_id = %self.session_id(), bytes = frame.len(), "Received audio from client");

        match self.session.push_audio(frame) {
            Ok(Some(append)) => self.send_upstream(append, ctx),
            Ok(None) => {}
            Err(err) => {
                warn!(session_id = %self.session_id(), error = %err, "Rejecting audio frame");
                self.app_state.record_frame_rejected();
                if let Some(notice) = self.session.overflow_notice() {
                    self.send_downstream(notice, ctx);
                }
            }
        }
    }

    /// Handle one piece of a fragmented client message.
    fn on_fragment(&mut self, item: Item, ctx: &mut ws::WebsocketContext<Self>) {
        match self.assembler.push(item) {
            Assembly::Pending => {}
            Assembly::Audio(frame) => self.on_audio_frame(frame, ctx),
            Assembly::Oversized(bytes) => {
                warn!(session_id = %self.session_id(), bytes, "Rejecting oversized fragmented audio message");
                self.app_state.record_frame_rejected();
                if let Some(notice) = self.session.frame_rejected(bytes) {
                    self.send_downstream(notice, ctx);
                }
            }
            Assembly::Ignored => {
                warn!(session_id = %self.session_id(), "Fragment is not part of a binary message; ignoring");
            }
        }
    }

    fn on_commit_tick(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        if let Some(commit) = self.session.commit_tick() {
            self.send_upstream(commit, ctx);
        }
    }

    /// Handle one text frame from upstream.
    fn on_upstream_text(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        debug!(session_id = %self.session_id(), message = %text, "Received message from upstream");

        let event = match UpstreamEvent::parse(text) {
            Ok(event) => event,
            Err(err) => {
                warn!(session_id = %self.session_id(), error = %err, "Discarding upstream message");
                return;
            }
        };

        if matches!(event, UpstreamEvent::Error { .. }) {
            self.app_state.record_upstream_error();
        }

        let outcome = self.session.handle_upstream_event(event);

        if let Some(request) = outcome.upstream {
            self.send_upstream(request, ctx);
        }

        if let Some(message) = outcome.downstream {
            if matches!(message, DownstreamMessage::Transcript { .. }) {
                self.app_state.record_transcript_relayed();
            }
            self.send_downstream(message, ctx);
        }
    }

    /// Queue a request on the upstream writer.
    ///
    /// A full writer queue drops the request and lets the session recover; a
    /// writer that has stopped ends the session.
    fn send_upstream(&mut self, request: UpstreamRequest, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(upstream) = &self.upstream else {
            warn!(session_id = %self.session_id(), kind = request.kind(), "Upstream is not open; dropping message");
            return;
        };

        let json = match request.to_json() {
            Ok(json) => json,
            Err(err) => {
                error!(session_id = %self.session_id(), kind = request.kind(), error = %err, "Failed to encode upstream message");
                return;
            }
        };

        match upstream.send_text(json) {
            Ok(()) => {
                debug!(session_id = %self.session_id(), kind = request.kind(), "Sent message to upstream");
                if matches!(request, UpstreamRequest::AudioAppend { .. }) {
                    self.session.append_delivered();
                }
                self.app_state.record_upstream_request(&request);
            }
            Err(err @ RelayError::BufferOverflow { .. }) => {
                warn!(session_id = %self.session_id(), kind = request.kind(), error = %err, "Upstream is not keeping up; dropping message");
                if matches!(request, UpstreamRequest::AudioAppend { .. }) {
                    self.app_state.record_frame_rejected();
                }
                if let Some(notice) = self.session.request_dropped(&request) {
                    self.send_downstream(notice, ctx);
                }
            }
            Err(err) => {
                error!(session_id = %self.session_id(), kind = request.kind(), error = %err, "Failed to send to upstream");
                self.session.upstream_closed();
                self.teardown(ctx, "upstream writer stopped", true);
            }
        }
    }

    fn send_downstream(&self, message: DownstreamMessage, ctx: &mut ws::WebsocketContext<Self>) {
        if self.session.is_closed() {
            return;
        }
        match message.to_json() {
            Ok(json) => ctx.text(json),
            Err(err) => error!(session_id = %self.session_id(), error = %err, "Failed to encode client message"),
        }
    }

    /// Tear the session down. Runs once no matter how many times it is called.
    ///
    /// `close_client` is false when the client is already gone.
    fn teardown(&mut self, ctx: &mut ws::WebsocketContext<Self>, reason: &str, close_client: bool) {
        if !self.session.close() {
            return;
        }

        if let Some(timer) = self.commit_timer.take() {
            ctx.cancel_future(timer);
        }

        if let Some(upstream) = self.upstream.take() {
            upstream.close();
        }

        self.app_state.sessions.remove(self.session_id());
        self.app_state.decrement_active_sessions();

        let stats = self.session.stats();
        info!(
            session_id = %self.session_id(),
            reason = reason,
            duration_secs = self.session.age_seconds(),
            response_state = self.session.response_state().as_str(),
            bytes_received = stats.bytes_received,
            bytes_forwarded = stats.bytes_forwarded,
            commits_sent = stats.commits_sent,
            responses_requested = stats.responses_requested,
            transcripts_relayed = stats.transcripts_relayed,
            "Relay session closed"
        );

        if close_client {
            ctx.close(Some(ws::CloseReason {
                code: ws::CloseCode::Away,
                description: Some(reason.to_string()),
            }));
        }
        ctx.stop();
    }
}

impl Actor for RelayWebSocket {
    type Context = ws::WebsocketContext<Self>;

    /// Called when the client connection is established.
    fn started(&mut self, ctx: &mut Self::Context) {
        info!(session_id = %self.session_id(), "Client connected");
        self.app_state.increment_active_sessions();

        let heartbeat_interval = self.config.relay.heartbeat_interval();
        let client_timeout = self.config.relay.client_timeout();
        ctx.run_interval(heartbeat_interval, move |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > client_timeout {
                warn!(session_id = %act.session_id(), "Client heartbeat timeout");
                act.teardown(ctx, "client heartbeat timeout", true);
            } else {
                ctx.ping(b"");
            }
        });

        self.commit_timer = Some(ctx.run_interval(self.config.relay.commit_interval(), |act, ctx| {
            act.on_commit_tick(ctx);
        }));

        self.connect_upstream(ctx);
    }

    /// Called when the client connection is gone.
    fn stopped(&mut self, ctx: &mut Self::Context) {
        info!(session_id = %self.session_id(), "Client disconnected");
        self.teardown(ctx, "client disconnected", false);
    }
}

/// Frames from the downstream client.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for RelayWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();
                self.on_audio_frame(data.to_vec(), ctx);
            }
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                warn!(session_id = %self.session_id(), length = text.len(), "Message is not binary audio; ignoring");
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(session_id = %self.session_id(), reason = ?reason, "Client closed connection");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(item)) => {
                self.last_heartbeat = Instant::now();
                self.on_fragment(item, ctx);
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(session_id = %self.session_id(), error = %err, "Client WebSocket error");
                ctx.stop();
            }
        }
    }
}

/// Frames from the upstream API.
impl StreamHandler<Result<tungstenite::Message, tungstenite::Error>> for RelayWebSocket {
    fn handle(&mut self, msg: Result<tungstenite::Message, tungstenite::Error>, ctx: &mut Self::Context) {
        match msg {
            Ok(tungstenite::Message::Text(text)) => self.on_upstream_text(&text, ctx),
            Ok(tungstenite::Message::Binary(data)) => {
                warn!(session_id = %self.session_id(), bytes = data.len(), "Ignoring binary message from upstream");
            }
            Ok(tungstenite::Message::Close(frame)) => {
                info!(session_id = %self.session_id(), frame = ?frame, "Upstream closed connection");
            }
            Ok(_) => {}
            Err(err) => {
                error!(session_id = %self.session_id(), error = %err, "Upstream WebSocket error");
                self.session.upstream_closed();
                self.teardown(ctx, "upstream transport error", true);
            }
        }
    }

    /// The upstream read half ended: same teardown as a client disconnect.
    fn finished(&mut self, ctx: &mut Self::Context) {
        info!(session_id = %self.session_id(), "Disconnected from upstream");
        self.session.upstream_closed();
        self.teardown(ctx, "upstream disconnected", true);
    }
}

/// WebSocket endpoint handler.
///
/// ## HTTP to WebSocket Upgrade:
/// Reserves a session slot, then upgrades the request. A full relay answers
/// 503 before any upstream connection is attempted.
pub async fn relay_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let peer_addr = req.connection_info().peer_addr().map(str::to_string);
    info!(peer_addr = ?peer_addr, "New relay connection request");

    let session_id = match app_state.sessions.register(peer_addr) {
        Ok(session_id) => session_id,
        Err(err) => {
            warn!(error = %err, "Refusing relay connection");
            app_state.record_session_rejected();
            return Err(err.into());
        }
    };

    let relay = RelayWebSocket::new(session_id.clone(), app_state.clone());
    let max_frame_bytes = app_state.get_config().relay.max_frame_bytes;

    ws::WsResponseBuilder::new(relay, &req, stream)
        .frame_size(max_frame_bytes)
        .start()
        .map_err(|err| {
            // The actor never started, so release the slot here
            app_state.sessions.remove(&session_id);
            AppError::BadRequest(format!("WebSocket handshake failed: {}", err))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::dev::ServerHandle;
    use actix_web::http::StatusCode;
    use actix_web::{test, App, HttpServer};
    use base64::Engine as _;
    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::{CloseCode, Data, OpCode};
    use tokio_tungstenite::tungstenite::protocol::frame::Frame;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

    type ClientSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

    /// How the loopback upstream behaves.
    #[derive(Clone, Copy)]
    enum Peer {
        /// Acknowledge commits and answer each response request with "hello"
        Transcribe,
        /// Accept everything, answer nothing
        Silent,
        /// Close the connection after the first append
        HangUpAfterAppend,
    }

    /// Loopback upstream. Reports what it sees: `append:<decoded bytes>`, other
    /// message types verbatim, then `CLOSE` and `EOF`.
    async fn start_upstream(peer: Peer) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (log, log_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();

            while let Some(Ok(message)) = socket.next().await {
                let text = match message {
                    tungstenite::Message::Text(text) => text,
                    tungstenite::Message::Close(_) => {
                        let _ = log.send("CLOSE".to_string());
                        continue;
                    }
                    _ => continue,
                };

                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                let kind = value["type"].as_str().unwrap_or_default().to_string();

                if kind == "input_audio_buffer.append" {
                    let audio = base64::engine::general_purpose::STANDARD
                        .decode(value["audio"].as_str().unwrap())
                        .unwrap();
                    let _ = log.send(format!("append:{}", audio.len()));
                    if matches!(peer, Peer::HangUpAfterAppend) {
                        let _ = socket.close(None).await;
                    }
                    continue;
                }

                let _ = log.send(kind.clone());
                if !matches!(peer, Peer::Transcribe) {
                    continue;
                }

                let replies = match kind.as_str() {
                    "input_audio_buffer.commit" => vec![json!({"type": "input_audio_buffer.committed"})],
                    "response.create" => vec![
                        json!({"type": "response.created"}),
                        json!({"type": "response.audio_transcript.done", "transcript": "hello"}),
                        json!({"type": "response.done"}),
                    ],
                    _ => vec![],
                };
                for reply in replies {
                    let _ = socket.send(tungstenite::Message::Text(reply.to_string())).await;
                }
            }

            let _ = log.send("EOF".to_string());
        });

        (format!("ws://{}", addr), log_rx)
    }

    async fn start_relay(upstream_url: &str) -> (SocketAddr, AppState, ServerHandle) {
        let mut config = AppConfig::default();
        config.upstream.url = upstream_url.to_string();
        config.relay.commit_interval_ms = 50;
        let state = AppState::new(config);

        let app_state = state.clone();
        let server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(app_state.clone()))
                .route("/", web::get().to(relay_websocket))
        })
        .workers(1)
        .disable_signals()
        .bind(("127.0.0.1", 0))
        .unwrap();

        let addr = server.addrs()[0];
        let server = server.run();
        let handle = server.handle();
        actix_web::rt::spawn(server);
        (addr, state, handle)
    }

    async fn connect_client(addr: SocketAddr) -> ClientSocket {
        let (client, _) = tokio_tungstenite::connect_async(format!("ws://{}/", addr)).await.unwrap();
        client
    }

    async fn next_log(log: &mut mpsc::UnboundedReceiver<String>) -> String {
        tokio::time::timeout(Duration::from_secs(5), log.recv())
            .await
            .expect("upstream went quiet")
            .expect("upstream log ended")
    }

    /// Sum of decoded append sizes seen upstream, read until `expected` bytes arrive.
    async fn appended_bytes(log: &mut mpsc::UnboundedReceiver<String>, expected: usize) -> Vec<usize> {
        let mut appends = Vec::new();
        while appends.iter().sum::<usize>() < expected {
            let entry = next_log(log).await;
            if let Some(bytes) = entry.strip_prefix("append:") {
                appends.push(bytes.parse().unwrap());
            }
        }
        appends
    }

    async fn wait_for_no_sessions(state: &AppState) {
        for _ in 0..100 {
            if state.sessions.active_session_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("session was never released");
    }

    #[actix_web::test]
    async fn test_transcript_reaches_client_exactly_once() {
        let (upstream_url, _log) = start_upstream(Peer::Transcribe).await;
        let (addr, _state, server) = start_relay(&upstream_url).await;
        let mut client = connect_client(addr).await;

        client.send(tungstenite::Message::Binary(vec![7; 1000])).await.unwrap();

        let mut transcripts = Vec::new();
        for _ in 0..20 {
            match tokio::time::timeout(Duration::from_millis(500), client.next()).await {
                Ok(Some(Ok(tungstenite::Message::Text(text)))) => {
                    transcripts.push(serde_json::from_str::<serde_json::Value>(&text).unwrap());
                }
                Ok(Some(Ok(_))) => {}
                Ok(_) => panic!("client connection ended"),
                // Quiet for a while after the first transcript: nothing more is coming
                Err(_) if !transcripts.is_empty() => break,
                Err(_) => {}
            }
        }

        assert_eq!(transcripts, vec![json!({"type": "transcript", "text": "hello"})]);
        server.stop(false).await;
    }

    #[actix_web::test]
    async fn test_client_disconnect_closes_upstream_and_stops_commits() {
        let (upstream_url, mut log) = start_upstream(Peer::Silent).await;
        let (addr, state, server) = start_relay(&upstream_url).await;
        let mut client = connect_client(addr).await;

        client.send(tungstenite::Message::Binary(vec![1; 320])).await.unwrap();
        while next_log(&mut log).await != "input_audio_buffer.commit" {}
        assert_eq!(state.sessions.active_session_count(), 1);

        client.close(None).await.unwrap();

        let mut after_disconnect = Vec::new();
        loop {
            let entry = next_log(&mut log).await;
            let done = entry == "EOF";
            after_disconnect.push(entry);
            if done {
                break;
            }
        }

        assert!(after_disconnect.contains(&"CLOSE".to_string()), "{:?}", after_disconnect);
        assert!(!after_disconnect.iter().any(|entry| entry == "input_audio_buffer.commit"));
        wait_for_no_sessions(&state).await;
        server.stop(false).await;
    }

    #[actix_web::test]
    async fn test_upstream_hang_up_closes_client() {
        let (upstream_url, _log) = start_upstream(Peer::HangUpAfterAppend).await;
        let (addr, state, server) = start_relay(&upstream_url).await;
        let mut client = connect_client(addr).await;

        client.send(tungstenite::Message::Binary(vec![1; 320])).await.unwrap();

        let close_code = loop {
            match tokio::time::timeout(Duration::from_secs(5), client.next()).await {
                Ok(Some(Ok(tungstenite::Message::Close(frame)))) => break frame.map(|f| f.code),
                Ok(Some(Ok(_))) => {}
                Ok(other) => panic!("client ended without a close frame: {:?}", other),
                Err(_) => panic!("client was never closed"),
            }
        };

        assert_eq!(close_code, Some(CloseCode::Away));
        wait_for_no_sessions(&state).await;
        server.stop(false).await;
    }

    #[actix_web::test]
    async fn test_large_frame_is_relayed_whole() {
        let (upstream_url, mut log) = start_upstream(Peer::Silent).await;
        let (addr, _state, server) = start_relay(&upstream_url).await;
        let mut client = connect_client(addr).await;

        // Beyond the 64 KiB default frame limit of the WebSocket codec
        client.send(tungstenite::Message::Binary(vec![3; 100_000])).await.unwrap();

        assert_eq!(appended_bytes(&mut log, 100_000).await.iter().sum::<usize>(), 100_000);
        server.stop(false).await;
    }

    #[actix_web::test]
    async fn test_fragmented_message_is_relayed_as_one_frame() {
        let (upstream_url, mut log) = start_upstream(Peer::Silent).await;
        let (addr, _state, server) = start_relay(&upstream_url).await;
        let mut client = connect_client(addr).await;

        // Let the upstream handshake finish so the message is appended on arrival
        tokio::time::sleep(Duration::from_millis(200)).await;

        let first = Frame::message(vec![1; 10], OpCode::Data(Data::Binary), false);
        let last = Frame::message(vec![2; 10], OpCode::Data(Data::Continue), true);
        client.send(tungstenite::Message::Frame(first)).await.unwrap();
        client.send(tungstenite::Message::Frame(last)).await.unwrap();

        assert_eq!(appended_bytes(&mut log, 20).await, vec![20]);
        server.stop(false).await;
    }

    #[actix_web::test]
    async fn test_plain_http_request_is_rejected_without_leaking_session() {
        let state = AppState::new(AppConfig::default());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/", web::get().to(relay_websocket)),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.sessions.active_session_count(), 0);
    }

    #[actix_web::test]
    async fn test_full_relay_answers_503() {
        let mut config = AppConfig::default();
        config.performance.max_concurrent_sessions = 1;
        let state = AppState::new(config);
        state.sessions.register(None).unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/", web::get().to(relay_websocket)),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(state.get_metrics_snapshot().relay.sessions_rejected, 1);
    }
}

use std::{collections::VecDeque, io, sync::Arc, time::Instant};

use bytes::{Bytes, BytesMut};
use duplex_wire::{
    FrameFault, Role, WireError,
    close::CloseCode,
    codec::Codec,
    frame::{Frame, OpCode},
    handshake::{ClientHandshake, HandshakeRequest, Negotiated},
};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, info, trace, warn};

use super::{
    ConnectionEvent, ConnectionState,
    heartbeat::{Heartbeat, HeartbeatAction},
};
use crate::{clock::Clock, config::ConnectionConfig, reconnect::ReconnectTimer, socket::Socket};

#[derive(Debug)]
struct PendingHandshake {
    handshake: ClientHandshake,
    started: Instant,
}

/// A data message whose final fragment has not arrived yet.
#[derive(Debug)]
struct Fragments {
    opcode: OpCode,
    data: BytesMut,
}

/// Owns one socket and drives it through connect, upgrade and framed I/O.
#[derive(Debug)]
pub struct ConnectionEngine<S, C> {
    config: Arc<ConnectionConfig>,
    socket: S,
    clock: C,
    state: ConnectionState,
    codec: Codec,
    read_buf: BytesMut,
    write_buf: BytesMut,
    handshake: Option<PendingHandshake>,
    fragments: Option<Fragments>,
    reconnect: ReconnectTimer,
    heartbeat: Option<Heartbeat>,
    session_id: Option<String>,
    events: VecDeque<ConnectionEvent>,
}

impl<S: Socket, C: Clock> ConnectionEngine<S, C> {
    pub fn new(config: Arc<ConnectionConfig>, socket: S, clock: C) -> Self {
        let now = clock.now();
        Self {
            codec: Codec::new(Role::Client, config.max_payload_size),
            reconnect: ReconnectTimer::new(config.reconnect_interval),
            heartbeat: config
                .transport_heartbeat
                .map(|heartbeat| Heartbeat::new(heartbeat, now)),
            config,
            socket,
            clock,
            state: ConnectionState::NotConnected,
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::new(),
            handshake: None,
            fragments: None,
            session_id: None,
            events: VecDeque::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Session id from the upgrade response's `Set-Cookie`, while connected.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Takes the oldest queued event.
    pub fn next_event(&mut self) -> Option<ConnectionEvent> {
        self.events.pop_front()
    }

    /// Advances the state machine by one step.
    pub fn poll(&mut self) {
        let now = self.clock.now();
        match self.state {
            ConnectionState::NotConnected => {
                if self.reconnect.should_attempt(now) {
                    self.start_connect(now);
                }
            }
            ConnectionState::Handshaking => self.poll_handshake(now),
            ConnectionState::Connected => {
                if let Err(err) = self.socket.flush() {
                    self.drop_connection(format!("write failed: {err}"));
                    return;
                }
                self.poll_frames();
                if self.state.is_connected() {
                    self.poll_heartbeat(now);
                }
            }
        }
    }

    /// Sends one final frame. Returns `false` when not connected or when the
    /// write failed; a failed write also tears the connection down.
    pub fn send(&mut self, opcode: OpCode, payload: impl Into<Bytes>) -> bool {
        if !self.state.is_connected() {
            return false;
        }
        self.write_frame(Frame::new(true, opcode, None, payload))
    }

    pub fn send_text(&mut self, text: &str) -> bool {
        self.send(OpCode::Text, Bytes::copy_from_slice(text.as_bytes()))
    }

    /// Closes the connection from our side.
    pub fn disconnect(&mut self) {
        match self.state {
            ConnectionState::Connected => {
                self.write_frame(Frame::close(CloseCode::Normal, b""));
                self.drop_connection("closed by client".to_string());
            }
            ConnectionState::Handshaking => {
                let now = self.clock.now();
                self.fail_attempt(now);
            }
            ConnectionState::NotConnected => {}
        }
    }

    fn start_connect(&mut self, now: Instant) {
        let config = Arc::clone(&self.config);
        debug!(host = %config.host, port = config.port, "connecting");

        if let Err(err) = self
            .socket
            .connect(&config.host, config.port, config.connect_timeout)
        {
            warn!(error = %err, host = %config.host, port = config.port, "connection attempt failed");
            self.reconnect.record_failure(now);
            return;
        }

        let request = self.build_request();
        if let Err(err) = self.socket.write(request.render().as_bytes()) {
            warn!(error = %err, "failed to send upgrade request");
            self.fail_attempt(now);
            return;
        }

        self.read_buf.clear();
        self.handshake = Some(PendingHandshake {
            handshake: ClientHandshake::new(request.key),
            started: now,
        });
        self.state = ConnectionState::Handshaking;
        self.poll_handshake(now);
    }

    fn build_request(&self) -> HandshakeRequest {
        let config = &self.config;
        let mut request =
            HandshakeRequest::new(config.host.clone(), config.port, config.request_path());
        request.protocol = config.protocol.clone();
        request.extensions = config.extensions.clone();
        request.headers = config.request_headers();
        request.user_agent = Some(config.user_agent.clone());
        request.basic_auth = config.basic_auth.clone();
        request.authorization = config.token.clone();
        request
    }

    fn poll_handshake(&mut self, now: Instant) {
        if let Err(err) = self.socket.read_available(&mut self.read_buf) {
            warn!(error = %err, "connection lost during upgrade");
            self.fail_attempt(now);
            return;
        }

        let Some(pending) = self.handshake.as_mut() else {
            self.fail_attempt(now);
            return;
        };
        let started = pending.started;

        match pending.handshake.poll_response(&mut self.read_buf) {
            Ok(Some(negotiated)) => {
                self.handshake = None;
                self.on_upgraded(negotiated, now);
            }
            Ok(None) => {
                if now.saturating_duration_since(started) > self.config.connect_timeout {
                    warn!(timeout = ?self.config.connect_timeout, "upgrade response timed out");
                    self.fail_attempt(now);
                }
            }
            Err(err) if err.is_handshake_error() => {
                warn!(error = %err, "upgrade rejected");
                self.fail_attempt(now);
            }
            Err(err) => {
                warn!(error = %err, "upgrade failed");
                self.fail_attempt(now);
            }
        }
    }

    fn on_upgraded(&mut self, negotiated: Negotiated, now: Instant) {
        self.state = ConnectionState::Connected;
        self.reconnect.record_success();
        self.codec.reset();
        self.fragments = None;
        if let Some(heartbeat) = self.heartbeat.as_mut() {
            heartbeat.reset(now);
        }
        self.session_id = negotiated.session_id.clone();

        info!(
            host = %self.config.host,
            port = self.config.port,
            path = %self.config.path,
            "connected"
        );
        self.events.push_back(ConnectionEvent::Connected {
            path: self.config.path.clone(),
            protocol: negotiated.protocol,
            session_id: negotiated.session_id,
        });

        // the server may have sent frames right behind the 101
        self.decode_frames();
    }

    /// Abandons a connection attempt that never reached `Connected`.
    fn fail_attempt(&mut self, now: Instant) {
        self.socket.close();
        self.state = ConnectionState::NotConnected;
        self.handshake = None;
        self.read_buf.clear();
        self.reconnect.record_failure(now);
    }

    fn drop_connection(&mut self, reason: String) {
        if self.state == ConnectionState::NotConnected {
            return;
        }
        let was_connected = self.state.is_connected();

        self.socket.close();
        self.state = ConnectionState::NotConnected;
        self.handshake = None;
        self.fragments = None;
        self.session_id = None;
        self.read_buf.clear();
        self.codec.reset();
        self.reconnect.record_failure(self.clock.now());

        if was_connected {
            info!(reason = %reason, "disconnected");
            self.events
                .push_back(ConnectionEvent::Disconnected { reason });
        }
    }

    fn poll_frames(&mut self) {
        match self.socket.read_available(&mut self.read_buf) {
            Ok(0) => {}
            Ok(n) => trace!(bytes = n, "read"),
            Err(err) => {
                let reason = if err.kind() == io::ErrorKind::UnexpectedEof {
                    "connection closed by peer".to_string()
                } else {
                    format!("read failed: {err}")
                };
                self.drop_connection(reason);
                return;
            }
        }
        self.decode_frames();
    }

    fn decode_frames(&mut self) {
        while self.state.is_connected() {
            match self.codec.decode(&mut self.read_buf) {
                Ok(Some(frame)) => self.handle_frame(frame),
                Ok(None) => break,
                Err(err) if err.is_protocol_error() => {
                    self.protocol_error(err);
                    break;
                }
                Err(err) => {
                    self.drop_connection(format!("read failed: {err}"));
                    break;
                }
            }
        }
    }

    fn handle_frame(&mut self, frame: Frame) {
        let close_code = frame.close_code();
        let (opcode, fin, payload) = frame.into_parts();
        trace!(?opcode, fin, len = payload.len(), "frame");

        match opcode {
            OpCode::Text | OpCode::Binary => {
                if self.fragments.is_some() {
                    self.protocol_error(FrameFault::FragmentSequence.into());
                } else if fin {
                    self.emit_message(opcode, payload);
                } else {
                    self.fragments = Some(Fragments {
                        opcode,
                        data: BytesMut::from(payload.as_ref()),
                    });
                }
            }
            OpCode::Continuation => {
                let max = self.config.max_payload_size;
                let Some(fragments) = self.fragments.as_mut() else {
                    self.protocol_error(FrameFault::FragmentSequence.into());
                    return;
                };

                let total = fragments.data.len() + payload.len();
                if total > max {
                    self.protocol_error(
                        FrameFault::LengthOverflow {
                            len: total as u64,
                            max,
                        }
                        .into(),
                    );
                    return;
                }
                fragments.data.extend_from_slice(&payload);

                if fin && let Some(done) = self.fragments.take() {
                    self.emit_message(done.opcode, done.data.freeze());
                }
            }
            OpCode::Ping => {
                self.send(OpCode::Pong, payload.clone());
                self.events.push_back(ConnectionEvent::Ping(payload));
            }
            OpCode::Pong => {
                if let Some(heartbeat) = self.heartbeat.as_mut() {
                    heartbeat.on_pong();
                }
                self.events.push_back(ConnectionEvent::Pong(payload));
            }
            OpCode::Close => {
                let reply = match close_code {
                    Some(code) if code.is_allowed() => code,
                    _ => CloseCode::Normal,
                };
                self.write_frame(Frame::close(reply, b""));

                let reason = match close_code {
                    Some(code) => format!("closed by server ({code})"),
                    None => "closed by server".to_string(),
                };
                self.drop_connection(reason);
            }
        }
    }

    fn emit_message(&mut self, opcode: OpCode, payload: Bytes) {
        if opcode == OpCode::Binary {
            self.events.push_back(ConnectionEvent::Binary(payload));
            return;
        }

        match String::from_utf8(payload.to_vec()) {
            Ok(text) => self.events.push_back(ConnectionEvent::Text(text)),
            Err(_) => self.protocol_error(WireError::InvalidUtf8),
        }
    }

    fn protocol_error(&mut self, err: WireError) {
        warn!(error = %err, "protocol error, closing connection");
        let code = match &err {
            WireError::InvalidUtf8 => CloseCode::Invalid,
            WireError::MalformedFrame(FrameFault::LengthOverflow { .. }) => CloseCode::Size,
            _ => CloseCode::Protocol,
        };
        self.write_frame(Frame::close(code, b""));
        self.drop_connection(format!("protocol error: {err}"));
    }

    fn poll_heartbeat(&mut self, now: Instant) {
        let Some(action) = self.heartbeat.as_mut().map(|heartbeat| heartbeat.poll(now)) else {
            return;
        };

        match action {
            HeartbeatAction::Idle => {}
            HeartbeatAction::SendPing => {
                trace!("sending heartbeat ping");
                if self.send(OpCode::Ping, Bytes::new())
                    && let Some(heartbeat) = self.heartbeat.as_mut()
                {
                    heartbeat.on_ping_sent(now);
                }
            }
            HeartbeatAction::Expired { missed } => {
                warn!(missed, "heartbeat expired");
                self.drop_connection(format!("no pong after {missed} pings"));
            }
        }
    }

    fn write_frame(&mut self, frame: Frame) -> bool {
        self.write_buf.clear();
        if let Err(err) = self.codec.encode(frame, &mut self.write_buf) {
            warn!(error = %err, "refusing to send invalid frame");
            return false;
        }

        if let Err(err) = self.socket.write(&self.write_buf) {
            self.drop_connection(format!("write failed: {err}"));
            return false;
        }

        let backlog = self.socket.backlog();
        let limit = self.write_backlog_limit();
        if backlog > limit {
            warn!(backlog, limit, "peer stopped reading, dropping connection");
            self.drop_connection(format!("write backlog of {backlog} bytes exceeds {limit}"));
            return false;
        }
        true
    }

    /// Unsent bytes tolerated before the peer counts as gone. Always room
    /// for one full-size message.
    fn write_backlog_limit(&self) -> usize {
        self.config.max_payload_size.saturating_mul(2)
    }
}

use std::{sync::Arc, time::Instant};

use serde_json::Value;
use tracing::{debug, info, trace, warn};

use super::{
    envelope::{Envelope, Update},
    pending::{CorrelationRegistry, ResponseHandler},
    replay::{BufferEntry, ReplayBuffer},
    subscription::{SubscriptionRegistry, UpdateHandler},
    types::{IdGenerator, MessageId, SessionState, Topic, task},
};
use crate::{
    clock::{Clock, SystemClock},
    config::ConnectionConfig,
    connection::{ConnectionEngine, ConnectionEvent},
    error::{TransportError, TransportResult},
    socket::{Socket, TcpSocket},
};

/// Observer of connection transitions.
pub type ConnectionHandler = Box<dyn FnMut(SessionState) + Send>;

/// A device-to-cloud session.
///
/// All work happens inside [`DuplexSession::poll`] and the send calls, on
/// the caller's thread. Requests made while offline are buffered and
/// replayed, oldest first, as soon as the connection comes back.
///
/// # Example
///
/// ```rust,no_run
/// use duplex_transport::{ConnectionConfig, DuplexSession, task};
/// use serde_json::json;
///
/// let config = ConnectionConfig::new("api.example.com", 80).api_key("key").token("token");
/// let mut session = DuplexSession::new(config)?;
///
/// session.subscribe("data/", Some(json!({"event": "data", "path": ""})), |update| {
///     println!("{} -> {}", update.path, update.data);
/// })?;
/// session.send(task::DEVICE_DATA_GET, Some(json!({"path": ""})), None)?;
///
/// loop {
///     session.poll(true);
///     std::thread::sleep(std::time::Duration::from_millis(20));
/// }
/// # Ok::<(), duplex_transport::TransportError>(())
/// ```
pub struct DuplexSession<S: Socket = TcpSocket, C: Clock = SystemClock> {
    engine: ConnectionEngine<S, C>,
    config: Arc<ConnectionConfig>,
    ids: IdGenerator,
    tasks: CorrelationRegistry,
    subscriptions: SubscriptionRegistry,
    buffer: ReplayBuffer,
    observer: Option<ConnectionHandler>,
    state: SessionState,
    last_ping: Instant,
}

impl DuplexSession {
    /// Creates a session over TCP. Nothing connects until the first poll.
    pub fn new(config: ConnectionConfig) -> TransportResult<Self> {
        Self::with_parts(config, TcpSocket::new(), SystemClock)
    }
}

impl<S: Socket, C: Clock> DuplexSession<S, C> {
    /// Creates a session over the given socket and clock.
    pub fn with_parts(config: ConnectionConfig, socket: S, clock: C) -> TransportResult<Self> {
        config.validate().map_err(TransportError::config)?;

        let config = Arc::new(config);
        let last_ping = clock.now();
        Ok(Self {
            engine: ConnectionEngine::new(Arc::clone(&config), socket, clock),
            buffer: ReplayBuffer::new(config.max_buffered_messages),
            config,
            ids: IdGenerator::new(),
            tasks: CorrelationRegistry::new(),
            subscriptions: SubscriptionRegistry::new(),
            observer: None,
            state: SessionState::Disconnected,
            last_ping,
        })
    }

    /// Sends `task`, buffering it while offline.
    ///
    /// `handler` receives the response. It is dropped unanswered if the
    /// connection goes down after the request went out.
    pub fn send(
        &mut self,
        task: &str,
        payload: Option<Value>,
        handler: Option<ResponseHandler>,
    ) -> TransportResult<MessageId> {
        let id = self.ids.next_id();
        let message = Envelope::new(id, task, payload).to_json()?;
        trace!(%id, task, "send");

        let entry = BufferEntry {
            task: task.to_string(),
            topic: None,
            message,
        };

        if self.state.is_connected() {
            if self.engine.send_text(&entry.message) {
                if let Some(handler) = handler {
                    self.tasks.register(id, handler);
                }
                return Ok(id);
            }
            // the failed write queued a disconnect; apply it before buffering
            self.process_events();
        }

        debug!(%id, task, "buffering message while offline");
        self.buffer.push(id, entry);
        if let Some(handler) = handler {
            self.tasks.register(id, handler);
        }
        Ok(id)
    }

    /// Subscribes `handler` to `topic`.
    ///
    /// The subscribe request stays buffered until [`DuplexSession::unsubscribe`],
    /// so it is repeated after every reconnect.
    pub fn subscribe(
        &mut self,
        topic: impl Into<Topic>,
        payload: Option<Value>,
        handler: impl FnMut(&Update) + Send + 'static,
    ) -> TransportResult<MessageId> {
        let topic = topic.into();
        let id = self.ids.next_id();
        let message = Envelope::new(id, task::SUBSCRIBE, payload).to_json()?;

        let handler: UpdateHandler = Box::new(handler);
        self.subscriptions.register(topic.clone(), id, handler);
        debug!(%id, %topic, "subscribe");

        let entry = BufferEntry {
            task: task::SUBSCRIBE.to_string(),
            topic: Some(topic),
            message,
        };
        let connected = self.state.is_connected();
        if connected && !self.engine.send_text(&entry.message) {
            self.process_events();
        }
        self.buffer.push(id, entry);
        Ok(id)
    }

    /// Drops every handler for `topic` and asks the server to stop pushing it.
    ///
    /// `id` is the value [`DuplexSession::subscribe`] returned.
    pub fn unsubscribe(
        &mut self,
        topic: impl Into<Topic>,
        id: MessageId,
        payload: Option<Value>,
    ) -> TransportResult<MessageId> {
        let topic = topic.into();
        self.subscriptions.unregister(&topic);

        if self.buffer.get(id).is_some_and(BufferEntry::is_subscription) {
            self.buffer.remove(id);
        }
        let removed = self.buffer.remove_subscriptions_for(&topic);
        debug!(%id, %topic, removed, "unsubscribe");

        self.send(task::UNSUBSCRIBE, payload, None)
    }

    /// Sends a `ping` task. Never buffered; returns `false` when offline.
    pub fn ping(&mut self) -> bool {
        if !self.state.is_connected() {
            return false;
        }

        let id = self.ids.next_id();
        let message = match Envelope::new(id, task::PING, None).to_json() {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "failed to encode ping");
                return false;
            }
        };

        trace!(%id, "ping");
        if self.engine.send_text(&message) {
            return true;
        }
        self.process_events();
        false
    }

    /// Installs the connection observer, replacing any previous one.
    pub fn on_connection_event(&mut self, handler: impl FnMut(SessionState) + Send + 'static) {
        self.observer = Some(Box::new(handler));
    }

    pub fn clear_connection_callback(&mut self) {
        self.observer = None;
    }

    /// Drives the session once. Does nothing when `ready` is `false`.
    pub fn poll(&mut self, ready: bool) {
        if !ready {
            return;
        }

        let now = self.engine.clock().now();
        if now.saturating_duration_since(self.last_ping) >= self.config.heartbeat_interval {
            self.last_ping = now;
            self.ping();
        }

        self.engine.poll();
        self.process_events();
    }

    /// Same as `poll(true)`.
    pub fn run_once(&mut self) {
        self.poll(true);
    }

    /// Closes the connection. A later poll reconnects once the reconnect
    /// interval has passed.
    pub fn disconnect(&mut self) {
        self.engine.disconnect();
        self.process_events();
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.engine.session_id()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Requests still waiting for a response handler to fire.
    pub fn pending_responses(&self) -> usize {
        self.tasks.len()
    }

    /// Messages held for replay, subscriptions included.
    pub fn buffered_messages(&self) -> usize {
        self.buffer.len()
    }

    /// Topics with at least one handler.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    fn process_events(&mut self) {
        while let Some(event) = self.engine.next_event() {
            match event {
                ConnectionEvent::Connected { path, .. } => self.on_connected(&path),
                ConnectionEvent::Disconnected { reason } => self.on_disconnected(&reason),
                ConnectionEvent::Text(text) => self.on_text(&text),
                ConnectionEvent::Binary(data) => {
                    debug!(len = data.len(), "ignoring binary message");
                }
                ConnectionEvent::Ping(_) | ConnectionEvent::Pong(_) => {}
            }
        }
    }

    fn on_connected(&mut self, path: &str) {
        self.state = SessionState::Connected;

        let replay: Vec<(MessageId, String)> = self
            .buffer
            .iter()
            .map(|(id, entry)| (id, entry.message.clone()))
            .collect();
        let mut replayed = 0;
        for (id, message) in replay {
            if !self.engine.send_text(&message) {
                warn!(%id, "replay interrupted by write failure");
                break;
            }
            replayed += 1;
        }

        info!(path, replayed, "session connected");
        self.last_ping = self.engine.clock().now();
        self.notify(SessionState::Connected);
    }

    fn on_disconnected(&mut self, reason: &str) {
        self.state = SessionState::Disconnected;
        let dropped = self.tasks.clear_all();
        info!(reason, dropped, "session disconnected");
        self.notify(SessionState::Disconnected);
    }

    fn notify(&mut self, state: SessionState) {
        if let Some(observer) = self.observer.as_mut() {
            observer(state);
        }
    }

    fn on_text(&mut self, text: &str) {
        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!(error = %err, "dropping undecodable message");
                return;
            }
        };

        match envelope.task() {
            task::UNPAIR | task::PING => trace!(task = envelope.task(), "ignored"),
            task::UPDATE => self.on_update(envelope),
            _ => self.on_response(envelope),
        }
    }

    fn on_update(&mut self, envelope: Envelope) {
        let Some(update) = envelope.into_update() else {
            debug!("dropping update without event");
            return;
        };

        let fired = if update.is_data() {
            self.subscriptions
                .match_and_emit(&update.topic_path(), &update)
        } else {
            self.subscriptions.emit_exact(&update.event, &update)
        };

        if fired == 0 {
            debug!(event = %update.event, path = %update.path, "no subscriber for update");
        }
    }

    fn on_response(&mut self, envelope: Envelope) {
        let id = envelope.id();
        if !self.buffer.get(id).is_some_and(BufferEntry::is_subscription) {
            self.buffer.remove(id);
        }

        let response = envelope.into_response();
        trace!(%id, task = %response.task, code = ?response.code, "response");
        if !self.tasks.resolve(id, response) {
            debug!(%id, "no pending handler for response");
        }
    }
}

impl<S: Socket, C: Clock> std::fmt::Debug for DuplexSession<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplexSession")
            .field("state", &self.state)
            .field("pending", &self.tasks.len())
            .field("buffered", &self.buffer.len())
            .field("subscriptions", &self.subscriptions)
            .finish()
    }
}

//! Actor-backed [`MessageEngine`].
//!
//! [`Engine::new`] spawns one task that owns the transport link. Engine calls
//! are commands on an unbounded channel, so none of them block. The task
//! publishes status through a `watch` channel and fans status transitions and
//! envelopes out to listeners.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use courier_core::{
    AgentId, ChatMessage, ConnectionState, ConnectionStatus, DEFAULT_SOURCE, Disposer, Envelope,
    MessageType, Route,
};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{Instrument, debug, error, info, info_span, trace, warn};

use crate::codec;
use crate::engine::{MessageCallback, MessageEngine, StatusCallback};
use crate::errors::codes;
use crate::listeners::Listeners;
use crate::transport::{Connector, Link, LinkEvent};

enum Command {
    Connect,
    Disconnect,
    Send(Envelope),
}

/// The production [`MessageEngine`].
///
/// Must be created inside a Tokio runtime. Dropping the last handle stops the
/// actor and closes any open link.
pub struct Engine {
    commands: mpsc::UnboundedSender<Command>,
    status_rx: watch::Receiver<ConnectionStatus>,
    messages: Listeners<Envelope>,
    statuses: Listeners<ConnectionStatus>,
    source: String,
}

impl Engine {
    /// Engine over `connector`, tagging local envelopes with the default source.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self::with_source(connector, DEFAULT_SOURCE)
    }

    /// Engine over `connector`, tagging local envelopes with `source`.
    pub fn with_source(connector: Arc<dyn Connector>, source: impl Into<String>) -> Self {
        let source = source.into();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());
        let messages = Listeners::new();
        let statuses = Listeners::new();

        let span = info_span!("engine", endpoint = %connector.endpoint());
        let actor = Actor {
            connector,
            commands: command_rx,
            link: None,
            status_tx,
            messages: messages.clone(),
            statuses: statuses.clone(),
            source: source.clone(),
        };
        let _task = tokio::spawn(actor.run().instrument(span));

        Self {
            commands,
            status_rx,
            messages,
            statuses,
            source,
        }
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            error!("engine actor has stopped");
        }
    }

    fn emit_local_error(&self, code: &str, message: &str) {
        let envelope = Envelope::error(Route::Chat, Some(code), message).with_source(self.source.clone());
        let _ = self.messages.emit(&envelope);
    }
}

impl MessageEngine for Engine {
    fn connect(&self) {
        self.command(Command::Connect);
    }

    fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    fn send_message(&self, content: &str, message_type: MessageType, agent_id: Option<&AgentId>) {
        if !self.is_connected() {
            warn!(state = %self.status().state(), "send while not connected, dropping");
            self.emit_local_error(codes::NOT_CONNECTED, "cannot send while not connected");
            return;
        }

        let mut message = ChatMessage::text(content);
        message.message_type = message_type;
        message.agent_id = agent_id.cloned();
        let envelope = Envelope::chat_send(message).with_source(self.source.clone());
        self.command(Command::Send(envelope));
    }

    fn status(&self) -> ConnectionStatus {
        self.status_rx.borrow().clone()
    }

    fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    fn on_message(&self, callback: MessageCallback) -> Disposer {
        self.messages.subscribe(callback)
    }

    fn on_status_change(&self, callback: StatusCallback) -> Disposer {
        self.statuses.subscribe(callback)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("status", &*self.status_rx.borrow())
            .field("source", &self.source)
            .field("message_listeners", &self.messages.len())
            .field("status_listeners", &self.statuses.len())
            .finish_non_exhaustive()
    }
}

struct Actor {
    connector: Arc<dyn Connector>,
    commands: mpsc::UnboundedReceiver<Command>,
    link: Option<Link>,
    status_tx: watch::Sender<ConnectionStatus>,
    messages: Listeners<Envelope>,
    statuses: Listeners<ConnectionStatus>,
    source: String,
}

async fn next_link_event(link: &mut Option<Link>) -> Option<LinkEvent> {
    match link {
        Some(link) => link.inbound.recv().await,
        None => std::future::pending().await,
    }
}

impl Actor {
    async fn run(mut self) {
        debug!("engine actor started");
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    match command {
                        Command::Connect => self.connect().await,
                        Command::Disconnect => self.disconnect(),
                        Command::Send(envelope) => self.send(&envelope),
                    }
                }
                event = next_link_event(&mut self.link) => self.on_link_event(event),
            }
        }
        drop(self.link.take());
        debug!("engine actor stopped");
    }

    // ─── State ──────────────────────────────────────────────────────────

    fn state(&self) -> ConnectionState {
        self.status_tx.borrow().state()
    }

    fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.status_tx.borrow().last_activity
    }

    fn touch(&self, at: DateTime<Utc>) {
        let refreshed = self.status_tx.borrow().touched(at);
        let _ = self.status_tx.send_replace(refreshed);
    }

    /// Publish `next` if the state machine allows it.
    fn transition(&self, next: ConnectionStatus) -> bool {
        let from = self.state();
        let to = next.state();
        if !from.can_transition_to(to) {
            warn!(%from, %to, "illegal connection state transition ignored");
            return false;
        }
        debug!(%from, %to, "connection state changed");
        let _ = self.status_tx.send_replace(next.clone());
        let _ = self.statuses.emit(&next);
        true
    }

    // ─── Delivery ───────────────────────────────────────────────────────

    fn deliver(&self, envelope: &Envelope) {
        trace!(route = %envelope.route(), action = %envelope.action(), id = %envelope.id(), "delivering envelope");
        let _ = self.messages.emit(envelope);
    }

    fn emit_error(&self, route: Route, code: &str, message: &str) {
        let envelope = Envelope::error(route, Some(code), message).with_source(self.source.clone());
        self.deliver(&envelope);
    }

    // ─── Commands ───────────────────────────────────────────────────────

    async fn connect(&mut self) {
        if self.state() == ConnectionState::Connected {
            debug!("already connected");
            return;
        }
        if !self.transition(ConnectionStatus::connecting(self.last_activity())) {
            return;
        }
        info!("connecting");

        let connector = Arc::clone(&self.connector);
        let mut open = connector.open();
        loop {
            tokio::select! {
                result = &mut open => {
                    self.finish_connect(result);
                    return;
                }
                command = self.commands.recv() => match command {
                    Some(Command::Disconnect) => {
                        info!("disconnect requested during handshake");
                        let _ = self.transition(ConnectionStatus::disconnected(self.last_activity()));
                        return;
                    }
                    Some(Command::Connect) => debug!("connect already in progress"),
                    Some(Command::Send(_)) => {
                        self.emit_error(Route::Chat, codes::NOT_CONNECTED, "cannot send while connecting");
                    }
                    None => return,
                },
            }
        }
    }

    fn finish_connect(&mut self, result: Result<Link, crate::errors::TransportError>) {
        match result {
            Ok(link) => {
                if self.transition(ConnectionStatus::connected(Utc::now())) {
                    self.link = Some(link);
                    info!("connected");
                    let open = Envelope::connection_open().with_source(self.source.clone());
                    self.deliver(&open);
                }
            }
            Err(err) => {
                warn!(error = %err, kind = err.error_kind(), "connect failed");
                let message = err.to_string();
                let _ = self.transition(ConnectionStatus::failed(&message, self.last_activity()));
                self.emit_error(Route::System, codes::CONNECT_FAILED, &message);
            }
        }
    }

    fn disconnect(&mut self) {
        if self.state() == ConnectionState::Disconnected {
            debug!("disconnect while already disconnected");
            return;
        }
        let had_link = self.link.take().is_some();
        if self.transition(ConnectionStatus::disconnected(self.last_activity())) && had_link {
            info!("disconnected");
            let close = Envelope::connection_close(Some("client disconnect".to_string()))
                .with_source(self.source.clone());
            self.deliver(&close);
        }
    }

    fn send(&self, envelope: &Envelope) {
        let Some(link) = self.link.as_ref() else {
            self.emit_error(Route::Chat, codes::NOT_CONNECTED, "cannot send while not connected");
            return;
        };

        let frame = match codec::encode(envelope) {
            Ok(frame) => frame,
            Err(err) => {
                error!(error = %err, "failed to encode envelope");
                self.emit_error(Route::Chat, codes::ENCODE_FAILED, &err.to_string());
                return;
            }
        };

        match link.outbound.try_send(frame) {
            Ok(()) => {
                self.touch(Utc::now());
                trace!(id = %envelope.id(), "frame sent");
            }
            Err(TrySendError::Full(_)) => {
                warn!(id = %envelope.id(), "send queue full, dropping message");
                self.emit_error(Route::Chat, codes::SEND_QUEUE_FULL, "send queue is full");
            }
            Err(TrySendError::Closed(_)) => {
                self.emit_error(Route::Chat, codes::NOT_CONNECTED, "connection is closing");
            }
        }
    }

    // ─── Link events ────────────────────────────────────────────────────

    fn on_link_event(&mut self, event: Option<LinkEvent>) {
        match event {
            Some(LinkEvent::Frame(text)) => self.on_frame(&text),
            Some(LinkEvent::Closed { reason }) => self.on_closed(reason),
            Some(LinkEvent::Failed(err)) => {
                warn!(error = %err, kind = err.error_kind(), "transport failed");
                let message = err.to_string();
                self.emit_error(Route::System, codes::TRANSPORT_ERROR, &message);
                self.on_closed(Some(message));
            }
            None => self.on_closed(None),
        }
    }

    fn on_frame(&self, text: &str) {
        let now = Utc::now();
        self.touch(now);
        match codec::decode(text, now) {
            Ok(envelope) => self.deliver(&envelope),
            Err(err) => {
                warn!(kind = err.error_kind(), error = %err, "dropping undecodable frame");
                self.emit_error(Route::System, codes::DECODE_FAILED, &err.to_string());
            }
        }
    }

    fn on_closed(&mut self, reason: Option<String>) {
        self.link = None;
        if self.transition(ConnectionStatus::disconnected(self.last_activity())) {
            info!(reason = reason.as_deref().unwrap_or(""), "connection closed");
            let close = Envelope::connection_close(reason).with_source(self.source.clone());
            self.deliver(&close);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use courier_core::{Action, ErrorNotice, Payload};
    use courier_logging::capture_logs;
    use parking_lot::Mutex;
    use tracing::Level;

    use super::*;
    use crate::errors::TransportError;
    use crate::loopback::{LoopbackServer, loopback};

    const WAIT: Duration = Duration::from_secs(2);

    struct Harness {
        engine: Engine,
        server: LoopbackServer,
        messages: Arc<Mutex<Vec<Envelope>>>,
        statuses: Arc<Mutex<Vec<ConnectionStatus>>>,
        _subs: Vec<Disposer>,
    }

    fn harness() -> Harness {
        let (connector, server) = loopback();
        let engine = Engine::with_source(Arc::new(connector), "test-client");
        let messages = Arc::new(Mutex::new(Vec::new()));
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let m = Arc::clone(&messages);
        let s = Arc::clone(&statuses);
        let subs = vec![
            engine.on_message(Arc::new(move |e: &Envelope| m.lock().push(e.clone()))),
            engine.on_status_change(Arc::new(move |st: &ConnectionStatus| s.lock().push(st.clone()))),
        ];
        Harness {
            engine,
            server,
            messages,
            statuses,
            _subs: subs,
        }
    }

    async fn wait_for_state(engine: &Engine, state: ConnectionState) {
        let mut rx = engine.watch_status();
        let reached = tokio::time::timeout(WAIT, rx.wait_for(|s| s.state() == state))
            .await
            .expect("timed out waiting for state")
            .is_ok();
        assert!(reached);
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(WAIT, async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    fn error_code(envelope: &Envelope) -> Option<&str> {
        match envelope.data() {
            Payload::Error(ErrorNotice { code, .. }) => code.as_deref(),
            _ => None,
        }
    }

    async fn connected() -> Harness {
        let h = harness();
        h.engine.connect();
        wait_for_state(&h.engine, ConnectionState::Connected).await;
        h
    }

    #[tokio::test]
    async fn starts_disconnected() {
        let h = harness();
        assert_eq!(h.engine.status(), ConnectionStatus::default());
        assert!(!h.engine.is_connected());
    }

    #[tokio::test]
    async fn connect_publishes_status_and_open() {
        let h = connected().await;
        wait_until(|| !h.messages.lock().is_empty()).await;

        let states: Vec<_> = h.statuses.lock().iter().map(ConnectionStatus::state).collect();
        assert_eq!(states, vec![ConnectionState::Connecting, ConnectionState::Connected]);

        let messages = h.messages.lock();
        assert!(messages[0].is(Route::System, Action::ConnectionOpen));
        assert_eq!(messages[0].source(), "test-client");
        assert!(h.engine.status().last_activity.is_some());
    }

    #[tokio::test]
    async fn send_while_disconnected_reports_not_connected() {
        let h = harness();
        h.engine.send_message("hello", MessageType::Text, None);

        let messages = h.messages.lock();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].is(Route::Chat, Action::ErrorOccurred));
        assert_eq!(error_code(&messages[0]), Some(codes::NOT_CONNECTED));
        assert_eq!(h.server.try_next_sent(), None);
    }

    #[tokio::test]
    async fn send_reaches_server() {
        let h = connected().await;
        let agent = AgentId::from_raw("agent_7");
        h.engine.send_message("**hi**", MessageType::Markdown, Some(&agent));

        let frame = tokio::time::timeout(WAIT, h.server.next_sent()).await.unwrap().unwrap();
        let sent = codec::decode(&frame, Utc::now()).unwrap();
        assert!(sent.is(Route::Chat, Action::MessageSend));
        assert_eq!(sent.agent_id(), Some(&agent));
        assert_eq!(sent.source(), "test-client");
        let msg = sent.chat_message().unwrap();
        assert_eq!(msg.content, "**hi**");
        assert_eq!(msg.message_type, MessageType::Markdown);
    }

    #[tokio::test]
    async fn inbound_frame_is_delivered() {
        let h = connected().await;
        let before = h.engine.status().last_activity;
        tokio::time::sleep(Duration::from_millis(2)).await;

        assert!(h.server.push(r#"{"route":"chat","action":"message:received","data":"pong","order":1}"#));
        wait_until(|| h.messages.lock().len() >= 2).await;

        let received = h.messages.lock()[1].clone();
        assert!(received.is(Route::Chat, Action::MessageReceived));
        assert_eq!(received.source(), "server");
        assert_eq!(received.order(), Some(1));
        assert!(h.engine.status().last_activity > before);
    }

    #[tokio::test]
    async fn malformed_frame_becomes_system_error() {
        let h = connected().await;
        assert!(h.server.push("{ nope"));
        wait_until(|| h.messages.lock().len() >= 2).await;

        let err = h.messages.lock()[1].clone();
        assert!(err.is(Route::System, Action::ErrorOccurred));
        assert_eq!(error_code(&err), Some(codes::DECODE_FAILED));
        assert!(h.engine.is_connected());
    }

    #[tokio::test]
    async fn server_close_disconnects() {
        let h = connected().await;
        assert!(h.server.close(Some("maintenance")));
        wait_for_state(&h.engine, ConnectionState::Disconnected).await;
        wait_until(|| h.messages.lock().len() >= 2).await;

        let close = h.messages.lock()[1].clone();
        assert!(close.is(Route::System, Action::ConnectionClose));
        assert_matches!(close.data(), Payload::Connection(n) if n.reason.as_deref() == Some("maintenance"));
    }

    #[tokio::test]
    async fn transport_failure_reports_and_disconnects() {
        let h = connected().await;
        assert!(h.server.fail(TransportError::WebSocket("reset by peer".into())));
        wait_for_state(&h.engine, ConnectionState::Disconnected).await;
        wait_until(|| h.messages.lock().len() >= 3).await;

        let messages = h.messages.lock();
        assert_eq!(error_code(&messages[1]), Some(codes::TRANSPORT_ERROR));
        assert!(messages[2].is(Route::System, Action::ConnectionClose));
    }

    #[tokio::test]
    async fn connect_failure_then_retry() {
        let h = harness();
        h.server.fail_next_connect(TransportError::Handshake("refused".into()));
        h.engine.connect();
        wait_for_state(&h.engine, ConnectionState::Error).await;

        let status = h.engine.status();
        assert_eq!(status.error.as_deref(), Some("handshake failed: refused"));
        wait_until(|| !h.messages.lock().is_empty()).await;
        {
            let messages = h.messages.lock();
            assert!(messages[0].is(Route::System, Action::ErrorOccurred));
            assert_eq!(error_code(&messages[0]), Some(codes::CONNECT_FAILED));
        }

        h.engine.connect();
        wait_for_state(&h.engine, ConnectionState::Connected).await;
        assert!(h.engine.status().error.is_none());
    }

    #[tokio::test]
    async fn manual_disconnect() {
        let h = connected().await;
        h.engine.disconnect();
        wait_for_state(&h.engine, ConnectionState::Disconnected).await;
        wait_until(|| !h.server.is_linked()).await;
        wait_until(|| h.messages.lock().len() >= 2).await;
        assert!(h.messages.lock()[1].is(Route::System, Action::ConnectionClose));
    }

    #[tokio::test]
    async fn disconnect_clears_error() {
        let h = harness();
        h.server.fail_next_connect(TransportError::Timeout { timeout_ms: 10 });
        h.engine.connect();
        wait_for_state(&h.engine, ConnectionState::Error).await;
        h.engine.disconnect();
        wait_for_state(&h.engine, ConnectionState::Disconnected).await;
        assert!(h.engine.status().error.is_none());
    }

    #[tokio::test]
    async fn connect_while_connected_is_a_quiet_noop() {
        let (logs, _guard) = capture_logs();
        let h = connected().await;
        let transitions = h.statuses.lock().len();

        h.engine.connect();
        wait_until(|| logs.has_event(Level::DEBUG, "already connected")).await;
        assert_eq!(logs.count_at_level(Level::WARN), 0);
        assert_eq!(h.statuses.lock().len(), transitions);
        assert_eq!(h.server.connect_count(), 1);
        assert!(h.engine.is_connected());
    }

    struct HangingConnector;

    #[async_trait]
    impl Connector for HangingConnector {
        async fn open(&self) -> Result<Link, TransportError> {
            std::future::pending().await
        }

        fn endpoint(&self) -> String {
            "hanging".into()
        }
    }

    #[tokio::test]
    async fn disconnect_during_handshake() {
        let engine = Engine::new(Arc::new(HangingConnector));
        engine.connect();
        wait_for_state(&engine, ConnectionState::Connecting).await;

        engine.send_message("early", MessageType::Text, None);
        engine.disconnect();
        wait_for_state(&engine, ConnectionState::Disconnected).await;
    }

    /// Hands out links whose outbound side is never drained.
    struct StalledConnector {
        held: Mutex<Vec<mpsc::Receiver<String>>>,
        keep_inbound: Mutex<Vec<mpsc::Sender<LinkEvent>>>,
    }

    #[async_trait]
    impl Connector for StalledConnector {
        async fn open(&self) -> Result<Link, TransportError> {
            let (out_tx, out_rx) = mpsc::channel(1);
            let (in_tx, in_rx) = mpsc::channel(1);
            self.held.lock().push(out_rx);
            self.keep_inbound.lock().push(in_tx);
            Ok(Link {
                outbound: out_tx,
                inbound: in_rx,
            })
        }

        fn endpoint(&self) -> String {
            "stalled".into()
        }
    }

    #[tokio::test]
    async fn full_send_queue_is_reported() {
        let engine = Engine::new(Arc::new(StalledConnector {
            held: Mutex::new(Vec::new()),
            keep_inbound: Mutex::new(Vec::new()),
        }));
        let codes_seen = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&codes_seen);
        let _sub = engine.on_message(Arc::new(move |e: &Envelope| {
            if let Some(code) = error_code(e) {
                seen.lock().push(code.to_owned());
            }
        }));

        engine.connect();
        wait_for_state(&engine, ConnectionState::Connected).await;
        engine.send_message("one", MessageType::Text, None);
        engine.send_message("two", MessageType::Text, None);

        wait_until(|| !codes_seen.lock().is_empty()).await;
        assert_eq!(*codes_seen.lock(), vec![codes::SEND_QUEUE_FULL.to_string()]);
    }

    #[tokio::test]
    async fn panicking_listener_does_not_stop_delivery() {
        let h = harness();
        let _bad = h
            .engine
            .on_message(Arc::new(|_: &Envelope| panic!("consumer bug")));
        h.engine.connect();
        wait_for_state(&h.engine, ConnectionState::Connected).await;

        assert!(h.server.push(r#"{"route":"system","action":"message:received","data":"x"}"#));
        wait_until(|| h.messages.lock().len() >= 2).await;
    }

    #[tokio::test]
    async fn debug_shows_status() {
        let h = harness();
        let text = format!("{:?}", h.engine);
        assert!(text.contains("test-client"));
        assert!(text.contains("message_listeners: 1"));
    }
}

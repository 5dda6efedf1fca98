//! Connection manager: the public handle and its background task.
//!
//! One task owns the socket, the state machine, the heartbeat, the
//! subscription tracker, and the outbox. The handle sends it commands and
//! observes it through a `watch` channel. Every timer is an optional
//! deadline polled in a single `select!`, so there is never more than one
//! pending reconnect and cancelling one is just clearing a field.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rt_protocol::{ClientMessage, RealtimeError, ServerMessage, validate_channel};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{
    Error as WsError,
    protocol::{CloseFrame, Message, frame::coding::CloseCode},
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::dispatcher::{EventDispatcher, ListenerId};
use crate::error::ClientError;
use crate::heartbeat::HeartbeatClient;
use crate::outbox::Outbox;
use crate::state::{Action, ConnectionState, StateMachine};
use crate::subscriptions::SubscriptionTracker;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type ConnectFuture = Pin<Box<dyn Future<Output = Result<WsStream, ClientError>> + Send>>;

const COMMAND_QUEUE: usize = 64;
const CLOSE_GRACE: Duration = Duration::from_secs(1);
const NORMAL_CLOSE: u16 = 1000;

// ── Status & hooks ──────────────────────────────────────────────────────────

/// Snapshot published whenever any field changes.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Most recent failure; cleared by a successful open
    pub error: Option<String>,
    /// Reconnect attempts since the last successful open
    pub attempts: u32,
    /// Latest ping round trip
    pub latency: Option<Duration>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            error: None,
            attempts: 0,
            latency: None,
        }
    }
}

/// How a socket ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: Option<u16>,
    pub reason: String,
    /// `true` for a normal (1000) close from either side
    pub clean: bool,
}

type OpenHook = Arc<dyn Fn() + Send + Sync>;
type CloseHook = Arc<dyn Fn(&CloseInfo) + Send + Sync>;
type ErrorHook = Arc<dyn Fn(&ClientError) + Send + Sync>;

/// Optional lifecycle callbacks, invoked synchronously on the connection
/// task.
#[derive(Clone, Default)]
pub struct LifecycleHooks {
    on_open: Option<OpenHook>,
    on_close: Option<CloseHook>,
    on_error: Option<ErrorHook>,
}

impl LifecycleHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_open(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_open = Some(Arc::new(f));
        self
    }

    pub fn on_close(mut self, f: impl Fn(&CloseInfo) + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&ClientError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    fn emit_open(&self) {
        if let Some(f) = &self.on_open {
            f();
        }
    }

    fn emit_close(&self, info: &CloseInfo) {
        if let Some(f) = &self.on_close {
            f(info);
        }
    }

    fn emit_error(&self, error: &ClientError) {
        if let Some(f) = &self.on_error {
            f(error);
        }
    }
}

// ── Commands ────────────────────────────────────────────────────────────────

enum Command {
    Connect,
    Disconnect {
        done: oneshot::Sender<()>,
    },
    Send {
        message: ClientMessage,
        sent: oneshot::Sender<bool>,
    },
    Subscribe {
        channel: String,
        done: oneshot::Sender<()>,
    },
    Unsubscribe {
        channel: String,
        done: oneshot::Sender<()>,
    },
    Subscriptions {
        reply: oneshot::Sender<Vec<String>>,
    },
    OutboxLen {
        reply: oneshot::Sender<usize>,
    },
    Shutdown,
}

// ── ConnectionManager (public handle) ───────────────────────────────────────

/// Handle to one managed connection. Dropping it stops the background task
/// and closes the socket.
pub struct ConnectionManager {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    dispatcher: Arc<EventDispatcher>,
    task: JoinHandle<()>,
}

impl ConnectionManager {
    /// Spawn the connection task. Must be called inside a tokio runtime.
    /// The manager starts `disconnected`; call `connect()` to open.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_hooks(config, LifecycleHooks::default())
    }

    pub fn with_hooks(config: ClientConfig, hooks: LifecycleHooks) -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (status_tx, status) = watch::channel(ConnectionStatus::default());
        let dispatcher = Arc::new(EventDispatcher::new());

        let driver = Driver::new(config, hooks, dispatcher.clone(), status_tx);
        let task = tokio::spawn(driver.run(command_rx));

        Self {
            commands,
            status,
            dispatcher,
            task,
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| ClientError::TaskStopped)?;
        rx.await.map_err(|_| ClientError::TaskStopped)
    }

    /// Start connecting. A no-op while already connecting or connected.
    /// Progress is reported through `status()`.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.commands
            .send(Command::Connect)
            .await
            .map_err(|_| ClientError::TaskStopped)
    }

    /// Close the socket with code 1000. Every timer and any in-flight
    /// handshake is cancelled before this returns.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.request(|done| Command::Disconnect { done }).await
    }

    /// Send now if the socket is open (`true`). Otherwise queue it in the
    /// offline outbox when enabled and return `false`.
    pub async fn send_message(&self, message: ClientMessage) -> bool {
        self.request(|sent| Command::Send { message, sent })
            .await
            .unwrap_or(false)
    }

    /// Add `channel` to the desired set; sent immediately when connected
    /// and replayed after every reconnect.
    pub async fn subscribe(&self, channel: &str) -> Result<(), ClientError> {
        validate_channel(channel)?;
        let channel = channel.to_string();
        self.request(|done| Command::Subscribe { channel, done }).await
    }

    pub async fn unsubscribe(&self, channel: &str) -> Result<(), ClientError> {
        validate_channel(channel)?;
        let channel = channel.to_string();
        self.request(|done| Command::Unsubscribe { channel, done })
            .await
    }

    /// Desired channels, sorted.
    pub async fn subscriptions(&self) -> Result<Vec<String>, ClientError> {
        self.request(|reply| Command::Subscriptions { reply }).await
    }

    pub async fn outbox_len(&self) -> Result<usize, ClientError> {
        self.request(|reply| Command::OutboxLen { reply }).await
    }

    pub fn on_message<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ServerMessage) + Send + Sync + 'static,
    {
        self.dispatcher.on_message(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.dispatcher.remove_listener(id)
    }

    pub fn last_message(&self) -> Option<ServerMessage> {
        self.dispatcher.last_message()
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Wait until the published state equals `state`.
    pub async fn wait_for_state(
        &self,
        state: ConnectionState,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        let mut rx = self.status.clone();
        let reached = tokio::time::timeout(timeout, async move {
            rx.wait_for(|status| status.state == state).await.is_ok()
        })
        .await
        .map_err(|_| ClientError::Timeout(format!("waiting for state {state}")))?;

        if reached {
            Ok(())
        } else {
            Err(ClientError::TaskStopped)
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if self.commands.try_send(Command::Shutdown).is_err() {
            self.task.abort();
        }
    }
}

// ── Driver (background task) ────────────────────────────────────────────────

struct Driver {
    config: ClientConfig,
    machine: StateMachine,
    heartbeat: HeartbeatClient,
    subscriptions: SubscriptionTracker,
    outbox: Outbox,
    dispatcher: Arc<EventDispatcher>,
    hooks: LifecycleHooks,
    status: watch::Sender<ConnectionStatus>,
    socket: Option<WsStream>,
    connecting: Option<ConnectFuture>,
    reconnect_at: Option<Instant>,
}

impl Driver {
    fn new(
        config: ClientConfig,
        hooks: LifecycleHooks,
        dispatcher: Arc<EventDispatcher>,
        status: watch::Sender<ConnectionStatus>,
    ) -> Self {
        Self {
            machine: StateMachine::new(config.backoff, config.max_reconnect_attempts),
            heartbeat: HeartbeatClient::new(config.ping_interval, config.pong_timeout),
            subscriptions: SubscriptionTracker::new(),
            outbox: Outbox::new(config.outbox_capacity, config.overflow_policy),
            config,
            dispatcher,
            hooks,
            status,
            socket: None,
            connecting: None,
            reconnect_at: None,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            let reconnect_at = self.reconnect_at;
            let next_ping = self.heartbeat.next_ping();
            let pong_deadline = self.heartbeat.pong_deadline();

            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },

                _ = sleep_until(pong_deadline), if pong_deadline.is_some() => {
                    let timeout = self.heartbeat.pong_timeout();
                    warn!(?timeout, "Pong timeout, server unresponsive");
                    self.connection_lost(ClientError::PongTimeout(timeout), None).await;
                }

                result = poll_connect(&mut self.connecting), if self.connecting.is_some() => {
                    self.connecting = None;
                    self.on_connect_result(result).await;
                }

                frame = next_frame(&mut self.socket), if self.socket.is_some() => {
                    self.on_frame(frame).await;
                }

                _ = sleep_until(reconnect_at), if reconnect_at.is_some() => {
                    self.reconnect_at = None;
                    let actions = self.machine.reconnect_due();
                    self.apply(actions).await;
                }

                _ = sleep_until(next_ping), if next_ping.is_some() => {
                    self.send_ping().await;
                }
            }
        }

        let actions = self.machine.disconnect_requested();
        self.apply(actions).await;
        debug!("Connection task stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => {
                let actions = self.machine.begin_connect();
                self.apply(actions).await;
            }
            Command::Disconnect { done } => {
                info!("Disconnect requested");
                let actions = self.machine.disconnect_requested();
                self.apply(actions).await;
                let _ = done.send(());
            }
            Command::Send { message, sent } => {
                let ok = self.send_message(message).await;
                let _ = sent.send(ok);
            }
            Command::Subscribe { channel, done } => {
                if self.subscriptions.add(&channel) && self.is_open() {
                    if let Err(e) = self.send_frame(&ClientMessage::subscribe(channel)).await {
                        self.connection_lost(e, None).await;
                    }
                }
                let _ = done.send(());
            }
            Command::Unsubscribe { channel, done } => {
                if self.subscriptions.remove(&channel) && self.is_open() {
                    if let Err(e) = self.send_frame(&ClientMessage::unsubscribe(channel)).await {
                        self.connection_lost(e, None).await;
                    }
                }
                let _ = done.send(());
            }
            Command::Subscriptions { reply } => {
                let _ = reply.send(self.subscriptions.channels());
            }
            Command::OutboxLen { reply } => {
                let _ = reply.send(self.outbox.len());
            }
            Command::Shutdown => {}
        }
    }

    /// Run transition actions. A failure while establishing feeds the
    /// unclean-close actions back into the same queue.
    async fn apply(&mut self, actions: Vec<Action>) {
        let mut queue: VecDeque<Action> = actions.into();
        while let Some(action) = queue.pop_front() {
            match action {
                Action::Open => {
                    debug!(url = %self.config.url, "Opening socket");
                    self.connecting = Some(open_socket(
                        self.config.url.clone(),
                        self.config.connect_timeout,
                    ));
                }
                Action::Established => {
                    if let Err(e) = self.establish().await {
                        queue.extend(self.drop_socket(e, None));
                    }
                }
                Action::ScheduleReconnect(delay) => {
                    self.reconnect_at = Some(Instant::now() + delay);
                }
                Action::CancelReconnect => {
                    self.reconnect_at = None;
                }
                Action::CancelTimers => {
                    self.reconnect_at = None;
                    self.connecting = None;
                    self.heartbeat.stop();
                }
                Action::CloseSocket => self.close_socket().await,
            }
        }
        self.publish();
    }

    /// Socket is open: authenticate, replay subscriptions, flush the
    /// outbox, then start the heartbeat.
    async fn establish(&mut self) -> Result<(), ClientError> {
        info!(url = %self.config.url, "Connected");
        self.hooks.emit_open();

        if let Some(token) = self.config.token.clone() {
            self.send_frame(&ClientMessage::authenticate(token)).await?;
        }
        for message in self.subscriptions.replay() {
            self.send_frame(&message).await?;
        }

        let mut pending = self.outbox.drain().into_iter();
        let mut flushed = 0usize;
        while let Some(entry) = pending.next() {
            if let Err(e) = self.send_frame(&entry.message).await {
                self.outbox.restore(std::iter::once(entry).chain(pending));
                return Err(e);
            }
            flushed += 1;
        }
        if flushed > 0 {
            info!(flushed, "Outbox flushed");
        }

        self.heartbeat.start(Instant::now());
        Ok(())
    }

    async fn on_connect_result(&mut self, result: Result<WsStream, ClientError>) {
        match result {
            Ok(stream) => {
                self.socket = Some(stream);
                let actions = self.machine.opened();
                self.apply(actions).await;
            }
            Err(e) => {
                warn!(error = %e, "Connect failed");
                self.hooks.emit_error(&e);
                self.machine.handshake_failed(e.to_string());
                self.publish();
                let actions = self.machine.closed_unclean(e.to_string());
                self.apply(actions).await;
            }
        }
    }

    async fn on_frame(&mut self, frame: Option<Result<Message, WsError>>) {
        match frame {
            Some(Ok(Message::Text(text))) => {
                let Some(event) = self.dispatcher.dispatch_text(text.as_str()) else {
                    return;
                };
                match event {
                    ServerMessage::Pong { timestamp, .. } => {
                        if let Some(latency) = self.heartbeat.on_pong(timestamp, Instant::now()) {
                            debug!(?latency, "Pong");
                            self.publish();
                        }
                    }
                    ServerMessage::AuthSuccess { user_id } => {
                        info!(%user_id, "Authenticated");
                    }
                    ServerMessage::AuthError { code, .. } => {
                        warn!(%code, "Authentication rejected");
                        self.hooks
                            .emit_error(&ClientError::Realtime(RealtimeError::auth(code)));
                    }
                    ServerMessage::Error { code, message } => {
                        warn!(%code, %message, "Server reported an error");
                    }
                    _ => {}
                }
            }
            Some(Ok(Message::Close(frame))) => {
                let code = frame.as_ref().map(|f| u16::from(f.code));
                let reason = frame
                    .as_ref()
                    .map(|f| f.reason.to_string())
                    .unwrap_or_default();
                self.release_socket().await;

                if code == Some(NORMAL_CLOSE) {
                    info!(%reason, "Server closed the connection");
                    self.hooks.emit_close(&CloseInfo {
                        code,
                        reason,
                        clean: true,
                    });
                    let actions = self.machine.closed_clean();
                    self.apply(actions).await;
                } else {
                    let error = ClientError::Closed(match code {
                        Some(code) => format!("code {code}: {reason}"),
                        None => "close without status".into(),
                    });
                    self.connection_lost(error, code).await;
                }
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                self.connection_lost(ClientError::Closed(e.to_string()), None)
                    .await;
            }
            None => {
                self.connection_lost(ClientError::Closed("stream ended".into()), None)
                    .await;
            }
        }
    }

    async fn send_message(&mut self, message: ClientMessage) -> bool {
        if self.is_open() {
            match self.send_frame(&message).await {
                Ok(()) => return true,
                Err(e) => self.connection_lost(e, None).await,
            }
        }

        if self.config.queue_offline {
            match self.outbox.push(message) {
                Ok(None) => debug!(queued = self.outbox.len(), "Queued while offline"),
                Ok(Some(evicted)) => {
                    warn!(kind = evicted.message.kind(), "Outbox full, dropped oldest entry")
                }
                Err(e) => warn!(error = %e, "Outbox full, message rejected"),
            }
        }
        false
    }

    async fn send_ping(&mut self) {
        let Some(ping) = self.heartbeat.ping_due(Instant::now()) else {
            return;
        };
        if let Err(e) = self.send_frame(&ping).await {
            self.connection_lost(e, None).await;
        }
    }

    async fn send_frame(&mut self, message: &ClientMessage) -> Result<(), ClientError> {
        let socket = self.socket.as_mut().ok_or(ClientError::NotConnected)?;
        let json =
            serde_json::to_string(message).map_err(|e| RealtimeError::Protocol(e.to_string()))?;
        socket
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| ClientError::Send(e.to_string()))?;
        debug!(kind = message.kind(), "Sent");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.socket.is_some() && self.machine.state() == ConnectionState::Connected
    }

    /// Forget the socket after an unclean close and decide what comes next.
    fn drop_socket(&mut self, error: ClientError, code: Option<u16>) -> Vec<Action> {
        self.socket = None;
        self.heartbeat.stop();
        warn!(error = %error, "Connection lost");
        self.hooks.emit_close(&CloseInfo {
            code,
            reason: error.to_string(),
            clean: false,
        });
        self.hooks.emit_error(&error);
        self.machine.closed_unclean(error.to_string())
    }

    async fn connection_lost(&mut self, error: ClientError, code: Option<u16>) {
        let actions = self.drop_socket(error, code);
        self.apply(actions).await;
    }

    /// Flush the automatic close reply, then drop the socket.
    async fn release_socket(&mut self) {
        self.heartbeat.stop();
        if let Some(mut socket) = self.socket.take() {
            let _ = tokio::time::timeout(CLOSE_GRACE, socket.flush()).await;
        }
    }

    /// Client-initiated normal close.
    async fn close_socket(&mut self) {
        self.heartbeat.stop();
        let Some(mut socket) = self.socket.take() else {
            return;
        };
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: String::from("client disconnect").into(),
        };
        match tokio::time::timeout(CLOSE_GRACE, socket.close(Some(frame))).await {
            Ok(Ok(())) => debug!("Close frame sent"),
            Ok(Err(e)) => debug!(error = %e, "Close frame failed"),
            Err(_) => debug!("Close frame timed out"),
        }
        self.hooks.emit_close(&CloseInfo {
            code: Some(NORMAL_CLOSE),
            reason: "client disconnect".into(),
            clean: true,
        });
    }

    fn publish(&self) {
        let next = ConnectionStatus {
            state: self.machine.state(),
            error: self.machine.error().map(str::to_owned),
            attempts: self.machine.attempts(),
            latency: self.heartbeat.latency(),
        };
        self.status.send_if_modified(move |current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn open_socket(url: String, timeout: Duration) -> ConnectFuture {
    Box::pin(async move {
        match tokio::time::timeout(timeout, connect_async(url.as_str())).await {
            Ok(Ok((stream, _response))) => Ok(stream),
            Ok(Err(e)) => Err(ClientError::Connect(e.to_string())),
            Err(_) => Err(ClientError::ConnectTimeout(timeout)),
        }
    })
}

async fn poll_connect(pending: &mut Option<ConnectFuture>) -> Result<WsStream, ClientError> {
    match pending.as_mut() {
        Some(connect) => connect.await,
        None => std::future::pending().await,
    }
}

async fn next_frame(socket: &mut Option<WsStream>) -> Option<Result<Message, WsError>> {
    match socket.as_mut() {
        Some(socket) => socket.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::Backoff;
    use crate::outbox::OverflowPolicy;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    /// A WebSocket server that reads every frame and never answers. Returns
    /// its URL and the number of accepted TCP connections.
    async fn silent_server() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepts = Arc::new(AtomicUsize::new(0));
        let counter = accepts.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    while let Some(Ok(_)) = ws.next().await {}
                });
            }
        });
        (format!("ws://127.0.0.1:{port}/ws"), accepts)
    }

    /// A loopback URL with nothing listening on it.
    fn dead_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("ws://127.0.0.1:{port}/ws")
    }

    #[tokio::test]
    async fn starts_disconnected() {
        let manager = ConnectionManager::new(ClientConfig::new(dead_url()));
        assert_eq!(manager.status(), ConnectionStatus::default());
        assert!(manager.last_message().is_none());
    }

    #[tokio::test]
    async fn offline_sends_are_queued_up_to_capacity() {
        let config = ClientConfig::new(dead_url()).with_outbox(3, OverflowPolicy::RejectNew);
        let manager = ConnectionManager::new(config);

        for n in 0..5 {
            assert!(!manager.send_message(ClientMessage::subscribe(format!("ch-{n}"))).await);
        }
        assert_eq!(manager.outbox_len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn offline_queue_can_be_disabled() {
        let config = ClientConfig::new(dead_url()).with_offline_queue(false);
        let manager = ConnectionManager::new(config);
        assert!(!manager.send_message(ClientMessage::ping_now()).await);
        assert_eq!(manager.outbox_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn subscriptions_are_tracked_while_offline() {
        let manager = ConnectionManager::new(ClientConfig::new(dead_url()));
        manager.subscribe("quotes").await.unwrap();
        manager.subscribe("activities").await.unwrap();
        manager.unsubscribe("activities").await.unwrap();
        assert_eq!(manager.subscriptions().await.unwrap(), vec!["quotes"]);

        assert!(matches!(
            manager.subscribe("not a channel").await,
            Err(ClientError::Realtime(RealtimeError::Protocol(_)))
        ));
    }

    #[tokio::test]
    async fn refused_connect_without_retries_ends_disconnected() {
        let errors = Arc::new(AtomicUsize::new(0));
        let counter = errors.clone();
        let hooks = LifecycleHooks::new().on_error(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let config = ClientConfig::new(dead_url()).with_max_reconnect_attempts(0);
        let manager = ConnectionManager::with_hooks(config, hooks);

        let mut status = manager.watch_status();
        manager.connect().await.unwrap();
        let settled = tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|s| s.state == ConnectionState::Disconnected && s.error.is_some()),
        )
        .await
        .expect("state settles")
        .expect("task alive")
        .clone();

        assert!(settled.error.unwrap().contains("exhausted"));
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disconnect_cancels_the_pending_reconnect() {
        let config = ClientConfig::new(dead_url())
            .with_backoff(Backoff::new(
                Duration::from_millis(200),
                1.0,
                Duration::from_millis(200),
            ))
            .with_max_reconnect_attempts(100);
        let manager = ConnectionManager::new(config);

        manager.connect().await.unwrap();
        manager
            .wait_for_state(ConnectionState::Reconnecting, Duration::from_secs(5))
            .await
            .unwrap();

        manager.disconnect().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.status().attempts, 0);

        // Well past the backoff: nothing was rescheduled
        tokio::time::sleep(Duration::from_millis(600)).await;
        let status = manager.status();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert_eq!(status.attempts, 0);
    }

    #[tokio::test]
    async fn missing_pong_forces_a_reconnect() {
        let (url, accepts) = silent_server().await;
        let pong_timeout = Duration::from_millis(100);
        let config = ClientConfig::new(url)
            .with_ping_interval(Duration::from_millis(50))
            .with_pong_timeout(pong_timeout)
            .with_backoff(Backoff::new(
                Duration::from_millis(100),
                1.0,
                Duration::from_millis(100),
            ))
            .with_max_reconnect_attempts(5);
        let manager = ConnectionManager::new(config);

        let mut status = manager.watch_status();
        manager.connect().await.unwrap();
        manager
            .wait_for_state(ConnectionState::Connected, Duration::from_secs(5))
            .await
            .unwrap();

        let lost = tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|s| s.state == ConnectionState::Reconnecting),
        )
        .await
        .expect("pong timeout detected")
        .expect("task alive")
        .clone();
        let error = lost.error.unwrap();
        assert!(error.contains("pong"));
        assert_eq!(error, ClientError::PongTimeout(pong_timeout).to_string());
        assert_eq!(lost.attempts, 1);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while accepts.load(Ordering::SeqCst) < 2 {
            assert!(tokio::time::Instant::now() < deadline, "no second connection");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

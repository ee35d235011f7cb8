//! Realtime notification channel over a websocket.
//!
//! One driver task owns the socket. It runs the [`ChannelMachine`], dials,
//! reads frames, forwards outbound messages and sleeps between reconnects.
//! Dropping the channel aborts the driver, which drops the socket without a
//! close handshake; call [`RealtimeChannel::disconnect`] for a clean close.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

use super::feed::NotificationFeed;
use super::machine::{
    ChannelMachine, ConnectionState, Effect, Input, CLOSE_ABNORMAL, CLOSE_FORBIDDEN,
    CLOSE_UNAUTHORIZED,
};
use super::messages::{parse_inbound, InboundMessage};
use crate::config::NotificationsConfig;
use crate::error::SessionError;
use crate::models::{Notification, TokenKind};
use crate::store::TokenStore;
use crate::utils::{BackgroundTask, LogThrottle};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long `disconnect` waits for the close handshake before aborting.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Published on the channel's broadcast stream.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Opened,
    /// A notification that was not in the feed yet.
    Notification(Notification),
    UnreadCount(u32),
    /// A well-formed frame of a shape this layer does not interpret.
    Message(Value),
    Reconnecting { attempt: u32, delay: Duration },
    Closed,
    /// The server refused the credential; the channel stays closed.
    Rejected { code: u16 },
    /// Reconnect attempts exhausted.
    Fatal(SessionError),
}

enum Command {
    Send(String),
    Disconnect,
}

/// Why an open socket stopped.
enum Ended {
    Closed(u16),
    Disconnect,
}

struct ChannelShared {
    url: Url,
    store: Arc<dyn TokenStore>,
    feed: Arc<NotificationFeed>,
    events: broadcast::Sender<ChannelEvent>,
    state: watch::Sender<ConnectionState>,
    throttle: LogThrottle,
}

impl ChannelShared {
    fn emit(&self, event: ChannelEvent) {
        let _ = self.events.send(event);
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    /// The endpoint with the current access token as the `token` query
    /// parameter.
    async fn endpoint(&self) -> Url {
        let mut url = self.url.clone();
        match self.store.get(TokenKind::Access).await {
            Some(token) => {
                url.query_pairs_mut().append_pair("token", &token);
            }
            None => debug!("Dialing realtime channel without an access token"),
        }
        url
    }

    async fn dial(&self) -> Result<WsStream, u16> {
        let url = self.endpoint().await;
        match connect_async(url.as_str()).await {
            Ok((ws, _response)) => Ok(ws),
            Err(WsError::Http(response)) => {
                let status = response.status().as_u16();
                warn!(status, "Realtime handshake refused");
                Err(match status {
                    401 => CLOSE_UNAUTHORIZED,
                    403 => CLOSE_FORBIDDEN,
                    _ => CLOSE_ABNORMAL,
                })
            }
            Err(e) => {
                if let Some(suppressed) = self.throttle.should_emit("channel.dial_failed") {
                    warn!(suppressed, "Realtime channel unreachable: {}", e);
                }
                Err(CLOSE_ABNORMAL)
            }
        }
    }

    fn handle_text(&self, text: &str) {
        match parse_inbound(text) {
            Ok(InboundMessage::Notification(notification)) => {
                if self.feed.push(notification.clone()) {
                    debug!(id = notification.id, "Realtime notification");
                    self.emit(ChannelEvent::Notification(notification));
                }
            }
            Ok(InboundMessage::UnreadCount(count)) => {
                self.feed.set_unread_count(count);
                self.emit(ChannelEvent::UnreadCount(count));
            }
            Ok(InboundMessage::Other(value)) => self.emit(ChannelEvent::Message(value)),
            Err(e) => {
                if let Some(suppressed) = self.throttle.should_emit("channel.malformed_frame") {
                    warn!(suppressed, "Dropping malformed realtime frame: {}", e);
                }
            }
        }
    }

    /// Pump an open socket until it closes or a disconnect is requested.
    async fn run_open(&self, ws: WsStream, commands: &mut mpsc::UnboundedReceiver<Command>) -> Ended {
        let (mut write, mut read) = ws.split();
        loop {
            tokio::select! {
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_text(&text),
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.map(|f| u16::from(f.code)).unwrap_or(CLOSE_ABNORMAL);
                        debug!(code, "Realtime channel closed by server");
                        // Reading the close frame only queues our reply.
                        if let Err(e) = write.flush().await {
                            debug!("Could not acknowledge close: {}", e);
                        }
                        return Ended::Closed(code);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("Realtime socket error: {}", e);
                        return Ended::Closed(CLOSE_ABNORMAL);
                    }
                    None => return Ended::Closed(CLOSE_ABNORMAL),
                },
                command = commands.recv() => match command {
                    Some(Command::Send(text)) => {
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            debug!("Realtime send failed: {}", e);
                            return Ended::Closed(CLOSE_ABNORMAL);
                        }
                    }
                    Some(Command::Disconnect) | None => {
                        let close = CloseFrame {
                            code: CloseCode::Normal,
                            reason: "".into(),
                        };
                        if let Err(e) = write.send(Message::Close(Some(close))).await {
                            debug!("Could not send close frame: {}", e);
                        }
                        return Ended::Disconnect;
                    }
                },
            }
        }
    }
}

async fn drive(
    shared: Arc<ChannelShared>,
    mut machine: ChannelMachine,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut effect = machine.reduce(Input::Connect);

    loop {
        shared.set_state(machine.state());
        match effect {
            Effect::Dial => {
                effect = match shared.dial().await {
                    Ok(ws) => {
                        machine.reduce(Input::Opened);
                        shared.set_state(machine.state());
                        shared.throttle.reset("channel.dial_failed");
                        info!(
                            event_name = "channel.opened",
                            event_domain = "notifications",
                            "Realtime channel open"
                        );
                        shared.emit(ChannelEvent::Opened);
                        match shared.run_open(ws, &mut commands).await {
                            Ended::Closed(code) => machine.reduce(Input::Closed(code)),
                            Ended::Disconnect => {
                                machine.reduce(Input::Disconnect);
                                Effect::None
                            }
                        }
                    }
                    Err(code) => machine.reduce(Input::Closed(code)),
                };
            }
            Effect::ScheduleReconnect { attempt, delay } => {
                info!(attempt, delay_ms = delay.as_millis() as u64, "Scheduling realtime reconnect");
                shared.emit(ChannelEvent::Reconnecting { attempt, delay });
                let sleep = tokio::time::sleep(delay);
                tokio::pin!(sleep);
                effect = loop {
                    tokio::select! {
                        _ = &mut sleep => break machine.reduce(Input::RetryElapsed),
                        command = commands.recv() => match command {
                            Some(Command::Send(_)) => debug!("Dropping message queued while closed"),
                            Some(Command::Disconnect) | None => break machine.reduce(Input::Disconnect),
                        },
                    }
                };
            }
            Effect::Rejected { code } => {
                warn!(
                    event_name = "channel.rejected",
                    event_domain = "notifications",
                    code,
                    "Realtime channel rejected the credential; not reconnecting"
                );
                shared.emit(ChannelEvent::Rejected { code });
                break;
            }
            Effect::Fatal { attempts } => {
                error!(
                    event_name = "channel.fatal",
                    event_domain = "notifications",
                    attempts,
                    "Realtime channel gave up"
                );
                shared.emit(ChannelEvent::Fatal(SessionError::ChannelFatal { attempts }));
                break;
            }
            Effect::None => break,
        }
    }

    shared.set_state(machine.state());
    shared.emit(ChannelEvent::Closed);
}

/// `connect` / `send` / `disconnect` over the notification websocket.
pub struct RealtimeChannel {
    shared: Arc<ChannelShared>,
    max_attempts: u32,
    retry_delay: Duration,
    outbound: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    driver: Mutex<Option<BackgroundTask>>,
}

impl RealtimeChannel {
    pub fn new(
        config: &NotificationsConfig,
        store: Arc<dyn TokenStore>,
        feed: Arc<NotificationFeed>,
    ) -> Result<Self, SessionError> {
        let url = Url::parse(&config.ws_url)
            .map_err(|e| SessionError::Config(format!("invalid ws_url {:?}: {}", config.ws_url, e)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(SessionError::Config(format!(
                "ws_url must use ws:// or wss://, got {:?}",
                config.ws_url
            )));
        }
        let (events, _) = broadcast::channel(128);
        let (state, _) = watch::channel(ConnectionState::ClosedClean);

        Ok(RealtimeChannel {
            shared: Arc::new(ChannelShared {
                url,
                store,
                feed,
                events,
                state,
                throttle: LogThrottle::new(Duration::from_secs(60)),
            }),
            max_attempts: config.max_reconnect_attempts,
            retry_delay: Duration::from_millis(config.reconnect_interval_ms),
            outbound: Mutex::new(None),
            driver: Mutex::new(None),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.shared.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Open the channel. No-op while a connection is open or being retried.
    pub fn connect(&self) {
        let mut driver = lock(&self.driver);
        if driver.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("Realtime channel already running");
            return;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.outbound) = Some(tx);
        self.shared.set_state(ConnectionState::Connecting);

        let machine = ChannelMachine::new(self.max_attempts, self.retry_delay);
        *driver = Some(BackgroundTask::spawn(
            "notifications.channel",
            drive(self.shared.clone(), machine, rx),
        ));
    }

    /// Send a JSON message. Returns false, and queues nothing, unless the
    /// channel is open.
    pub fn send<T: Serialize>(&self, message: &T) -> bool {
        if self.state() != ConnectionState::Open {
            if let Some(suppressed) = self.shared.throttle.should_emit("channel.send_while_closed") {
                warn!(suppressed, state = ?self.state(), "Realtime channel not open; message dropped");
            }
            return false;
        }
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                warn!("Could not encode realtime message: {}", e);
                return false;
            }
        };
        match lock(&self.outbound).as_ref() {
            Some(tx) => tx.send(Command::Send(text)).is_ok(),
            None => false,
        }
    }

    /// Close the channel and cancel any pending reconnect.
    pub async fn disconnect(&self) {
        let Some(task) = lock(&self.driver).take() else {
            return;
        };
        if let Some(tx) = lock(&self.outbound).take() {
            let _ = tx.send(Command::Disconnect);
        }

        let mut state = self.watch_state();
        let closed = tokio::time::timeout(CLOSE_GRACE, state.wait_for(|s| s.is_terminal()))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false);
        if !closed {
            debug!("Realtime channel did not close in time; aborting");
        }
        task.cancel();
        self.shared.set_state(ConnectionState::ClosedClean);
        info!(
            event_name = "channel.disconnected",
            event_domain = "notifications",
            "Realtime channel disconnected"
        );
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

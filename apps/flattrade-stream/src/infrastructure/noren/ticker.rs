//! Ticker
//!
//! Connection manager for the Noren tick feed. Owns the connection state
//! machine, the desired subscription set, heartbeat and liveness checks, and
//! the reconnection schedule.
//!
//! # Lifecycle
//!
//! ```text
//! Idle -> Connecting -> AwaitingAck -> Ready
//!            ^              |            |
//!            |              v            v
//!            +-------- Reconnecting <----+
//!                           |
//!                           v
//!                       Exhausted
//! ```
//!
//! `close()` moves any state through `Closing` back to `Idle`.
//!
//! # Concurrency
//!
//! A single driver task serialises every transition: transport events,
//! caller commands, timer ticks and probe results all funnel into it.
//! Handlers mutate the shared core under one lock and return the async
//! work (closing the transport, spawning a connect, emitting events) to be
//! done after the lock is released. Caller-facing reads and subscription
//! changes take the same lock, so they never observe a half-applied
//! transition.
//!
//! The driver never waits on the event consumer. Ticks that find the channel
//! full are dropped; control events queue in a bounded backlog that drains as
//! the consumer catches up, and ticks are dropped while it is non-empty so
//! event order is kept.
//!
//! Every connect attempt carries a session number. Events from an older
//! session are ignored, so a socket torn down by a forced reconnect cannot
//! disturb its replacement.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    Clock, CloseMode, ReachabilityProbe, SystemClock, TokenExchange, TokenExchangeError,
    Transport, TransportError, TransportEvent, TransportEventKind,
};
use crate::domain::streaming::{ConnectionState, HealthMetrics, Tick};
use crate::domain::subscription::{
    SubscribeOutcome, SubscriptionGroups, SubscriptionMode, SubscriptionRegistry,
    SubscriptionToken, UnsubscribeFilter,
};
use crate::infrastructure::metrics;

use super::auth::{ACK_TIMEOUT, AuthError, Credentials, verify_ack};
use super::codec::NorenCodec;
use super::heartbeat::{ForceReason, HealthConfig, HealthMonitor, LivenessVerdict};
use super::messages::{FeedFrame, SubscriptionAction};
use super::probe::TcpProbe;
use super::reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
use super::transport::WebSocketTransport;

/// Production tick feed URL.
pub const DEFAULT_WS_URL: &str = "wss://piconnect.flattrade.in/PiConnectWSTp/";

/// Control events held for a slow consumer before the oldest is dropped.
const CONTROL_BACKLOG: usize = 1024;

// =============================================================================
// Error Type
// =============================================================================

/// Errors reported by the ticker on its event channel.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TickerError {
    /// Transport failed to open or broke.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Session was rejected or never acknowledged.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// Connection dropped with an error.
    #[error("connection lost: {0}")]
    Disconnected(String),

    /// Reconnection budget spent.
    #[error(transparent)]
    Reconnect(#[from] ReconnectError),

    /// Access token exchange failed.
    #[error("token exchange failed: {0}")]
    TokenExchange(#[from] TokenExchangeError),
}

// =============================================================================
// Ticker Events
// =============================================================================

/// Events emitted by the ticker.
#[derive(Debug, Clone)]
pub enum TickerEvent {
    /// Transport opened; the identify frame is on its way.
    Connected,
    /// Session acknowledged and subscriptions replayed.
    Ready,
    /// Market data tick.
    Tick(Tick),
    /// Connection closed.
    Closed {
        /// Whether the server initiated the close.
        remote: bool,
    },
    /// A reconnect attempt was scheduled.
    Reconnecting {
        /// Attempt number within the current schedule.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
        /// Whether a liveness check forced it.
        forced: bool,
    },
    /// Reconnection gave up.
    Exhausted {
        /// Attempts spent.
        attempts: u32,
    },
    /// Non-fatal error.
    Error(TickerError),
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the ticker.
#[derive(Debug, Clone)]
pub struct TickerConfig {
    /// WebSocket URL.
    pub url: String,
    /// Session credentials.
    pub credentials: Credentials,
    /// Reconnection schedule.
    pub reconnect: ReconnectConfig,
    /// Heartbeat and liveness checks.
    pub health: HealthConfig,
    /// Reconnect automatically after a drop.
    pub auto_reconnect: bool,
    /// Limit on opening the transport.
    pub connect_timeout: Duration,
    /// Limit on waiting for the session acknowledgement.
    pub ack_timeout: Duration,
    /// Capacity of the event channel.
    pub event_capacity: usize,
}

impl TickerConfig {
    /// Configuration for the production feed.
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self::with_url(DEFAULT_WS_URL, credentials)
    }

    /// Configuration for a custom feed URL.
    #[must_use]
    pub fn with_url(url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            url: url.into(),
            credentials,
            reconnect: ReconnectConfig::default(),
            health: HealthConfig::default(),
            auto_reconnect: true,
            connect_timeout: Duration::from_secs(5),
            ack_timeout: ACK_TIMEOUT,
            event_capacity: 4096,
        }
    }
}

// =============================================================================
// Shared State
// =============================================================================

enum Command {
    Connect,
    Close(oneshot::Sender<()>),
    EnableReconnect { interval: Duration, retries: u32 },
    DisableReconnect,
    SetAccessToken(String),
}

struct Core {
    state: ConnectionState,
    url: String,
    credentials: Credentials,
    session: u64,
    policy: ReconnectPolicy,
    monitor: HealthMonitor,
    auto_reconnect: bool,
    auth_hold: bool,
    monitoring: bool,
    probe_in_flight: bool,
    reconnect_at: Option<Instant>,
    ack_deadline: Option<Instant>,
}

impl Core {
    fn set_state(&mut self, next: ConnectionState) {
        if self.state != next {
            tracing::debug!(from = %self.state, to = %next, "Ticker state changed");
            self.state = next;
            metrics::set_connection_state(next);
        }
    }

    /// Liveness checks pause while exhausted or waiting on a new token.
    fn checks_paused(&self) -> bool {
        !self.monitoring || self.auth_hold || self.state == ConnectionState::Exhausted
    }
}

struct Shared {
    core: Mutex<Core>,
    registry: SubscriptionRegistry,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    codec: NorenCodec,
}

impl Shared {
    /// Send a subscription frame per non-empty group. Caller holds the core lock.
    fn send_groups(&self, action: SubscriptionAction, groups: &SubscriptionGroups) {
        for (mode, tokens) in groups.non_empty() {
            match self.codec.encode_subscription(action, mode, tokens) {
                Ok(frame) => {
                    if !self.transport.send(frame) {
                        tracing::warn!(mode = mode.as_str(), "Subscription frame not sent");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Failed to encode subscription"),
            }
        }
    }
}

/// Work produced by a transition, applied once the core lock is released.
#[derive(Default)]
struct Effects {
    close: Option<CloseMode>,
    open: Option<(u64, String)>,
    probe: bool,
    finish_close: Option<oneshot::Sender<()>>,
    events: Vec<TickerEvent>,
    ticks: Vec<Tick>,
}

// =============================================================================
// Ticker
// =============================================================================

/// Handle to a running ticker.
///
/// Dropping the handle stops the driver and aborts the connection.
pub struct Ticker {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Ticker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ticker")
            .field("state", &self.state())
            .field("subscriptions", &self.shared.registry.len())
            .finish_non_exhaustive()
    }
}

impl Ticker {
    /// Start a ticker over the given ports.
    ///
    /// Returns the handle and the event stream. The ticker stays `Idle` until
    /// [`Ticker::connect`]. Must be called inside a Tokio runtime.
    #[must_use]
    pub fn new(
        config: TickerConfig,
        transport: Arc<dyn Transport>,
        probe: Arc<dyn ReachabilityProbe>,
        clock: Arc<dyn Clock>,
    ) -> (Self, mpsc::Receiver<TickerEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let shared = Arc::new(Shared {
            core: Mutex::new(Core {
                state: ConnectionState::Idle,
                url: config.url,
                credentials: config.credentials,
                session: 0,
                policy: ReconnectPolicy::new(config.reconnect),
                monitor: HealthMonitor::new(config.health.clone()),
                auto_reconnect: config.auto_reconnect,
                auth_hold: false,
                monitoring: false,
                probe_in_flight: false,
                reconnect_at: None,
                ack_deadline: None,
            }),
            registry: SubscriptionRegistry::new(),
            transport,
            clock,
            codec: NorenCodec::new(),
        });

        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (probe_tx, probe_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            shared: Arc::clone(&shared),
            probe,
            timings: Timings {
                connect: config.connect_timeout,
                ack: config.ack_timeout,
                heartbeat: config.health.heartbeat_interval,
                check: config.health.check_interval,
                probe: config.health.probe_timeout,
            },
            events: event_tx,
            backlog: VecDeque::new(),
            commands: command_rx,
            transport_tx,
            transport_rx,
            probe_tx,
            probe_rx,
            cancel: cancel.clone(),
            connect_task: None,
            heartbeat: None,
            health: None,
        };
        tokio::spawn(driver.run());

        (
            Self {
                shared,
                commands: command_tx,
                cancel,
            },
            event_rx,
        )
    }

    /// Start a ticker over the WebSocket transport, TCP probe and system clock.
    #[must_use]
    pub fn from_config(config: TickerConfig) -> (Self, mpsc::Receiver<TickerEvent>) {
        let probe = TcpProbe::with_timeout(config.health.probe_timeout);
        Self::new(
            config,
            Arc::new(WebSocketTransport::new()),
            Arc::new(probe),
            Arc::new(SystemClock),
        )
    }

    /// Exchange a login request code for an access token, then start a ticker.
    pub async fn spawn_with_token_exchange(
        mut config: TickerConfig,
        exchange: &dyn TokenExchange,
        request_code: &str,
    ) -> Result<(Self, mpsc::Receiver<TickerEvent>), TickerError> {
        let token = exchange.exchange(request_code).await?;
        config.credentials.set_access_token(token);
        Ok(Self::from_config(config))
    }

    /// Begin connecting. Ignored unless the ticker is `Idle`.
    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    /// Close the connection and wait until the ticker is `Idle`.
    ///
    /// Desired subscriptions are kept for the next `connect`.
    pub async fn close(&self) {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Close(tx));
        let _ = rx.await;
    }

    /// Turn automatic reconnection on with a new base interval and budget.
    ///
    /// Intervals under five seconds are raised to five seconds. Revives an
    /// exhausted ticker.
    pub fn enable_reconnect(&self, interval: Duration, retries: u32) {
        self.command(Command::EnableReconnect { interval, retries });
    }

    /// Turn automatic reconnection off and cancel any pending attempt.
    pub fn disable_reconnect(&self) {
        self.command(Command::DisableReconnect);
    }

    /// Replace the access token. A ticker held after an auth rejection
    /// reconnects with the new token straight away.
    pub fn set_access_token(&self, token: impl Into<String>) {
        self.command(Command::SetAccessToken(token.into()));
    }

    /// Add tokens to the desired set in `mode`.
    ///
    /// The request goes out at once when ready; otherwise it is replayed on
    /// the next `Ready`. A token already desired in the other mode is
    /// unsubscribed from that mode first.
    pub fn subscribe(
        &self,
        tokens: impl IntoIterator<Item = SubscriptionToken>,
        mode: SubscriptionMode,
    ) {
        let SubscribeOutcome { accepted, replaced } =
            self.shared.registry.subscribe(tokens, mode);
        if accepted.is_empty() {
            return;
        }
        metrics::set_subscriptions(self.shared.registry.len());

        let core = self.shared.core.lock();
        if core.state == ConnectionState::Ready {
            // Stop the old stream before asking for the new one.
            self.shared.send_groups(SubscriptionAction::Unsubscribe, &replaced);
            let groups = SubscriptionGroups::single(mode, accepted);
            self.shared.send_groups(SubscriptionAction::Subscribe, &groups);
        } else {
            tracing::debug!(
                count = accepted.len(),
                state = %core.state,
                "Subscription deferred until ready"
            );
        }
    }

    /// Subscribe to `tokens` on one exchange.
    pub fn subscribe_tokens<S: AsRef<str>>(
        &self,
        exchange: &str,
        tokens: &[S],
        mode: SubscriptionMode,
    ) {
        self.subscribe(SubscriptionToken::many(exchange, tokens), mode);
    }

    /// Remove tokens from the desired set.
    ///
    /// `filter` decides per token whether to remove it; without one the
    /// default guard applies. Returns what was removed. When ready, the
    /// matching unsubscribe frames are sent.
    pub fn unsubscribe(
        &self,
        tokens: impl IntoIterator<Item = SubscriptionToken>,
        filter: Option<&dyn Fn(&SubscriptionToken, SubscriptionMode) -> bool>,
    ) -> SubscriptionGroups {
        let removed = self.shared.registry.unsubscribe(tokens, filter);
        if removed.is_empty() {
            return removed;
        }
        metrics::set_subscriptions(self.shared.registry.len());

        let core = self.shared.core.lock();
        if core.state == ConnectionState::Ready {
            self.shared.send_groups(SubscriptionAction::Unsubscribe, &removed);
        }
        removed
    }

    /// Unsubscribe `tokens` on one exchange using the default guard.
    pub fn unsubscribe_tokens<S: AsRef<str>>(
        &self,
        exchange: &str,
        tokens: &[S],
    ) -> SubscriptionGroups {
        self.unsubscribe(SubscriptionToken::many(exchange, tokens), None)
    }

    /// Install the guard consulted by unfiltered unsubscribes.
    pub fn set_unsubscribe_guard(&self, guard: Option<UnsubscribeFilter>) {
        self.shared.registry.set_default_filter(guard);
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.core.lock().state
    }

    /// Whether the session is acknowledged.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Liveness counters.
    #[must_use]
    pub fn health_metrics(&self) -> HealthMetrics {
        let core = self.shared.core.lock();
        core.monitor.metrics(core.policy.mode())
    }

    /// Desired subscriptions grouped by mode.
    #[must_use]
    pub fn subscriptions(&self) -> SubscriptionGroups {
        self.shared.registry.replay_plan()
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::warn!("Ticker driver has stopped");
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// =============================================================================
// Driver
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Timings {
    connect: Duration,
    ack: Duration,
    heartbeat: Duration,
    check: Duration,
    probe: Duration,
}

struct Driver {
    shared: Arc<Shared>,
    probe: Arc<dyn ReachabilityProbe>,
    timings: Timings,
    events: mpsc::Sender<TickerEvent>,
    backlog: VecDeque<TickerEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    transport_tx: mpsc::UnboundedSender<TransportEvent>,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    probe_tx: mpsc::UnboundedSender<bool>,
    probe_rx: mpsc::UnboundedReceiver<bool>,
    cancel: CancellationToken,
    connect_task: Option<JoinHandle<()>>,
    heartbeat: Option<Interval>,
    health: Option<Interval>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            let (reconnect_at, ack_deadline) = {
                let core = self.shared.core.lock();
                (core.reconnect_at, core.ack_deadline)
            };

            let effects = tokio::select! {
                () = self.cancel.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                Some(event) = self.transport_rx.recv() => self.on_transport_event(event),
                Some(up) = self.probe_rx.recv() => self.on_probe_result(up),
                () = sleep_until(reconnect_at) => self.on_reconnect_due(),
                () = sleep_until(ack_deadline) => self.on_ack_timeout(),
                () = tick(&mut self.heartbeat) => self.on_heartbeat(),
                () = tick(&mut self.health) => self.on_health_check(),
                permit = self.events.reserve(), if !self.backlog.is_empty() => {
                    match permit {
                        Ok(permit) => {
                            if let Some(event) = self.backlog.pop_front() {
                                permit.send(event);
                            }
                        }
                        Err(_) => self.backlog.clear(),
                    }
                    Effects::default()
                }
            };

            self.apply(effects).await;
            self.sync_timers();
        }

        tracing::info!("Ticker stopped");
        self.abort_connect();
        self.shared.transport.close(CloseMode::Abortive).await;
        let mut core = self.shared.core.lock();
        core.session += 1;
        core.set_state(ConnectionState::Idle);
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    fn on_command(&self, command: Command) -> Effects {
        let mut fx = Effects::default();
        let now = self.shared.clock.now();
        let mut core = self.shared.core.lock();

        match command {
            Command::Connect => {
                if core.state != ConnectionState::Idle {
                    tracing::debug!(state = %core.state, "Connect ignored");
                    return fx;
                }
                if let Err(e) = core.credentials.validate() {
                    tracing::error!(error = %e, "Cannot connect");
                    fx.events.push(TickerEvent::Error(e.into()));
                    return fx;
                }
                tracing::info!(url = %core.url, "Connecting to tick feed");
                core.monitor.start_session(now);
                core.monitoring = true;
                core.auth_hold = false;
                core.policy.reset();
                begin_attempt(&mut core, &mut fx);
            }
            Command::Close(done) => {
                fx.finish_close = Some(done);
                if core.state == ConnectionState::Idle {
                    return fx;
                }
                tracing::info!("Closing ticker");
                core.set_state(ConnectionState::Closing);
                core.session += 1;
                core.reconnect_at = None;
                core.ack_deadline = None;
                core.monitoring = false;
                core.probe_in_flight = false;
                core.auth_hold = false;
                core.monitor.stop();
                fx.close = Some(CloseMode::Graceful);
            }
            Command::EnableReconnect { interval, retries } => {
                core.auto_reconnect = true;
                core.policy.reconfigure(interval, retries);
                tracing::info!(
                    interval_secs = core.policy.config().base_interval.as_secs(),
                    retries,
                    "Automatic reconnect enabled"
                );
                if core.state == ConnectionState::Exhausted || core.auth_hold {
                    core.auth_hold = false;
                    core.monitor.resume(now);
                    schedule_reconnect(&mut core, &mut fx);
                }
            }
            Command::DisableReconnect => {
                core.auto_reconnect = false;
                tracing::info!("Automatic reconnect disabled");
                if matches!(
                    core.state,
                    ConnectionState::Reconnecting | ConnectionState::Exhausted
                ) {
                    go_idle(&mut core);
                }
            }
            Command::SetAccessToken(token) => {
                core.credentials.set_access_token(token);
                tracing::info!("Access token replaced");
                if core.auth_hold {
                    core.auth_hold = false;
                    core.monitor.resume(now);
                    core.policy.reset();
                    begin_attempt(&mut core, &mut fx);
                }
            }
        }

        fx
    }

    // -------------------------------------------------------------------------
    // Transport events
    // -------------------------------------------------------------------------

    fn on_transport_event(&self, event: TransportEvent) -> Effects {
        let mut fx = Effects::default();
        let now = self.shared.clock.now();
        let mut core = self.shared.core.lock();

        if event.session != core.session {
            tracing::trace!(
                event_session = event.session,
                current = core.session,
                "Ignoring event from stale session"
            );
            return fx;
        }

        match event.kind {
            TransportEventKind::Opened => {
                if core.state != ConnectionState::Connecting {
                    return fx;
                }
                core.set_state(ConnectionState::AwaitingAck);
                match self.shared.codec.encode_connect(&core.credentials) {
                    Ok(frame) => {
                        self.shared.transport.send(frame);
                    }
                    Err(e) => tracing::error!(error = %e, "Failed to encode identify frame"),
                }
                core.ack_deadline = Some(Instant::now() + self.timings.ack);
                fx.events.push(TickerEvent::Connected);
            }
            TransportEventKind::Message(text) => {
                core.monitor.record_inbound(now);
                self.on_frame(&mut core, &mut fx, &text, now);
            }
            TransportEventKind::Closed { remote } => {
                if core.state.is_attempting() || core.state == ConnectionState::Ready {
                    tracing::info!(remote, "Tick feed connection closed");
                    fx.events.push(TickerEvent::Closed { remote });
                    connection_lost(&mut core, &mut fx);
                }
            }
            TransportEventKind::Error(message) => {
                if core.state.is_attempting() || core.state == ConnectionState::Ready {
                    tracing::warn!(error = %message, "Tick feed connection error");
                    fx.events
                        .push(TickerEvent::Error(TickerError::Disconnected(message)));
                    connection_lost(&mut core, &mut fx);
                }
            }
        }

        fx
    }

    fn on_frame(
        &self,
        core: &mut Core,
        fx: &mut Effects,
        text: &str,
        now: DateTime<Utc>,
    ) {
        let frame = match self.shared.codec.decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed frame");
                metrics::record_malformed_frame();
                return;
            }
        };

        match frame {
            FeedFrame::ConnectAck(ack) => {
                if core.state != ConnectionState::AwaitingAck {
                    tracing::debug!(state = %core.state, "Unexpected acknowledgement");
                    return;
                }
                core.ack_deadline = None;
                match verify_ack(&ack) {
                    Ok(()) => self.become_ready(core, fx, now),
                    Err(e) => {
                        tracing::error!(error = %e, "Session rejected");
                        core.auth_hold = true;
                        core.monitor.on_attempt_failed();
                        core.session += 1;
                        core.set_state(ConnectionState::Reconnecting);
                        core.reconnect_at = None;
                        fx.close = Some(CloseMode::Abortive);
                        fx.events.push(TickerEvent::Error(e.into()));
                    }
                }
            }
            FeedFrame::Unknown => tracing::trace!("Ignoring unrecognised frame"),
            frame => {
                if core.state != ConnectionState::Ready {
                    tracing::trace!(frame = frame.as_str(), "Tick before ready dropped");
                    return;
                }
                if let Some(tick) = frame.into_tick(now) {
                    metrics::record_tick(tick.kind);
                    fx.ticks.push(tick);
                }
            }
        }
    }

    fn become_ready(&self, core: &mut Core, fx: &mut Effects, now: DateTime<Utc>) {
        core.policy.reset();
        core.monitor.on_ready(now);
        core.set_state(ConnectionState::Ready);

        let plan = self.shared.registry.replay_plan();
        if !plan.is_empty() {
            tracing::info!(count = plan.len(), "Replaying subscriptions");
            self.shared.send_groups(SubscriptionAction::Subscribe, &plan);
        }

        tracing::info!("Tick feed ready");
        fx.events.push(TickerEvent::Ready);
    }

    // -------------------------------------------------------------------------
    // Timers
    // -------------------------------------------------------------------------

    fn on_reconnect_due(&self) -> Effects {
        let mut fx = Effects::default();
        let mut core = self.shared.core.lock();
        core.reconnect_at = None;
        if core.state == ConnectionState::Reconnecting && !core.auth_hold {
            tracing::info!(attempt = core.policy.attempt_count(), "Reconnecting to tick feed");
            begin_attempt(&mut core, &mut fx);
        }
        fx
    }

    fn on_ack_timeout(&self) -> Effects {
        let mut fx = Effects::default();
        let mut core = self.shared.core.lock();
        core.ack_deadline = None;
        if core.state != ConnectionState::AwaitingAck {
            return fx;
        }

        tracing::warn!(
            timeout_secs = self.timings.ack.as_secs(),
            "Session acknowledgement timed out"
        );
        fx.close = Some(CloseMode::Abortive);
        fx.events
            .push(TickerEvent::Error(AuthError::AckTimeout(self.timings.ack).into()));
        connection_lost(&mut core, &mut fx);
        fx
    }

    fn on_heartbeat(&self) -> Effects {
        let mut core = self.shared.core.lock();
        if core.state == ConnectionState::Ready
            && self
                .shared
                .transport
                .send(self.shared.codec.heartbeat().to_string())
        {
            let now = self.shared.clock.now();
            core.monitor.record_heartbeat(now);
            tracing::trace!("Heartbeat sent");
        }
        Effects::default()
    }

    fn on_health_check(&self) -> Effects {
        let mut fx = Effects::default();
        let mut core = self.shared.core.lock();
        if core.checks_paused() || core.probe_in_flight {
            return fx;
        }
        core.probe_in_flight = true;
        fx.probe = true;
        fx
    }

    fn on_probe_result(&self, network_up: bool) -> Effects {
        let mut fx = Effects::default();
        let now = self.shared.clock.now();
        let mut core = self.shared.core.lock();
        core.probe_in_flight = false;
        if core.checks_paused() {
            return fx;
        }

        let ready = core.state == ConnectionState::Ready;
        match core.monitor.evaluate(now, network_up, ready) {
            LivenessVerdict::Healthy => tracing::trace!("Connection healthy"),
            LivenessVerdict::Degraded { failures } => {
                tracing::warn!(failures, network_up, "Liveness check failed");
            }
            LivenessVerdict::EnsureReconnect { failures } => {
                tracing::debug!(failures, state = %core.state, "Not ready, ensuring reconnect");
                if core.state == ConnectionState::Reconnecting && core.reconnect_at.is_none() {
                    schedule_reconnect(&mut core, &mut fx);
                }
            }
            LivenessVerdict::ForceReconnect(reason) => {
                force_reconnect(&mut core, &mut fx, reason);
            }
            LivenessVerdict::Suppressed(reason) => {
                tracing::debug!(reason = reason.as_str(), "Forced reconnect suppressed");
            }
        }
        fx
    }

    // -------------------------------------------------------------------------
    // Effects
    // -------------------------------------------------------------------------

    async fn apply(&mut self, fx: Effects) {
        let Effects {
            close,
            open,
            probe,
            finish_close,
            events,
            ticks,
        } = fx;

        if close.is_some() || open.is_some() {
            self.abort_connect();
        }

        if let Some(mode) = close {
            self.shared.transport.close(mode).await;
        }

        if let Some(done) = finish_close {
            let was_closing = {
                let mut core = self.shared.core.lock();
                let closing = core.state == ConnectionState::Closing;
                if closing {
                    core.set_state(ConnectionState::Idle);
                }
                closing
            };
            if was_closing {
                self.emit(TickerEvent::Closed { remote: false });
                tracing::info!("Ticker closed");
            }
            let _ = done.send(());
        }

        if let Some((session, url)) = open {
            self.spawn_connect(session, url);
        }

        if probe {
            self.spawn_probe();
        }

        for event in events {
            self.emit(event);
        }

        for tick in ticks {
            if !self.backlog.is_empty() {
                metrics::record_tick_dropped();
                continue;
            }
            if let Err(mpsc::error::TrySendError::Full(_)) =
                self.events.try_send(TickerEvent::Tick(tick))
            {
                metrics::record_tick_dropped();
                tracing::debug!("Event channel full, tick dropped");
            }
        }
    }

    /// Deliver a control event without waiting on the consumer.
    fn emit(&mut self, event: TickerEvent) {
        let event = if self.backlog.is_empty() {
            match self.events.try_send(event) {
                Ok(()) => return,
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::trace!("Event receiver dropped");
                    return;
                }
                Err(mpsc::error::TrySendError::Full(event)) => event,
            }
        } else {
            event
        };

        if self.backlog.len() >= CONTROL_BACKLOG {
            tracing::warn!(capacity = CONTROL_BACKLOG, "Event backlog full, oldest dropped");
            self.backlog.pop_front();
        }
        self.backlog.push_back(event);
    }

    fn spawn_connect(&mut self, session: u64, url: String) {
        let transport = Arc::clone(&self.shared.transport);
        let events = self.transport_tx.clone();
        let limit = self.timings.connect;

        self.connect_task = Some(tokio::spawn(async move {
            let opening = transport.open(&url, session, events.clone());
            let failure = match tokio::time::timeout(limit, opening).await {
                Ok(Ok(())) => return,
                Ok(Err(e)) => e,
                Err(_) => TransportError::Timeout(limit),
            };
            tracing::warn!(error = %failure, session, "Connect attempt failed");
            let _ = events.send(TransportEvent::new(
                session,
                TransportEventKind::Error(failure.to_string()),
            ));
        }));
    }

    fn abort_connect(&mut self) {
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
    }

    fn spawn_probe(&self) {
        let probe = Arc::clone(&self.probe);
        let results = self.probe_tx.clone();
        let limit = self.timings.probe * 2;

        tokio::spawn(async move {
            let up = tokio::time::timeout(limit, probe.is_reachable())
                .await
                .unwrap_or(false);
            let _ = results.send(up);
        });
    }

    /// Start or stop the interval timers to match the current state.
    fn sync_timers(&mut self) {
        let (ready, monitoring) = {
            let core = self.shared.core.lock();
            (core.state == ConnectionState::Ready, core.monitoring)
        };

        match (ready, self.heartbeat.is_some()) {
            (true, false) => self.heartbeat = Some(periodic(self.timings.heartbeat)),
            (false, true) => self.heartbeat = None,
            _ => {}
        }

        match (monitoring, self.health.is_some()) {
            (true, false) => self.health = Some(periodic(self.timings.check)),
            (false, true) => self.health = None,
            _ => {}
        }
    }
}

fn connection_lost(core: &mut Core, fx: &mut Effects) {
    if core.state.is_attempting() {
        core.monitor.on_attempt_failed();
    }
    core.ack_deadline = None;
    core.session += 1;

    if core.auto_reconnect {
        schedule_reconnect(core, fx);
    } else {
        go_idle(core);
    }
}

fn schedule_reconnect(core: &mut Core, fx: &mut Effects) {
    core.ack_deadline = None;
    if let Some(delay) = core.policy.next_delay() {
        let attempt = core.policy.attempt_count();
        core.set_state(ConnectionState::Reconnecting);
        core.reconnect_at = Some(Instant::now() + delay);
        metrics::record_reconnect(false);
        tracing::info!(
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            mode = core.policy.mode().as_str(),
            "Reconnect scheduled"
        );
        fx.events.push(TickerEvent::Reconnecting {
            attempt,
            delay,
            forced: false,
        });
    } else {
        let attempts = core.policy.attempt_count();
        core.set_state(ConnectionState::Exhausted);
        core.reconnect_at = None;
        tracing::error!(attempts, "Reconnect attempts exhausted");
        fx.events.push(TickerEvent::Exhausted { attempts });
        fx.events.push(TickerEvent::Error(
            ReconnectError::MaxAttemptsExceeded(attempts).into(),
        ));
    }
}

/// Tear down the socket and start attempt 1 of an aggressive schedule now.
fn force_reconnect(core: &mut Core, fx: &mut Effects, reason: ForceReason) {
    tracing::warn!(reason = reason.as_str(), state = %core.state, "Forcing reconnect");
    if !core.auto_reconnect {
        tracing::info!("Re-enabling automatic reconnect for forced reconnect");
        core.auto_reconnect = true;
    }

    core.policy.force();
    // Counts the immediate attempt.
    let _ = core.policy.next_delay();
    metrics::record_reconnect(true);

    fx.close = Some(CloseMode::Abortive);
    fx.events.push(TickerEvent::Reconnecting {
        attempt: core.policy.attempt_count(),
        delay: Duration::ZERO,
        forced: true,
    });
    begin_attempt(core, fx);
}

fn begin_attempt(core: &mut Core, fx: &mut Effects) {
    core.session += 1;
    core.reconnect_at = None;
    core.ack_deadline = None;
    core.set_state(ConnectionState::Connecting);
    fx.open = Some((core.session, core.url.clone()));
}

fn go_idle(core: &mut Core) {
    core.session += 1;
    core.reconnect_at = None;
    core.ack_deadline = None;
    core.monitoring = false;
    core.probe_in_flight = false;
    core.auth_hold = false;
    core.monitor.stop();
    core.set_state(ConnectionState::Idle);
}

fn periodic(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::MockTokenExchange;

    #[test]
    fn config_defaults() {
        let config = TickerConfig::new(Credentials::for_user("FT1", "t"));
        assert_eq!(config.url, DEFAULT_WS_URL);
        assert!(config.auto_reconnect);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.ack_timeout, ACK_TIMEOUT);
    }

    #[test]
    fn checks_pause_when_exhausted_or_held() {
        let mut core = Core {
            state: ConnectionState::Ready,
            url: String::new(),
            credentials: Credentials::for_user("FT1", "t"),
            session: 0,
            policy: ReconnectPolicy::new(ReconnectConfig::default()),
            monitor: HealthMonitor::new(HealthConfig::default()),
            auto_reconnect: true,
            auth_hold: false,
            monitoring: true,
            probe_in_flight: false,
            reconnect_at: None,
            ack_deadline: None,
        };
        assert!(!core.checks_paused());

        core.state = ConnectionState::Exhausted;
        assert!(core.checks_paused());

        core.state = ConnectionState::Reconnecting;
        core.auth_hold = true;
        assert!(core.checks_paused());
    }

    #[tokio::test]
    async fn begin_attempt_bumps_session() {
        let mut core = Core {
            state: ConnectionState::Reconnecting,
            url: "ws://feed".into(),
            credentials: Credentials::for_user("FT1", "t"),
            session: 4,
            policy: ReconnectPolicy::new(ReconnectConfig::default()),
            monitor: HealthMonitor::new(HealthConfig::default()),
            auto_reconnect: true,
            auth_hold: false,
            monitoring: true,
            probe_in_flight: false,
            reconnect_at: Some(Instant::now()),
            ack_deadline: None,
        };
        let mut fx = Effects::default();
        begin_attempt(&mut core, &mut fx);

        assert_eq!(core.state, ConnectionState::Connecting);
        assert_eq!(core.session, 5);
        assert!(core.reconnect_at.is_none());
        assert_eq!(fx.open, Some((5, "ws://feed".to_string())));
    }

    #[tokio::test]
    async fn token_exchange_sets_stream_token() {
        let mut exchange = MockTokenExchange::new();
        exchange
            .expect_exchange()
            .times(1)
            .returning(|code| Ok(format!("session-for-{code}")));

        let (ticker, _events) = Ticker::spawn_with_token_exchange(
            TickerConfig::new(Credentials::for_user("FT1", "")),
            &exchange,
            "req-1",
        )
        .await
        .unwrap();

        assert_eq!(
            ticker.shared.core.lock().credentials.access_token(),
            "session-for-req-1"
        );
        assert_eq!(ticker.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn token_exchange_failure_starts_nothing() {
        let mut exchange = MockTokenExchange::new();
        exchange
            .expect_exchange()
            .returning(|_| Err(TokenExchangeError::Rejected("bad code".into())));

        let result = Ticker::spawn_with_token_exchange(
            TickerConfig::new(Credentials::for_user("FT1", "")),
            &exchange,
            "stale",
        )
        .await;

        assert!(matches!(
            result,
            Err(TickerError::TokenExchange(TokenExchangeError::Rejected(_)))
        ));
    }
}

//! Test doubles for driving a ticker without a network.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use flattrade_stream::application::ports::{
    CloseMode, ManualClock, ReachabilityProbe, Transport, TransportError, TransportEvent,
    TransportEventKind,
};
use flattrade_stream::{Credentials, Ticker, TickerConfig, TickerEvent};

/// Start of the manual wall clock.
pub fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

#[derive(Default)]
struct Inner {
    session: Option<u64>,
    events: Option<mpsc::UnboundedSender<TransportEvent>>,
    sent: Vec<String>,
    opens: usize,
    ack_status: String,
    silent: bool,
    fail_open: bool,
}

/// In-memory transport. Records every frame written and answers the
/// identify frame with a connect acknowledgement.
pub struct FakeTransport {
    inner: Mutex<Inner>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                ack_status: "OK".to_string(),
                ..Inner::default()
            }),
        })
    }

    /// Status the next acknowledgements carry.
    pub fn set_ack_status(&self, status: &str) {
        self.inner.lock().ack_status = status.to_string();
    }

    /// Stop answering identify frames.
    pub fn set_silent(&self, silent: bool) {
        self.inner.lock().silent = silent;
    }

    /// Make `open` fail until turned off.
    pub fn set_fail_open(&self, fail: bool) {
        self.inner.lock().fail_open = fail;
    }

    /// Deliver a frame from the server.
    pub fn inject(&self, text: &str) {
        let inner = self.inner.lock();
        if let (Some(session), Some(events)) = (inner.session, &inner.events) {
            let _ = events.send(TransportEvent::new(
                session,
                TransportEventKind::Message(text.to_string()),
            ));
        }
    }

    /// Drop the connection from the server side.
    pub fn remote_close(&self) {
        let mut inner = self.inner.lock();
        if let (Some(session), Some(events)) = (inner.session.take(), inner.events.take()) {
            let _ = events.send(TransportEvent::new(
                session,
                TransportEventKind::Closed { remote: true },
            ));
        }
    }

    /// Frames written so far.
    pub fn sent(&self) -> Vec<String> {
        self.inner.lock().sent.clone()
    }

    /// Subscribe frames written so far (`t` and `d`).
    pub fn subscribe_frames(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|f| f.starts_with(r#"{"t":"t","#) || f.starts_with(r#"{"t":"d","#))
            .collect()
    }

    /// Identify frames written so far.
    pub fn identify_frames(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|f| f.starts_with(r#"{"t":"c","#))
            .collect()
    }

    /// Successful opens so far.
    pub fn opens(&self) -> usize {
        self.inner.lock().opens
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(
        &self,
        _url: &str,
        session: u64,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        if inner.fail_open {
            return Err(TransportError::ConnectionFailed("refused".to_string()));
        }
        inner.opens += 1;
        inner.session = Some(session);
        let _ = events.send(TransportEvent::new(session, TransportEventKind::Opened));
        inner.events = Some(events);
        Ok(())
    }

    fn send(&self, text: String) -> bool {
        let mut inner = self.inner.lock();
        let (Some(session), Some(events)) = (inner.session, inner.events.clone()) else {
            return false;
        };
        if text.starts_with(r#"{"t":"c","#) && !inner.silent {
            let ack = format!(r#"{{"t":"ck","s":"{}","uid":"FT1"}}"#, inner.ack_status);
            let _ = events.send(TransportEvent::new(session, TransportEventKind::Message(ack)));
        }
        inner.sent.push(text);
        true
    }

    async fn close(&self, _mode: CloseMode) {
        let mut inner = self.inner.lock();
        inner.session = None;
        inner.events = None;
    }

    fn is_open(&self) -> bool {
        self.inner.lock().session.is_some()
    }
}

/// Probe whose answer is set by the test.
pub struct FakeProbe {
    up: AtomicBool,
}

impl FakeProbe {
    pub fn new(up: bool) -> Arc<Self> {
        Arc::new(Self {
            up: AtomicBool::new(up),
        })
    }

    pub fn set(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReachabilityProbe for FakeProbe {
    async fn is_reachable(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }
}

/// Ticker wired to fakes, with the handles a test needs.
pub struct Harness {
    pub ticker: Ticker,
    pub events: mpsc::Receiver<TickerEvent>,
    pub transport: Arc<FakeTransport>,
    pub probe: Arc<FakeProbe>,
    pub clock: ManualClock,
}

pub fn config() -> TickerConfig {
    TickerConfig::with_url("ws://feed.test", Credentials::for_user("FT1", "tok"))
}

pub fn harness(config: TickerConfig) -> Harness {
    let transport = FakeTransport::new();
    let probe = FakeProbe::new(true);
    let clock = ManualClock::new(t0());
    let (ticker, events) = Ticker::new(
        config,
        Arc::clone(&transport) as Arc<dyn Transport>,
        Arc::clone(&probe) as Arc<dyn ReachabilityProbe>,
        Arc::new(clock.clone()),
    );
    Harness {
        ticker,
        events,
        transport,
        probe,
        clock,
    }
}

/// Next event, failing the test if none arrives within ten virtual minutes.
pub async fn next_event(events: &mut mpsc::Receiver<TickerEvent>) -> TickerEvent {
    tokio::time::timeout(Duration::from_secs(600), events.recv())
        .await
        .expect("no ticker event")
        .expect("event channel closed")
}

/// Skip events until one matches, returning it.
pub async fn wait_for<F>(events: &mut mpsc::Receiver<TickerEvent>, mut pred: F) -> TickerEvent
where
    F: FnMut(&TickerEvent) -> bool,
{
    loop {
        let event = next_event(events).await;
        if pred(&event) {
            return event;
        }
    }
}

pub async fn wait_ready(events: &mut mpsc::Receiver<TickerEvent>) {
    wait_for(events, |e| matches!(e, TickerEvent::Ready)).await;
}

/// Advance Tokio time and the wall clock together, one second at a time,
/// returning the events seen on the way.
pub async fn elapse(h: &mut Harness, secs: u64) -> Vec<TickerEvent> {
    let mut seen = Vec::new();
    for _ in 0..secs {
        h.clock.advance(TimeDelta::seconds(1));
        tokio::time::sleep(Duration::from_secs(1)).await;
        while let Ok(event) = h.events.try_recv() {
            seen.push(event);
        }
    }
    seen
}

pub fn forced_reconnects(events: &[TickerEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, TickerEvent::Reconnecting { forced: true, .. }))
        .count()
}

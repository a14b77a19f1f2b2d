//! WebSocket Transport
//!
//! [`Transport`] adapter over `tokio-tungstenite`. Each `open` starts one
//! session task that owns both halves of the socket:
//!
//! - outbound frames arrive over an unbounded channel, so `send` never blocks
//! - inbound text frames are forwarded as [`TransportEventKind::Message`]
//! - a server close frame or end of stream ends the session with
//!   [`TransportEventKind::Closed`] (`remote: true`)
//! - read/write failures end the session with [`TransportEventKind::Error`]
//!
//! Fragmented messages are reassembled by tungstenite before they reach us.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    CloseMode, Transport, TransportError, TransportEvent, TransportEventKind,
};

/// How long a graceful close may wait for the server's close frame.
pub const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

enum Outbound {
    Text(String),
    Close,
}

struct Session {
    id: u64,
    outbound: mpsc::UnboundedSender<Outbound>,
    cancel: CancellationToken,
    open: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// WebSocket transport for the tick feed.
#[derive(Default)]
pub struct WebSocketTransport {
    session: Mutex<Option<Session>>,
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let session = self.session.lock();
        f.debug_struct("WebSocketTransport")
            .field("session", &session.as_ref().map(|s| s.id))
            .field(
                "open",
                &session
                    .as_ref()
                    .is_some_and(|s| s.open.load(Ordering::SeqCst)),
            )
            .finish()
    }
}

impl WebSocketTransport {
    /// Create a transport with no session.
    #[must_use]
    pub fn new() -> Self {
        install_crypto_provider();
        Self::default()
    }

    fn take_session(&self) -> Option<Session> {
        self.session.lock().take()
    }
}

/// Install the ring crypto provider for rustls, once per process.
pub fn install_crypto_provider() {
    // Fails only when a provider is already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(
        &self,
        url: &str,
        session: u64,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<(), TransportError> {
        if let Some(previous) = self.take_session() {
            tracing::debug!(session = previous.id, "Dropping previous transport session");
            previous.cancel.cancel();
        }

        if !(url.starts_with("wss://") || url.starts_with("ws://")) {
            return Err(TransportError::InvalidUrl(url.to_string()));
        }

        tracing::debug!(url, session, "Opening WebSocket");
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let open = Arc::new(AtomicBool::new(true));

        // Held until the session is stored, so a send prompted by `Opened`
        // finds it. `Opened` goes out before the reader can report anything.
        let mut slot = self.session.lock();
        let _ = events.send(TransportEvent::new(session, TransportEventKind::Opened));

        let task = tokio::spawn(run_session(
            session,
            ws_stream,
            rx,
            cancel.clone(),
            Arc::clone(&open),
            events,
        ));

        *slot = Some(Session {
            id: session,
            outbound: tx,
            cancel,
            open,
            task,
        });

        Ok(())
    }

    fn send(&self, text: String) -> bool {
        let guard = self.session.lock();
        match guard.as_ref() {
            Some(s) if s.open.load(Ordering::SeqCst) => {
                s.outbound.send(Outbound::Text(text)).is_ok()
            }
            _ => {
                tracing::warn!("Send on closed transport ignored");
                false
            }
        }
    }

    async fn close(&self, mode: CloseMode) {
        let Some(session) = self.take_session() else {
            return;
        };

        match mode {
            CloseMode::Abortive => {
                session.open.store(false, Ordering::SeqCst);
                session.cancel.cancel();
            }
            CloseMode::Graceful => {
                if session.outbound.send(Outbound::Close).is_err() {
                    session.cancel.cancel();
                    return;
                }
                let mut task = session.task;
                if tokio::time::timeout(CLOSE_HANDSHAKE_TIMEOUT, &mut task)
                    .await
                    .is_err()
                {
                    tracing::debug!(session = session.id, "Close handshake timed out, aborting");
                    session.cancel.cancel();
                }
            }
        }
    }

    fn is_open(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .is_some_and(|s| s.open.load(Ordering::SeqCst))
    }
}

type FeedSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn run_session(
    session: u64,
    ws_stream: FeedSocket,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    cancel: CancellationToken,
    open: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let (mut write, mut read) = ws_stream.split();
    let mut closing_locally = false;
    let emit = |kind: TransportEventKind| {
        let _ = events.send(TransportEvent::new(session, kind));
    };

    let ending = loop {
        tokio::select! {
            () = cancel.cancelled() => {
                break None;
            }
            out = outbound.recv(), if !closing_locally => {
                match out {
                    Some(Outbound::Text(text)) => {
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            break Some(TransportEventKind::Error(format!("write failed: {e}")));
                        }
                    }
                    Some(Outbound::Close) => {
                        closing_locally = true;
                        open.store(false, Ordering::SeqCst);
                        if let Err(e) = write.send(Message::Close(None)).await {
                            tracing::debug!(error = %e, "Close frame not sent");
                            break Some(TransportEventKind::Closed { remote: false });
                        }
                    }
                    None => break None,
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        emit(TransportEventKind::Message(text.as_str().to_owned()));
                    }
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => emit(TransportEventKind::Message(text)),
                        Err(_) => tracing::trace!("Ignoring non UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            break Some(TransportEventKind::Error(format!("pong failed: {e}")));
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(?frame, "Server sent close frame");
                        break Some(TransportEventKind::Closed { remote: !closing_locally });
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) if closing_locally => {
                        tracing::debug!(error = %e, "Socket ended during close handshake");
                        break Some(TransportEventKind::Closed { remote: false });
                    }
                    Some(Err(e)) => {
                        break Some(TransportEventKind::Error(e.to_string()));
                    }
                    None => {
                        break Some(TransportEventKind::Closed { remote: !closing_locally });
                    }
                }
            }
        }
    };

    open.store(false, Ordering::SeqCst);
    if let Some(kind) = ending {
        emit(kind);
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    async fn echo_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                match msg {
                    Message::Text(t) if t.as_str() == "bye" => {
                        ws.close(None).await.unwrap();
                        break;
                    }
                    Message::Text(t) => ws.send(Message::Text(t)).await.unwrap(),
                    _ => {}
                }
            }
        });
        format!("ws://{addr}")
    }

    async fn next_kind(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEventKind {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
            .kind
    }

    #[tokio::test]
    async fn send_on_unopened_transport_is_noop() {
        let transport = WebSocketTransport::new();
        assert!(!transport.send("x".into()));
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn rejects_non_websocket_url() {
        let transport = WebSocketTransport::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = transport.open("http://example.com", 1, tx).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn echoes_and_reports_remote_close() {
        let url = echo_server().await;
        let transport = WebSocketTransport::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        transport.open(&url, 7, tx).await.unwrap();
        assert_eq!(next_kind(&mut rx).await, TransportEventKind::Opened);
        assert!(transport.is_open());

        assert!(transport.send("hello".into()));
        assert_eq!(
            next_kind(&mut rx).await,
            TransportEventKind::Message("hello".into())
        );

        assert!(transport.send("bye".into()));
        assert_eq!(
            next_kind(&mut rx).await,
            TransportEventKind::Closed { remote: true }
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn send_prompted_by_opened_finds_session() {
        for _ in 0..20 {
            let url = echo_server().await;
            let transport = Arc::new(WebSocketTransport::new());
            let (tx, mut rx) = mpsc::unbounded_channel();
            let opener = {
                let transport = Arc::clone(&transport);
                tokio::spawn(async move { transport.open(&url, 1, tx).await })
            };

            assert_eq!(next_kind(&mut rx).await, TransportEventKind::Opened);
            assert!(transport.send("hello".into()));
            opener.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn graceful_close_reports_local_close() {
        let url = echo_server().await;
        let transport = WebSocketTransport::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        transport.open(&url, 1, tx).await.unwrap();
        assert_eq!(next_kind(&mut rx).await, TransportEventKind::Opened);

        transport.close(CloseMode::Graceful).await;

        assert!(!transport.is_open());
        assert_eq!(
            next_kind(&mut rx).await,
            TransportEventKind::Closed { remote: false }
        );
    }

    #[tokio::test]
    async fn connect_failure_is_an_error() {
        let addr = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap()
        };
        let transport = WebSocketTransport::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = transport
            .open(&format!("ws://{addr}"), 1, tx)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::ConnectionFailed(_)));
    }
}

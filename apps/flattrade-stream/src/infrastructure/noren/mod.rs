//! Noren Tick Feed Adapters
//!
//! WebSocket client for the FlatTrade (Noren) market data feed:
//!
//! - **Messages/Codec**: JSON frames for identify, subscriptions, ticks
//! - **Auth**: Session credentials and acknowledgement checks
//! - **Transport**: `tokio-tungstenite` socket behind the [`Transport`] port
//! - **Health**: Heartbeats, reachability probes and liveness verdicts
//! - **Ticker**: Connection state machine tying the pieces together
//!
//! [`Transport`]: crate::application::ports::Transport

pub mod auth;
pub mod codec;
pub mod heartbeat;
pub mod messages;
pub mod probe;
pub mod reconnect;
pub mod ticker;
pub mod transport;

pub use auth::{AuthError, Credentials};
pub use codec::{CodecError, NorenCodec};
pub use heartbeat::{ForceReason, HealthConfig, HealthMonitor, LivenessVerdict};
pub use messages::{FeedFrame, SubscriptionAction};
pub use probe::TcpProbe;
pub use reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
pub use ticker::{DEFAULT_WS_URL, Ticker, TickerConfig, TickerError, TickerEvent};
pub use transport::WebSocketTransport;

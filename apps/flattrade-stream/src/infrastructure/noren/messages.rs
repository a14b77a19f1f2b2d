//! Noren WebSocket Message Types
//!
//! Wire format types for the FlatTrade (Noren) tick feed. Every frame is a
//! JSON object whose `t` field names its type.
//!
//! # Inbound
//!
//! - `ck`: Connect acknowledgement, `{"t":"ck","s":"OK","uid":"FT0001"}`
//! - `tk` / `dk`: Touchline / depth snapshot sent after subscribing
//! - `tf` / `df`: Sparse touchline / depth update
//!
//! Any other `t` decodes to [`FeedFrame::Unknown`].
//!
//! # Outbound
//!
//! - `c`: Identify, `{"t":"c","uid":..,"actid":..,"susertoken":..,"source":"API"}`
//! - `t` / `d`: Subscribe touchline / depth, `{"t":"t","k":"NSE|22#NSE|2885"}`
//! - `u` / `ud`: Unsubscribe touchline / depth
//! - `h`: Heartbeat, `{"k":"","t":"h"}`
//!
//! Numeric tick fields are usually sent as strings. Fields are decoded
//! leniently: a value that does not parse is treated as absent.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::streaming::{DEPTH_LEVELS, DepthLevel, Tick, TickKind};
use crate::domain::subscription::{SubscriptionMode, SubscriptionToken};

// =============================================================================
// Inbound Frames
// =============================================================================

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "t")]
pub enum FeedFrame {
    /// Connect acknowledgement.
    #[serde(rename = "ck")]
    ConnectAck(ConnectAck),
    /// Touchline snapshot.
    #[serde(rename = "tk")]
    TouchlineSnapshot(TickFrame),
    /// Depth snapshot.
    #[serde(rename = "dk")]
    DepthSnapshot(TickFrame),
    /// Touchline update.
    #[serde(rename = "tf")]
    TouchlineUpdate(TickFrame),
    /// Depth update.
    #[serde(rename = "df")]
    DepthUpdate(TickFrame),
    /// Any frame type this client does not act on.
    #[serde(other)]
    Unknown,
}

impl FeedFrame {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectAck(_) => "connect_ack",
            Self::TouchlineSnapshot(_) => "touchline_snapshot",
            Self::DepthSnapshot(_) => "depth_snapshot",
            Self::TouchlineUpdate(_) => "touchline_update",
            Self::DepthUpdate(_) => "depth_update",
            Self::Unknown => "unknown",
        }
    }

    /// Convert a tick frame into a domain tick. Returns `None` for other frames.
    #[must_use]
    pub fn into_tick(self, received_at: DateTime<Utc>) -> Option<Tick> {
        let (kind, frame) = match self {
            Self::TouchlineSnapshot(f) => (TickKind::TouchlineSnapshot, f),
            Self::DepthSnapshot(f) => (TickKind::DepthSnapshot, f),
            Self::TouchlineUpdate(f) => (TickKind::TouchlineUpdate, f),
            Self::DepthUpdate(f) => (TickKind::DepthUpdate, f),
            Self::ConnectAck(_) | Self::Unknown => return None,
        };
        Some(frame.into_tick(kind, received_at))
    }
}

/// Connect acknowledgement payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConnectAck {
    /// `OK` on success; anything else is a rejection.
    #[serde(rename = "s", default)]
    pub status: String,
    /// User id echoed back.
    #[serde(default)]
    pub uid: Option<String>,
}

impl ConnectAck {
    /// Whether the server accepted the session.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == "OK"
    }
}

/// Tick payload shared by snapshot and update frames.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TickFrame {
    /// Exchange segment.
    #[serde(rename = "e")]
    pub exchange: String,
    /// Instrument token.
    #[serde(rename = "tk", deserialize_with = "string_or_number")]
    pub token: String,
    #[serde(rename = "ts", default)]
    trading_symbol: Option<String>,
    #[serde(rename = "pp", default, deserialize_with = "lenient")]
    price_precision: Option<u32>,
    #[serde(rename = "ti", default, deserialize_with = "lenient")]
    tick_size: Option<Decimal>,
    #[serde(rename = "ls", default, deserialize_with = "lenient")]
    lot_size: Option<u64>,
    #[serde(rename = "lp", default, deserialize_with = "lenient")]
    last_price: Option<Decimal>,
    #[serde(rename = "pc", default, deserialize_with = "lenient")]
    change_percent: Option<Decimal>,
    #[serde(rename = "v", default, deserialize_with = "lenient")]
    volume: Option<u64>,
    #[serde(rename = "o", default, deserialize_with = "lenient")]
    open: Option<Decimal>,
    #[serde(rename = "h", default, deserialize_with = "lenient")]
    high: Option<Decimal>,
    #[serde(rename = "l", default, deserialize_with = "lenient")]
    low: Option<Decimal>,
    #[serde(rename = "c", default, deserialize_with = "lenient")]
    close: Option<Decimal>,
    #[serde(rename = "ap", default, deserialize_with = "lenient")]
    average_price: Option<Decimal>,
    #[serde(rename = "ltt", default, deserialize_with = "lenient")]
    last_trade_time: Option<i64>,
    #[serde(rename = "ltq", default, deserialize_with = "lenient")]
    last_trade_quantity: Option<u64>,
    #[serde(rename = "tbq", default, deserialize_with = "lenient")]
    total_buy_quantity: Option<u64>,
    #[serde(rename = "tsq", default, deserialize_with = "lenient")]
    total_sell_quantity: Option<u64>,
    #[serde(rename = "oi", default, deserialize_with = "lenient")]
    open_interest: Option<u64>,
    #[serde(rename = "uc", default, deserialize_with = "lenient")]
    upper_circuit: Option<Decimal>,
    #[serde(rename = "lc", default, deserialize_with = "lenient")]
    lower_circuit: Option<Decimal>,
    #[serde(rename = "52h", default, deserialize_with = "lenient")]
    week52_high: Option<Decimal>,
    #[serde(rename = "52l", default, deserialize_with = "lenient")]
    week52_low: Option<Decimal>,
    #[serde(rename = "bp1", default, deserialize_with = "lenient")]
    bp1: Option<Decimal>,
    #[serde(rename = "bp2", default, deserialize_with = "lenient")]
    bp2: Option<Decimal>,
    #[serde(rename = "bp3", default, deserialize_with = "lenient")]
    bp3: Option<Decimal>,
    #[serde(rename = "bp4", default, deserialize_with = "lenient")]
    bp4: Option<Decimal>,
    #[serde(rename = "bp5", default, deserialize_with = "lenient")]
    bp5: Option<Decimal>,
    #[serde(rename = "bq1", default, deserialize_with = "lenient")]
    bq1: Option<u64>,
    #[serde(rename = "bq2", default, deserialize_with = "lenient")]
    bq2: Option<u64>,
    #[serde(rename = "bq3", default, deserialize_with = "lenient")]
    bq3: Option<u64>,
    #[serde(rename = "bq4", default, deserialize_with = "lenient")]
    bq4: Option<u64>,
    #[serde(rename = "bq5", default, deserialize_with = "lenient")]
    bq5: Option<u64>,
    #[serde(rename = "sp1", default, deserialize_with = "lenient")]
    sp1: Option<Decimal>,
    #[serde(rename = "sp2", default, deserialize_with = "lenient")]
    sp2: Option<Decimal>,
    #[serde(rename = "sp3", default, deserialize_with = "lenient")]
    sp3: Option<Decimal>,
    #[serde(rename = "sp4", default, deserialize_with = "lenient")]
    sp4: Option<Decimal>,
    #[serde(rename = "sp5", default, deserialize_with = "lenient")]
    sp5: Option<Decimal>,
    #[serde(rename = "sq1", default, deserialize_with = "lenient")]
    sq1: Option<u64>,
    #[serde(rename = "sq2", default, deserialize_with = "lenient")]
    sq2: Option<u64>,
    #[serde(rename = "sq3", default, deserialize_with = "lenient")]
    sq3: Option<u64>,
    #[serde(rename = "sq4", default, deserialize_with = "lenient")]
    sq4: Option<u64>,
    #[serde(rename = "sq5", default, deserialize_with = "lenient")]
    sq5: Option<u64>,
}

impl TickFrame {
    /// Convert into a domain tick of the given kind.
    #[must_use]
    pub fn into_tick(self, kind: TickKind, received_at: DateTime<Utc>) -> Tick {
        let bids: [DepthLevel; DEPTH_LEVELS] = [
            level(self.bp1, self.bq1),
            level(self.bp2, self.bq2),
            level(self.bp3, self.bq3),
            level(self.bp4, self.bq4),
            level(self.bp5, self.bq5),
        ];
        let asks: [DepthLevel; DEPTH_LEVELS] = [
            level(self.sp1, self.sq1),
            level(self.sp2, self.sq2),
            level(self.sp3, self.sq3),
            level(self.sp4, self.sq4),
            level(self.sp5, self.sq5),
        ];

        let mut tick = Tick::new(kind, self.exchange, self.token, received_at);
        tick.trading_symbol = self.trading_symbol;
        tick.price_precision = self.price_precision;
        tick.tick_size = self.tick_size;
        tick.lot_size = self.lot_size;
        tick.last_price = self.last_price;
        tick.change_percent = self.change_percent;
        tick.volume = self.volume;
        tick.open = self.open;
        tick.high = self.high;
        tick.low = self.low;
        tick.close = self.close;
        tick.average_price = self.average_price;
        tick.last_trade_time = self.last_trade_time;
        tick.last_trade_quantity = self.last_trade_quantity;
        tick.total_buy_quantity = self.total_buy_quantity;
        tick.total_sell_quantity = self.total_sell_quantity;
        tick.open_interest = self.open_interest;
        tick.upper_circuit = self.upper_circuit;
        tick.lower_circuit = self.lower_circuit;
        tick.week52_high = self.week52_high;
        tick.week52_low = self.week52_low;
        tick.bids = bids;
        tick.asks = asks;
        tick
    }
}

const fn level(price: Option<Decimal>, quantity: Option<u64>) -> DepthLevel {
    DepthLevel { price, quantity }
}

/// Parse a string or number field, treating anything unparseable as unset.
pub(crate) fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| match value {
        serde_json::Value::String(s) => s.trim().parse().ok(),
        serde_json::Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }))
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

// =============================================================================
// Outbound Frames
// =============================================================================

/// Identify frame sent right after the socket opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectRequest<'a> {
    #[serde(rename = "t")]
    kind: &'static str,
    /// User id.
    pub uid: &'a str,
    /// Account id.
    pub actid: &'a str,
    /// Session access token.
    pub susertoken: &'a str,
    /// Client source tag.
    pub source: &'static str,
}

impl<'a> ConnectRequest<'a> {
    /// Build the identify frame.
    #[must_use]
    pub const fn new(uid: &'a str, actid: &'a str, susertoken: &'a str) -> Self {
        Self {
            kind: "c",
            uid,
            actid,
            susertoken,
            source: "API",
        }
    }
}

/// Direction of a subscription request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionAction {
    /// Start streaming.
    Subscribe,
    /// Stop streaming.
    Unsubscribe,
}

/// Subscribe or unsubscribe frame for one mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionRequest {
    #[serde(rename = "t")]
    kind: &'static str,
    /// `#`-joined `EXCHANGE|TOKEN` list.
    #[serde(rename = "k")]
    pub key: String,
}

impl SubscriptionRequest {
    /// Build a request for `tokens` in `mode`.
    #[must_use]
    pub fn new(
        action: SubscriptionAction,
        mode: SubscriptionMode,
        tokens: &[SubscriptionToken],
    ) -> Self {
        let kind = match (action, mode) {
            (SubscriptionAction::Subscribe, SubscriptionMode::Quote) => "t",
            (SubscriptionAction::Subscribe, SubscriptionMode::FullDepth) => "d",
            (SubscriptionAction::Unsubscribe, SubscriptionMode::Quote) => "u",
            (SubscriptionAction::Unsubscribe, SubscriptionMode::FullDepth) => "ud",
        };
        let key = tokens
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("#");
        Self { kind, key }
    }

    /// Wire type code.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        self.kind
    }
}

/// Heartbeat frame. The server sends no reply.
pub const HEARTBEAT_FRAME: &str = r#"{"k":"","t":"h"}"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn at() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn connect_ack_ok_and_rejected() {
        let ok: FeedFrame = serde_json::from_str(r#"{"t":"ck","s":"OK","uid":"FT1"}"#).unwrap();
        let FeedFrame::ConnectAck(ack) = ok else {
            panic!("expected ack");
        };
        assert!(ack.is_ok());
        assert_eq!(ack.uid.as_deref(), Some("FT1"));

        let bad: FeedFrame = serde_json::from_str(r#"{"t":"ck","s":"NOT_OK"}"#).unwrap();
        assert!(matches!(bad, FeedFrame::ConnectAck(ref a) if !a.is_ok()));

        let missing: FeedFrame = serde_json::from_str(r#"{"t":"ck"}"#).unwrap();
        assert!(matches!(missing, FeedFrame::ConnectAck(ref a) if !a.is_ok()));
    }

    #[test]
    fn touchline_snapshot_parses_string_numbers() {
        let json = r#"{"t":"tk","e":"NSE","tk":"22","ts":"ACC-EQ","pp":"2","ti":"0.05",
            "ls":"1","lp":"2512.35","pc":"-0.42","v":"123456","o":"2500.00","c":"2522.90"}"#;
        let frame: FeedFrame = serde_json::from_str(json).unwrap();
        let tick = frame.into_tick(at()).unwrap();

        assert_eq!(tick.kind, TickKind::TouchlineSnapshot);
        assert_eq!(tick.exchange, "NSE");
        assert_eq!(tick.token, "22");
        assert_eq!(tick.trading_symbol.as_deref(), Some("ACC-EQ"));
        assert_eq!(tick.price_precision, Some(2));
        assert_eq!(tick.last_price, Some(Decimal::new(251_235, 2)));
        assert_eq!(tick.change_percent, Some(Decimal::new(-42, 2)));
        assert_eq!(tick.volume, Some(123_456));
        assert!(tick.high.is_none());
    }

    #[test]
    fn depth_update_keeps_absent_fields_unset() {
        let json = r#"{"t":"df","e":"NSE","tk":2885,"bp1":"101.5","bq1":"20","sq3":7}"#;
        let tick = serde_json::from_str::<FeedFrame>(json)
            .unwrap()
            .into_tick(at())
            .unwrap();

        assert_eq!(tick.kind, TickKind::DepthUpdate);
        assert_eq!(tick.token, "2885");
        assert_eq!(tick.bids[0].price, Some(Decimal::new(1015, 1)));
        assert_eq!(tick.bids[0].quantity, Some(20));
        assert_eq!(tick.asks[2].quantity, Some(7));
        assert!(tick.asks[2].price.is_none());
        assert!(tick.last_price.is_none());
    }

    #[test]
    fn unparsable_field_is_treated_as_absent() {
        let json = r#"{"t":"tf","e":"NSE","tk":"22","lp":"n/a","v":"10"}"#;
        let tick = serde_json::from_str::<FeedFrame>(json)
            .unwrap()
            .into_tick(at())
            .unwrap();
        assert!(tick.last_price.is_none());
        assert_eq!(tick.volume, Some(10));
    }

    #[test]
    fn unknown_type_decodes_to_unknown() {
        let frame: FeedFrame = serde_json::from_str(r#"{"t":"uk","k":"NSE|22"}"#).unwrap();
        assert_eq!(frame, FeedFrame::Unknown);
        assert!(frame.into_tick(at()).is_none());
    }

    #[test]
    fn connect_request_wire_shape() {
        let json = serde_json::to_string(&ConnectRequest::new("FT1", "FT1", "secret")).unwrap();
        assert_eq!(
            json,
            r#"{"t":"c","uid":"FT1","actid":"FT1","susertoken":"secret","source":"API"}"#
        );
    }

    #[test]
    fn subscription_request_codes_and_key() {
        let tokens = vec![
            SubscriptionToken::new("NSE", "22"),
            SubscriptionToken::new("NSE", "2885"),
        ];
        let sub = SubscriptionRequest::new(
            SubscriptionAction::Subscribe,
            SubscriptionMode::Quote,
            &tokens,
        );
        assert_eq!(
            serde_json::to_string(&sub).unwrap(),
            r#"{"t":"t","k":"NSE|22#NSE|2885"}"#
        );

        let depth = SubscriptionRequest::new(
            SubscriptionAction::Subscribe,
            SubscriptionMode::FullDepth,
            &tokens,
        );
        assert_eq!(depth.kind(), "d");

        let un = SubscriptionRequest::new(
            SubscriptionAction::Unsubscribe,
            SubscriptionMode::Quote,
            &tokens,
        );
        assert_eq!(un.kind(), "u");

        let un_depth = SubscriptionRequest::new(
            SubscriptionAction::Unsubscribe,
            SubscriptionMode::FullDepth,
            &tokens,
        );
        assert_eq!(un_depth.kind(), "ud");
    }
}

//! Trading API request and response types.
//!
//! Field names map directly to the Noren REST API. Numeric fields arrive as
//! strings and are parsed leniently: a value that does not parse is unset.

use std::fmt::Display;

use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};

use crate::infrastructure::noren::messages::lenient;

/// `stat` value of a successful response.
pub const STATUS_OK: &str = "Ok";

/// `stat` value of a failed response.
pub const STATUS_NOT_OK: &str = "Not_Ok";

// ============================================================================
// Response Classification
// ============================================================================

/// Status fields carried by every object response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ResponseStatus {
    /// `Ok` or `Not_Ok`.
    #[serde(default)]
    pub stat: Option<String>,
    /// Error message when `Not_Ok`.
    #[serde(default)]
    pub emsg: Option<String>,
}

impl ResponseStatus {
    /// Failure status for a non-success HTTP response.
    #[must_use]
    pub fn not_ok(status: u16, message: &str) -> Self {
        Self {
            stat: Some(STATUS_NOT_OK.to_string()),
            emsg: Some(format!("{status}: {message}")),
        }
    }

    /// Whether the server reported success.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.stat.as_deref() == Some(STATUS_OK)
    }
}

/// A type the trading client can decode a response into.
pub trait ApiResponse: DeserializeOwned {
    /// A value describing a non-success HTTP status, when this type can carry
    /// one. Types that cannot are reported as [`super::ApiError::Api`].
    fn failure(_status: u16, _message: &str) -> Option<Self> {
        None
    }
}

/// List endpoints answer with an array, or with a status object when there
/// is nothing to list or the call failed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ListResponse<T> {
    /// Listed items.
    Items(Vec<T>),
    /// Status object instead of a list.
    Status(ResponseStatus),
}

impl<T> ListResponse<T> {
    /// Items, empty when the server sent a status object.
    #[must_use]
    pub fn into_items(self) -> Vec<T> {
        match self {
            Self::Items(items) => items,
            Self::Status(_) => Vec::new(),
        }
    }

    /// The status object, if one was sent.
    #[must_use]
    pub const fn status(&self) -> Option<&ResponseStatus> {
        match self {
            Self::Items(_) => None,
            Self::Status(status) => Some(status),
        }
    }
}

impl<T: DeserializeOwned> ApiResponse for ListResponse<T> {
    fn failure(status: u16, message: &str) -> Option<Self> {
        Some(Self::Status(ResponseStatus::not_ok(status, message)))
    }
}

// ============================================================================
// Order Request Types
// ============================================================================

/// Buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
    /// Buy.
    #[serde(rename = "B")]
    Buy,
    /// Sell.
    #[serde(rename = "S")]
    Sell,
}

/// Order price type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceType {
    /// Limit.
    #[serde(rename = "LMT")]
    Limit,
    /// Market.
    #[serde(rename = "MKT")]
    Market,
    /// Stop-loss limit.
    #[serde(rename = "SL-LMT")]
    StopLossLimit,
    /// Stop-loss market.
    #[serde(rename = "SL-MKT")]
    StopLossMarket,
}

/// Product code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Product {
    /// Cash and carry (delivery).
    #[serde(rename = "C")]
    Cnc,
    /// Normal (carry-forward derivatives).
    #[serde(rename = "M")]
    Normal,
    /// Intraday.
    #[serde(rename = "I")]
    Intraday,
    /// Cover order.
    #[serde(rename = "H")]
    CoverOrder,
    /// Bracket order.
    #[serde(rename = "B")]
    BracketOrder,
}

/// Order retention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Retention {
    /// Good for the day.
    #[serde(rename = "DAY")]
    Day,
    /// End of session.
    #[serde(rename = "EOS")]
    EndOfSession,
    /// Immediate or cancel.
    #[serde(rename = "IOC")]
    ImmediateOrCancel,
}

/// Parameters for `PlaceOrder`.
#[derive(Debug, Clone, Serialize)]
pub struct PlaceOrderParams {
    /// Exchange.
    pub exch: String,
    /// Trading symbol.
    pub tsym: String,
    /// Quantity.
    #[serde(serialize_with = "as_text")]
    pub qty: u64,
    /// Limit price, zero for market orders.
    #[serde(serialize_with = "as_text")]
    pub prc: Decimal,
    /// Trigger price for stop-loss orders.
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "opt_as_text")]
    pub trgprc: Option<Decimal>,
    /// Product.
    pub prd: Product,
    /// Side.
    pub trantype: TransactionType,
    /// Price type.
    pub prctyp: PriceType,
    /// Retention.
    pub ret: Retention,
    /// Free-form tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
    /// Always `API`.
    pub ordersource: &'static str,
}

impl PlaceOrderParams {
    /// Day market order.
    #[must_use]
    pub fn market(
        exchange: impl Into<String>,
        trading_symbol: impl Into<String>,
        side: TransactionType,
        quantity: u64,
        product: Product,
    ) -> Self {
        Self {
            exch: exchange.into(),
            tsym: trading_symbol.into(),
            qty: quantity,
            prc: Decimal::ZERO,
            trgprc: None,
            prd: product,
            trantype: side,
            prctyp: PriceType::Market,
            ret: Retention::Day,
            remarks: None,
            ordersource: "API",
        }
    }

    /// Turn into a limit order at `price`.
    #[must_use]
    pub const fn limit(mut self, price: Decimal) -> Self {
        self.prc = price;
        self.prctyp = PriceType::Limit;
        self
    }

    /// Turn into a stop-loss order. Without a limit price it is a stop-loss
    /// market order.
    #[must_use]
    pub const fn stop_loss(mut self, trigger: Decimal, limit: Option<Decimal>) -> Self {
        self.trgprc = Some(trigger);
        match limit {
            Some(price) => {
                self.prc = price;
                self.prctyp = PriceType::StopLossLimit;
            }
            None => {
                self.prc = Decimal::ZERO;
                self.prctyp = PriceType::StopLossMarket;
            }
        }
        self
    }

    /// Set the retention.
    #[must_use]
    pub const fn with_retention(mut self, retention: Retention) -> Self {
        self.ret = retention;
        self
    }

    /// Tag the order.
    #[must_use]
    pub fn with_remarks(mut self, remarks: impl Into<String>) -> Self {
        self.remarks = Some(remarks.into());
        self
    }
}

/// Parameters for `ModifyOrder`.
#[derive(Debug, Clone, Serialize)]
pub struct ModifyOrderParams {
    /// Exchange.
    pub exch: String,
    /// Order number to modify.
    pub norenordno: String,
    /// Trading symbol.
    pub tsym: String,
    /// New quantity.
    #[serde(serialize_with = "as_text")]
    pub qty: u64,
    /// New price.
    #[serde(serialize_with = "as_text")]
    pub prc: Decimal,
    /// New price type.
    pub prctyp: PriceType,
    /// Retention.
    pub ret: Retention,
    /// New trigger price.
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "opt_as_text")]
    pub trgprc: Option<Decimal>,
}

/// Parameters naming one order.
#[derive(Debug, Clone, Serialize)]
pub struct OrderNumberParams {
    /// Order number.
    pub norenordno: String,
}

/// Parameters for `Holdings`.
#[derive(Debug, Clone, Serialize)]
pub struct HoldingsParams {
    /// Product.
    pub prd: Product,
}

/// Parameters for `GetQuotes`.
#[derive(Debug, Clone, Serialize)]
pub struct QuoteParams {
    /// Exchange.
    pub exch: String,
    /// Instrument token.
    pub token: String,
}

/// Parameters for `SearchScrip`.
#[derive(Debug, Clone, Serialize)]
pub struct SearchParams {
    /// Exchange.
    pub exch: String,
    /// Search text.
    pub stext: String,
}

/// Endpoints that take only the user and account ids.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct NoParams {}

fn as_text<S, T>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: Display,
{
    serializer.collect_str(value)
}

#[allow(clippy::ref_option)]
fn opt_as_text<S, T>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: Display,
{
    match value {
        Some(v) => serializer.collect_str(v),
        None => serializer.serialize_none(),
    }
}

// ============================================================================
// Order Response Types
// ============================================================================

/// Response to place, modify and cancel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct OrderResult {
    /// Status fields.
    #[serde(flatten)]
    pub status: ResponseStatus,
    /// Order number assigned on placement.
    #[serde(default)]
    pub norenordno: Option<String>,
    /// Order number echoed by modify and cancel.
    #[serde(default)]
    pub result: Option<String>,
    /// Server time.
    #[serde(default)]
    pub request_time: Option<String>,
}

impl OrderResult {
    /// The order number, whichever field carried it.
    #[must_use]
    pub fn order_number(&self) -> Option<&str> {
        self.norenordno.as_deref().or(self.result.as_deref())
    }
}

impl ApiResponse for OrderResult {
    fn failure(status: u16, message: &str) -> Option<Self> {
        Some(Self {
            status: ResponseStatus::not_ok(status, message),
            ..Self::default()
        })
    }
}

/// One order in the order book or an order's history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OrderBookEntry {
    /// Order number.
    pub norenordno: Option<String>,
    /// Exchange.
    pub exch: Option<String>,
    /// Trading symbol.
    pub tsym: Option<String>,
    /// Instrument token.
    pub token: Option<String>,
    /// Quantity.
    #[serde(deserialize_with = "lenient")]
    pub qty: Option<u64>,
    /// Order price.
    #[serde(deserialize_with = "lenient")]
    pub prc: Option<Decimal>,
    /// Average fill price.
    #[serde(deserialize_with = "lenient")]
    pub avgprc: Option<Decimal>,
    /// Filled quantity.
    #[serde(deserialize_with = "lenient")]
    pub fillshares: Option<u64>,
    /// Side.
    pub trantype: Option<TransactionType>,
    /// Price type.
    pub prctyp: Option<String>,
    /// Product.
    pub prd: Option<String>,
    /// Order status text.
    pub status: Option<String>,
    /// Rejection reason.
    pub rejreason: Option<String>,
    /// Order time.
    pub norentm: Option<String>,
    /// User tag.
    pub remarks: Option<String>,
}

/// One fill in the trade book.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TradeBookEntry {
    /// Order number.
    pub norenordno: Option<String>,
    /// Exchange.
    pub exch: Option<String>,
    /// Trading symbol.
    pub tsym: Option<String>,
    /// Side.
    pub trantype: Option<TransactionType>,
    /// Fill quantity.
    #[serde(deserialize_with = "lenient")]
    pub flqty: Option<u64>,
    /// Fill price.
    #[serde(deserialize_with = "lenient")]
    pub flprc: Option<Decimal>,
    /// Fill id.
    pub flid: Option<String>,
    /// Fill time.
    pub fltm: Option<String>,
    /// Product.
    pub prd: Option<String>,
}

/// One net position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PositionEntry {
    /// Exchange.
    pub exch: Option<String>,
    /// Trading symbol.
    pub tsym: Option<String>,
    /// Instrument token.
    pub token: Option<String>,
    /// Product.
    pub prd: Option<String>,
    /// Net quantity, negative when short.
    #[serde(deserialize_with = "lenient")]
    pub netqty: Option<i64>,
    /// Net average price.
    #[serde(deserialize_with = "lenient")]
    pub netavgprc: Option<Decimal>,
    /// Last traded price.
    #[serde(deserialize_with = "lenient")]
    pub lp: Option<Decimal>,
    /// Realised profit and loss.
    #[serde(deserialize_with = "lenient")]
    pub rpnl: Option<Decimal>,
    /// Unrealised mark-to-market.
    #[serde(deserialize_with = "lenient")]
    pub urmtom: Option<Decimal>,
}

/// Exchange listing of a held instrument.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HoldingSymbol {
    /// Exchange.
    pub exch: Option<String>,
    /// Instrument token.
    pub token: Option<String>,
    /// Trading symbol.
    pub tsym: Option<String>,
}

/// One holding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HoldingEntry {
    /// Listings of the instrument.
    pub exch_tsym: Vec<HoldingSymbol>,
    /// Held quantity.
    #[serde(deserialize_with = "lenient")]
    pub holdqty: Option<u64>,
    /// Average buy price.
    #[serde(deserialize_with = "lenient")]
    pub upldprc: Option<Decimal>,
}

// ============================================================================
// Account and Market Types
// ============================================================================

/// Cash and margin limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Limits {
    /// Status fields.
    #[serde(flatten)]
    pub status: ResponseStatus,
    /// Cash margin available.
    #[serde(default, deserialize_with = "lenient")]
    pub cash: Option<Decimal>,
    /// Funds added today.
    #[serde(default, deserialize_with = "lenient")]
    pub payin: Option<Decimal>,
    /// Funds withdrawn today.
    #[serde(default, deserialize_with = "lenient")]
    pub payout: Option<Decimal>,
    /// Margin in use.
    #[serde(default, deserialize_with = "lenient")]
    pub marginused: Option<Decimal>,
}

impl ApiResponse for Limits {
    fn failure(status: u16, message: &str) -> Option<Self> {
        Some(Self {
            status: ResponseStatus::not_ok(status, message),
            ..Self::default()
        })
    }
}

/// Quote snapshot for one instrument.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Quote {
    /// Status fields.
    #[serde(flatten)]
    pub status: ResponseStatus,
    /// Exchange.
    #[serde(default)]
    pub exch: Option<String>,
    /// Trading symbol.
    #[serde(default)]
    pub tsym: Option<String>,
    /// Instrument token.
    #[serde(default)]
    pub token: Option<String>,
    /// Last traded price.
    #[serde(default, deserialize_with = "lenient")]
    pub lp: Option<Decimal>,
    /// Open.
    #[serde(default, deserialize_with = "lenient")]
    pub o: Option<Decimal>,
    /// High.
    #[serde(default, deserialize_with = "lenient")]
    pub h: Option<Decimal>,
    /// Low.
    #[serde(default, deserialize_with = "lenient")]
    pub l: Option<Decimal>,
    /// Previous close.
    #[serde(default, deserialize_with = "lenient")]
    pub c: Option<Decimal>,
    /// Volume.
    #[serde(default, deserialize_with = "lenient")]
    pub v: Option<u64>,
    /// Lot size.
    #[serde(default, deserialize_with = "lenient")]
    pub ls: Option<u64>,
    /// Tick size.
    #[serde(default, deserialize_with = "lenient")]
    pub ti: Option<Decimal>,
}

impl ApiResponse for Quote {
    fn failure(status: u16, message: &str) -> Option<Self> {
        Some(Self {
            status: ResponseStatus::not_ok(status, message),
            ..Self::default()
        })
    }
}

/// One search hit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ScripEntry {
    /// Exchange.
    pub exch: Option<String>,
    /// Trading symbol.
    pub tsym: Option<String>,
    /// Instrument token.
    pub token: Option<String>,
    /// Lot size.
    #[serde(deserialize_with = "lenient")]
    pub ls: Option<u64>,
    /// Tick size.
    #[serde(deserialize_with = "lenient")]
    pub ti: Option<Decimal>,
}

/// Result of `SearchScrip`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SearchResult {
    /// Status fields.
    #[serde(flatten)]
    pub status: ResponseStatus,
    /// Matches.
    #[serde(default)]
    pub values: Vec<ScripEntry>,
}

impl ApiResponse for SearchResult {
    fn failure(status: u16, message: &str) -> Option<Self> {
        Some(Self {
            status: ResponseStatus::not_ok(status, message),
            ..Self::default()
        })
    }
}

/// Account holder details.
///
/// Cannot describe a failed call; HTTP failures surface as errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UserDetails {
    /// Status fields.
    #[serde(flatten)]
    pub status: ResponseStatus,
    /// Account id.
    #[serde(default)]
    pub actid: Option<String>,
    /// User name.
    #[serde(default)]
    pub uname: Option<String>,
    /// Email.
    #[serde(default)]
    pub email: Option<String>,
    /// Enabled exchanges.
    #[serde(default)]
    pub exarr: Vec<String>,
}

impl ApiResponse for UserDetails {}

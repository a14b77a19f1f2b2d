//! Trading REST API
//!
//! [`FlatTradeClient`] posts `jData`/`jKey` requests to the Noren trading API.
//! Every call passes through one shared [`RequestDispatcher`], which bounds
//! calls in flight and calls started per rolling second.

pub mod api_types;
pub mod dispatcher;
pub mod endpoints;
pub mod error;
pub mod http_client;

pub use api_types::{
    ApiResponse, HoldingEntry, Limits, ListResponse, ModifyOrderParams, OrderBookEntry,
    OrderResult, PlaceOrderParams, PositionEntry, PriceType, Product, Quote, ResponseStatus,
    Retention, SearchResult, TradeBookEntry, TransactionType, UserDetails,
};
pub use dispatcher::{DispatcherSettings, RequestDispatcher};
pub use endpoints::Endpoint;
pub use error::{ApiError, DispatchError};
pub use http_client::{DEFAULT_BASE_URL, FlatTradeClient, TradingApiConfig};

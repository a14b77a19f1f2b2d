//! Trading API HTTP client.
//!
//! Every call is a POST whose body is `jData=<json>&jKey=<access token>`.
//! The JSON always carries `uid`, plus `actid` for account-scoped endpoints.
//! Calls go through the [`RequestDispatcher`] so the concurrency and rate
//! limits hold across all endpoints.
//!
//! Response classification:
//!
//! - 2xx: body decoded into the result type
//! - 401: [`ApiError::Unauthorized`], never retried
//! - anything else: the result type's failure value when it has one,
//!   otherwise [`ApiError::Api`]

use std::time::Duration;

use parking_lot::RwLock;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde::Serialize;

use super::api_types::{
    ApiResponse, HoldingEntry, HoldingsParams, Limits, ListResponse, ModifyOrderParams, NoParams,
    OrderBookEntry, OrderNumberParams, OrderResult, PlaceOrderParams, PositionEntry, Product,
    Quote, QuoteParams, ResponseStatus, SearchParams, SearchResult, TradeBookEntry, UserDetails,
};
use super::dispatcher::{DispatcherSettings, RequestDispatcher};
use super::endpoints::Endpoint;
use super::error::{ApiError, DispatchError};

/// Production trading API base URL.
pub const DEFAULT_BASE_URL: &str = "https://piconnect.flattrade.in/PiConnectTP";

/// Configuration for the trading client.
#[derive(Clone)]
pub struct TradingApiConfig {
    /// API base URL.
    pub base_url: String,
    /// Login user id.
    pub user_id: String,
    /// Trading account id.
    pub account_id: String,
    /// Session access token.
    pub access_token: String,
    /// HTTP request timeout.
    pub timeout: Duration,
    /// Dispatcher limits.
    pub dispatcher: DispatcherSettings,
}

impl std::fmt::Debug for TradingApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradingApiConfig")
            .field("base_url", &self.base_url)
            .field("user_id", &self.user_id)
            .field("account_id", &self.account_id)
            .field("access_token", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

impl TradingApiConfig {
    /// Configuration for the production API.
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        account_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_id: user_id.into(),
            account_id: account_id.into(),
            access_token: access_token.into(),
            timeout: Duration::from_secs(30),
            dispatcher: DispatcherSettings::default(),
        }
    }

    /// Point at another base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the dispatcher limits.
    #[must_use]
    pub const fn with_dispatcher(mut self, settings: DispatcherSettings) -> Self {
        self.dispatcher = settings;
        self
    }
}

#[derive(Serialize)]
struct Envelope<'a, P> {
    uid: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    actid: Option<&'a str>,
    #[serde(flatten)]
    params: &'a P,
}

/// HTTP client for the trading API.
#[derive(Debug)]
pub struct FlatTradeClient {
    client: Client,
    base_url: String,
    user_id: String,
    account_id: String,
    access_token: RwLock<String>,
    dispatcher: RequestDispatcher,
}

impl FlatTradeClient {
    /// Create a client from config.
    pub fn new(config: TradingApiConfig) -> Result<Self, ApiError> {
        if config.user_id.is_empty() {
            return Err(ApiError::Http("user id is required".to_string()));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ApiError::Http(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            account_id: if config.account_id.is_empty() {
                config.user_id.clone()
            } else {
                config.account_id
            },
            user_id: config.user_id,
            access_token: RwLock::new(config.access_token),
            dispatcher: RequestDispatcher::new(config.dispatcher),
        })
    }

    /// Replace the access token used by later calls.
    pub fn set_access_token(&self, token: impl Into<String>) {
        *self.access_token.write() = token.into();
    }

    /// The dispatcher throttling this client.
    #[must_use]
    pub const fn dispatcher(&self) -> &RequestDispatcher {
        &self.dispatcher
    }

    /// Stop admitting calls.
    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }

    /// Call `endpoint` with `params` through the dispatcher.
    pub async fn post<P, R>(&self, endpoint: Endpoint, params: &P) -> Result<R, DispatchError>
    where
        P: Serialize + Sync,
        R: ApiResponse,
    {
        self.dispatcher
            .dispatch(endpoint.as_str(), || self.execute(endpoint, params))
            .await
    }

    async fn execute<P, R>(&self, endpoint: Endpoint, params: &P) -> Result<R, ApiError>
    where
        P: Serialize + Sync,
        R: ApiResponse,
    {
        let body = self.envelope(endpoint, params)?;
        let url = format!("{}/{}", self.base_url, endpoint.as_str());

        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "text/plain")
            .body(body)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        if status.is_success() {
            return serde_json::from_str(&text).map_err(|e| ApiError::JsonParse(e.to_string()));
        }

        let message = error_message(status, &text);

        if status == StatusCode::UNAUTHORIZED {
            tracing::error!(endpoint = %endpoint, "Access token rejected");
            return Err(ApiError::Unauthorized(message));
        }

        tracing::warn!(
            endpoint = %endpoint,
            status = status.as_u16(),
            message = %message,
            "Trading API returned an error"
        );
        R::failure(status.as_u16(), &message).ok_or(ApiError::Api {
            status: status.as_u16(),
            message,
        })
    }

    fn envelope<P: Serialize>(&self, endpoint: Endpoint, params: &P) -> Result<String, ApiError> {
        let data = serde_json::to_string(&Envelope {
            uid: &self.user_id,
            actid: endpoint
                .requires_account()
                .then_some(self.account_id.as_str()),
            params,
        })
        .map_err(|e| ApiError::JsonParse(e.to_string()))?;

        let token = self.access_token.read().clone();
        Ok(format!("jData={data}&jKey={token}"))
    }

    // ========================================================================
    // Orders
    // ========================================================================

    /// Place an order.
    pub async fn place_order(
        &self,
        params: &PlaceOrderParams,
    ) -> Result<OrderResult, DispatchError> {
        self.post(Endpoint::PlaceOrder, params).await
    }

    /// Modify an open order.
    pub async fn modify_order(
        &self,
        params: &ModifyOrderParams,
    ) -> Result<OrderResult, DispatchError> {
        self.post(Endpoint::ModifyOrder, params).await
    }

    /// Cancel an open order.
    pub async fn cancel_order(&self, order_number: &str) -> Result<OrderResult, DispatchError> {
        let params = OrderNumberParams {
            norenordno: order_number.to_string(),
        };
        self.post(Endpoint::CancelOrder, &params).await
    }

    /// Orders of the day.
    pub async fn order_book(&self) -> Result<ListResponse<OrderBookEntry>, DispatchError> {
        self.post(Endpoint::OrderBook, &NoParams::default()).await
    }

    /// State history of one order, newest first.
    pub async fn order_history(
        &self,
        order_number: &str,
    ) -> Result<ListResponse<OrderBookEntry>, DispatchError> {
        let params = OrderNumberParams {
            norenordno: order_number.to_string(),
        };
        self.post(Endpoint::SingleOrderHistory, &params).await
    }

    /// Fills of the day.
    pub async fn trade_book(&self) -> Result<ListResponse<TradeBookEntry>, DispatchError> {
        self.post(Endpoint::TradeBook, &NoParams::default()).await
    }

    // ========================================================================
    // Account
    // ========================================================================

    /// Net positions.
    pub async fn position_book(&self) -> Result<ListResponse<PositionEntry>, DispatchError> {
        self.post(Endpoint::PositionBook, &NoParams::default()).await
    }

    /// Holdings for one product.
    pub async fn holdings(
        &self,
        product: Product,
    ) -> Result<ListResponse<HoldingEntry>, DispatchError> {
        self.post(Endpoint::Holdings, &HoldingsParams { prd: product })
            .await
    }

    /// Cash and margin limits.
    pub async fn limits(&self) -> Result<Limits, DispatchError> {
        self.post(Endpoint::Limits, &NoParams::default()).await
    }

    /// Account holder details.
    pub async fn user_details(&self) -> Result<UserDetails, DispatchError> {
        self.post(Endpoint::UserDetails, &NoParams::default()).await
    }

    // ========================================================================
    // Market
    // ========================================================================

    /// Quote snapshot for one instrument.
    pub async fn quote(&self, exchange: &str, token: &str) -> Result<Quote, DispatchError> {
        let params = QuoteParams {
            exch: exchange.to_string(),
            token: token.to_string(),
        };
        self.post(Endpoint::GetQuotes, &params).await
    }

    /// Search instruments on one exchange.
    pub async fn search_scrip(
        &self,
        exchange: &str,
        text: &str,
    ) -> Result<SearchResult, DispatchError> {
        let params = SearchParams {
            exch: exchange.to_string(),
            stext: text.to_string(),
        };
        self.post(Endpoint::SearchScrip, &params).await
    }
}

/// Message for a non-success response: `emsg` when the body has one,
/// otherwise the body itself, otherwise the status reason.
fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ResponseStatus>(body)
        && let Some(emsg) = parsed.emsg
    {
        return emsg;
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    } else {
        trimmed.to_string()
    }
}

//! Trading API endpoint catalogue.

/// A trading REST endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Place an order.
    PlaceOrder,
    /// Modify an open order.
    ModifyOrder,
    /// Cancel an open order.
    CancelOrder,
    /// Orders of the day.
    OrderBook,
    /// State history of one order.
    SingleOrderHistory,
    /// Fills of the day.
    TradeBook,
    /// Net positions.
    PositionBook,
    /// Demat holdings.
    Holdings,
    /// Cash and margin limits.
    Limits,
    /// Quote snapshot.
    GetQuotes,
    /// Instrument search.
    SearchScrip,
    /// Account holder details.
    UserDetails,
}

impl Endpoint {
    /// Path segment under the API base URL.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PlaceOrder => "PlaceOrder",
            Self::ModifyOrder => "ModifyOrder",
            Self::CancelOrder => "CancelOrder",
            Self::OrderBook => "OrderBook",
            Self::SingleOrderHistory => "SingleOrdHist",
            Self::TradeBook => "TradeBook",
            Self::PositionBook => "PositionBook",
            Self::Holdings => "Holdings",
            Self::Limits => "Limits",
            Self::GetQuotes => "GetQuotes",
            Self::SearchScrip => "SearchScrip",
            Self::UserDetails => "UserDetails",
        }
    }

    /// Whether the request carries the account id alongside the user id.
    #[must_use]
    pub const fn requires_account(self) -> bool {
        matches!(
            self,
            Self::PlaceOrder
                | Self::TradeBook
                | Self::PositionBook
                | Self::Holdings
                | Self::Limits
        )
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_history_uses_short_path() {
        assert_eq!(Endpoint::SingleOrderHistory.as_str(), "SingleOrdHist");
    }

    #[test]
    fn account_scoped_endpoints() {
        assert!(Endpoint::PlaceOrder.requires_account());
        assert!(Endpoint::Limits.requires_account());
        assert!(!Endpoint::CancelOrder.requires_account());
        assert!(!Endpoint::GetQuotes.requires_account());
    }
}

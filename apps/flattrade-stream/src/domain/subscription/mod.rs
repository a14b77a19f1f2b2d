//! Subscription Management Types
//!
//! Tracks the desired subscription set of one ticker session. The registry is
//! the single source of truth for what should be live on the feed: callers
//! mutate it at any time, and the ticker reads it on every transition into
//! `Ready` to replay the whole set in one frame per mode.
//!
//! # Design
//!
//! - Entries live in a [`DashMap`], so per-token updates are atomic and a
//!   replay can iterate while callers keep mutating.
//! - A token maps to exactly one mode; subscribing again with a different
//!   mode replaces the previous one.
//! - Unsubscribe can be narrowed with a predicate. When the caller passes
//!   none, the registry's default guard (if any) is applied.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

// =============================================================================
// Types
// =============================================================================

/// Exchange instrument identifier (`NSE|22`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionToken {
    /// Exchange segment.
    pub exchange: String,
    /// Instrument token on that exchange.
    pub token: String,
}

impl SubscriptionToken {
    /// Create a token.
    #[must_use]
    pub fn new(exchange: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            token: token.into(),
        }
    }

    /// Build tokens for several instruments on one exchange.
    #[must_use]
    pub fn many<S: AsRef<str>>(exchange: &str, tokens: &[S]) -> Vec<Self> {
        tokens
            .iter()
            .map(|t| Self::new(exchange, t.as_ref()))
            .collect()
    }
}

impl fmt::Display for SubscriptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.exchange, self.token)
    }
}

/// Error parsing an `EXCHANGE|TOKEN` pair.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid subscription token: {0:?}")]
pub struct ParseTokenError(String);

impl FromStr for SubscriptionToken {
    type Err = ParseTokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('|') {
            Some((exchange, token)) if !exchange.is_empty() && !token.is_empty() => {
                Ok(Self::new(exchange, token))
            }
            _ => Err(ParseTokenError(s.to_string())),
        }
    }
}

/// Fidelity of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionMode {
    /// Touchline (top of book, last trade, OHLC).
    Quote,
    /// Touchline plus five levels of depth.
    FullDepth,
}

impl SubscriptionMode {
    /// All modes, in replay order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Quote, Self::FullDepth]
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Quote => "quote",
            Self::FullDepth => "full_depth",
        }
    }
}

/// Predicate deciding whether a token may be unsubscribed.
pub type UnsubscribeFilter =
    Arc<dyn Fn(&SubscriptionToken, SubscriptionMode) -> bool + Send + Sync>;

// =============================================================================
// Grouped Tokens
// =============================================================================

/// Tokens grouped by mode, each group sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionGroups {
    /// Touchline tokens.
    pub quote: Vec<SubscriptionToken>,
    /// Depth tokens.
    pub full_depth: Vec<SubscriptionToken>,
}

impl SubscriptionGroups {
    /// One group holding `tokens` in `mode`.
    #[must_use]
    pub fn single(mode: SubscriptionMode, mut tokens: Vec<SubscriptionToken>) -> Self {
        tokens.sort();
        match mode {
            SubscriptionMode::Quote => Self {
                quote: tokens,
                ..Self::default()
            },
            SubscriptionMode::FullDepth => Self {
                full_depth: tokens,
                ..Self::default()
            },
        }
    }

    fn push(&mut self, token: SubscriptionToken, mode: SubscriptionMode) {
        match mode {
            SubscriptionMode::Quote => self.quote.push(token),
            SubscriptionMode::FullDepth => self.full_depth.push(token),
        }
    }

    fn sort(&mut self) {
        self.quote.sort();
        self.full_depth.sort();
    }

    /// Tokens for one mode.
    #[must_use]
    pub fn tokens(&self, mode: SubscriptionMode) -> &[SubscriptionToken] {
        match mode {
            SubscriptionMode::Quote => &self.quote,
            SubscriptionMode::FullDepth => &self.full_depth,
        }
    }

    /// Non-empty groups in replay order.
    pub fn non_empty(&self) -> impl Iterator<Item = (SubscriptionMode, &[SubscriptionToken])> {
        SubscriptionMode::all()
            .iter()
            .map(|mode| (*mode, self.tokens(*mode)))
            .filter(|(_, tokens)| !tokens.is_empty())
    }

    /// Whether every group is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quote.is_empty() && self.full_depth.is_empty()
    }

    /// Total number of tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.quote.len() + self.full_depth.len()
    }
}

/// Result of recording a subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeOutcome {
    /// Distinct tokens now desired in the requested mode, sorted.
    pub accepted: Vec<SubscriptionToken>,
    /// Tokens that were desired in a different mode, grouped by that mode.
    pub replaced: SubscriptionGroups,
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Concurrent map of desired subscriptions for one ticker session.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: DashMap<SubscriptionToken, SubscriptionMode>,
    default_filter: RwLock<Option<UnsubscribeFilter>>,
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("entries", &self.entries.len())
            .field("has_default_filter", &self.default_filter.read().is_some())
            .finish()
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record tokens as desired in `mode`.
    ///
    /// Returns the distinct tokens accepted and any whose mode changed, so
    /// the caller can send the matching wire requests when the connection is
    /// ready.
    pub fn subscribe(
        &self,
        tokens: impl IntoIterator<Item = SubscriptionToken>,
        mode: SubscriptionMode,
    ) -> SubscribeOutcome {
        let mut accepted: Vec<SubscriptionToken> = tokens.into_iter().collect();
        accepted.sort();
        accepted.dedup();

        let mut replaced = SubscriptionGroups::default();
        for token in &accepted {
            if let Some(previous) = self.entries.insert(token.clone(), mode)
                && previous != mode
            {
                replaced.push(token.clone(), previous);
            }
        }

        SubscribeOutcome { accepted, replaced }
    }

    /// Remove tokens from the desired set.
    ///
    /// With `filter`, only tokens for which it returns `true` are removed.
    /// Without one, the default filter applies; with neither, every listed
    /// token is removed. Returns the removed tokens grouped by the mode they
    /// were subscribed in.
    pub fn unsubscribe(
        &self,
        tokens: impl IntoIterator<Item = SubscriptionToken>,
        filter: Option<&dyn Fn(&SubscriptionToken, SubscriptionMode) -> bool>,
    ) -> SubscriptionGroups {
        let default_filter = self.default_filter.read().clone();
        let mut removed = SubscriptionGroups::default();

        for token in tokens {
            let entry = self.entries.remove_if(&token, |key, mode| match filter {
                Some(f) => f(key, *mode),
                None => default_filter.as_ref().is_none_or(|f| f(key, *mode)),
            });
            if let Some((token, mode)) = entry {
                removed.push(token, mode);
            }
        }

        removed.sort();
        removed
    }

    /// Install the guard used when `unsubscribe` is called without a filter.
    pub fn set_default_filter(&self, filter: Option<UnsubscribeFilter>) {
        *self.default_filter.write() = filter;
    }

    /// The full desired set grouped by mode, for replay after `Ready`.
    #[must_use]
    pub fn replay_plan(&self) -> SubscriptionGroups {
        let mut plan = SubscriptionGroups::default();
        for entry in &self.entries {
            plan.push(entry.key().clone(), *entry.value());
        }
        plan.sort();
        plan
    }

    /// Mode a token is subscribed in, if any.
    #[must_use]
    pub fn mode_of(&self, token: &SubscriptionToken) -> Option<SubscriptionMode> {
        self.entries.get(token).map(|entry| *entry.value())
    }

    /// Whether the token is desired in any mode.
    #[must_use]
    pub fn contains(&self, token: &SubscriptionToken) -> bool {
        self.entries.contains_key(token)
    }

    /// Number of desired tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is desired.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget every subscription.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

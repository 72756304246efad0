//! Market Data Record Types
//!
//! Typed records decoded from the Alpaca real-time stream. Each record holds
//! only the fields present on its wire form; the `T` discriminator is consumed
//! by the frame decoder and is not stored.
//!
//! # Wire Format
//!
//! ```json
//! [{"T":"t","i":96921,"S":"AAPL","x":"D","p":126.55,"s":1,"t":"2021-02-22T15:51:44.208Z","c":["@","I"],"z":"C"},
//!  {"T":"q","S":"AMD","bx":"U","bp":87.66,"bs":1,"ax":"X","ap":87.67,"as":1,"t":"2021-02-22T15:51:45.3355677Z","c":["R"],"z":"C"},
//!  {"T":"b","S":"SPY","o":388.985,"h":389.13,"l":388.975,"c":389.12,"v":49378,"t":"2021-02-22T19:15:00Z"}]
//! ```
//!
//! Timestamps are kept exactly as received. Consumers that need a parsed
//! instant can do so themselves; the stream client never reformats them.

use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Market Events
// =============================================================================

/// Real-time trade.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "T": "t",
///   "i": 96921,
///   "S": "AAPL",
///   "x": "D",
///   "p": 126.55,
///   "s": 1,
///   "t": "2021-02-22T15:51:44.208Z",
///   "c": ["@", "I"],
///   "z": "C"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    /// Ticker symbol (e.g., "AAPL")
    #[serde(rename = "S")]
    pub symbol: String,

    /// Trade ID (unique per exchange per day)
    #[serde(rename = "i")]
    pub trade_id: i64,

    /// Exchange code where the trade executed
    #[serde(rename = "x")]
    pub exchange: String,

    /// Trade price
    #[serde(rename = "p")]
    pub price: Decimal,

    /// Trade size (shares)
    #[serde(rename = "s")]
    pub size: i64,

    /// Trade timestamp, verbatim
    #[serde(rename = "t")]
    pub timestamp: String,

    /// Trade condition codes, in wire order
    #[serde(rename = "c", default)]
    pub conditions: Vec<String>,

    /// Tape: "A" (NYSE), "B" (ARCA/regional), "C" (NASDAQ)
    #[serde(rename = "z")]
    pub tape: String,
}

/// Real-time quote (NBBO).
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "T": "q",
///   "S": "AMD",
///   "bx": "U",
///   "bp": 87.66,
///   "bs": 1,
///   "ax": "Q",
///   "ap": 87.68,
///   "as": 4,
///   "t": "2021-02-22T15:51:45.335689322Z",
///   "c": ["R"],
///   "z": "C"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Ticker symbol
    #[serde(rename = "S")]
    pub symbol: String,

    /// Ask exchange code
    #[serde(rename = "ax")]
    pub ask_exchange: String,

    /// Ask price
    #[serde(rename = "ap")]
    pub ask_price: Decimal,

    /// Ask size (round lots)
    #[serde(rename = "as")]
    pub ask_size: i64,

    /// Bid exchange code
    #[serde(rename = "bx")]
    pub bid_exchange: String,

    /// Bid price
    #[serde(rename = "bp")]
    pub bid_price: Decimal,

    /// Bid size (round lots)
    #[serde(rename = "bs")]
    pub bid_size: i64,

    /// Quote timestamp, verbatim
    #[serde(rename = "t")]
    pub timestamp: String,

    /// Quote condition codes, in wire order
    #[serde(rename = "c", default)]
    pub conditions: Vec<String>,

    /// Tape identifier
    #[serde(rename = "z")]
    pub tape: String,
}

/// Minute bar (OHLCV).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    /// Ticker symbol
    #[serde(rename = "S")]
    pub symbol: String,

    /// Open price
    #[serde(rename = "o")]
    pub open: Decimal,

    /// High price
    #[serde(rename = "h")]
    pub high: Decimal,

    /// Low price
    #[serde(rename = "l")]
    pub low: Decimal,

    /// Close price
    #[serde(rename = "c")]
    pub close: Decimal,

    /// Volume (shares)
    #[serde(rename = "v")]
    pub volume: i64,

    /// Number of trades in the bar
    #[serde(rename = "n", default)]
    pub trade_count: Option<i64>,

    /// Volume-weighted average price
    #[serde(rename = "vw", default)]
    pub vwap: Option<Decimal>,

    /// Start of the bar period, verbatim
    #[serde(rename = "t")]
    pub timestamp: String,
}

// =============================================================================
// Control Events
// =============================================================================

/// Server-confirmed subscription state.
///
/// Sent after every subscribe/unsubscribe action. The sets are the full
/// current state, not a delta.
///
/// # Wire Format (JSON)
/// ```json
/// {"T":"subscription","trades":["AAPL"],"quotes":["AMD","CLDR"],"bars":[]}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionAck {
    /// Symbols currently subscribed for trades
    #[serde(default)]
    pub trades: BTreeSet<String>,

    /// Symbols currently subscribed for quotes
    #[serde(default)]
    pub quotes: BTreeSet<String>,

    /// Symbols currently subscribed for bars
    #[serde(default)]
    pub bars: BTreeSet<String>,
}

impl SubscriptionAck {
    /// Check whether the server reports no active subscriptions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trades.is_empty() && self.quotes.is_empty() && self.bars.is_empty()
    }
}

/// Error reported by the server on the stream.
///
/// # Wire Format (JSON)
/// ```json
/// {"T": "error", "code": 405, "msg": "symbol limit exceeded"}
/// ```
///
/// # Error Codes
/// - 400: Invalid syntax
/// - 401: Not authenticated
/// - 402: Auth failed
/// - 403: Already authenticated
/// - 404: Auth timeout
/// - 405: Symbol limit exceeded
/// - 406: Connection limit exceeded
/// - 407: Slow client
/// - 408: Insufficient subscription
/// - 500: Internal error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionError {
    /// Error code
    pub code: i32,

    /// Error message
    pub msg: String,
}

impl SessionError {
    /// Check if this is an authentication error.
    #[must_use]
    pub const fn is_auth_error(&self) -> bool {
        matches!(self.code, 401..=404)
    }

    /// Check if this is a rate or limit error.
    #[must_use]
    pub const fn is_limit_error(&self) -> bool {
        matches!(self.code, 405..=407)
    }
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "server error ({}): {}", self.code, self.msg)
    }
}

// =============================================================================
// Record
// =============================================================================

/// A decoded stream record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// Trade print
    Trade(Trade),
    /// Quote update
    Quote(Quote),
    /// Minute bar
    Bar(Bar),
    /// Subscription confirmation
    SubscriptionAck(SubscriptionAck),
    /// Server-side error
    SessionError(SessionError),
}

impl Record {
    /// Kind of this record.
    #[must_use]
    pub const fn kind(&self) -> RecordKind {
        match self {
            Self::Trade(_) => RecordKind::Trade,
            Self::Quote(_) => RecordKind::Quote,
            Self::Bar(_) => RecordKind::Bar,
            Self::SubscriptionAck(_) => RecordKind::SubscriptionAck,
            Self::SessionError(_) => RecordKind::SessionError,
        }
    }
}

/// Record kind, used for labels and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// Trade
    Trade,
    /// Quote
    Quote,
    /// Bar
    Bar,
    /// Subscription confirmation
    SubscriptionAck,
    /// Server error
    SessionError,
}

impl RecordKind {
    /// Label used in event logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trade => "trade",
            Self::Quote => "quote",
            Self::Bar => "bar",
            Self::SubscriptionAck => "subscription",
            Self::SessionError => "error",
        }
    }
}

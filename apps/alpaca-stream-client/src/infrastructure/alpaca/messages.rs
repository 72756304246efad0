//! Alpaca Stream Wire Messages
//!
//! Outbound command frames, handshake acknowledgment literals, and the
//! inbound discriminator vocabulary.
//!
//! # Inbound Discriminators
//!
//! Every inbound sub-message carries a `T` field:
//! - `success`: connection/authentication acknowledgment (singleton batch)
//! - `error`: server error (singleton batch)
//! - `subscription`: subscription confirmation (singleton batch)
//! - `t`, `q`, `b`: trade, quote, bar (mixed batches)
//!
//! # References
//!
//! - [Stock Streaming](https://docs.alpaca.markets/docs/real-time-stock-pricing-data)

use serde::Serialize;
use serde_json::Value;

// =============================================================================
// Handshake Acknowledgments
// =============================================================================

/// Exact frame sent by the server once the transport is open.
pub const CONNECTED_ACK: &str = r#"[{"T":"success","msg":"connected"}]"#;

/// Exact frame sent by the server after accepting credentials.
pub const AUTHENTICATED_ACK: &str = r#"[{"T":"success","msg":"authenticated"}]"#;

// =============================================================================
// Inbound Discriminator
// =============================================================================

/// Kind of an inbound sub-message, read from its `T` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Handshake acknowledgment
    Success,
    /// Server error
    Error,
    /// Subscription confirmation
    Subscription,
    /// Trade
    Trade,
    /// Quote
    Quote,
    /// Minute bar
    Bar,
}

impl MessageKind {
    /// Map a discriminator value to a kind. Unknown values yield `None`.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            "subscription" => Some(Self::Subscription),
            "t" => Some(Self::Trade),
            "q" => Some(Self::Quote),
            "b" => Some(Self::Bar),
            _ => None,
        }
    }

    /// Target type name for diagnostics.
    #[must_use]
    pub const fn target(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::Error => "SessionError",
            Self::Subscription => "SubscriptionAck",
            Self::Trade => "Trade",
            Self::Quote => "Quote",
            Self::Bar => "Bar",
        }
    }
}

// =============================================================================
// Outbound Messages (Client -> Server)
// =============================================================================

/// Authentication request.
///
/// # Wire Format (JSON)
/// ```json
/// {"action":"auth","key":"<key>","secret":"<secret>"}
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct AuthRequest<'a> {
    /// Action: "auth"
    pub action: &'static str,

    /// API key, verbatim
    pub key: &'a str,

    /// API secret, verbatim
    pub secret: &'a str,
}

impl<'a> AuthRequest<'a> {
    /// Create a new authentication request.
    #[must_use]
    pub const fn new(key: &'a str, secret: &'a str) -> Self {
        Self {
            action: "auth",
            key,
            secret,
        }
    }
}

/// Subscription action tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionAction {
    /// Add symbols
    Subscribe,
    /// Remove symbols
    Unsubscribe,
}

impl SubscriptionAction {
    /// Action name as sent on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// Subscribe/unsubscribe command.
///
/// Every list is always present; an empty list encodes as `[]`.
///
/// # Wire Format (JSON)
/// ```json
/// {"action":"subscribe","trades":["AAPL"],"quotes":[],"bars":[]}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionCommand {
    /// Action tag
    pub action: SubscriptionAction,

    /// Encoded trade symbols
    pub trades: Value,

    /// Encoded quote symbols
    pub quotes: Value,

    /// Bar symbols (never requested by this client)
    pub bars: Vec<String>,
}

impl SubscriptionCommand {
    /// Assemble a command from independently encoded symbol lists.
    ///
    /// A list that failed to encode is replaced by `[]`. Returns `None` when
    /// both lists failed, since there is nothing left to send.
    #[must_use]
    pub fn from_encoded(
        action: SubscriptionAction,
        trades: Option<Value>,
        quotes: Option<Value>,
    ) -> Option<Self> {
        if trades.is_none() && quotes.is_none() {
            return None;
        }

        Some(Self {
            action,
            trades: trades.unwrap_or_else(empty_list),
            quotes: quotes.unwrap_or_else(empty_list),
            bars: Vec::new(),
        })
    }

    /// Serialize the command to a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Encode a symbol list as a JSON array.
///
/// # Errors
///
/// Returns an error if the symbols cannot be represented as JSON.
pub fn encode_symbols<S: Serialize + ?Sized>(symbols: &S) -> Result<Value, serde_json::Error> {
    serde_json::to_value(symbols)
}

const fn empty_list() -> Value {
    Value::Array(Vec::new())
}

//! Alpaca Stock Stream Adapter
//!
//! WebSocket session client for Alpaca's real-time stock data stream:
//!
//! - `messages`: outbound frames and handshake literals
//! - `codec`: inbound batch decoder
//! - `auth`: per-login credentials
//! - `session`: connection lifecycle and receive loop

pub mod auth;
pub mod codec;
pub mod messages;
pub mod session;

pub use auth::{Credentials, CredentialsError};
pub use codec::{DecodeError, DecodedBatch, FrameDecoder, SubMessageError};
pub use messages::{
    AUTHENTICATED_ACK, AuthRequest, CONNECTED_ACK, MessageKind, SubscriptionAction,
    SubscriptionCommand,
};
pub use session::{ClientError, Session, SessionConfig};

//! Session Lifecycle
//!
//! State machine for a single stream session:
//!
//! ```text
//! Idle -> Connecting -> Connected -> Authenticating -> Authenticated -> Listening -> Closed
//!                                                                          |
//!                                                                          v
//!                                                                       Faulted
//! ```
//!
//! Failed handshakes fall back (`Connecting -> Idle`, `Authenticating ->
//! Connected`). `Closed` is reachable from every state except `Idle`.

use std::fmt;

/// Close code for a normal closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported when the remote closes without a status.
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// Current state of a stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No transport.
    #[default]
    Idle,
    /// Dialing the endpoint and awaiting the connected acknowledgment.
    Connecting,
    /// Transport open, connected acknowledgment received.
    Connected,
    /// Credentials sent, awaiting the authenticated acknowledgment.
    Authenticating,
    /// Authenticated; subscriptions may be issued.
    Authenticated,
    /// Receive loop running.
    Listening,
    /// Receive loop stopped on a transport fault.
    Faulted,
    /// Disconnected.
    Closed,
}

impl SessionState {
    /// Check if `connect` may be started.
    #[must_use]
    pub const fn can_connect(self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Check if `authenticate` may be started.
    #[must_use]
    pub const fn can_authenticate(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if subscription commands may be sent.
    #[must_use]
    pub const fn can_send_commands(self) -> bool {
        matches!(self, Self::Authenticated | Self::Listening)
    }

    /// Check if the receive loop may be started.
    #[must_use]
    pub const fn can_listen(self) -> bool {
        matches!(self, Self::Authenticated)
    }

    /// Check if `disconnect` applies.
    #[must_use]
    pub const fn can_disconnect(self) -> bool {
        !matches!(self, Self::Idle)
    }

    /// Check if the session has reached a terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Faulted | Self::Closed)
    }

    /// State name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Listening => "listening",
            Self::Faulted => "faulted",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal transport error seen while listening.
///
/// Cloneable so the same fault can be queued for consumers and published to
/// a pending disconnect.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportFault {
    /// Remote sent a close frame.
    #[error("connection closed by remote ({code}): {reason}")]
    Closed {
        /// Close code
        code: u16,
        /// Close reason, possibly empty
        reason: String,
    },

    /// Stream ended without a close frame.
    #[error("connection ended without a close frame")]
    EndOfStream,

    /// Read failed.
    #[error("read failed: {0}")]
    Read(String),
}

impl TransportFault {
    /// Check if this fault is the remote acknowledging a normal closure.
    #[must_use]
    pub const fn is_normal_closure(&self) -> bool {
        matches!(
            self,
            Self::Closed {
                code: NORMAL_CLOSURE,
                ..
            }
        )
    }
}

//! Stream Frame Decoder
//!
//! Decodes one inbound batch into typed records.
//!
//! A batch is a JSON array of sub-messages. The outer array is split into raw
//! spans first; each span then has its `T` discriminator peeked and is decoded
//! straight into the matching record type, so no sub-message is parsed twice
//! into an intermediate map.
//!
//! Failure isolation:
//! - outer structure not an array: the whole batch is rejected
//!   ([`DecodeError::MalformedBatch`])
//! - any single sub-message failing: only that sub-message is dropped and a
//!   [`SubMessageError`] is reported alongside the surviving records

use std::borrow::Cow;

use serde::Deserialize;
use serde_json::value::RawValue;

use super::messages::MessageKind;
use crate::domain::streaming::{Bar, Quote, Record, SessionError, SubscriptionAck, Trade};

// =============================================================================
// Errors
// =============================================================================

/// Batch-level decode failure.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Outer frame is not a sequence of sub-messages.
    #[error("malformed batch: {0}")]
    MalformedBatch(#[source] serde_json::Error),
}

/// Reason a single sub-message was dropped.
#[derive(Debug, thiserror::Error)]
pub enum SubMessageError {
    /// `T` missing, not a string, or the sub-message is not an object.
    #[error("sub-message {index}: missing or non-string discriminator")]
    MissingDiscriminator {
        /// Position in the batch
        index: usize,
    },

    /// `T` value not understood by this client.
    #[error("sub-message {index}: unrecognized event type {kind:?}")]
    UnrecognizedKind {
        /// Position in the batch
        index: usize,
        /// Discriminator value
        kind: String,
    },

    /// Handshake acknowledgment outside of the handshake.
    #[error("sub-message {index}: unexpected control acknowledgment")]
    UnexpectedControl {
        /// Position in the batch
        index: usize,
    },

    /// Fields did not match the target record type.
    #[error("sub-message {index}: failed to decode {target}: {source}")]
    Malformed {
        /// Position in the batch
        index: usize,
        /// Target record type
        target: &'static str,
        /// Underlying parse error
        #[source]
        source: serde_json::Error,
    },
}

impl SubMessageError {
    /// Short reason label for metrics.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::MissingDiscriminator { .. } => "missing_discriminator",
            Self::UnrecognizedKind { .. } => "unrecognized_kind",
            Self::UnexpectedControl { .. } => "unexpected_control",
            Self::Malformed { .. } => "malformed",
        }
    }
}

// =============================================================================
// Decoded Batch
// =============================================================================

/// Result of decoding one batch.
#[derive(Debug, Default)]
pub struct DecodedBatch {
    /// Records in sub-message order.
    pub records: Vec<Record>,
    /// Sub-messages that were dropped.
    pub rejected: Vec<SubMessageError>,
}

impl DecodedBatch {
    /// Total sub-messages seen in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len() + self.rejected.len()
    }

    /// Check if the batch had no sub-messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Deserialize)]
struct Discriminator<'a> {
    #[serde(rename = "T", borrow)]
    tag: Cow<'a, str>,
}

// =============================================================================
// Decoder
// =============================================================================

/// JSON frame decoder for the stock data stream.
#[derive(Debug, Default, Clone)]
pub struct FrameDecoder;

impl FrameDecoder {
    /// Create a new decoder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one batch.
    ///
    /// Each dropped sub-message is logged and returned in
    /// [`DecodedBatch::rejected`]; it never affects its siblings.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::MalformedBatch`] if the frame is not a JSON array.
    pub fn decode(&self, batch: &[u8]) -> Result<DecodedBatch, DecodeError> {
        let spans: Vec<&RawValue> = serde_json::from_slice(batch).map_err(|e| {
            tracing::error!(
                phase = "decode",
                error = %e,
                bytes = %String::from_utf8_lossy(batch),
                "failed to split batch into sub-messages"
            );
            DecodeError::MalformedBatch(e)
        })?;

        let mut decoded = DecodedBatch {
            records: Vec::with_capacity(spans.len()),
            rejected: Vec::new(),
        };

        for (index, span) in spans.into_iter().enumerate() {
            match Self::decode_sub_message(index, span) {
                Ok(record) => decoded.records.push(record),
                Err(e) => {
                    tracing::warn!(
                        phase = "decode",
                        reason = e.reason(),
                        error = %e,
                        bytes = span.get(),
                        "dropping sub-message"
                    );
                    decoded.rejected.push(e);
                }
            }
        }

        Ok(decoded)
    }

    fn decode_sub_message(index: usize, span: &RawValue) -> Result<Record, SubMessageError> {
        let raw = span.get();

        let discriminator: Discriminator<'_> = serde_json::from_str(raw)
            .map_err(|_| SubMessageError::MissingDiscriminator { index })?;

        let kind = MessageKind::from_tag(&discriminator.tag).ok_or_else(|| {
            SubMessageError::UnrecognizedKind {
                index,
                kind: discriminator.tag.clone().into_owned(),
            }
        })?;

        let malformed = |source| SubMessageError::Malformed {
            index,
            target: kind.target(),
            source,
        };

        let record = match kind {
            MessageKind::Trade => Record::Trade(serde_json::from_str::<Trade>(raw).map_err(malformed)?),
            MessageKind::Quote => Record::Quote(serde_json::from_str::<Quote>(raw).map_err(malformed)?),
            MessageKind::Bar => Record::Bar(serde_json::from_str::<Bar>(raw).map_err(malformed)?),
            MessageKind::Subscription => Record::SubscriptionAck(
                serde_json::from_str::<SubscriptionAck>(raw).map_err(malformed)?,
            ),
            MessageKind::Error => {
                Record::SessionError(serde_json::from_str::<SessionError>(raw).map_err(malformed)?)
            }
            MessageKind::Success => return Err(SubMessageError::UnexpectedControl { index }),
        };

        Ok(record)
    }
}

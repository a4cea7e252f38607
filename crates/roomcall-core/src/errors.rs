use thiserror::Error;

use crate::signaling::FeedId;

#[derive(Debug, Error)]
pub enum CallError {
    /// Connect or join timed out, or the transport dropped. Fatal to the
    /// call; the core never retries on its own.
    #[error("gateway unreachable: {0}")]
    GatewayUnreachable(String),
    /// Capture permission or device error. Fatal to publishing only.
    #[error("capture denied: {0}")]
    CaptureDenied(String),
    /// Offer/answer exchange rejected. Retry is caller-initiated.
    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),
    /// Subscribe requested for a feed absent from the roster. Rejected
    /// before any network action.
    #[error("unknown feed: {0}")]
    UnknownFeed(FeedId),
    /// Media control invoked before local capture exists. Non-fatal.
    #[error("no local media")]
    NoLocalMedia,
    #[error("invalid state: {0}")]
    InvalidState(String),
}

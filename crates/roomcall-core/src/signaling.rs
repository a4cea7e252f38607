use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub type SessionId = u64;
pub type HandleId = u64;
pub type RoomId = u64;
pub type FeedId = u64;

/// Role named in a join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerKind {
    Publisher,
    Subscriber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptionKind {
    Offer,
    Answer,
}

/// A session description exchanged during negotiation. Opaque to the
/// core; only the transport layer interprets the SDP body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Description {
    #[serde(rename = "type")]
    pub kind: DescriptionKind,
    pub sdp: String,
}

/// Requests the core sends to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "lowercase")]
pub enum ClientRequest {
    Join {
        room: RoomId,
        ptype: PeerKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        display: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        feed: Option<FeedId>,
        /// Debug label for the handle, for gateway-side log correlation.
        #[serde(skip_serializing_if = "Option::is_none")]
        opaque_id: Option<String>,
    },
    Publish {
        audio: bool,
        video: bool,
    },
    /// Completes a subscription; carries the answering description.
    Start,
    Leave,
}

/// Remote publisher entry as announced by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherInfo {
    pub id: FeedId,
    pub display: String,
}

/// Asynchronous events the gateway pushes down the signaling channel.
///
/// A negotiation description may ride along on any of these (see
/// [`InboundEnvelope::jsep`]), so the variants only describe the room-level
/// payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum GatewayEvent {
    Joined {
        #[serde(default)]
        publishers: Vec<PublisherInfo>,
    },
    Event {
        #[serde(default)]
        publishers: Vec<PublisherInfo>,
        #[serde(skip_serializing_if = "Option::is_none")]
        leaving: Option<FeedId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// One request on its way to the gateway, addressed to a handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    pub handle: HandleId,
    pub transaction: String,
    #[serde(flatten)]
    pub body: ClientRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jsep: Option<Description>,
}

/// One gateway message addressed to a handle. `transaction` is echoed
/// back when the message replies to a request we sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    pub handle: HandleId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    #[serde(flatten)]
    pub event: GatewayEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jsep: Option<Description>,
}

/// The live signaling channel to the gateway: the session id the gateway
/// issued plus both directions of the message stream.
pub struct SignalingLink {
    pub session: SessionId,
    pub tx: mpsc::UnboundedSender<OutboundEnvelope>,
    pub rx: mpsc::UnboundedReceiver<InboundEnvelope>,
}

/// Random correlation id for one request/reply exchange.
pub fn new_transaction() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect()
}

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, oneshot};

use crate::controls::{CallControls, LocalMedia};
use crate::dispatch;
use crate::errors::CallError;
use crate::events::{CallEvent, CallEventListener, ConnectionState, EventEmitter, ParticipantInfo};
use crate::media::{MediaStack, RemoteTrackRef};
use crate::participants::Roster;
use crate::publish::{PublishPipeline, PublishState};
use crate::registry::{HandleArena, HandleRole};
use crate::session::Session;
use crate::signaling::{
    ClientRequest, Description, FeedId, GatewayEvent, HandleId, InboundEnvelope, OutboundEnvelope,
    PeerKind, RoomId, new_transaction,
};
use crate::subscribe::{self, AttachOutcome};

/// Caller-supplied deadlines. The core never hardcodes timeout values;
/// connect and join expiry surface as `GatewayUnreachable`.
#[derive(Debug, Clone, Copy)]
pub struct CallConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl CallConfig {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self { connect_timeout, request_timeout }
    }
}

/// Role the local participant takes when joining a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Publisher,
    Subscriber { feed: FeedId },
}

/// The room a call is in. Immutable for the lifetime of the call.
#[derive(Debug, Clone)]
pub struct RoomInfo {
    pub id: RoomId,
    pub display: String,
}

/// State shared between the call session, the dispatcher and the
/// per-feed attach tasks. Everything is behind its own lock; the handle
/// arena is the single point that invalidates atomically on destroy.
#[derive(Clone)]
pub(crate) struct CallShared {
    pub(crate) stack: Arc<MediaStack>,
    pub(crate) config: CallConfig,
    pub(crate) emitter: EventEmitter,
    pub(crate) session: Arc<Mutex<Option<Arc<Session>>>>,
    pub(crate) arena: Arc<Mutex<HandleArena>>,
    pub(crate) roster: Arc<Mutex<Roster>>,
    pub(crate) local_media: Arc<Mutex<Option<LocalMedia>>>,
    pub(crate) room: Arc<Mutex<Option<RoomInfo>>>,
}

impl CallShared {
    pub(crate) async fn session(&self) -> Result<Arc<Session>, CallError> {
        self.session
            .lock()
            .await
            .clone()
            .ok_or_else(|| CallError::InvalidState("not connected".into()))
    }

    /// Fire-and-forget request on a handle.
    pub(crate) async fn send_on(
        &self,
        handle: HandleId,
        body: ClientRequest,
        jsep: Option<Description>,
    ) -> Result<(), CallError> {
        let session = self.session().await?;
        session
            .send(OutboundEnvelope { handle, transaction: new_transaction(), body, jsep })
            .await
    }

    /// Send a request and register its reply slot. Negotiation on a
    /// handle is strictly sequential; a second in-flight request on the
    /// same handle is refused.
    pub(crate) async fn request(
        &self,
        handle: HandleId,
        body: ClientRequest,
        jsep: Option<Description>,
    ) -> Result<oneshot::Receiver<InboundEnvelope>, CallError> {
        let transaction = new_transaction();
        let (tx, rx) = oneshot::channel();
        {
            let mut arena = self.arena.lock().await;
            if !arena.set_pending(handle, transaction.clone(), tx) {
                return Err(CallError::InvalidState(format!(
                    "negotiation already in flight on handle {handle}"
                )));
            }
        }
        let session = match self.session().await {
            Ok(session) => session,
            Err(e) => {
                self.arena.lock().await.clear_pending(handle);
                return Err(e);
            }
        };
        if let Err(e) = session
            .send(OutboundEnvelope { handle, transaction, body, jsep })
            .await
        {
            self.arena.lock().await.clear_pending(handle);
            return Err(e);
        }
        Ok(rx)
    }

    pub(crate) async fn await_reply(
        &self,
        rx: oneshot::Receiver<InboundEnvelope>,
    ) -> Result<InboundEnvelope, CallError> {
        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(envelope)) => Ok(envelope),
            Ok(Err(_)) => Err(CallError::InvalidState("handle detached".into())),
            Err(_) => Err(CallError::GatewayUnreachable("gateway reply timed out".into())),
        }
    }
}

/// Manages the lifecycle of one call: the gateway session, room
/// membership, the publish pipeline and all remote-feed subscriptions.
pub struct CallSession {
    shared: CallShared,
    publish: Arc<PublishPipeline>,
}

impl CallSession {
    pub fn new(stack: MediaStack, config: CallConfig) -> Self {
        let shared = CallShared {
            stack: Arc::new(stack),
            config,
            emitter: EventEmitter::new(),
            session: Arc::new(Mutex::new(None)),
            arena: Arc::new(Mutex::new(HandleArena::new())),
            roster: Arc::new(Mutex::new(Roster::new())),
            local_media: Arc::new(Mutex::new(None)),
            room: Arc::new(Mutex::new(None)),
        };
        let publish = Arc::new(PublishPipeline::new(shared.clone()));
        Self { shared, publish }
    }

    /// Register a listener for call events.
    pub fn add_listener(&self, listener: Arc<dyn CallEventListener>) {
        self.shared.emitter.add_listener(listener);
    }

    /// Create media controls bound to this call's local capture.
    pub fn controls(&self) -> CallControls {
        CallControls::new(self.shared.local_media.clone(), self.shared.stack.audio_route.clone())
    }

    /// Connect to the gateway and start the signaling dispatcher.
    /// Refused while a session is already connecting or connected.
    pub async fn connect(&self, gateway_addr: &str) -> Result<(), CallError> {
        let mut guard = self.shared.session.lock().await;
        if let Some(existing) = guard.as_ref() {
            if existing.state().await != ConnectionState::Destroyed {
                return Err(CallError::InvalidState("session already connected".into()));
            }
        }
        self.shared.emitter.emit(CallEvent::ConnectionStateChanged(ConnectionState::Connecting));
        let (session, rx) =
            match Session::connect(&self.shared.stack, gateway_addr, self.shared.config.connect_timeout)
                .await
            {
                Ok(pair) => pair,
                Err(e) => {
                    self.shared
                        .emitter
                        .emit(CallEvent::ConnectionStateChanged(ConnectionState::Disconnected));
                    return Err(e);
                }
            };
        *guard = Some(session);
        drop(guard);
        self.shared.emitter.emit(CallEvent::ConnectionStateChanged(ConnectionState::Connected));
        tokio::spawn(dispatch::run(rx, self.shared.clone()));
        Ok(())
    }

    /// Join a room. As publisher this seeds the roster from the join
    /// reply and starts publishing the local feed; as subscriber the
    /// target feed must already be in the roster.
    pub async fn join(
        &self,
        room: RoomId,
        display: &str,
        role: Role,
    ) -> Result<HandleId, CallError> {
        let session = self.shared.session().await?;
        if !session.is_connected().await {
            return Err(CallError::InvalidState("join requires a connected session".into()));
        }

        match role {
            Role::Subscriber { feed } => {
                if !self.shared.roster.lock().await.contains(feed) {
                    return Err(CallError::UnknownFeed(feed));
                }
                // The dispatcher attaches announced feeds automatically;
                // an existing handle is this subscription, already live.
                if let Some(handle) = self.shared.arena.lock().await.handle_for_feed(feed) {
                    return Ok(handle);
                }
                *self.shared.room.lock().await =
                    Some(RoomInfo { id: room, display: display.to_string() });
                match subscribe::attach(&self.shared, room, feed).await {
                    Ok(AttachOutcome::Attached(handle)) => Ok(handle),
                    Ok(AttachOutcome::Aborted) => {
                        // Lost a race with either a concurrent attach or
                        // the feed's departure.
                        match self.shared.arena.lock().await.handle_for_feed(feed) {
                            Some(handle) => Ok(handle),
                            None => Err(CallError::UnknownFeed(feed)),
                        }
                    }
                    Err(e) => {
                        subscribe::teardown_feed(&self.shared, feed, true).await;
                        Err(e)
                    }
                }
            }
            Role::Publisher => {
                let transport = self.shared.stack.transports.create_session().await?;
                let (handle, opaque_id) = {
                    let mut arena = self.shared.arena.lock().await;
                    let handle = arena.attach(HandleRole::Publisher, None, transport)?;
                    let opaque_id = arena.get(handle).map(|e| e.opaque_id.clone());
                    (handle, opaque_id)
                };
                *self.shared.room.lock().await =
                    Some(RoomInfo { id: room, display: display.to_string() });

                let request = ClientRequest::Join {
                    room,
                    ptype: PeerKind::Publisher,
                    display: Some(display.to_string()),
                    feed: None,
                    opaque_id,
                };
                let pending = match self.shared.request(handle, request, None).await {
                    Ok(rx) => rx,
                    Err(e) => {
                        self.shared.arena.lock().await.remove(handle);
                        return Err(e);
                    }
                };
                let reply = match self.shared.await_reply(pending).await {
                    Ok(reply) => reply,
                    Err(e) => {
                        self.shared.arena.lock().await.remove(handle);
                        return Err(e);
                    }
                };

                // The dispatcher already seeded the roster from the
                // reply's publisher list before handing it over.
                if let GatewayEvent::Event { error: Some(err), .. } = &reply.event {
                    self.shared.arena.lock().await.remove(handle);
                    return Err(CallError::InvalidState(format!("join rejected: {err}")));
                }
                let display_name = display;
                tracing::info!(room, "joined room as publisher: {display_name}");

                // Publishing continues asynchronously: capture grant and
                // ICE gathering may suspend long after join returns.
                let pipeline = self.publish.clone();
                tokio::spawn(async move {
                    if let Err(e) = pipeline.publish(handle).await {
                        tracing::warn!("publishing local feed failed: {e}");
                    }
                });
                Ok(handle)
            }
        }
    }

    /// Retry publishing after a reported failure (the pipeline rewinds
    /// to `CaptureReady` on `NegotiationFailed`).
    pub async fn publish(&self) -> Result<(), CallError> {
        let handle = self
            .shared
            .arena
            .lock()
            .await
            .publisher()
            .ok_or_else(|| CallError::InvalidState("no publisher handle".into()))?;
        self.publish.publish(handle).await
    }

    /// Re-run offer/answer after an explicit local track change. Mute
    /// does not come through here.
    pub async fn renegotiate(&self) -> Result<(), CallError> {
        let handle = self
            .shared
            .arena
            .lock()
            .await
            .publisher()
            .ok_or_else(|| CallError::InvalidState("no publisher handle".into()))?;
        self.publish.renegotiate(handle).await
    }

    /// Leave the call: best-effort ordered teardown. Every step's
    /// failure is logged but never stops the later steps; the capture
    /// device is always released. Calling leave twice is a no-op.
    pub async fn leave(&self) {
        let session = self.shared.session.lock().await.clone();
        let was_active = match session.as_ref() {
            Some(session) => session.state().await != ConnectionState::Destroyed,
            None => false,
        };
        if !was_active {
            tracing::debug!("leave on an already torn down call");
            return;
        }
        tracing::info!("leaving call");

        // (1) leave request on the publisher handle, if present
        let publisher = self.shared.arena.lock().await.publisher();
        if let Some(handle) = publisher {
            if let Err(e) = self.shared.send_on(handle, ClientRequest::Leave, None).await {
                tracing::warn!("leave request failed: {e}");
            }
        }

        // (2) close every handle's media-transport session
        let entries = self.shared.arena.lock().await.detach_all();
        for entry in entries {
            entry.transport.close().await;
        }

        // (3) destroy the gateway session
        if let Some(session) = session {
            session.destroy().await;
        }

        // (4) release the local capture device
        if let Some(media) = self.shared.local_media.lock().await.take() {
            media.device.release();
        }

        self.publish.close().await;
        self.shared.roster.lock().await.clear();
        self.shared.room.lock().await.take();
        self.shared.emitter.emit(CallEvent::ConnectionStateChanged(ConnectionState::Destroyed));
        self.shared.emitter.emit(CallEvent::CallEnded);
    }

    pub async fn connection_state(&self) -> ConnectionState {
        match self.shared.session.lock().await.as_ref() {
            Some(session) => session.state().await,
            None => ConnectionState::Disconnected,
        }
    }

    /// Snapshot of the current roster.
    pub async fn participants(&self) -> Vec<ParticipantInfo> {
        self.shared.roster.lock().await.snapshot()
    }

    /// The remote track bound for a feed, if its subscription completed.
    pub async fn remote_track(&self, feed: FeedId) -> Option<RemoteTrackRef> {
        self.shared.roster.lock().await.remote_track(feed)
    }

    pub async fn publish_state(&self) -> PublishState {
        self.publish.state().await
    }

    pub async fn current_room(&self) -> Option<RoomInfo> {
        self.shared.room.lock().await.clone()
    }
}

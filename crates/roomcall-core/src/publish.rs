use std::sync::Arc;

use tokio::sync::Mutex;

use crate::controls::LocalMedia;
use crate::errors::CallError;
use crate::events::CallEvent;
use crate::media::{CaptureConstraints, CaptureDevice, MediaTransport};
use crate::room::CallShared;
use crate::signaling::{ClientRequest, DescriptionKind, GatewayEvent, HandleId};

/// Lifecycle of the local publish negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishState {
    Idle,
    CaptureRequested,
    CaptureReady,
    OfferCreated,
    Published,
    Renegotiating,
    Closed,
}

/// Drives local publishing on the publisher handle: capture acquisition,
/// offer creation, the publish exchange, and renegotiation on explicit
/// track changes. Mute never passes through here.
pub struct PublishPipeline {
    state: Mutex<PublishState>,
    shared: CallShared,
}

impl PublishPipeline {
    pub(crate) fn new(shared: CallShared) -> Self {
        Self { state: Mutex::new(PublishState::Idle), shared }
    }

    pub async fn state(&self) -> PublishState {
        *self.state.lock().await
    }

    async fn set_state(&self, next: PublishState) {
        let mut state = self.state.lock().await;
        if *state == next {
            return;
        }
        tracing::debug!("publish state {:?} -> {next:?}", *state);
        *state = next;
        drop(state);
        self.shared.emitter.emit(CallEvent::PublishStateChanged(next));
    }

    /// Rewind on a failed exchange and hand the error back to the caller.
    async fn fail(&self, rewind: PublishState, err: CallError) -> CallError {
        self.set_state(rewind).await;
        err
    }

    /// Publish the local feed on `handle`: acquire capture if we do not
    /// hold one (a retry after `NegotiationFailed` keeps the existing
    /// capture), then run the offer/answer exchange.
    pub(crate) async fn publish(&self, handle: HandleId) -> Result<(), CallError> {
        match self.state().await {
            PublishState::Published | PublishState::Renegotiating | PublishState::OfferCreated => {
                return Err(CallError::InvalidState("publish already in progress".into()));
            }
            _ => {}
        }

        let device = match self.existing_device().await {
            Some(device) => {
                self.set_state(PublishState::CaptureReady).await;
                device
            }
            None => {
                self.set_state(PublishState::CaptureRequested).await;
                match self.shared.stack.capture.acquire(CaptureConstraints::front_camera()).await {
                    Ok(device) => {
                        *self.shared.local_media.lock().await =
                            Some(LocalMedia::new(device.clone()));
                        tracing::info!("local capture granted");
                        self.set_state(PublishState::CaptureReady).await;
                        device
                    }
                    Err(e) => {
                        tracing::warn!("local capture denied: {e}");
                        self.set_state(PublishState::Closed).await;
                        return Err(e);
                    }
                }
            }
        };

        self.exchange(handle, device, PublishState::CaptureReady).await
    }

    /// Re-run the offer/answer exchange after an explicit track change.
    pub(crate) async fn renegotiate(&self, handle: HandleId) -> Result<(), CallError> {
        if self.state().await != PublishState::Published {
            return Err(CallError::InvalidState("renegotiation requires a published feed".into()));
        }
        let device = self
            .existing_device()
            .await
            .ok_or(CallError::NoLocalMedia)?;
        self.set_state(PublishState::Renegotiating).await;
        self.exchange(handle, device, PublishState::Published).await
    }

    /// Offer/answer exchange with the gateway. On failure the machine
    /// rewinds to `rewind` so the caller can retry.
    async fn exchange(
        &self,
        handle: HandleId,
        device: Arc<dyn CaptureDevice>,
        rewind: PublishState,
    ) -> Result<(), CallError> {
        let transport = self.transport_of(handle).await?;

        let offer = match transport.create_offer(Some(device)).await {
            Ok(offer) => offer,
            Err(e) => {
                return Err(self
                    .fail(rewind, CallError::NegotiationFailed(e.to_string()))
                    .await);
            }
        };
        self.set_state(PublishState::OfferCreated).await;

        let (audio, video) = self.enabled_flags().await;
        let reply = match self
            .shared
            .request(handle, ClientRequest::Publish { audio, video }, Some(offer))
            .await
        {
            Ok(rx) => match self.shared.await_reply(rx).await {
                Ok(reply) => reply,
                Err(e) => return Err(self.fail(rewind, e).await),
            },
            Err(e) => return Err(self.fail(rewind, e).await),
        };

        if let GatewayEvent::Event { error: Some(err), .. } = &reply.event {
            return Err(self
                .fail(rewind, CallError::NegotiationFailed(err.clone()))
                .await);
        }
        let answer = match reply.jsep {
            Some(desc) if desc.kind == DescriptionKind::Answer => desc,
            _ => {
                return Err(self
                    .fail(
                        rewind,
                        CallError::NegotiationFailed("publish reply carried no answer".into()),
                    )
                    .await);
            }
        };
        if let Err(e) = transport.apply_remote_description(answer).await {
            return Err(self
                .fail(rewind, CallError::NegotiationFailed(e.to_string()))
                .await);
        }

        self.set_state(PublishState::Published).await;
        tracing::info!(handle, "local feed published");
        Ok(())
    }

    /// Teardown hook: the pipeline ends in `Closed` from any state.
    pub(crate) async fn close(&self) {
        self.set_state(PublishState::Closed).await;
    }

    async fn existing_device(&self) -> Option<Arc<dyn CaptureDevice>> {
        self.shared.local_media.lock().await.as_ref().map(|m| m.device.clone())
    }

    async fn enabled_flags(&self) -> (bool, bool) {
        self.shared
            .local_media
            .lock()
            .await
            .as_ref()
            .map(|m| (m.audio_enabled, m.video_enabled))
            .unwrap_or((true, true))
    }

    async fn transport_of(&self, handle: HandleId) -> Result<Arc<dyn MediaTransport>, CallError> {
        self.shared
            .arena
            .lock()
            .await
            .get(handle)
            .map(|e| e.transport.clone())
            .ok_or_else(|| CallError::InvalidState(format!("handle {handle} is gone")))
    }
}

use std::sync::Arc;

use crate::errors::CallError;
use crate::events::CallEvent;
use crate::media::MediaTransport;
use crate::registry::{HandleRole, HandleState};
use crate::room::CallShared;
use crate::signaling::{ClientRequest, DescriptionKind, FeedId, HandleId, PeerKind, RoomId};

/// Result of an attach attempt. An abort is not a failure: it means the
/// feed departed while the attach was in flight and the handle was
/// discarded cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AttachOutcome {
    Attached(HandleId),
    Aborted,
}

/// Spawn an independent attach task for an announced publisher feed.
/// Attaches for different feeds run concurrently; a failure on one feed
/// removes only that feed's participant/handle pair.
pub(crate) fn spawn_attach(shared: CallShared, room: RoomId, feed: FeedId) {
    tokio::spawn(async move {
        match attach(&shared, room, feed).await {
            Ok(AttachOutcome::Attached(handle)) => {
                tracing::info!(feed, handle, "remote feed attached");
            }
            Ok(AttachOutcome::Aborted) => {
                tracing::debug!(feed, "remote feed attach aborted");
            }
            Err(e) => {
                tracing::warn!(feed, "remote feed attach failed: {e}");
                teardown_feed(&shared, feed, true).await;
            }
        }
    });
}

/// Subscribe to one remote feed: attach a dedicated handle, join as
/// subscriber naming the feed, answer the gateway's offer, then bind the
/// first delivered remote track. Cancelled at any await point if the
/// feed departs first.
pub(crate) async fn attach(
    shared: &CallShared,
    room: RoomId,
    feed: FeedId,
) -> Result<AttachOutcome, CallError> {
    let transport = shared.stack.transports.create_session().await?;

    let (handle, mut cancelled, opaque_id) = {
        let mut arena = shared.arena.lock().await;
        // a concurrent attach beat us to the feed
        if arena.handle_for_feed(feed).is_some() {
            transport.close().await;
            return Ok(AttachOutcome::Aborted);
        }
        let handle = arena.attach(HandleRole::Subscriber, Some(feed), transport.clone())?;
        let cancelled = arena
            .cancel_receiver(handle)
            .ok_or_else(|| CallError::InvalidState(format!("handle {handle} is gone")))?;
        let opaque_id = arena.get(handle).map(|e| e.opaque_id.clone());
        (handle, cancelled, opaque_id)
    };

    // The feed may have departed between announcement and now.
    if !shared.roster.lock().await.link_handle(feed, handle) {
        discard(shared, handle, &transport).await;
        return Ok(AttachOutcome::Aborted);
    }

    let pending = match shared
        .request(
            handle,
            ClientRequest::Join {
                room,
                ptype: PeerKind::Subscriber,
                display: None,
                feed: Some(feed),
                opaque_id,
            },
            None,
        )
        .await
    {
        Ok(rx) => rx,
        Err(e) => {
            discard(shared, handle, &transport).await;
            return Err(e);
        }
    };

    // Await the gateway's offer, unless the feed departs first.
    let reply = tokio::select! {
        reply = shared.await_reply(pending) => match reply {
            Ok(reply) => reply,
            Err(_) if *cancelled.borrow() => {
                discard(shared, handle, &transport).await;
                return Ok(AttachOutcome::Aborted);
            }
            Err(e) => {
                discard(shared, handle, &transport).await;
                return Err(e);
            }
        },
        _ = cancelled.changed() => {
            discard(shared, handle, &transport).await;
            return Ok(AttachOutcome::Aborted);
        }
    };

    let offer = match reply.jsep {
        Some(desc) if desc.kind == DescriptionKind::Offer => desc,
        _ => {
            discard(shared, handle, &transport).await;
            return Err(CallError::NegotiationFailed("subscribe reply carried no offer".into()));
        }
    };
    transport
        .apply_remote_description(offer)
        .await
        .map_err(|e| CallError::NegotiationFailed(e.to_string()))?;
    let answer = transport
        .create_answer()
        .await
        .map_err(|e| CallError::NegotiationFailed(e.to_string()))?;

    if *cancelled.borrow() {
        discard(shared, handle, &transport).await;
        return Ok(AttachOutcome::Aborted);
    }
    shared.send_on(handle, ClientRequest::Start, Some(answer)).await?;

    // First remote track delivery completes the attach.
    let track = tokio::select! {
        track = transport.next_remote_track() => track,
        _ = cancelled.changed() => None,
    };
    let Some(track) = track else {
        discard(shared, handle, &transport).await;
        return Ok(AttachOutcome::Aborted);
    };
    if *cancelled.borrow() {
        discard(shared, handle, &transport).await;
        return Ok(AttachOutcome::Aborted);
    }

    // Bind exactly once; a second delivery for the same handle is
    // ignored by the roster.
    let bound = shared.roster.lock().await.bind_track(feed, track.clone());
    if bound {
        shared.emitter.emit(CallEvent::RemoteTrackBound { feed, track });
    } else if !shared.roster.lock().await.contains(feed) {
        // Departed after the track arrived but before we bound it.
        discard(shared, handle, &transport).await;
        return Ok(AttachOutcome::Aborted);
    }

    if let Some(entry) = shared.arena.lock().await.get_mut(handle) {
        entry.state = HandleState::Attached;
    }
    Ok(AttachOutcome::Attached(handle))
}

/// Remove one feed's participant/handle pair: cancels an in-flight
/// attach, closes the transport, and (optionally) notifies listeners.
pub(crate) async fn teardown_feed(shared: &CallShared, feed: FeedId, notify: bool) {
    let participant = shared.roster.lock().await.depart(feed);
    let entry = {
        let mut arena = shared.arena.lock().await;
        match arena.handle_for_feed(feed) {
            Some(handle) => {
                arena.cancel(handle);
                arena.remove(handle)
            }
            None => None,
        }
    };
    if let Some(entry) = entry {
        entry.transport.close().await;
    }
    if notify && participant.is_some() {
        shared.emitter.emit(CallEvent::ParticipantLeft(feed));
    }
}

async fn discard(shared: &CallShared, handle: HandleId, transport: &Arc<dyn MediaTransport>) {
    shared.arena.lock().await.remove(handle);
    transport.close().await;
}

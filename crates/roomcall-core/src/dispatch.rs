use tokio::sync::mpsc;

use crate::events::{CallEvent, ConnectionState, ParticipantInfo};
use crate::room::CallShared;
use crate::signaling::{GatewayEvent, InboundEnvelope, PublisherInfo};
use crate::subscribe;

/// Drain the session's inbound stream, one message at a time in arrival
/// order. Handlers may suspend; work on other handles (feed attaches)
/// runs in its own tasks and is never blocked here.
pub(crate) async fn run(mut rx: mpsc::UnboundedReceiver<InboundEnvelope>, shared: CallShared) {
    while let Some(envelope) = rx.recv().await {
        handle_message(&shared, envelope).await;
    }
    tracing::info!("signaling stream ended");
    end_of_stream(&shared).await;
}

async fn handle_message(shared: &CallShared, envelope: InboundEnvelope) {
    // Roster deltas apply no matter which message carried them; a reply
    // to a publish or start may still announce or retire feeds.
    match &envelope.event {
        GatewayEvent::Joined { publishers } => {
            announce_publishers(shared, publishers.clone()).await;
        }
        GatewayEvent::Event { publishers, leaving, .. } => {
            announce_publishers(shared, publishers.clone()).await;
            if let Some(feed) = *leaving {
                tracing::info!(feed, "publisher leaving");
                subscribe::teardown_feed(shared, feed, true).await;
            }
        }
    }

    // A reply someone is awaiting resolves through the handle's pending
    // slot, matched on the echoed transaction; its jsep and error belong
    // to that caller.
    if let Some(transaction) = envelope.transaction.clone() {
        let pending = shared
            .arena
            .lock()
            .await
            .take_pending(envelope.handle, &transaction);
        if let Some(tx) = pending {
            if tx.send(envelope).is_err() {
                tracing::debug!("pending reply receiver dropped");
            }
            return;
        }
    }

    let handle = envelope.handle;
    if let GatewayEvent::Event { error: Some(err), .. } = &envelope.event {
        tracing::warn!(handle, "gateway error event: {err}");
    }

    // Unsolicited negotiation payloads apply to their addressed handle
    // no matter which event type carried them.
    if let Some(desc) = envelope.jsep {
        let transport = shared.arena.lock().await.get(handle).map(|e| e.transport.clone());
        match transport {
            Some(transport) => {
                if let Err(e) = transport.apply_remote_description(desc).await {
                    tracing::warn!(handle, "failed to apply remote description: {e}");
                }
            }
            None => tracing::debug!(handle, "negotiation payload for unknown handle"),
        }
    }
}

/// Seed or extend the roster and start a subscriber attach for every
/// newly announced publisher. Used both for the initial roster in the
/// join reply and for incremental announcements.
pub(crate) async fn announce_publishers(shared: &CallShared, publishers: Vec<PublisherInfo>) {
    if publishers.is_empty() {
        return;
    }
    let room = shared.room.lock().await.as_ref().map(|r| r.id);
    let Some(room) = room else {
        tracing::warn!("publisher list received before room join");
        return;
    };
    for publisher in publishers {
        let fresh = shared.roster.lock().await.announce(publisher.id, &publisher.display);
        if !fresh {
            continue;
        }
        tracing::info!(feed = publisher.id, display = %publisher.display, "remote publisher announced");
        shared.emitter.emit(CallEvent::ParticipantJoined(ParticipantInfo {
            feed: publisher.id,
            display: publisher.display,
        }));
        subscribe::spawn_attach(shared.clone(), room, publisher.id);
    }
}

/// The gateway dropped the signaling channel. Fatal to the call: destroy
/// the session, invalidate every handle, and tell listeners. After a
/// normal leave the stream also ends, but teardown has already run.
async fn end_of_stream(shared: &CallShared) {
    let session = shared.session.lock().await.clone();
    let already_destroyed = match session.as_ref() {
        Some(session) => session.state().await == ConnectionState::Destroyed,
        None => true,
    };
    if already_destroyed {
        tracing::debug!("signaling stream closed after teardown");
        return;
    }
    tracing::warn!("gateway connection lost");
    if let Some(session) = session {
        session.destroy().await;
    }
    let entries = shared.arena.lock().await.detach_all();
    for entry in entries {
        entry.transport.close().await;
    }
    shared.roster.lock().await.clear();
    shared.emitter.emit(CallEvent::ConnectionStateChanged(ConnectionState::Destroyed));
    shared.emitter.emit(CallEvent::CallEnded);
}

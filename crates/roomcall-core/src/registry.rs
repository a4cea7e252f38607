use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{oneshot, watch};
use uuid::Uuid;

use crate::errors::CallError;
use crate::media::MediaTransport;
use crate::signaling::{FeedId, HandleId, InboundEnvelope};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleRole {
    Publisher,
    Subscriber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Attaching,
    Attached,
}

/// One negotiation context: a handle bound to its own media-transport
/// session. Negotiation on a handle is strictly sequential — at most one
/// pending request/reply exchange at a time.
pub struct HandleEntry {
    pub id: HandleId,
    pub role: HandleRole,
    pub feed: Option<FeedId>,
    pub opaque_id: String,
    pub transport: Arc<dyn MediaTransport>,
    pub state: HandleState,
    pending: Option<(String, oneshot::Sender<InboundEnvelope>)>,
    cancel: watch::Sender<bool>,
}

/// Arena of all handles belonging to the session: at most one publisher,
/// one subscriber per remote feed. Lives behind a single lock so that
/// destroying the session invalidates every handle atomically.
pub struct HandleArena {
    next: HandleId,
    entries: HashMap<HandleId, HandleEntry>,
    publisher: Option<HandleId>,
    by_feed: HashMap<FeedId, HandleId>,
}

impl HandleArena {
    pub fn new() -> Self {
        Self { next: 1, entries: HashMap::new(), publisher: None, by_feed: HashMap::new() }
    }

    /// Allocate a handle. Publisher handles are limited to one per call;
    /// subscriber handles must name their feed, at most one per feed.
    pub fn attach(
        &mut self,
        role: HandleRole,
        feed: Option<FeedId>,
        transport: Arc<dyn MediaTransport>,
    ) -> Result<HandleId, CallError> {
        if role == HandleRole::Publisher && self.publisher.is_some() {
            return Err(CallError::InvalidState("publisher handle already attached".into()));
        }
        if let Some(feed) = feed {
            if self.by_feed.contains_key(&feed) {
                return Err(CallError::InvalidState(format!(
                    "feed {feed} already has a subscriber handle"
                )));
            }
        }
        let id = self.next;
        self.next += 1;
        let prefix = match role {
            HandleRole::Publisher => "videoroom",
            HandleRole::Subscriber => "remotefeed",
        };
        let opaque_id = format!("{prefix}-{}", Uuid::new_v4().simple());
        let (cancel, _) = watch::channel(false);
        self.entries.insert(
            id,
            HandleEntry {
                id,
                role,
                feed,
                opaque_id,
                transport,
                state: HandleState::Attaching,
                pending: None,
                cancel,
            },
        );
        match role {
            HandleRole::Publisher => self.publisher = Some(id),
            HandleRole::Subscriber => {
                if let Some(feed) = feed {
                    self.by_feed.insert(feed, id);
                }
            }
        }
        Ok(id)
    }

    pub fn publisher(&self) -> Option<HandleId> {
        self.publisher
    }

    pub fn get(&self, id: HandleId) -> Option<&HandleEntry> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: HandleId) -> Option<&mut HandleEntry> {
        self.entries.get_mut(&id)
    }

    pub fn handle_for_feed(&self, feed: FeedId) -> Option<HandleId> {
        self.by_feed.get(&feed).copied()
    }

    /// Watch flag flipped when the handle's feed departs mid-attach.
    pub fn cancel_receiver(&self, id: HandleId) -> Option<watch::Receiver<bool>> {
        self.entries.get(&id).map(|e| e.cancel.subscribe())
    }

    pub fn cancel(&self, id: HandleId) {
        if let Some(entry) = self.entries.get(&id) {
            entry.cancel.send_replace(true);
        }
    }

    /// Register the reply slot for an in-flight request. Fails if the
    /// handle is gone or a negotiation is already pending on it.
    pub fn set_pending(
        &mut self,
        id: HandleId,
        transaction: String,
        tx: oneshot::Sender<InboundEnvelope>,
    ) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) if entry.pending.is_none() => {
                entry.pending = Some((transaction, tx));
                true
            }
            _ => false,
        }
    }

    /// Take the reply slot if `transaction` matches the pending request.
    pub fn take_pending(
        &mut self,
        id: HandleId,
        transaction: &str,
    ) -> Option<oneshot::Sender<InboundEnvelope>> {
        let entry = self.entries.get_mut(&id)?;
        if entry.pending.as_ref().is_some_and(|(t, _)| t == transaction) {
            entry.pending.take().map(|(_, tx)| tx)
        } else {
            None
        }
    }

    pub fn clear_pending(&mut self, id: HandleId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.pending = None;
        }
    }

    pub fn remove(&mut self, id: HandleId) -> Option<HandleEntry> {
        let entry = self.entries.remove(&id)?;
        if self.publisher == Some(id) {
            self.publisher = None;
        }
        if let Some(feed) = entry.feed {
            self.by_feed.remove(&feed);
        }
        Some(entry)
    }

    /// Cancel and remove every handle. Used by teardown and by session
    /// destruction; afterwards no handle can be addressed again.
    pub fn detach_all(&mut self) -> Vec<HandleEntry> {
        self.publisher = None;
        self.by_feed.clear();
        let entries: Vec<HandleEntry> = self.entries.drain().map(|(_, e)| e).collect();
        for entry in &entries {
            entry.cancel.send_replace(true);
        }
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for HandleArena {
    fn default() -> Self {
        Self::new()
    }
}

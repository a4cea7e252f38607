use std::collections::HashMap;

use crate::events::ParticipantInfo;
use crate::media::RemoteTrackRef;
use crate::signaling::{FeedId, HandleId};

/// One remote publisher known to the roster.
///
/// `handle` is linked once subscription begins; `remote_track` is bound
/// exactly once, on first delivery, and stays immutable afterwards.
#[derive(Debug, Clone)]
pub struct Participant {
    pub feed: FeedId,
    pub display: String,
    pub handle: Option<HandleId>,
    pub remote_track: Option<RemoteTrackRef>,
}

/// The set of known remote publishers in the room, keyed by feed id.
///
/// Updated by the signaling dispatcher and the per-feed attach tasks.
/// Records are index-linked (feed id, handle id) rather than holding
/// references into each other, so a departure racing an attach can never
/// leave a dangling link.
#[derive(Debug, Default)]
pub struct Roster {
    entries: HashMap<FeedId, Participant>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an announced publisher. Returns false if the feed is
    /// already known (duplicate announcements are ignored).
    pub fn announce(&mut self, feed: FeedId, display: &str) -> bool {
        if self.entries.contains_key(&feed) {
            return false;
        }
        self.entries.insert(
            feed,
            Participant { feed, display: display.to_string(), handle: None, remote_track: None },
        );
        true
    }

    pub fn depart(&mut self, feed: FeedId) -> Option<Participant> {
        self.entries.remove(&feed)
    }

    /// Link the subscriber handle driving this feed's attach. Returns
    /// false if the participant is gone or already has a handle.
    pub fn link_handle(&mut self, feed: FeedId, handle: HandleId) -> bool {
        match self.entries.get_mut(&feed) {
            Some(p) if p.handle.is_none() => {
                p.handle = Some(handle);
                true
            }
            _ => false,
        }
    }

    /// Bind the first delivered remote track. Returns false if the
    /// participant departed or a track is already bound; a second
    /// delivery is ignored, not an error.
    pub fn bind_track(&mut self, feed: FeedId, track: RemoteTrackRef) -> bool {
        match self.entries.get_mut(&feed) {
            Some(p) if p.remote_track.is_none() => {
                p.remote_track = Some(track);
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, feed: FeedId) -> bool {
        self.entries.contains_key(&feed)
    }

    pub fn get(&self, feed: FeedId) -> Option<&Participant> {
        self.entries.get(&feed)
    }

    pub fn handle_of(&self, feed: FeedId) -> Option<HandleId> {
        self.entries.get(&feed).and_then(|p| p.handle)
    }

    pub fn remote_track(&self, feed: FeedId) -> Option<RemoteTrackRef> {
        self.entries.get(&feed).and_then(|p| p.remote_track.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<ParticipantInfo> {
        let mut infos: Vec<ParticipantInfo> = self
            .entries
            .values()
            .map(|p| ParticipantInfo { feed: p.feed, display: p.display.clone() })
            .collect();
        infos.sort_by_key(|p| p.feed);
        infos
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

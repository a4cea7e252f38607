use std::sync::Arc;

use tokio::sync::Mutex;

use crate::errors::CallError;
use crate::media::{AudioRoute, CaptureDevice, TrackKind};

/// The local capture plus per-kind enabled flags. Created by the publish
/// pipeline, toggled only through [`CallControls`]; never recreated
/// mid-call short of a full re-publish.
pub struct LocalMedia {
    pub device: Arc<dyn CaptureDevice>,
    pub audio_enabled: bool,
    pub video_enabled: bool,
}

impl LocalMedia {
    pub fn new(device: Arc<dyn CaptureDevice>) -> Self {
        Self { device, audio_enabled: true, video_enabled: true }
    }
}

/// Track-level media toggles. These never touch negotiation state and
/// never produce signaling traffic; they flip enablement on the already
/// captured tracks.
pub struct CallControls {
    local: Arc<Mutex<Option<LocalMedia>>>,
    route: Arc<dyn AudioRoute>,
}

impl CallControls {
    pub(crate) fn new(local: Arc<Mutex<Option<LocalMedia>>>, route: Arc<dyn AudioRoute>) -> Self {
        Self { local, route }
    }

    pub async fn set_audio_enabled(&self, enabled: bool) -> Result<(), CallError> {
        let mut local = self.local.lock().await;
        let media = local.as_mut().ok_or(CallError::NoLocalMedia)?;
        media.device.set_track_enabled(TrackKind::Audio, enabled);
        media.audio_enabled = enabled;
        tracing::info!("audio enabled: {enabled}");
        Ok(())
    }

    pub async fn set_video_enabled(&self, enabled: bool) -> Result<(), CallError> {
        let mut local = self.local.lock().await;
        let media = local.as_mut().ok_or(CallError::NoLocalMedia)?;
        media.device.set_track_enabled(TrackKind::Video, enabled);
        media.video_enabled = enabled;
        tracing::info!("video enabled: {enabled}");
        Ok(())
    }

    /// Route playout to the loudspeaker (true) or the earpiece (false).
    pub async fn set_speaker_routing(&self, speaker: bool) -> Result<(), CallError> {
        if self.local.lock().await.is_none() {
            return Err(CallError::NoLocalMedia);
        }
        self.route.set_speaker(speaker);
        tracing::info!("speaker routing: {speaker}");
        Ok(())
    }

    pub async fn is_audio_enabled(&self) -> bool {
        self.local.lock().await.as_ref().is_some_and(|m| m.audio_enabled)
    }

    pub async fn is_video_enabled(&self) -> bool {
        self.local.lock().await.as_ref().is_some_and(|m| m.video_enabled)
    }
}

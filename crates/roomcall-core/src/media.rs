//! Capability seams for capture, media transport and the signaling
//! channel. The core only talks to these traits; real WebRTC/device
//! implementations live in platform crates, tests use in-process mocks.

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::CallError;
use crate::signaling::{Description, SignalingLink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraFacing {
    User,
    Environment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub audio: bool,
    pub video: bool,
    pub max_frame_rate: u32,
    pub width: u32,
    pub height: u32,
    pub facing: CameraFacing,
}

impl CaptureConstraints {
    /// Front camera at 720p, capped at 30fps — what the publisher asks for.
    pub fn front_camera() -> Self {
        Self {
            audio: true,
            video: true,
            max_frame_rate: 30,
            width: 1280,
            height: 720,
            facing: CameraFacing::User,
        }
    }
}

/// Reference to a track delivered by the remote side, handed to the UI
/// layer so it can bind an output sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrackRef {
    pub id: String,
    pub kind: TrackKind,
}

/// A granted local capture (camera + microphone). Enablement toggles are
/// track-level and never touch negotiation.
pub trait CaptureDevice: Send + Sync {
    fn set_track_enabled(&self, kind: TrackKind, enabled: bool);
    fn release(&self);
}

#[async_trait]
pub trait CaptureProvider: Send + Sync {
    async fn acquire(
        &self,
        constraints: CaptureConstraints,
    ) -> Result<Arc<dyn CaptureDevice>, CallError>;
}

/// One media-transport session, bound to exactly one handle.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Construct a local description offering the captured tracks. May
    /// suspend while codec/ICE gathering runs.
    async fn create_offer(
        &self,
        media: Option<Arc<dyn CaptureDevice>>,
    ) -> Result<Description, CallError>;
    /// Construct the answer to a previously applied remote offer.
    async fn create_answer(&self) -> Result<Description, CallError>;
    async fn apply_remote_description(&self, desc: Description) -> Result<(), CallError>;
    /// Resolves when the remote side delivers a media track, or `None`
    /// once the transport is closed.
    async fn next_remote_track(&self) -> Option<RemoteTrackRef>;
    async fn close(&self);
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create_session(&self) -> Result<Arc<dyn MediaTransport>, CallError>;
}

#[async_trait]
pub trait SignalingConnector: Send + Sync {
    async fn connect(&self, gateway_addr: &str) -> Result<SignalingLink, CallError>;
}

/// Loudspeaker vs earpiece routing on the playout side.
pub trait AudioRoute: Send + Sync {
    fn set_speaker(&self, speaker: bool);
}

/// Explicitly constructed capability context, built once per process and
/// handed to the call session. Replaces any global media-stack
/// registration.
#[derive(Clone)]
pub struct MediaStack {
    pub signaling: Arc<dyn SignalingConnector>,
    pub capture: Arc<dyn CaptureProvider>,
    pub transports: Arc<dyn TransportFactory>,
    pub audio_route: Arc<dyn AudioRoute>,
}

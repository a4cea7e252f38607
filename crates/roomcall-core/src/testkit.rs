//! In-process fakes for the capability seams, plus small test helpers.
//! The gateway mock speaks the same envelope protocol as the real thing
//! and can be steered mid-test (refuse connects, withhold subscription
//! replies, reject publishes, announce or depart feeds).

use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, mpsc};

use crate::errors::CallError;
use crate::events::{CallEvent, CallEventListener};
use crate::media::{
    AudioRoute, CaptureConstraints, CaptureDevice, CaptureProvider, MediaStack, MediaTransport,
    RemoteTrackRef, SignalingConnector, TrackKind, TransportFactory,
};
use crate::room::CallConfig;
use crate::signaling::{
    ClientRequest, Description, DescriptionKind, FeedId, GatewayEvent, HandleId, InboundEnvelope,
    OutboundEnvelope, PeerKind, SignalingLink,
};

pub(crate) fn test_config() -> CallConfig {
    CallConfig::new(Duration::from_millis(500), Duration::from_millis(500))
}

pub(crate) fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("roomcall_core=debug")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Poll an async condition until it holds, panicking after ~2s.
pub(crate) async fn wait_for<F, Fut>(mut probe: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..400 {
        if probe().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within 2s");
}

/// Listener that records every event it sees.
pub(crate) struct EventCapture {
    events: StdMutex<Vec<CallEvent>>,
}

impl EventCapture {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self { events: StdMutex::new(Vec::new()) })
    }

    pub(crate) fn events(&self) -> Vec<CallEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl CallEventListener for EventCapture {
    fn on_event(&self, event: CallEvent) {
        self.events.lock().unwrap().push(event);
    }
}

struct GatewayState {
    publishers: Vec<crate::signaling::PublisherInfo>,
    requests: Vec<OutboundEnvelope>,
    // the publisher handle; async room events are pushed on it
    control_handle: Option<HandleId>,
    in_tx: Option<mpsc::UnboundedSender<InboundEnvelope>>,
    // announcement to ride along on the next publish reply
    publish_piggyback: Option<crate::signaling::PublisherInfo>,
}

struct GatewayInner {
    state: StdMutex<GatewayState>,
    refuse_connect: AtomicBool,
    hang_connect: AtomicBool,
    pause_subscriptions: AtomicBool,
    fail_publish: AtomicBool,
}

/// Scriptable gateway double. Replies to each request echoing its
/// transaction; test hooks inject asynchronous room events with no
/// transaction, the way the real gateway does.
pub(crate) struct MockGateway {
    inner: Arc<GatewayInner>,
}

impl MockGateway {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(GatewayInner {
                state: StdMutex::new(GatewayState {
                    publishers: Vec::new(),
                    requests: Vec::new(),
                    control_handle: None,
                    in_tx: None,
                    publish_piggyback: None,
                }),
                refuse_connect: AtomicBool::new(false),
                hang_connect: AtomicBool::new(false),
                pause_subscriptions: AtomicBool::new(false),
                fail_publish: AtomicBool::new(false),
            }),
        })
    }

    /// Seed a publisher into the roster the next join reply reports.
    pub(crate) fn preset_publisher(&self, id: FeedId, display: &str) {
        self.inner.state.lock().unwrap().publishers.push(crate::signaling::PublisherInfo {
            id,
            display: display.into(),
        });
    }

    /// Announce a new publisher to the joined client.
    pub(crate) fn announce(&self, id: FeedId, display: &str) {
        let mut state = self.inner.state.lock().unwrap();
        let info = crate::signaling::PublisherInfo { id, display: display.into() };
        state.publishers.push(info.clone());
        if let (Some(handle), Some(tx)) = (state.control_handle, state.in_tx.as_ref()) {
            let _ = tx.send(InboundEnvelope {
                handle,
                transaction: None,
                event: GatewayEvent::Event { publishers: vec![info], leaving: None, error: None },
                jsep: None,
            });
        }
    }

    /// Push a departure event for a publisher.
    pub(crate) fn depart(&self, id: FeedId) {
        let mut state = self.inner.state.lock().unwrap();
        state.publishers.retain(|p| p.id != id);
        if let (Some(handle), Some(tx)) = (state.control_handle, state.in_tx.as_ref()) {
            let _ = tx.send(InboundEnvelope {
                handle,
                transaction: None,
                event: GatewayEvent::Event {
                    publishers: vec![],
                    leaving: Some(id),
                    error: None,
                },
                jsep: None,
            });
        }
    }

    pub(crate) fn requests(&self) -> Vec<OutboundEnvelope> {
        self.inner.state.lock().unwrap().requests.clone()
    }

    pub(crate) fn request_count(&self) -> usize {
        self.inner.state.lock().unwrap().requests.len()
    }

    pub(crate) fn subscriber_join_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|r| {
                matches!(r.body, ClientRequest::Join { ptype: PeerKind::Subscriber, .. })
            })
            .count()
    }

    pub(crate) fn set_refuse_connect(&self, on: bool) {
        self.inner.refuse_connect.store(on, Ordering::SeqCst);
    }

    pub(crate) fn set_hang_connect(&self, on: bool) {
        self.inner.hang_connect.store(on, Ordering::SeqCst);
    }

    /// Withhold replies to subscriber joins, leaving attaches in flight.
    pub(crate) fn set_pause_subscriptions(&self, on: bool) {
        self.inner.pause_subscriptions.store(on, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_publish(&self, on: bool) {
        self.inner.fail_publish.store(on, Ordering::SeqCst);
    }

    /// Attach a publisher announcement to the next publish reply instead
    /// of pushing it as a standalone event.
    pub(crate) fn set_publish_piggyback(&self, id: FeedId, display: &str) {
        self.inner.state.lock().unwrap().publish_piggyback =
            Some(crate::signaling::PublisherInfo { id, display: display.into() });
    }
}

impl GatewayInner {
    fn handle_request(&self, env: OutboundEnvelope, in_tx: &mpsc::UnboundedSender<InboundEnvelope>) {
        let mut state = self.state.lock().unwrap();
        state.requests.push(env.clone());
        match &env.body {
            ClientRequest::Join { ptype: PeerKind::Publisher, .. } => {
                state.control_handle = Some(env.handle);
                let _ = in_tx.send(InboundEnvelope {
                    handle: env.handle,
                    transaction: Some(env.transaction.clone()),
                    event: GatewayEvent::Joined { publishers: state.publishers.clone() },
                    jsep: None,
                });
            }
            ClientRequest::Join { ptype: PeerKind::Subscriber, feed, .. } => {
                if self.pause_subscriptions.load(Ordering::SeqCst) {
                    return;
                }
                let sdp = format!("v=0 offer feed={}", feed.unwrap_or(0));
                let _ = in_tx.send(InboundEnvelope {
                    handle: env.handle,
                    transaction: Some(env.transaction.clone()),
                    event: GatewayEvent::Event { publishers: vec![], leaving: None, error: None },
                    jsep: Some(Description { kind: DescriptionKind::Offer, sdp }),
                });
            }
            ClientRequest::Publish { .. } => {
                let envelope = if self.fail_publish.load(Ordering::SeqCst) {
                    InboundEnvelope {
                        handle: env.handle,
                        transaction: Some(env.transaction.clone()),
                        event: GatewayEvent::Event {
                            publishers: vec![],
                            leaving: None,
                            error: Some("publish rejected".into()),
                        },
                        jsep: None,
                    }
                } else {
                    let publishers = match state.publish_piggyback.take() {
                        Some(info) => {
                            state.publishers.push(info.clone());
                            vec![info]
                        }
                        None => vec![],
                    };
                    InboundEnvelope {
                        handle: env.handle,
                        transaction: Some(env.transaction.clone()),
                        event: GatewayEvent::Event {
                            publishers,
                            leaving: None,
                            error: None,
                        },
                        jsep: Some(Description {
                            kind: DescriptionKind::Answer,
                            sdp: "v=0 answer".into(),
                        }),
                    }
                };
                let _ = in_tx.send(envelope);
            }
            ClientRequest::Start | ClientRequest::Leave => {}
        }
    }
}

#[async_trait]
impl SignalingConnector for MockGateway {
    async fn connect(&self, gateway_addr: &str) -> Result<SignalingLink, CallError> {
        if self.inner.hang_connect.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        if self.inner.refuse_connect.load(Ordering::SeqCst) {
            return Err(CallError::GatewayUnreachable(format!(
                "connection to {gateway_addr} refused"
            )));
        }
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        self.inner.state.lock().unwrap().in_tx = Some(in_tx.clone());
        let inner = self.inner.clone();
        tokio::spawn(async move {
            while let Some(envelope) = out_rx.recv().await {
                inner.handle_request(envelope, &in_tx);
            }
        });
        Ok(SignalingLink { session: 1, tx: out_tx, rx: in_rx })
    }
}

pub(crate) struct MockCaptureDevice {
    toggles: StdMutex<Vec<(TrackKind, bool)>>,
    released: AtomicUsize,
}

impl MockCaptureDevice {
    pub(crate) fn new() -> Self {
        Self { toggles: StdMutex::new(Vec::new()), released: AtomicUsize::new(0) }
    }

    pub(crate) fn toggles(&self) -> Vec<(TrackKind, bool)> {
        self.toggles.lock().unwrap().clone()
    }

    pub(crate) fn release_count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl CaptureDevice for MockCaptureDevice {
    fn set_track_enabled(&self, kind: TrackKind, enabled: bool) {
        self.toggles.lock().unwrap().push((kind, enabled));
    }

    fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) struct MockCapture {
    deny: AtomicBool,
    devices: StdMutex<Vec<Arc<MockCaptureDevice>>>,
}

impl MockCapture {
    pub(crate) fn new() -> Self {
        Self { deny: AtomicBool::new(false), devices: StdMutex::new(Vec::new()) }
    }

    pub(crate) fn set_deny(&self, on: bool) {
        self.deny.store(on, Ordering::SeqCst);
    }

    pub(crate) fn device(&self, index: usize) -> Arc<MockCaptureDevice> {
        self.devices.lock().unwrap()[index].clone()
    }

    pub(crate) fn device_count(&self) -> usize {
        self.devices.lock().unwrap().len()
    }
}

#[async_trait]
impl CaptureProvider for MockCapture {
    async fn acquire(
        &self,
        _constraints: CaptureConstraints,
    ) -> Result<Arc<dyn CaptureDevice>, CallError> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(CallError::CaptureDenied("permission denied".into()));
        }
        let device = Arc::new(MockCaptureDevice::new());
        self.devices.lock().unwrap().push(device.clone());
        Ok(device)
    }
}

pub(crate) struct MockTransport {
    applied: StdMutex<Vec<Description>>,
    track_tx: StdMutex<Option<mpsc::UnboundedSender<RemoteTrackRef>>>,
    track_rx: AsyncMutex<mpsc::UnboundedReceiver<RemoteTrackRef>>,
    closed: AtomicBool,
}

impl MockTransport {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            applied: StdMutex::new(Vec::new()),
            track_tx: StdMutex::new(Some(tx)),
            track_rx: AsyncMutex::new(rx),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn applied(&self) -> Vec<Description> {
        self.applied.lock().unwrap().clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaTransport for MockTransport {
    async fn create_offer(
        &self,
        _media: Option<Arc<dyn CaptureDevice>>,
    ) -> Result<Description, CallError> {
        Ok(Description { kind: DescriptionKind::Offer, sdp: "v=0 local offer".into() })
    }

    async fn create_answer(&self) -> Result<Description, CallError> {
        // subscriber transports get one remote track once answered
        if let Some(tx) = self.track_tx.lock().unwrap().as_ref() {
            let _ = tx.send(RemoteTrackRef { id: "remote-track".into(), kind: TrackKind::Video });
        }
        Ok(Description { kind: DescriptionKind::Answer, sdp: "v=0 local answer".into() })
    }

    async fn apply_remote_description(&self, desc: Description) -> Result<(), CallError> {
        self.applied.lock().unwrap().push(desc);
        Ok(())
    }

    async fn next_remote_track(&self) -> Option<RemoteTrackRef> {
        self.track_rx.lock().await.recv().await
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.track_tx.lock().unwrap().take();
    }
}

pub(crate) struct MockTransportFactory {
    created: StdMutex<Vec<Arc<MockTransport>>>,
}

impl MockTransportFactory {
    pub(crate) fn new() -> Self {
        Self { created: StdMutex::new(Vec::new()) }
    }

    pub(crate) fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub(crate) fn transport(&self, index: usize) -> Arc<MockTransport> {
        self.created.lock().unwrap()[index].clone()
    }

    pub(crate) fn all_closed(&self) -> bool {
        self.created.lock().unwrap().iter().all(|t| t.is_closed())
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn create_session(&self) -> Result<Arc<dyn MediaTransport>, CallError> {
        let transport = Arc::new(MockTransport::new());
        self.created.lock().unwrap().push(transport.clone());
        Ok(transport)
    }
}

pub(crate) struct MockAudioRoute {
    last: StdMutex<Option<bool>>,
}

impl MockAudioRoute {
    pub(crate) fn new() -> Self {
        Self { last: StdMutex::new(None) }
    }

    pub(crate) fn last(&self) -> Option<bool> {
        *self.last.lock().unwrap()
    }
}

impl AudioRoute for MockAudioRoute {
    fn set_speaker(&self, speaker: bool) {
        *self.last.lock().unwrap() = Some(speaker);
    }
}

pub(crate) struct MockHandles {
    pub(crate) gateway: Arc<MockGateway>,
    pub(crate) capture: Arc<MockCapture>,
    pub(crate) transports: Arc<MockTransportFactory>,
    pub(crate) route: Arc<MockAudioRoute>,
}

/// A full capability stack backed by the mocks, plus handles to steer
/// and inspect them.
pub(crate) fn mock_stack() -> (MediaStack, MockHandles) {
    let gateway = MockGateway::new();
    let capture = Arc::new(MockCapture::new());
    let transports = Arc::new(MockTransportFactory::new());
    let route = Arc::new(MockAudioRoute::new());
    let stack = MediaStack {
        signaling: gateway.clone(),
        capture: capture.clone(),
        transports: transports.clone(),
        audio_route: route.clone(),
    };
    (stack, MockHandles { gateway, capture, transports, route })
}

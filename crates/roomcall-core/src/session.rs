use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::time::timeout;

use crate::errors::CallError;
use crate::events::ConnectionState;
use crate::media::MediaStack;
use crate::signaling::{InboundEnvelope, OutboundEnvelope, SessionId};

/// The single logical connection to the gateway. Created on connect,
/// destroyed on explicit teardown or fatal transport error.
pub struct Session {
    id: SessionId,
    tx: Mutex<Option<mpsc::UnboundedSender<OutboundEnvelope>>>,
    state: Mutex<ConnectionState>,
}

impl Session {
    /// Establish the signaling channel, bounded by the caller-supplied
    /// timeout. Returns the session plus the inbound message stream for
    /// the dispatcher.
    pub async fn connect(
        stack: &MediaStack,
        gateway_addr: &str,
        deadline: Duration,
    ) -> Result<(Arc<Session>, mpsc::UnboundedReceiver<InboundEnvelope>), CallError> {
        tracing::info!("connecting to gateway {gateway_addr}");
        let link = match timeout(deadline, stack.signaling.connect(gateway_addr)).await {
            Ok(Ok(link)) => link,
            Ok(Err(e)) => {
                tracing::warn!("gateway connect failed: {e}");
                return Err(e);
            }
            Err(_) => {
                return Err(CallError::GatewayUnreachable(format!(
                    "connect to {gateway_addr} timed out"
                )));
            }
        };
        tracing::info!(session = link.session, "gateway session established");
        let session = Arc::new(Session {
            id: link.session,
            tx: Mutex::new(Some(link.tx)),
            state: Mutex::new(ConnectionState::Connected),
        });
        Ok((session, link.rx))
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.lock().await
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }

    pub async fn send(&self, envelope: OutboundEnvelope) -> Result<(), CallError> {
        let tx = self.tx.lock().await;
        match tx.as_ref() {
            Some(tx) => tx
                .send(envelope)
                .map_err(|_| CallError::GatewayUnreachable("signaling channel closed".into())),
            None => Err(CallError::InvalidState("session destroyed".into())),
        }
    }

    /// Destroy the session. Idempotent: destroying an already-destroyed
    /// session is a no-op success — teardown calls this speculatively.
    pub async fn destroy(&self) {
        let mut state = self.state.lock().await;
        if *state == ConnectionState::Destroyed {
            tracing::debug!(session = self.id, "session already destroyed");
            return;
        }
        *state = ConnectionState::Destroyed;
        drop(state);
        self.tx.lock().await.take();
        tracing::info!(session = self.id, "session destroyed");
    }
}

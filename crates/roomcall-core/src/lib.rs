//! Multi-party call session management against an SFU gateway.
//!
//! Pure Rust crate with no platform dependencies. Capture, media
//! transport and the signaling channel come in through the
//! [`media::MediaStack`] capability seams; platform crates provide the
//! real implementations.

pub mod controls;
pub mod errors;
pub mod events;
pub mod media;
pub mod participants;
pub mod publish;
pub mod registry;
pub mod room;
pub mod session;
pub mod signaling;

mod dispatch;
mod subscribe;

#[cfg(test)]
mod testkit;

pub use errors::CallError;
pub use events::{CallEvent, CallEventListener, ConnectionState};
pub use media::MediaStack;
pub use publish::PublishState;
pub use room::{CallConfig, CallSession, Role};

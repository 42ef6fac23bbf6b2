//! Playback session controller.
//!
//! A [`PlaybackSession`] drives one media engine through its lifecycle: engine events are
//! marshalled onto the control thread by the [`EventBridge`], the [`SessionController`]
//! reconciles the requested and actual states, the [`RenderTargetBinder`] attaches the
//! render surface, and decoded PCM reaches the output through the [`AudioSink`].

pub mod bridge;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod event;
pub mod facade;
pub mod listener;
pub mod output;
pub mod playback;
pub mod queue;
pub mod render;
pub mod session;
pub mod sink;
pub mod status;

#[cfg(test)]
mod test_support;

pub use bridge::{BridgeSender, Envelope, EventBridge, EventPoster, SessionToken};
pub use config::SessionConfig;
pub use engine::{
    Capabilities, DataSource, EngineContext, EngineFactory, MediaEngine, SourceLocator,
    SurfaceHandle,
};
pub use error::SessionError;
pub use event::{EngineEvent, NativePayload, TimedText};
pub use facade::{PlaybackSession, resolve_encoding};
pub use listener::Listeners;
pub use output::{CpalAudioDevice, CpalBackend};
pub use render::{RenderTargetBinder, SurfaceCell};
pub use session::SessionController;
pub use sink::{AudioBackend, AudioDevice, AudioSink};
pub use status::StatusHandle;

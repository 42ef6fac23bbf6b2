//! Boundary between the session controller and a media engine.
//!
//! The engine decodes on its own threads. It reports progress only through the
//! [`EventPoster`] handed to it in [`EngineContext`] and writes PCM into the shared
//! [`AudioSink`]. Every other call arrives on the control thread.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::Arc;

use anyhow::Result;
use playback_proto::TextEncoding;
use playback_types::TrackType;

use crate::bridge::EventPoster;
use crate::render::SurfaceCell;
use crate::sink::AudioSink;

/// Engine metadata key: `"0"` when the source cannot be paused.
pub const METADATA_CAN_PAUSE: &str = "cap_pause";
/// Engine metadata key: `"0"` when the source cannot be seeked.
pub const METADATA_CAN_SEEK: &str = "cap_seek";

/// Opaque native render target handle supplied by the host windowing layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(NonZeroU64);

impl SurfaceHandle {
    /// Wrap a raw handle; zero means "no surface".
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(SurfaceHandle)
    }

    pub fn raw(self) -> u64 {
        self.0.get()
    }
}

/// Where the engine reads the media from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceLocator {
    Uri(String),
    /// Raw file descriptor owned by the host.
    Fd(i32),
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocator::Uri(uri) => f.write_str(uri),
            SourceLocator::Fd(fd) => write!(f, "fd:{fd}"),
        }
    }
}

/// A media source plus the request headers to use for network URIs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataSource {
    pub locator: SourceLocator,
    pub headers: Vec<(String, String)>,
}

impl DataSource {
    pub fn uri(uri: impl Into<String>) -> Self {
        Self {
            locator: SourceLocator::Uri(uri.into()),
            headers: Vec::new(),
        }
    }

    pub fn fd(fd: i32) -> Self {
        Self {
            locator: SourceLocator::Fd(fd),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub(crate) fn is_empty(&self) -> bool {
        match &self.locator {
            SourceLocator::Uri(uri) => uri.trim().is_empty(),
            SourceLocator::Fd(fd) => *fd < 0,
        }
    }
}

impl From<&str> for DataSource {
    fn from(uri: &str) -> Self {
        DataSource::uri(uri)
    }
}

impl From<String> for DataSource {
    fn from(uri: String) -> Self {
        DataSource::uri(uri)
    }
}

/// Per-session resources handed to the engine when a source is opened.
pub struct EngineContext {
    /// Event channel bound to this session; posts after release are dropped.
    pub events: EventPoster,
    /// PCM output shared with the controller.
    pub audio: Arc<AudioSink>,
    /// Latest bound render target, readable from engine threads.
    pub surface: SurfaceCell,
    /// Encoding for timed text that carries no explicit label.
    pub text_encoding: TextEncoding,
}

/// A media engine instance (one per opened source).
///
/// `open_source` starts asynchronous preparation; completion is reported by posting
/// `Prepared` (or `Error`) through `ctx.events`. Query methods are only called while the
/// session is playback-capable.
pub trait MediaEngine {
    fn open_source(&mut self, source: &DataSource, ctx: EngineContext) -> Result<()>;
    fn bind_surface(&mut self, surface: SurfaceHandle) -> Result<()>;
    fn unbind_surface(&mut self);
    fn start(&mut self) -> Result<()>;
    fn pause(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    fn seek_to(&mut self, ms: i64) -> Result<()>;
    fn duration_ms(&self) -> i64;
    fn current_position_ms(&self) -> i64;
    fn video_size(&self) -> (u32, u32);
    fn is_playing(&self) -> bool;
    fn select_track(&mut self, index: i32, select: bool) -> Result<()>;
    /// Linear gains; the engine forwards them to its audio output.
    fn set_volume(&mut self, left: f32, right: f32);
    /// One encoded descriptor blob per track type.
    fn track_info(&self) -> Option<Vec<(TrackType, Vec<u8>)>>;
    fn metadata(&self) -> Option<HashMap<String, Vec<u8>>>;
    /// Stop engine threads and free native resources. Called at most once.
    fn release(&mut self);
}

/// Creates engine instances for the controller.
pub trait EngineFactory {
    type Engine: MediaEngine;

    fn create(&self) -> Result<Self::Engine>;
}

/// Transport capabilities advertised by engine metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capabilities {
    pub can_pause: bool,
    pub can_seek_backward: bool,
    pub can_seek_forward: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            can_pause: true,
            can_seek_backward: true,
            can_seek_forward: true,
        }
    }
}

impl Capabilities {
    /// Derive capabilities from engine metadata; missing keys mean "capable".
    pub fn from_metadata(metadata: Option<&HashMap<String, Vec<u8>>>) -> Self {
        let Some(metadata) = metadata else {
            return Self::default();
        };
        let flag = |key: &str| {
            metadata
                .get(key)
                .map(|v| String::from_utf8_lossy(v).trim() != "0")
                .unwrap_or(true)
        };
        let can_seek = flag(METADATA_CAN_SEEK);
        Self {
            can_pause: flag(METADATA_CAN_PAUSE),
            can_seek_backward: can_seek,
            can_seek_forward: can_seek,
        }
    }
}

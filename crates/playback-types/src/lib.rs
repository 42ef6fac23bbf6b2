use serde::{Deserialize, Serialize};

/// Engine error/info/caching codes shared by the controller and its listeners.
pub mod codes {
    /// Unspecified engine failure; also used when a source cannot be opened.
    pub const MEDIA_ERROR_UNKNOWN: i32 = 1;
    /// The container is not laid out for progressive (streamed) playback.
    pub const MEDIA_ERROR_NOT_VALID_FOR_PROGRESSIVE_PLAYBACK: i32 = 200;

    /// Video decoding cannot keep up; audio may continue.
    pub const MEDIA_INFO_VIDEO_TRACK_LAGGING: i32 = 700;
    /// Engine paused internally to refill its buffers.
    pub const MEDIA_INFO_BUFFERING_START: i32 = 701;
    /// Engine buffers are refilled.
    pub const MEDIA_INFO_BUFFERING_END: i32 = 702;
    /// The source cannot be seeked (live stream).
    pub const MEDIA_INFO_NOT_SEEKABLE: i32 = 801;
    /// Download rate changed; `extra` carries KB/s.
    pub const MEDIA_INFO_DOWNLOAD_RATE_CHANGED: i32 = 901;

    /// Caching disabled: no space left on storage.
    pub const CACHE_INFO_NO_SPACE: i32 = 1;
    /// Caching disabled: the stream type does not support it.
    pub const CACHE_INFO_STREAM_NOT_SUPPORT: i32 = 2;
}

/// Lifecycle state of a playback session.
///
/// The same vocabulary is used for the *current* state (what the engine is doing) and
/// the *target* state (what the caller last asked for).
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlayerState {
    /// Engine reported an error; terminal until the session is reopened or reset.
    Error,
    /// No engine instance.
    #[default]
    Idle,
    /// Source handed to the engine, waiting for `Prepared`.
    Preparing,
    /// Source ready; playback not started.
    Prepared,
    Playing,
    Paused,
    PlaybackCompleted,
    /// Engine resources released while the caller wants to come back later.
    Suspend,
    /// Target-only: reopen once a render target is available again.
    Resume,
    /// Suspension was requested but the engine cannot keep decode state.
    SuspendUnsupported,
}

impl PlayerState {
    /// Whether an engine in this state accepts transport controls.
    pub fn is_playback_capable(self) -> bool {
        matches!(
            self,
            PlayerState::Prepared
                | PlayerState::Playing
                | PlayerState::Paused
                | PlayerState::PlaybackCompleted
        )
    }
}

/// Kind of elementary stream a track descriptor refers to.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TrackType {
    Unknown,
    Video,
    Audio,
    TimedText,
}

impl TrackType {
    /// Map the engine's numeric track-type key.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => TrackType::Video,
            2 => TrackType::Audio,
            3 => TrackType::TimedText,
            _ => TrackType::Unknown,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            TrackType::Unknown => 0,
            TrackType::Video => 1,
            TrackType::Audio => 2,
            TrackType::TimedText => 3,
        }
    }
}

/// One decoded track record.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackDescriptor {
    /// Engine track index (the value passed back to `select_track`).
    pub index: i32,
    pub track_type: TrackType,
    /// Full record text, index prefix included (for example `"1.French"`).
    pub label: String,
}

/// Half-open byte range `[start, end)` persisted by the engine's cache.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedSegment {
    pub start: i64,
    pub end: i64,
}

/// Caching telemetry surfaced to `OnCachingUpdate` listeners.
///
/// Segment lists are advisory UI data: they are neither coalesced nor validated.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CachingTelemetry {
    /// Caching is disabled for this source; `reason` is a `CACHE_INFO_*` code.
    NotAvailable { reason: i32 },
    SegmentUpdate { segments: Vec<CachedSegment> },
    SpeedUpdate { kbps: i32 },
}

/// Point-in-time view of a session, published for readers on other threads.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionStatus {
    /// Session token id; `None` before the first open.
    pub session_id: Option<u64>,
    /// Source locator as given to `open`.
    pub source: Option<String>,
    pub current_state: PlayerState,
    pub target_state: PlayerState,
    /// Last known duration in milliseconds; `None` when unknown.
    pub duration_ms: Option<i64>,
    /// Last buffering percentage reported by the engine (0..=100).
    pub buffer_percent: u8,
    /// `true` between `MEDIA_INFO_BUFFERING_START` and `MEDIA_INFO_BUFFERING_END`.
    pub buffering: bool,
    pub video_width: u32,
    pub video_height: u32,
    /// Dimensions of the currently bound render target, if any.
    pub surface_size: Option<(u32, u32)>,
    pub selected_audio_track: Option<i32>,
    pub selected_subtitle_track: Option<i32>,
    /// Seek offset waiting for `Prepared`, in milliseconds.
    pub pending_seek_ms: Option<i64>,
    pub cached_segments: Vec<CachedSegment>,
    /// Audio sink buffer size in bytes; 0 when audio output is unavailable.
    pub audio_buffer_bytes: usize,
    pub keep_awake: bool,
}

//! Session state machine.
//!
//! [`SessionController`] owns the engine instance, the render target binder and the
//! audio sink for one playback session, and tracks two states:
//! - `current`: what the engine is doing, driven by engine events.
//! - `target`: what the caller last asked for.
//!
//! Controls issued before the engine is ready are recorded in `target` (or as a pending
//! seek) and replayed once `Prepared` arrives and the render target matches the video.
//! All methods run on the control thread.

use std::collections::BTreeMap;
use std::sync::Arc;

use playback_proto::TextEncoding;
use playback_types::codes::{MEDIA_ERROR_UNKNOWN, MEDIA_INFO_BUFFERING_END, MEDIA_INFO_BUFFERING_START};
use playback_types::{
    CachedSegment, CachingTelemetry, PlayerState, SessionStatus, TrackDescriptor, TrackType,
};

use crate::bridge::{BridgeSender, SessionToken};
use crate::config::SessionConfig;
use crate::engine::{Capabilities, DataSource, EngineContext, EngineFactory, MediaEngine, SurfaceHandle};
use crate::error::SessionError;
use crate::event::{EngineEvent, TimedText};
use crate::listener::Listeners;
use crate::render::RenderTargetBinder;
use crate::sink::AudioSink;
use crate::status::StatusHandle;

pub struct SessionController<F: EngineFactory> {
    factory: F,
    config: SessionConfig,
    events: BridgeSender,
    engine: Option<F::Engine>,
    token: Option<SessionToken>,
    last_session_id: u64,
    audio: Arc<AudioSink>,
    binder: RenderTargetBinder,
    listeners: Listeners,
    status: StatusHandle,

    source: Option<DataSource>,
    current: PlayerState,
    target: PlayerState,
    /// Target to restore once a suspended session is prepared again.
    resume_target: Option<PlayerState>,
    duration_ms: Option<i64>,
    buffer_percent: u8,
    buffering: bool,
    video_size: (u32, u32),
    selected_audio: Option<i32>,
    selected_subtitle: Option<i32>,
    /// 0 means "no pending seek".
    pending_seek_ms: i64,
    volume: Option<(f32, f32)>,
    capabilities: Capabilities,
    segments: Vec<CachedSegment>,
}

impl<F: EngineFactory> SessionController<F> {
    pub fn new(factory: F, events: BridgeSender, audio: Arc<AudioSink>, config: SessionConfig) -> Self {
        Self {
            factory,
            config,
            events,
            engine: None,
            token: None,
            last_session_id: 0,
            audio,
            binder: RenderTargetBinder::new(),
            listeners: Listeners::default(),
            status: StatusHandle::new(),
            source: None,
            current: PlayerState::Idle,
            target: PlayerState::Idle,
            resume_target: None,
            duration_ms: None,
            buffer_percent: 0,
            buffering: false,
            video_size: (0, 0),
            selected_audio: None,
            selected_subtitle: None,
            pending_seek_ms: 0,
            volume: None,
            capabilities: Capabilities::default(),
            segments: Vec::new(),
        }
    }

    pub fn listeners_mut(&mut self) -> &mut Listeners {
        &mut self.listeners
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn set_text_encoding(&mut self, encoding: TextEncoding) {
        self.config.text_encoding = encoding;
    }

    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    pub fn current_state(&self) -> PlayerState {
        self.current
    }

    pub fn target_state(&self) -> PlayerState {
        self.target
    }

    pub fn session_id(&self) -> Option<u64> {
        self.token.as_ref().map(SessionToken::id)
    }

    pub fn keep_awake(&self) -> bool {
        self.binder.keep_awake()
    }

    /// Whether an engine is live and may still post events.
    pub fn has_engine(&self) -> bool {
        self.engine.is_some()
    }

    // ---- transport ----------------------------------------------------------------

    /// Record `source` and open it as soon as a render target exists.
    pub fn open(&mut self, source: DataSource) {
        tracing::info!(source = %source.locator, "open");
        self.source = Some(source);
        self.pending_seek_ms = 0;
        self.resume_target = None;
        self.open_engine();
        self.refresh();
    }

    pub fn start(&mut self) {
        // Suspended or reopening after a suspend: the request applies once prepared.
        if self.target == PlayerState::Resume {
            self.resume_target = Some(PlayerState::Playing);
            self.refresh();
            return;
        }
        if self.in_playback_state() && self.current != PlayerState::Playing {
            let started = match self.engine.as_mut() {
                Some(engine) => engine.start(),
                None => Ok(()),
            };
            if let Err(e) = started {
                tracing::warn!("engine start failed: {e:#}");
                self.on_engine_error(MEDIA_ERROR_UNKNOWN, 0);
                return;
            }
            self.audio.start();
            self.set_current(PlayerState::Playing);
        }
        self.target = PlayerState::Playing;
        self.refresh();
    }

    pub fn pause(&mut self) {
        if self.target == PlayerState::Resume {
            self.resume_target = Some(PlayerState::Paused);
            self.refresh();
            return;
        }
        if self.in_playback_state() && self.current == PlayerState::Playing {
            let paused = match self.engine.as_mut() {
                Some(engine) => engine.pause(),
                None => Ok(()),
            };
            match paused {
                Ok(()) => {
                    self.audio.pause();
                    self.set_current(PlayerState::Paused);
                }
                Err(e) => tracing::warn!("engine pause failed: {e:#}"),
            }
        }
        self.target = PlayerState::Paused;
        self.refresh();
    }

    /// Stop playback and release the engine. The source is kept, so a recreated render
    /// target reopens it.
    pub fn stop(&mut self) {
        if let Some(engine) = self.engine.as_mut() {
            if let Err(e) = engine.stop() {
                tracing::warn!("engine stop failed: {e:#}");
            }
        }
        self.release_engine(true);
        self.current = PlayerState::Idle;
        self.target = PlayerState::Idle;
        self.resume_target = None;
        self.refresh();
    }

    pub fn seek_to(&mut self, ms: i64) {
        if self.in_playback_state() {
            if let Some(engine) = self.engine.as_mut() {
                if let Err(e) = engine.seek_to(ms) {
                    tracing::warn!(ms, "engine seek failed: {e:#}");
                }
            }
            self.pending_seek_ms = 0;
        } else {
            tracing::debug!(ms, state = ?self.current, "seek deferred until prepared");
            self.pending_seek_ms = ms;
        }
        self.refresh();
    }

    /// Select or deselect a track. A no-op until the session is prepared.
    pub fn select_track(&mut self, index: i32, select: bool) -> Result<(), SessionError> {
        if !self.in_playback_state() {
            tracing::debug!(index, select, "track selection ignored before prepared");
            return Ok(());
        }
        let track_type = match self.tracks(self.config.text_encoding) {
            Some(tracks) => tracks
                .iter()
                .find(|t| t.index == index)
                .map(|t| t.track_type)
                .ok_or(SessionError::UnknownTrack(index))?,
            None => TrackType::Unknown,
        };
        if let Some(engine) = self.engine.as_mut() {
            if let Err(e) = engine.select_track(index, select) {
                tracing::warn!(index, select, "engine track selection failed: {e:#}");
                return Ok(());
            }
        }
        match (track_type, select) {
            (TrackType::Audio, true) => self.selected_audio = Some(index),
            (TrackType::Audio, false) if self.selected_audio == Some(index) => {
                self.selected_audio = None
            }
            (TrackType::TimedText, true) => self.selected_subtitle = Some(index),
            (TrackType::TimedText, false) if self.selected_subtitle == Some(index) => {
                self.selected_subtitle = None
            }
            _ => {}
        }
        self.refresh();
        Ok(())
    }

    /// Volume is remembered and applied to every engine this session opens.
    pub fn set_volume(&mut self, left: f32, right: f32) {
        self.volume = Some((left, right));
        if let Some(engine) = self.engine.as_mut() {
            engine.set_volume(left, right);
        }
    }

    /// Free engine resources but come back to the same position once a render target
    /// is available again.
    pub fn suspend(&mut self) {
        if !self.in_playback_state() {
            tracing::debug!(state = ?self.current, "suspend ignored; not prepared");
            return;
        }
        let position = self
            .engine
            .as_ref()
            .map(|e| e.current_position_ms())
            .unwrap_or(0);
        let seekable = self.capabilities.can_seek_backward && self.capabilities.can_seek_forward;
        self.pending_seek_ms = if seekable { position.max(0) } else { 0 };
        self.resume_target = Some(self.target);
        self.release_engine(false);
        self.set_current(if seekable {
            PlayerState::Suspend
        } else {
            PlayerState::SuspendUnsupported
        });
        self.target = PlayerState::Resume;
        self.refresh();
    }

    pub fn resume(&mut self) {
        if !self.is_suspended() {
            return;
        }
        self.target = PlayerState::Resume;
        if self.binder.handle().is_some() {
            self.open_engine();
        } else {
            tracing::debug!("resume deferred until a render target exists");
        }
        self.refresh();
    }

    /// Back to `Idle` with no source. Listeners and the render target are kept.
    pub fn reset(&mut self) {
        self.release_engine(true);
        self.current = PlayerState::Idle;
        self.target = PlayerState::Idle;
        self.source = None;
        self.pending_seek_ms = 0;
        self.resume_target = None;
        self.reset_media_state();
        self.refresh();
    }

    /// Tear the session down for good: engine, audio, render target and listeners.
    pub fn release(&mut self) {
        self.reset();
        self.binder.clear();
        self.listeners = Listeners::default();
        self.refresh();
    }

    // ---- render target lifecycle ------------------------------------------------

    pub fn surface_created(&mut self, handle: SurfaceHandle) {
        tracing::debug!(surface = handle.raw(), "render target created");
        self.binder.set_target(handle);
        if let Some(engine) = self.engine.as_mut() {
            self.binder.bind(engine);
        } else if self.source.is_some() {
            // Deferred opens and suspended sessions both land here.
            self.open_engine();
        }
        self.refresh();
    }

    pub fn surface_changed(&mut self, width: u32, height: u32) {
        self.binder.set_size(width, height);
        let ready = self.engine.is_some()
            && self.target == PlayerState::Playing
            && self.video_size == (width, height);
        if ready {
            if self.pending_seek_ms != 0 {
                self.seek_to(self.pending_seek_ms);
            }
            self.start();
        }
        self.refresh();
    }

    pub fn surface_destroyed(&mut self) {
        tracing::debug!("render target destroyed");
        if !self.is_suspended() {
            self.release_engine(true);
        }
        self.binder.clear();
        self.refresh();
    }

    // ---- engine events ------------------------------------------------------------

    pub fn handle_event(&mut self, token: &SessionToken, event: EngineEvent) {
        if self.session_id() != Some(token.id()) {
            tracing::debug!(session = token.id(), "event for a stale session dropped");
            return;
        }
        tracing::debug!(session = token.id(), event = ?event, "engine event");
        match event {
            EngineEvent::Prepared => self.on_prepared(),
            EngineEvent::PlaybackComplete => {
                self.set_current(PlayerState::PlaybackCompleted);
                self.target = PlayerState::PlaybackCompleted;
                self.audio.stop();
                self.refresh();
                self.listeners.completion();
            }
            EngineEvent::BufferingUpdate(percent) => {
                self.buffer_percent = percent.clamp(0, 100) as u8;
                self.listeners.buffering_update(self.buffer_percent);
            }
            EngineEvent::SeekComplete => self.listeners.seek_complete(),
            EngineEvent::VideoSizeChanged { width, height } => {
                self.video_size = (width, height);
                self.listeners.video_size_changed(width, height);
                if width != 0
                    && height != 0
                    && self.target == PlayerState::Playing
                    && self.binder.matches(width, height)
                {
                    self.start();
                }
            }
            EngineEvent::Error { code, extra } => self.on_engine_error(code, extra),
            EngineEvent::Info { code, extra } => self.on_info(code, extra),
            EngineEvent::HardwareRenderFailed => {
                if !self.listeners.hardware_render_failed() {
                    tracing::warn!(session = token.id(), "hardware rendering failed");
                }
            }
            EngineEvent::TimedText(text) => self.on_timed_text(&text),
            EngineEvent::CachingUpdate(telemetry) => {
                if let CachingTelemetry::SegmentUpdate { segments } = &telemetry {
                    self.segments = segments.clone();
                }
                self.listeners.caching_update(&telemetry);
            }
        }
        self.refresh();
    }

    fn on_prepared(&mut self) {
        self.set_current(PlayerState::Prepared);
        self.capabilities =
            Capabilities::from_metadata(self.engine.as_ref().and_then(|e| e.metadata()).as_ref());
        if self.target == PlayerState::Resume {
            self.target = self.resume_target.take().unwrap_or(PlayerState::Prepared);
        }
        if self.config.auto_start && self.target != PlayerState::Paused {
            self.target = PlayerState::Playing;
        }
        self.listeners.prepared();

        let (width, height) = self
            .engine
            .as_ref()
            .map(|e| e.video_size())
            .unwrap_or((0, 0));
        self.video_size = (width, height);
        if self.pending_seek_ms != 0 {
            self.seek_to(self.pending_seek_ms);
        }
        if width != 0 && height != 0 {
            if self.target == PlayerState::Playing && self.binder.matches(width, height) {
                self.start();
            }
        } else if self.target == PlayerState::Playing {
            self.start();
        }
    }

    fn on_info(&mut self, code: i32, extra: i32) {
        match code {
            MEDIA_INFO_BUFFERING_START => self.buffering = true,
            MEDIA_INFO_BUFFERING_END => self.buffering = false,
            _ => {}
        }
        if self.listeners.info(code, extra).is_some() {
            return;
        }
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        let result = match code {
            MEDIA_INFO_BUFFERING_START if engine.is_playing() => engine.pause(),
            MEDIA_INFO_BUFFERING_END
                if self.target == PlayerState::Playing && self.current == PlayerState::Playing =>
            {
                engine.start()
            }
            _ => Ok(()),
        };
        if let Err(e) = result {
            tracing::warn!(code, "buffering transport change failed: {e:#}");
        }
    }

    fn on_timed_text(&mut self, text: &TimedText) {
        if let TimedText::Text(line) = text {
            tracing::trace!(text = %line, "timed text");
        }
        self.listeners.timed_text(text);
    }

    fn on_engine_error(&mut self, code: i32, extra: i32) {
        tracing::error!(session = ?self.session_id(), code, extra, "playback error");
        self.set_current(PlayerState::Error);
        self.target = PlayerState::Error;
        self.refresh();
        if !self.listeners.error(code, extra) {
            self.listeners.completion();
        }
    }

    // ---- queries ------------------------------------------------------------------

    /// Duration in milliseconds, or -1 when not prepared.
    pub fn duration_ms(&mut self) -> i64 {
        if !self.in_playback_state() {
            self.duration_ms = None;
            return -1;
        }
        if let Some(duration) = self.duration_ms {
            return duration;
        }
        let duration = self.engine.as_ref().map(|e| e.duration_ms()).unwrap_or(-1);
        if duration > 0 {
            self.duration_ms = Some(duration);
        }
        duration
    }

    pub fn current_position_ms(&self) -> i64 {
        match self.engine.as_ref() {
            Some(engine) if self.in_playback_state() => engine.current_position_ms(),
            _ => 0,
        }
    }

    pub fn buffer_percentage(&self) -> u8 {
        if self.engine.is_some() { self.buffer_percent } else { 0 }
    }

    pub fn is_playing(&self) -> bool {
        match self.engine.as_ref() {
            Some(engine) if self.in_playback_state() => engine.is_playing(),
            _ => false,
        }
    }

    pub fn is_buffering(&self) -> bool {
        self.buffering
    }

    pub fn video_size(&self) -> (u32, u32) {
        self.video_size
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn selected_audio_track(&self) -> Option<i32> {
        self.selected_audio
    }

    pub fn selected_subtitle_track(&self) -> Option<i32> {
        self.selected_subtitle
    }

    /// Every track record the engine reports, in blob order. `None` without an engine.
    pub fn tracks(&self, encoding: TextEncoding) -> Option<Vec<TrackDescriptor>> {
        let blobs = self.engine.as_ref()?.track_info()?;
        let mut out = Vec::new();
        for (track_type, blob) in blobs {
            let text = encoding.decode(&blob);
            out.extend(
                playback_proto::parse_track_records(&text)
                    .into_iter()
                    .map(|(index, label)| TrackDescriptor {
                        index,
                        track_type,
                        label,
                    }),
            );
        }
        Some(out)
    }

    /// Index → label table for one track type. `None` without an engine or when the
    /// engine lists no tracks of that type.
    pub fn track_map(
        &self,
        track_type: TrackType,
        encoding: TextEncoding,
    ) -> Option<BTreeMap<i32, String>> {
        let blobs = self.engine.as_ref()?.track_info()?;
        blobs
            .iter()
            .find(|(t, _)| *t == track_type)
            .map(|(_, blob)| playback_proto::decode_track_blob(blob, encoding))
    }

    // ---- internals ----------------------------------------------------------------

    fn in_playback_state(&self) -> bool {
        self.engine.is_some() && self.current.is_playback_capable()
    }

    fn is_suspended(&self) -> bool {
        matches!(
            self.current,
            PlayerState::Suspend | PlayerState::SuspendUnsupported
        )
    }

    fn open_engine(&mut self) {
        let Some(source) = self.source.clone() else {
            return;
        };
        if self.binder.handle().is_none() {
            tracing::debug!(source = %source.locator, "no render target yet; open deferred");
            return;
        }
        self.release_engine(false);
        self.reset_media_state();

        self.last_session_id += 1;
        let token = SessionToken::new(self.last_session_id);
        let mut engine = match self.factory.create() {
            Ok(engine) => engine,
            Err(e) => {
                tracing::warn!(source = %source.locator, "engine unavailable: {e:#}");
                self.on_engine_error(MEDIA_ERROR_UNKNOWN, 0);
                return;
            }
        };
        self.binder.bind(&mut engine);
        if let Some((left, right)) = self.volume {
            engine.set_volume(left, right);
        }
        let ctx = EngineContext {
            events: self.events.poster(token.clone(), self.config.text_encoding),
            audio: self.audio.clone(),
            surface: self.binder.cell(),
            text_encoding: self.config.text_encoding,
        };
        if let Err(e) = engine.open_source(&source, ctx) {
            tracing::warn!(source = %source.locator, "unable to open source: {e:#}");
            token.release();
            self.binder.unbind(&mut engine);
            engine.release();
            self.audio.release();
            self.on_engine_error(MEDIA_ERROR_UNKNOWN, 0);
            return;
        }
        tracing::info!(session = token.id(), source = %source.locator, "session opened");
        self.engine = Some(engine);
        self.token = Some(token);
        self.set_current(PlayerState::Preparing);
    }

    /// Release the engine if there is one. The token is marked first so nothing the
    /// engine posts from here on reaches a listener; the sink goes before the engine so a
    /// decode thread blocked in `write` can exit.
    fn release_engine(&mut self, clear_target: bool) {
        if let Some(token) = self.token.take() {
            token.release();
        }
        let Some(mut engine) = self.engine.take() else {
            return;
        };
        self.audio.release();
        self.binder.unbind(&mut engine);
        engine.release();
        // The decode thread can open a device while release() joins it.
        self.audio.release();
        self.set_current(PlayerState::Idle);
        if clear_target {
            self.target = PlayerState::Idle;
        }
    }

    fn reset_media_state(&mut self) {
        self.duration_ms = None;
        self.buffer_percent = 0;
        self.buffering = false;
        self.video_size = (0, 0);
        self.selected_audio = None;
        self.selected_subtitle = None;
        self.capabilities = Capabilities::default();
        self.segments.clear();
    }

    fn set_current(&mut self, next: PlayerState) {
        if self.current != next {
            tracing::info!(
                session = ?self.session_id(),
                from = ?self.current,
                to = ?next,
                target = ?self.target,
                "state"
            );
            self.current = next;
        }
    }

    fn refresh(&mut self) {
        self.binder
            .update_keep_awake(self.current == PlayerState::Playing, self.config.keep_screen_on);
        self.status.publish(self.snapshot());
    }

    pub fn snapshot(&self) -> SessionStatus {
        SessionStatus {
            session_id: (self.last_session_id > 0).then_some(self.last_session_id),
            source: self.source.as_ref().map(|s| s.locator.to_string()),
            current_state: self.current,
            target_state: self.target,
            duration_ms: self.duration_ms,
            buffer_percent: self.buffer_percentage(),
            buffering: self.buffering,
            video_width: self.video_size.0,
            video_height: self.video_size.1,
            surface_size: self.binder.size(),
            selected_audio_track: self.selected_audio,
            selected_subtitle_track: self.selected_subtitle,
            pending_seek_ms: (self.pending_seek_ms != 0).then_some(self.pending_seek_ms),
            cached_segments: self.segments.clone(),
            audio_buffer_bytes: self.audio.buffer_size(),
            keep_awake: self.binder.keep_awake(),
        }
    }
}

impl<F: EngineFactory> Drop for SessionController<F> {
    fn drop(&mut self) {
        self.release_engine(true);
    }
}

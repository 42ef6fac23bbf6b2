//! Application-facing session handle.
//!
//! [`PlaybackSession`] validates arguments, forwards to the [`SessionController`] and
//! owns the [`EventBridge`] the controller's engines post into. Readiness is the
//! controller's business: accessors answer with defaults until the session is prepared.

use std::collections::BTreeMap;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use playback_proto::TextEncoding;
use playback_types::{CachingTelemetry, PlayerState, SessionStatus, TrackDescriptor, TrackType};

use crate::bridge::{Envelope, EventBridge, SessionToken};
use crate::config::SessionConfig;
use crate::engine::{Capabilities, DataSource, EngineFactory, SurfaceHandle};
use crate::error::SessionError;
use crate::event::{EngineEvent, TimedText};
use crate::session::SessionController;
use crate::sink::AudioSink;
use crate::status::StatusHandle;

pub struct PlaybackSession<F: EngineFactory> {
    bridge: EventBridge,
    controller: SessionController<F>,
}

impl<F: EngineFactory> PlaybackSession<F> {
    pub fn new(factory: F, audio: AudioSink, config: SessionConfig) -> Self {
        let bridge = EventBridge::new();
        let controller = SessionController::new(factory, bridge.sender(), Arc::new(audio), config);
        Self { bridge, controller }
    }

    pub fn controller(&self) -> &SessionController<F> {
        &self.controller
    }

    // ---- event pump -----------------------------------------------------------------

    /// Engine events waiting for the control thread.
    pub fn events(&self) -> &Receiver<Envelope> {
        self.bridge.receiver()
    }

    /// Handle one envelope taken from [`events`](Self::events).
    pub fn deliver(&mut self, envelope: Envelope) -> bool {
        let controller = &mut self.controller;
        EventBridge::deliver(envelope, &mut |token: &SessionToken, event: EngineEvent| {
            controller.handle_event(token, event)
        })
    }

    /// Handle every event queued so far without blocking.
    pub fn dispatch_pending(&mut self) -> usize {
        let controller = &mut self.controller;
        self.bridge
            .dispatch_pending(|token, event| controller.handle_event(token, event))
    }

    /// Block handling events until `done` returns `true` for the current state.
    ///
    /// Also returns once the session holds no engine, since nothing is left to post the
    /// event that would satisfy `done`.
    pub fn dispatch_until(&mut self, mut done: impl FnMut(PlayerState) -> bool) {
        if done(self.controller.current_state()) || !self.controller.has_engine() {
            return;
        }
        let controller = &mut self.controller;
        self.bridge.dispatch_loop(|token, event| {
            controller.handle_event(token, event);
            if done(controller.current_state()) || !controller.has_engine() {
                std::ops::ControlFlow::Break(())
            } else {
                std::ops::ControlFlow::Continue(())
            }
        });
    }

    // ---- transport ------------------------------------------------------------------

    pub fn open(&mut self, source: impl Into<DataSource>) -> Result<(), SessionError> {
        let source = source.into();
        if source.is_empty() {
            return Err(SessionError::EmptySource);
        }
        self.controller.open(source);
        Ok(())
    }

    pub fn start(&mut self) {
        self.controller.start();
    }

    pub fn pause(&mut self) {
        self.controller.pause();
    }

    pub fn stop(&mut self) {
        self.controller.stop();
    }

    pub fn seek_to(&mut self, ms: i64) -> Result<(), SessionError> {
        if ms < 0 {
            return Err(SessionError::NegativeSeek(ms));
        }
        self.controller.seek_to(ms);
        Ok(())
    }

    pub fn select_track(&mut self, index: i32) -> Result<(), SessionError> {
        if index < 0 {
            return Err(SessionError::InvalidTrackIndex(index));
        }
        self.controller.select_track(index, true)
    }

    pub fn deselect_track(&mut self, index: i32) -> Result<(), SessionError> {
        if index < 0 {
            return Err(SessionError::InvalidTrackIndex(index));
        }
        self.controller.select_track(index, false)
    }

    pub fn set_volume(&mut self, left: f32, right: f32) -> Result<(), SessionError> {
        let valid = |v: f32| (0.0..=1.0).contains(&v);
        if !valid(left) || !valid(right) {
            return Err(SessionError::VolumeOutOfRange { left, right });
        }
        self.controller.set_volume(left, right);
        Ok(())
    }

    pub fn suspend(&mut self) {
        self.controller.suspend();
    }

    pub fn resume(&mut self) {
        self.controller.resume();
    }

    pub fn reset(&mut self) {
        self.controller.reset();
    }

    pub fn release(&mut self) {
        self.controller.release();
    }

    /// Default encoding for track labels and timed text of sessions opened from now on.
    pub fn set_text_encoding(&mut self, label: &str) {
        let encoding = resolve_encoding(Some(label), self.controller.config().text_encoding);
        self.controller.set_text_encoding(encoding);
    }

    // ---- render target ----------------------------------------------------------------

    pub fn on_surface_created(&mut self, handle: SurfaceHandle) {
        self.controller.surface_created(handle);
    }

    pub fn on_surface_changed(&mut self, width: u32, height: u32) {
        self.controller.surface_changed(width, height);
    }

    pub fn on_surface_destroyed(&mut self) {
        self.controller.surface_destroyed();
    }

    // ---- queries ----------------------------------------------------------------------

    /// Milliseconds, or -1 until prepared.
    pub fn duration(&mut self) -> i64 {
        self.controller.duration_ms()
    }

    /// Milliseconds, or 0 until prepared.
    pub fn current_position(&self) -> i64 {
        self.controller.current_position_ms()
    }

    pub fn buffer_percentage(&self) -> u8 {
        self.controller.buffer_percentage()
    }

    pub fn is_playing(&self) -> bool {
        self.controller.is_playing()
    }

    pub fn is_buffering(&self) -> bool {
        self.controller.is_buffering()
    }

    pub fn video_size(&self) -> (u32, u32) {
        self.controller.video_size()
    }

    pub fn current_state(&self) -> PlayerState {
        self.controller.current_state()
    }

    pub fn target_state(&self) -> PlayerState {
        self.controller.target_state()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.controller.capabilities()
    }

    pub fn can_pause(&self) -> bool {
        self.controller.capabilities().can_pause
    }

    pub fn can_seek_backward(&self) -> bool {
        self.controller.capabilities().can_seek_backward
    }

    pub fn can_seek_forward(&self) -> bool {
        self.controller.capabilities().can_seek_forward
    }

    pub fn keep_awake(&self) -> bool {
        self.controller.keep_awake()
    }

    pub fn tracks(&self, encoding: Option<&str>) -> Option<Vec<TrackDescriptor>> {
        self.controller.tracks(self.encoding(encoding))
    }

    pub fn track_map(
        &self,
        track_type: TrackType,
        encoding: Option<&str>,
    ) -> Option<BTreeMap<i32, String>> {
        self.controller.track_map(track_type, self.encoding(encoding))
    }

    pub fn audio_track_map(&self, encoding: Option<&str>) -> Option<BTreeMap<i32, String>> {
        self.track_map(TrackType::Audio, encoding)
    }

    pub fn subtitle_track_map(&self, encoding: Option<&str>) -> Option<BTreeMap<i32, String>> {
        self.track_map(TrackType::TimedText, encoding)
    }

    pub fn status(&self) -> SessionStatus {
        self.controller.snapshot()
    }

    /// Status handle readable from other threads.
    pub fn status_handle(&self) -> StatusHandle {
        self.controller.status_handle()
    }

    fn encoding(&self, label: Option<&str>) -> TextEncoding {
        resolve_encoding(label, self.controller.config().text_encoding)
    }

    // ---- listeners --------------------------------------------------------------------

    pub fn set_on_prepared(&mut self, cb: impl FnMut() + Send + 'static) {
        self.controller.listeners_mut().on_prepared = Some(Box::new(cb));
    }

    pub fn set_on_completion(&mut self, cb: impl FnMut() + Send + 'static) {
        self.controller.listeners_mut().on_completion = Some(Box::new(cb));
    }

    pub fn set_on_buffering_update(&mut self, cb: impl FnMut(u8) + Send + 'static) {
        self.controller.listeners_mut().on_buffering_update = Some(Box::new(cb));
    }

    pub fn set_on_caching_update(&mut self, cb: impl FnMut(&CachingTelemetry) + Send + 'static) {
        self.controller.listeners_mut().on_caching_update = Some(Box::new(cb));
    }

    pub fn set_on_seek_complete(&mut self, cb: impl FnMut() + Send + 'static) {
        self.controller.listeners_mut().on_seek_complete = Some(Box::new(cb));
    }

    pub fn set_on_video_size_changed(&mut self, cb: impl FnMut(u32, u32) + Send + 'static) {
        self.controller.listeners_mut().on_video_size_changed = Some(Box::new(cb));
    }

    /// `cb` returns `true` when it handled the error; otherwise completion fires too.
    pub fn set_on_error(&mut self, cb: impl FnMut(i32, i32) -> bool + Send + 'static) {
        self.controller.listeners_mut().on_error = Some(Box::new(cb));
    }

    /// Registering an info listener disables the built-in buffering pause/resume.
    pub fn set_on_info(&mut self, cb: impl FnMut(i32, i32) -> bool + Send + 'static) {
        self.controller.listeners_mut().on_info = Some(Box::new(cb));
    }

    pub fn set_on_timed_text(&mut self, cb: impl FnMut(&TimedText) + Send + 'static) {
        self.controller.listeners_mut().on_timed_text = Some(Box::new(cb));
    }

    pub fn set_on_hardware_render_failed(&mut self, cb: impl FnMut() + Send + 'static) {
        self.controller.listeners_mut().on_hardware_render_failed = Some(Box::new(cb));
    }
}

/// Resolve an optional encoding label, falling back (with a warning) on unknown labels.
pub fn resolve_encoding(label: Option<&str>, fallback: TextEncoding) -> TextEncoding {
    match label {
        None => fallback,
        Some(label) => TextEncoding::from_label(label).unwrap_or_else(|| {
            tracing::warn!(label, fallback = fallback.label(), "unknown text encoding");
            fallback
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingBackend, MockEngine, mock_session};

    #[test]
    fn usage_errors_are_rejected() {
        let engine = MockEngine::default();
        let mut session = mock_session(&engine, &RecordingBackend::new(64));
        assert_eq!(session.open(""), Err(SessionError::EmptySource));
        assert_eq!(session.open(DataSource::fd(-1)), Err(SessionError::EmptySource));
        assert_eq!(session.select_track(-1), Err(SessionError::InvalidTrackIndex(-1)));
        assert_eq!(session.deselect_track(-2), Err(SessionError::InvalidTrackIndex(-2)));
        assert_eq!(session.seek_to(-5), Err(SessionError::NegativeSeek(-5)));
        assert!(session.set_volume(1.5, 0.5).is_err());
        assert!(session.set_volume(f32::NAN, 0.5).is_err());
        assert!(session.set_volume(0.0, 1.0).is_ok());
        assert!(engine.calls().is_empty());
    }

    #[test]
    fn accessors_default_before_prepared() {
        let engine = MockEngine::default();
        engine.script().duration_ms = 90_000;
        let mut session = mock_session(&engine, &RecordingBackend::new(64));
        assert_eq!(session.duration(), -1);
        assert_eq!(session.current_position(), 0);
        assert_eq!(session.buffer_percentage(), 0);
        assert!(!session.is_playing());
        assert!(session.audio_track_map(None).is_none());
        assert!(session.tracks(None).is_none());
        assert_eq!(session.select_track(1), Ok(()));
    }

    #[test]
    fn dispatch_until_returns_once_no_engine_remains() {
        let engine = MockEngine::default();
        let mut session = mock_session(&engine, &RecordingBackend::new(64));
        session.on_surface_created(SurfaceHandle::new(1).unwrap());
        session.open("file:///movie.mkv").unwrap();
        assert!(session.controller().has_engine());

        session.release();
        assert!(!session.controller().has_engine());
        session.dispatch_until(|state| state == PlayerState::Playing);
        assert_eq!(session.current_state(), PlayerState::Idle);
    }

    #[test]
    fn resolve_encoding_falls_back_on_unknown_labels() {
        assert_eq!(resolve_encoding(None, TextEncoding::Latin1), TextEncoding::Latin1);
        assert_eq!(
            resolve_encoding(Some("utf-16le"), TextEncoding::Utf8),
            TextEncoding::Utf16Le
        );
        assert_eq!(
            resolve_encoding(Some("klingon"), TextEncoding::Utf8),
            TextEncoding::Utf8
        );
    }
}

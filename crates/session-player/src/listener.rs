//! Optional application callbacks, invoked on the control thread.

use playback_types::CachingTelemetry;

use crate::event::TimedText;

pub type Callback = Box<dyn FnMut() + Send>;
/// Returns `true` when the notification was handled.
pub type CodeCallback = Box<dyn FnMut(i32, i32) -> bool + Send>;

/// The listener set of one session. Every slot is optional.
#[derive(Default)]
pub struct Listeners {
    pub on_prepared: Option<Callback>,
    pub on_completion: Option<Callback>,
    pub on_buffering_update: Option<Box<dyn FnMut(u8) + Send>>,
    pub on_caching_update: Option<Box<dyn FnMut(&CachingTelemetry) + Send>>,
    pub on_seek_complete: Option<Callback>,
    pub on_video_size_changed: Option<Box<dyn FnMut(u32, u32) + Send>>,
    pub on_error: Option<CodeCallback>,
    pub on_info: Option<CodeCallback>,
    pub on_timed_text: Option<Box<dyn FnMut(&TimedText) + Send>>,
    pub on_hardware_render_failed: Option<Callback>,
}

impl Listeners {
    pub(crate) fn prepared(&mut self) {
        if let Some(cb) = self.on_prepared.as_mut() {
            cb();
        }
    }

    pub(crate) fn completion(&mut self) {
        if let Some(cb) = self.on_completion.as_mut() {
            cb();
        }
    }

    pub(crate) fn buffering_update(&mut self, percent: u8) {
        if let Some(cb) = self.on_buffering_update.as_mut() {
            cb(percent);
        }
    }

    pub(crate) fn caching_update(&mut self, telemetry: &CachingTelemetry) {
        if let Some(cb) = self.on_caching_update.as_mut() {
            cb(telemetry);
        }
    }

    pub(crate) fn seek_complete(&mut self) {
        if let Some(cb) = self.on_seek_complete.as_mut() {
            cb();
        }
    }

    pub(crate) fn video_size_changed(&mut self, width: u32, height: u32) {
        if let Some(cb) = self.on_video_size_changed.as_mut() {
            cb(width, height);
        }
    }

    /// `false` when no listener is registered.
    pub(crate) fn error(&mut self, code: i32, extra: i32) -> bool {
        self.on_error.as_mut().is_some_and(|cb| cb(code, extra))
    }

    /// `None` when no listener is registered.
    pub(crate) fn info(&mut self, code: i32, extra: i32) -> Option<bool> {
        self.on_info.as_mut().map(|cb| cb(code, extra))
    }

    pub(crate) fn timed_text(&mut self, text: &TimedText) {
        if let Some(cb) = self.on_timed_text.as_mut() {
            cb(text);
        }
    }

    /// `false` when no listener is registered.
    pub(crate) fn hardware_render_failed(&mut self) -> bool {
        match self.on_hardware_render_failed.as_mut() {
            Some(cb) => {
                cb();
                true
            }
            None => false,
        }
    }
}

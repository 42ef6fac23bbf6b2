//! Render target bookkeeping: which surface exists, which one the engine renders into,
//! and whether the screen should be kept awake.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::engine::{MediaEngine, SurfaceHandle};

/// Latest bound surface, shared with engine threads.
#[derive(Clone, Debug, Default)]
pub struct SurfaceCell(Arc<AtomicU64>);

impl SurfaceCell {
    pub fn load(&self) -> Option<SurfaceHandle> {
        SurfaceHandle::new(self.0.load(Ordering::Acquire))
    }

    fn store(&self, handle: Option<SurfaceHandle>) {
        self.0
            .store(handle.map(SurfaceHandle::raw).unwrap_or(0), Ordering::Release);
    }
}

#[derive(Debug, Default)]
pub struct RenderTargetBinder {
    handle: Option<SurfaceHandle>,
    size: Option<(u32, u32)>,
    bound: Option<SurfaceHandle>,
    cell: SurfaceCell,
    keep_awake: bool,
}

impl RenderTargetBinder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cell(&self) -> SurfaceCell {
        self.cell.clone()
    }

    pub fn handle(&self) -> Option<SurfaceHandle> {
        self.handle
    }

    pub fn size(&self) -> Option<(u32, u32)> {
        self.size
    }

    pub fn is_bound(&self) -> bool {
        self.bound.is_some()
    }

    pub fn keep_awake(&self) -> bool {
        self.keep_awake
    }

    /// Host created a surface. Its size arrives separately.
    pub fn set_target(&mut self, handle: SurfaceHandle) {
        if self.handle != Some(handle) {
            self.size = None;
        }
        self.handle = Some(handle);
        self.cell.store(Some(handle));
    }

    pub fn set_size(&mut self, width: u32, height: u32) {
        self.size = Some((width, height));
    }

    /// Host destroyed the surface. Callers unbind the engine first.
    pub fn clear(&mut self) {
        self.handle = None;
        self.size = None;
        self.bound = None;
        self.cell.store(None);
    }

    /// Whether a surface exists and its size equals the decoded video size.
    pub fn matches(&self, width: u32, height: u32) -> bool {
        self.handle.is_some() && self.size == Some((width, height))
    }

    /// Bind the current surface to `engine`, unbinding a different one first.
    ///
    /// Returns `false` when there is nothing to bind or the engine refused the surface;
    /// playback then continues without video.
    pub fn bind<E: MediaEngine>(&mut self, engine: &mut E) -> bool {
        let Some(handle) = self.handle else {
            return false;
        };
        if self.bound == Some(handle) {
            return true;
        }
        if self.bound.take().is_some() {
            engine.unbind_surface();
        }
        match engine.bind_surface(handle) {
            Ok(()) => {
                tracing::debug!(surface = handle.raw(), "render target bound");
                self.bound = Some(handle);
                true
            }
            Err(e) => {
                tracing::warn!(surface = handle.raw(), "render target bind failed; continuing audio-only: {e:#}");
                false
            }
        }
    }

    pub fn unbind<E: MediaEngine>(&mut self, engine: &mut E) {
        if self.bound.take().is_some() {
            engine.unbind_surface();
        }
    }

    /// Recompute the keep-awake flag; true only while bound and playing.
    pub fn update_keep_awake(&mut self, playing: bool, enabled: bool) -> bool {
        let next = enabled && playing && self.bound.is_some();
        if next != self.keep_awake {
            tracing::debug!(keep_awake = next, "screen keep-awake changed");
            self.keep_awake = next;
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{EngineCall, MockEngine};

    fn handle(raw: u64) -> SurfaceHandle {
        SurfaceHandle::new(raw).unwrap()
    }

    #[test]
    fn rebinding_a_new_surface_unbinds_the_old_one() {
        let mut engine = MockEngine::default();
        let mut binder = RenderTargetBinder::new();
        binder.set_target(handle(1));
        assert!(binder.bind(&mut engine));
        assert!(binder.bind(&mut engine));
        binder.set_target(handle(2));
        assert!(binder.bind(&mut engine));

        assert_eq!(
            engine.calls(),
            vec![
                EngineCall::BindSurface(1),
                EngineCall::UnbindSurface,
                EngineCall::BindSurface(2)
            ]
        );
        assert_eq!(binder.cell().load(), Some(handle(2)));
    }

    #[test]
    fn bind_failure_degrades_to_unbound() {
        let mut engine = MockEngine::default();
        engine.script().fail_bind = true;
        let mut binder = RenderTargetBinder::new();
        binder.set_target(handle(5));
        assert!(!binder.bind(&mut engine));
        assert!(!binder.is_bound());
        assert!(!binder.update_keep_awake(true, true));
    }

    #[test]
    fn keep_awake_requires_binding_and_playback() {
        let mut engine = MockEngine::default();
        let mut binder = RenderTargetBinder::new();
        assert!(!binder.update_keep_awake(true, true));
        binder.set_target(handle(1));
        binder.bind(&mut engine);
        assert!(!binder.update_keep_awake(false, true));
        assert!(binder.update_keep_awake(true, true));
        assert!(!binder.update_keep_awake(true, false));
    }

    #[test]
    fn clear_resets_size_and_published_handle() {
        let mut binder = RenderTargetBinder::new();
        let cell = binder.cell();
        binder.set_target(handle(3));
        binder.set_size(640, 480);
        assert!(binder.matches(640, 480));
        assert!(!binder.matches(320, 240));
        binder.clear();
        assert!(!binder.matches(640, 480));
        assert_eq!(cell.load(), None);
    }
}

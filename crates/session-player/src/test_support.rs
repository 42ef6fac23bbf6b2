//! Scriptable engine and recording audio device used by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Result, anyhow};
use playback_types::TrackType;

use crate::bridge::EventPoster;
use crate::config::SessionConfig;
use crate::engine::{DataSource, EngineContext, EngineFactory, MediaEngine, SurfaceHandle};
use crate::event::EngineEvent;
use crate::facade::PlaybackSession;
use crate::sink::{AudioBackend, AudioDevice, AudioSink};

#[derive(Clone, Debug, PartialEq)]
pub enum EngineCall {
    Open(String),
    BindSurface(u64),
    UnbindSurface,
    Start,
    Pause,
    Stop,
    SeekTo(i64),
    SelectTrack(i32, bool),
    SetVolume(f32, f32),
    Release,
}

#[derive(Default)]
pub struct EngineScript {
    pub video_size: (u32, u32),
    pub duration_ms: i64,
    pub position_ms: i64,
    pub fail_create: bool,
    pub fail_open: bool,
    pub fail_bind: bool,
    pub track_info: Option<Vec<(TrackType, Vec<u8>)>>,
    pub metadata: Option<HashMap<String, Vec<u8>>>,
    pub playing: bool,
    /// Format the engine opens the audio sink with while being released, like a decode
    /// thread that reaches `init` just before it is joined.
    pub audio_init_on_release: Option<(u32, u16)>,
    pub calls: Vec<EngineCall>,
    pub posters: Vec<EventPoster>,
    pub audio: Option<Arc<AudioSink>>,
}

/// Engine whose state is shared by every clone, so tests keep a handle after the
/// controller takes ownership.
#[derive(Clone, Default)]
pub struct MockEngine {
    state: Arc<Mutex<EngineScript>>,
}

impl MockEngine {
    pub fn script(&self) -> MutexGuard<'_, EngineScript> {
        self.state.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.script().calls.clone()
    }

    pub fn count(&self, call: &EngineCall) -> usize {
        self.script().calls.iter().filter(|c| *c == call).count()
    }

    /// Poster of the most recently opened session.
    pub fn poster(&self) -> EventPoster {
        self.script().posters.last().cloned().unwrap()
    }

    pub fn post(&self, event: EngineEvent) {
        self.poster().post(event);
    }

    fn record(&self, call: EngineCall) {
        self.script().calls.push(call);
    }
}

impl MediaEngine for MockEngine {
    fn open_source(&mut self, source: &DataSource, ctx: EngineContext) -> Result<()> {
        self.record(EngineCall::Open(source.locator.to_string()));
        let mut script = self.script();
        if script.fail_open {
            return Err(anyhow!("source refused"));
        }
        script.posters.push(ctx.events);
        script.audio = Some(ctx.audio);
        Ok(())
    }

    fn bind_surface(&mut self, surface: SurfaceHandle) -> Result<()> {
        if self.script().fail_bind {
            return Err(anyhow!("surface refused"));
        }
        self.record(EngineCall::BindSurface(surface.raw()));
        Ok(())
    }

    fn unbind_surface(&mut self) {
        self.record(EngineCall::UnbindSurface);
    }

    fn start(&mut self) -> Result<()> {
        self.record(EngineCall::Start);
        self.script().playing = true;
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.record(EngineCall::Pause);
        self.script().playing = false;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.record(EngineCall::Stop);
        self.script().playing = false;
        Ok(())
    }

    fn seek_to(&mut self, ms: i64) -> Result<()> {
        self.record(EngineCall::SeekTo(ms));
        self.script().position_ms = ms;
        Ok(())
    }

    fn duration_ms(&self) -> i64 {
        self.script().duration_ms
    }

    fn current_position_ms(&self) -> i64 {
        self.script().position_ms
    }

    fn video_size(&self) -> (u32, u32) {
        self.script().video_size
    }

    fn is_playing(&self) -> bool {
        self.script().playing
    }

    fn select_track(&mut self, index: i32, select: bool) -> Result<()> {
        self.record(EngineCall::SelectTrack(index, select));
        Ok(())
    }

    fn set_volume(&mut self, left: f32, right: f32) {
        self.record(EngineCall::SetVolume(left, right));
    }

    fn track_info(&self) -> Option<Vec<(TrackType, Vec<u8>)>> {
        self.script().track_info.clone()
    }

    fn metadata(&self) -> Option<HashMap<String, Vec<u8>>> {
        self.script().metadata.clone()
    }

    fn release(&mut self) {
        self.record(EngineCall::Release);
        let late_init = {
            let mut script = self.script();
            script.playing = false;
            script.audio.clone().zip(script.audio_init_on_release)
        };
        if let Some((audio, (sample_rate, channels))) = late_init {
            audio.init(sample_rate, channels);
        }
    }
}

#[derive(Clone, Default)]
pub struct MockFactory {
    pub engine: MockEngine,
}

impl EngineFactory for MockFactory {
    type Engine = MockEngine;

    fn create(&self) -> Result<MockEngine> {
        if self.engine.script().fail_create {
            return Err(anyhow!("engine unavailable"));
        }
        Ok(self.engine.clone())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum DeviceCall {
    Open(u32, u16),
    Play,
    Pause,
    Stop,
    Volume(f32, f32),
    Close,
}

#[derive(Default)]
struct DeviceLog {
    calls: Vec<DeviceCall>,
    writes: Vec<Vec<u8>>,
}

/// Backend whose devices record every call into one shared log.
#[derive(Clone)]
pub struct RecordingBackend {
    min_buffer: usize,
    fail: bool,
    log: Arc<Mutex<DeviceLog>>,
}

impl RecordingBackend {
    pub fn new(min_buffer: usize) -> Self {
        Self {
            min_buffer,
            fail: false,
            log: Arc::default(),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(0)
        }
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.log.lock().unwrap().calls.clone()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.log.lock().unwrap().writes.clone()
    }
}

impl AudioBackend for RecordingBackend {
    fn open(&self, sample_rate: u32, channels: u16) -> Result<Box<dyn AudioDevice>> {
        if self.fail {
            return Err(anyhow!("no output device"));
        }
        self.log
            .lock()
            .unwrap()
            .calls
            .push(DeviceCall::Open(sample_rate, channels));
        Ok(Box::new(RecordingDevice {
            min_buffer: self.min_buffer,
            playing: AtomicBool::new(false),
            log: self.log.clone(),
        }))
    }
}

struct RecordingDevice {
    min_buffer: usize,
    playing: AtomicBool,
    log: Arc<Mutex<DeviceLog>>,
}

impl RecordingDevice {
    fn record(&self, call: DeviceCall) {
        self.log.lock().unwrap().calls.push(call);
    }
}

impl AudioDevice for RecordingDevice {
    fn min_buffer_size(&self) -> usize {
        self.min_buffer
    }

    fn write(&self, bytes: &[u8]) -> Result<()> {
        self.log.lock().unwrap().writes.push(bytes.to_vec());
        Ok(())
    }

    fn play(&self) -> Result<()> {
        self.playing.store(true, Ordering::SeqCst);
        self.record(DeviceCall::Play);
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        self.playing.store(false, Ordering::SeqCst);
        self.record(DeviceCall::Pause);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.playing.store(false, Ordering::SeqCst);
        self.record(DeviceCall::Stop);
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    fn set_volume(&self, left: f32, right: f32) {
        self.record(DeviceCall::Volume(left, right));
    }

    fn close(&self) {
        self.record(DeviceCall::Close);
    }
}

/// A session wired to a mock engine and a recording audio device.
pub fn mock_session(
    engine: &MockEngine,
    backend: &RecordingBackend,
) -> PlaybackSession<MockFactory> {
    mock_session_with(engine, backend, SessionConfig::default())
}

pub fn mock_session_with(
    engine: &MockEngine,
    backend: &RecordingBackend,
    config: SessionConfig,
) -> PlaybackSession<MockFactory> {
    let factory = MockFactory {
        engine: engine.clone(),
    };
    let audio = AudioSink::new(Box::new(backend.clone()), config.max_write_chunk_bytes);
    PlaybackSession::new(factory, audio, config)
}

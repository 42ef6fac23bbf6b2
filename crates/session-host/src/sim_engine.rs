//! Scripted media engine.
//!
//! Stands in for a native decoder: preparation, video size reporting, buffering and
//! caching telemetry, timed text, PCM silence written through the audio sink and
//! completion all happen on an engine thread, timed by the [`EngineScript`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use playback_proto::{
    CACHE_TYPE_NOT_AVAILABLE, CACHE_TYPE_SPEED, CACHE_TYPE_UPDATE, MessageKind, SUBTITLE_TEXT,
    TextEncoding,
};
use playback_types::TrackType;
use playback_types::codes::{
    CACHE_INFO_STREAM_NOT_SUPPORT, MEDIA_ERROR_UNKNOWN, MEDIA_INFO_BUFFERING_END,
    MEDIA_INFO_BUFFERING_START,
};
use serde::Deserialize;
use session_player::engine::{METADATA_CAN_PAUSE, METADATA_CAN_SEEK};
use session_player::{
    DataSource, EngineContext, EngineEvent, EngineFactory, EventPoster, MediaEngine,
    NativePayload, SurfaceHandle,
};

/// Timing and content of a scripted session (`[engine]` table).
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EngineScript {
    pub duration_ms: i64,
    /// 0x0 makes the source audio-only.
    pub video_width: u32,
    pub video_height: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub prepare_delay_ms: u64,
    /// Decode step; one step of silence is written per tick while playing.
    pub tick_ms: u64,
    pub audio_tracks: Vec<String>,
    pub subtitle_tracks: Vec<String>,
    /// Timed text lines, one every `subtitle_interval_ms`.
    pub subtitles: Vec<String>,
    pub subtitle_interval_ms: i64,
    /// Flat start/end byte offsets reported once the source is prepared.
    pub cache_segments: Vec<i64>,
    pub seekable: bool,
    pub pausable: bool,
    /// Report a buffering stall halfway through.
    pub buffering_stall: bool,
    /// Post an engine error instead of `Prepared`.
    pub fail_prepare: bool,
}

impl Default for EngineScript {
    fn default() -> Self {
        Self {
            duration_ms: 3_000,
            video_width: 640,
            video_height: 360,
            sample_rate: 48_000,
            channels: 2,
            prepare_delay_ms: 50,
            tick_ms: 20,
            audio_tracks: vec!["English".to_string(), "French".to_string()],
            subtitle_tracks: vec!["English".to_string()],
            subtitles: vec!["Hello.".to_string(), "Goodbye.".to_string()],
            subtitle_interval_ms: 1_000,
            cache_segments: vec![0, 65_536],
            seekable: true,
            pausable: true,
            buffering_stall: false,
            fail_prepare: false,
        }
    }
}

impl EngineScript {
    fn has_video(&self) -> bool {
        self.video_width != 0 && self.video_height != 0
    }

    /// `(type, records)` in index order: video first, then audio, then subtitles.
    fn track_records(&self) -> Vec<(TrackType, Vec<String>)> {
        let mut index = 0;
        let mut next = |name: &str| -> String {
            let record = format!("{index}.{name}");
            index += 1;
            record
        };
        let mut out = Vec::new();
        if self.has_video() {
            out.push((TrackType::Video, vec![next("video")]));
        }
        let audio: Vec<String> = self.audio_tracks.iter().map(|n| next(n)).collect();
        if !audio.is_empty() {
            out.push((TrackType::Audio, audio));
        }
        let subtitles: Vec<String> = self.subtitle_tracks.iter().map(|n| next(n)).collect();
        if !subtitles.is_empty() {
            out.push((TrackType::TimedText, subtitles));
        }
        out
    }
}

#[derive(Clone, Debug, Default)]
pub struct ScriptedFactory {
    pub script: EngineScript,
}

impl ScriptedFactory {
    pub fn new(script: EngineScript) -> Self {
        Self { script }
    }
}

impl EngineFactory for ScriptedFactory {
    type Engine = ScriptedEngine;

    fn create(&self) -> Result<ScriptedEngine> {
        Ok(ScriptedEngine::new(self.script.clone()))
    }
}

enum Command {
    Seek(i64),
}

#[derive(Default)]
struct Shared {
    prepared: AtomicBool,
    playing: AtomicBool,
    position_ms: AtomicI64,
}

pub struct ScriptedEngine {
    script: EngineScript,
    shared: Arc<Shared>,
    surface: Option<SurfaceHandle>,
    audio: Option<Arc<session_player::AudioSink>>,
    cmd_tx: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
}

impl ScriptedEngine {
    pub fn new(script: EngineScript) -> Self {
        Self {
            script,
            shared: Arc::new(Shared::default()),
            surface: None,
            audio: None,
            cmd_tx: None,
            worker: None,
        }
    }

    pub fn surface(&self) -> Option<SurfaceHandle> {
        self.surface
    }

    fn track_indices(&self) -> impl Iterator<Item = i32> + '_ {
        (0..).take(
            usize::from(self.script.has_video())
                + self.script.audio_tracks.len()
                + self.script.subtitle_tracks.len(),
        )
    }
}

impl MediaEngine for ScriptedEngine {
    fn open_source(&mut self, source: &DataSource, ctx: EngineContext) -> Result<()> {
        if self.worker.is_some() {
            bail!("source already open");
        }
        tracing::debug!(source = %source.locator, session = ctx.events.session_id(), "scripted open");
        self.audio = Some(ctx.audio.clone());
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let script = self.script.clone();
        let shared = self.shared.clone();
        let worker = std::thread::Builder::new()
            .name("scripted-engine".to_string())
            .spawn(move || decode_thread(script, shared, ctx, cmd_rx))
            .context("spawn engine thread")?;
        self.cmd_tx = Some(cmd_tx);
        self.worker = Some(worker);
        Ok(())
    }

    fn bind_surface(&mut self, surface: SurfaceHandle) -> Result<()> {
        self.surface = Some(surface);
        Ok(())
    }

    fn unbind_surface(&mut self) {
        self.surface = None;
    }

    fn start(&mut self) -> Result<()> {
        if !self.shared.prepared.load(Ordering::Acquire) {
            bail!("start before prepared");
        }
        if self.shared.position_ms.load(Ordering::Relaxed) >= self.script.duration_ms {
            self.shared.position_ms.store(0, Ordering::Relaxed);
        }
        self.shared.playing.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        if !self.script.pausable {
            bail!("source cannot be paused");
        }
        self.shared.playing.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.shared.playing.store(false, Ordering::Relaxed);
        self.shared.position_ms.store(0, Ordering::Relaxed);
        Ok(())
    }

    fn seek_to(&mut self, ms: i64) -> Result<()> {
        if !self.script.seekable {
            bail!("source cannot be seeked");
        }
        let tx = self.cmd_tx.as_ref().ok_or_else(|| anyhow!("no source open"))?;
        tx.send(Command::Seek(ms)).map_err(|_| anyhow!("engine thread gone"))
    }

    fn duration_ms(&self) -> i64 {
        self.script.duration_ms
    }

    fn current_position_ms(&self) -> i64 {
        self.shared.position_ms.load(Ordering::Relaxed)
    }

    fn video_size(&self) -> (u32, u32) {
        (self.script.video_width, self.script.video_height)
    }

    fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::Relaxed)
    }

    fn select_track(&mut self, index: i32, select: bool) -> Result<()> {
        if !self.track_indices().any(|i| i == index) {
            bail!("no track {index}");
        }
        tracing::debug!(index, select, "scripted track selection");
        Ok(())
    }

    fn set_volume(&mut self, left: f32, right: f32) {
        if let Some(audio) = &self.audio {
            audio.set_volume(left, right);
        }
    }

    fn track_info(&self) -> Option<Vec<(TrackType, Vec<u8>)>> {
        let records = self.script.track_records();
        if records.is_empty() {
            return None;
        }
        Some(
            records
                .into_iter()
                .map(|(track_type, labels)| {
                    let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
                    (
                        track_type,
                        playback_proto::encode_track_blob(&labels, TextEncoding::Utf8),
                    )
                })
                .collect(),
        )
    }

    fn metadata(&self) -> Option<HashMap<String, Vec<u8>>> {
        let flag = |on: bool| if on { b"1".to_vec() } else { b"0".to_vec() };
        Some(HashMap::from([
            (METADATA_CAN_PAUSE.to_string(), flag(self.script.pausable)),
            (METADATA_CAN_SEEK.to_string(), flag(self.script.seekable)),
        ]))
    }

    fn release(&mut self) {
        self.shared.playing.store(false, Ordering::Relaxed);
        self.cmd_tx = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("scripted engine thread panicked");
            }
        }
        self.audio = None;
    }
}

impl Drop for ScriptedEngine {
    fn drop(&mut self) {
        self.release();
    }
}

fn decode_thread(
    script: EngineScript,
    shared: Arc<Shared>,
    ctx: EngineContext,
    cmd_rx: Receiver<Command>,
) {
    let events = ctx.events;
    let tick = Duration::from_millis(script.tick_ms.max(1));
    let tick_ms = tick.as_millis() as i64;

    for percent in [10, 50, 100] {
        events.post(EngineEvent::BufferingUpdate(percent));
    }
    match cmd_rx.recv_timeout(Duration::from_millis(script.prepare_delay_ms)) {
        Ok(Command::Seek(ms)) => shared.position_ms.store(ms, Ordering::Relaxed),
        Err(RecvTimeoutError::Timeout) => {}
        Err(RecvTimeoutError::Disconnected) => return,
    }
    if script.fail_prepare {
        events.post(EngineEvent::Error {
            code: MEDIA_ERROR_UNKNOWN,
            extra: 0,
        });
        return;
    }

    let buffer_bytes = ctx.audio.init(script.sample_rate, script.channels);
    post_caching(&events, &script.cache_segments);
    shared.prepared.store(true, Ordering::Release);
    events.post(EngineEvent::Prepared);
    if script.has_video() {
        events.post_native(
            MessageKind::SetVideoSize as i32,
            script.video_width as i32,
            script.video_height as i32,
            NativePayload::None,
        );
    }

    let silence = if buffer_bytes > 0 {
        let frames = script.sample_rate as usize * tick_ms as usize / 1000;
        vec![0u8; frames * usize::from(script.channels) * 2]
    } else {
        Vec::new()
    };
    let mut subtitle = 0usize;
    let mut stall_ticks: Option<u32> = None;
    let mut stalled = false;

    loop {
        match cmd_rx.recv_timeout(tick) {
            Ok(Command::Seek(ms)) => {
                let ms = ms.clamp(0, script.duration_ms);
                shared.position_ms.store(ms, Ordering::Relaxed);
                subtitle = subtitle_slot(ms, script.subtitle_interval_ms);
                events.post(EngineEvent::SeekComplete);
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        if let Some(left) = stall_ticks.as_mut() {
            *left = left.saturating_sub(1);
            if *left == 0 {
                stall_ticks = None;
                events.post(EngineEvent::Info {
                    code: MEDIA_INFO_BUFFERING_END,
                    extra: 0,
                });
            }
            continue;
        }
        if !shared.playing.load(Ordering::Relaxed) {
            continue;
        }

        if !silence.is_empty() {
            if let Err(e) = ctx.audio.write(&silence, 0, silence.len()) {
                tracing::warn!("scripted audio write failed: {e}");
            }
        }
        let before = shared.position_ms.fetch_add(tick_ms, Ordering::Relaxed);
        let position = (before + tick_ms).min(script.duration_ms);

        if before / 1000 != position / 1000 {
            events.post(EngineEvent::BufferingUpdate(
                (position * 100 / script.duration_ms.max(1)) as i32,
            ));
            events.post_native(
                MessageKind::CachingUpdate as i32,
                CACHE_TYPE_SPEED,
                256,
                NativePayload::None,
            );
        }
        while subtitle < script.subtitles.len()
            && position >= (subtitle as i64 + 1) * script.subtitle_interval_ms.max(1)
        {
            events.post_native(
                MessageKind::TimedText as i32,
                SUBTITLE_TEXT,
                0,
                NativePayload::TimedText {
                    bytes: script.subtitles[subtitle].as_bytes().to_vec(),
                    encoding: Some(TextEncoding::Utf8.label().to_string()),
                },
            );
            subtitle += 1;
        }
        if script.buffering_stall && !stalled && position >= script.duration_ms / 2 {
            stalled = true;
            stall_ticks = Some(3);
            events.post(EngineEvent::Info {
                code: MEDIA_INFO_BUFFERING_START,
                extra: 0,
            });
        }
        if position >= script.duration_ms {
            shared.position_ms.store(script.duration_ms, Ordering::Relaxed);
            shared.playing.store(false, Ordering::Relaxed);
            events.post(EngineEvent::PlaybackComplete);
        }
    }
    tracing::debug!(session = events.session_id(), "scripted engine thread exiting");
}

fn post_caching(events: &EventPoster, segments: &[i64]) {
    if segments.is_empty() {
        events.post_native(
            MessageKind::CachingUpdate as i32,
            CACHE_TYPE_NOT_AVAILABLE,
            CACHE_INFO_STREAM_NOT_SUPPORT,
            NativePayload::None,
        );
    } else {
        events.post_native(
            MessageKind::CachingUpdate as i32,
            CACHE_TYPE_UPDATE,
            0,
            NativePayload::Caching {
                segments: segments.to_vec(),
            },
        );
    }
}

fn subtitle_slot(position_ms: i64, interval_ms: i64) -> usize {
    (position_ms / interval_ms.max(1)).max(0) as usize
}

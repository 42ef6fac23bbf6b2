//! Host runtime: the control loop and the CLI entry points.
//!
//! The control thread owns the [`PlaybackSession`] and multiplexes host commands (API
//! calls and render target lifecycle) with engine events from the bridge.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use crossbeam_channel::{Receiver, Sender};
use playback_proto::TextEncoding;
use playback_types::{CachingTelemetry, PlayerState};
use session_player::{
    AudioSink, CpalBackend, DataSource, EngineFactory, PlaybackSession, SessionError,
    SurfaceHandle, TimedText,
};

use crate::config::PlayConfig;
use crate::sim_engine::ScriptedFactory;

/// Raw handle of the host's single virtual render target.
const VIRTUAL_SURFACE: u64 = 1;

/// Requests handled on the control thread, in arrival order.
#[derive(Debug)]
pub enum HostCommand {
    Open(DataSource),
    Start,
    Pause,
    Stop,
    Seek(i64),
    SelectTrack(i32),
    DeselectTrack(i32),
    SetVolume(f32, f32),
    Suspend,
    Resume,
    Reset,
    SurfaceCreated(SurfaceHandle),
    SurfaceChanged(u32, u32),
    SurfaceDestroyed,
    Shutdown,
}

/// Why [`ControlLoop::run`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    Completed,
    Failed,
    Shutdown,
}

pub struct ControlLoop<F: EngineFactory> {
    session: PlaybackSession<F>,
    commands: Receiver<HostCommand>,
}

impl<F: EngineFactory> ControlLoop<F> {
    pub fn new(session: PlaybackSession<F>, commands: Receiver<HostCommand>) -> Self {
        Self { session, commands }
    }

    pub fn session(&self) -> &PlaybackSession<F> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut PlaybackSession<F> {
        &mut self.session
    }

    /// Run until playback completes, fails, or a `Shutdown` command arrives.
    ///
    /// Dropping every command sender stops command intake but keeps events flowing.
    pub fn run(&mut self) -> StopReason {
        let events = self.session.events().clone();
        let mut commands = self.commands.clone();
        loop {
            let mut intake_closed = false;
            crossbeam_channel::select! {
                recv(commands) -> cmd => match cmd {
                    Ok(HostCommand::Shutdown) => return StopReason::Shutdown,
                    Ok(cmd) => {
                        if let Err(e) = self.apply(cmd) {
                            tracing::warn!("host command rejected: {e}");
                        }
                    }
                    Err(_) => intake_closed = true,
                },
                recv(events) -> envelope => match envelope {
                    Ok(envelope) => {
                        self.session.deliver(envelope);
                    }
                    Err(_) => return StopReason::Shutdown,
                },
            }
            if intake_closed {
                commands = crossbeam_channel::never();
            }
            match self.session.current_state() {
                PlayerState::PlaybackCompleted => return StopReason::Completed,
                PlayerState::Error => return StopReason::Failed,
                _ => {}
            }
        }
    }

    fn apply(&mut self, cmd: HostCommand) -> Result<(), SessionError> {
        tracing::debug!(cmd = ?cmd, "host command");
        let session = &mut self.session;
        match cmd {
            HostCommand::Open(source) => session.open(source)?,
            HostCommand::Start => session.start(),
            HostCommand::Pause => session.pause(),
            HostCommand::Stop => session.stop(),
            HostCommand::Seek(ms) => session.seek_to(ms)?,
            HostCommand::SelectTrack(index) => session.select_track(index)?,
            HostCommand::DeselectTrack(index) => session.deselect_track(index)?,
            HostCommand::SetVolume(left, right) => session.set_volume(left, right)?,
            HostCommand::Suspend => session.suspend(),
            HostCommand::Resume => session.resume(),
            HostCommand::Reset => session.reset(),
            HostCommand::SurfaceCreated(handle) => session.on_surface_created(handle),
            HostCommand::SurfaceChanged(width, height) => session.on_surface_changed(width, height),
            HostCommand::SurfaceDestroyed => session.on_surface_destroyed(),
            HostCommand::Shutdown => {}
        }
        Ok(())
    }
}

/// Log every listener callback except `on_info`; registering that one would turn off the
/// built-in buffering pause/resume.
pub fn install_logging_listeners<F: EngineFactory>(session: &mut PlaybackSession<F>) {
    session.set_on_prepared(|| tracing::info!("prepared"));
    session.set_on_completion(|| tracing::info!("playback completed"));
    session.set_on_buffering_update(|percent| tracing::debug!(percent, "buffering"));
    session.set_on_caching_update(|telemetry| match telemetry {
        CachingTelemetry::NotAvailable { reason } => {
            tracing::info!(reason, "caching not available")
        }
        CachingTelemetry::SegmentUpdate { segments } => {
            tracing::info!(segments = segments.len(), "cached segments")
        }
        CachingTelemetry::SpeedUpdate { kbps } => tracing::debug!(kbps, "download speed"),
    });
    session.set_on_seek_complete(|| tracing::info!("seek complete"));
    session.set_on_video_size_changed(|width, height| {
        tracing::info!(width, height, "video size")
    });
    session.set_on_error(|code, extra| {
        tracing::error!(code, extra, "engine error");
        false
    });
    session.set_on_timed_text(|text| match text {
        TimedText::Text(line) => tracing::info!(text = %line, "subtitle"),
        TimedText::Bitmap { width, height, .. } => {
            tracing::info!(width, height, "bitmap subtitle")
        }
    });
    session.set_on_hardware_render_failed(|| tracing::warn!("hardware rendering failed"));
}

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    session_player::device::list_devices(&host)
}

/// Route Ctrl-C to `commands` as [`HostCommand::Shutdown`]. Returns `false`, with a
/// warning, when the process handler cannot be installed.
fn install_shutdown_handler(commands: Sender<HostCommand>) -> bool {
    let installed = ctrlc::set_handler(move || {
        let _ = commands.send(HostCommand::Shutdown);
    });
    match installed {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("ctrl-c handler not installed: {e}");
            false
        }
    }
}

/// Play one source through the scripted engine on a virtual render target.
pub fn run_play(config: PlayConfig, install_ctrlc: bool) -> Result<()> {
    let audio = if config.no_audio {
        AudioSink::disabled()
    } else {
        let backend = CpalBackend {
            device_name: normalize_device_name(config.device.clone()),
            buffer_seconds: config.session.audio_buffer_seconds,
            refill_max_frames: config.refill_max_frames,
        };
        AudioSink::new(Box::new(backend), config.session.max_write_chunk_bytes)
    };
    let surface = SurfaceHandle::new(VIRTUAL_SURFACE).context("virtual surface handle")?;
    let surface_size = match (config.engine.video_width, config.engine.video_height) {
        (0, _) | (_, 0) => (1, 1),
        size => size,
    };

    let mut session = PlaybackSession::new(
        ScriptedFactory::new(config.engine.clone()),
        audio,
        config.session.clone(),
    );
    install_logging_listeners(&mut session);

    let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
    if install_ctrlc {
        install_shutdown_handler(cmd_tx.clone());
    }
    let mut startup = vec![
        HostCommand::SurfaceCreated(surface),
        HostCommand::SurfaceChanged(surface_size.0, surface_size.1),
        HostCommand::Open(DataSource::uri(config.source.clone())),
    ];
    if let Some(volume) = config.volume {
        startup.push(HostCommand::SetVolume(volume, volume));
    }
    if let Some(ms) = config.seek_ms {
        startup.push(HostCommand::Seek(ms));
    }
    startup.push(HostCommand::Start);
    for cmd in startup {
        cmd_tx.send(cmd).context("queue startup command")?;
    }

    let mut control = ControlLoop::new(session, cmd_rx);
    let reason = control.run();
    let status = control.session().status();
    tracing::info!(
        reason = ?reason,
        state = ?status.current_state,
        duration_ms = ?status.duration_ms,
        cached_segments = status.cached_segments.len(),
        "session finished"
    );
    control.session_mut().release();

    if reason == StopReason::Failed {
        bail!("playback of {} failed", config.source);
    }
    Ok(())
}

/// Decode a raw track descriptor blob file into its index -> label table.
pub fn probe_tracks(path: &Path, encoding: TextEncoding) -> Result<BTreeMap<i32, String>> {
    let blob = std::fs::read(path).with_context(|| format!("read track blob {:?}", path))?;
    Ok(playback_proto::decode_track_blob(&blob, encoding))
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use anyhow::Result;
    use session_player::{AudioBackend, AudioDevice, SessionConfig};

    use super::*;
    use crate::sim_engine::EngineScript;

    struct CountingDevice {
        bytes: Arc<AtomicUsize>,
    }

    impl AudioDevice for CountingDevice {
        fn min_buffer_size(&self) -> usize {
            1024
        }
        fn write(&self, bytes: &[u8]) -> Result<()> {
            self.bytes.fetch_add(bytes.len(), Ordering::SeqCst);
            Ok(())
        }
        fn play(&self) -> Result<()> {
            Ok(())
        }
        fn pause(&self) -> Result<()> {
            Ok(())
        }
        fn stop(&self) -> Result<()> {
            Ok(())
        }
        fn is_playing(&self) -> bool {
            true
        }
        fn set_volume(&self, _left: f32, _right: f32) {}
        fn close(&self) {}
    }

    struct CountingBackend {
        bytes: Arc<AtomicUsize>,
    }

    impl AudioBackend for CountingBackend {
        fn open(&self, _sample_rate: u32, _channels: u16) -> Result<Box<dyn AudioDevice>> {
            Ok(Box::new(CountingDevice {
                bytes: self.bytes.clone(),
            }))
        }
    }

    fn short_script() -> EngineScript {
        EngineScript {
            duration_ms: 200,
            prepare_delay_ms: 5,
            tick_ms: 10,
            subtitles: vec!["first".to_string(), "second".to_string()],
            subtitle_interval_ms: 50,
            cache_segments: vec![100, 200, 500, 700],
            ..EngineScript::default()
        }
    }

    fn startup(tx: &crossbeam_channel::Sender<HostCommand>, script: &EngineScript) {
        let surface = SurfaceHandle::new(VIRTUAL_SURFACE).unwrap();
        for cmd in [
            HostCommand::SurfaceCreated(surface),
            HostCommand::SurfaceChanged(script.video_width, script.video_height),
            HostCommand::Open(DataSource::uri("scripted://movie")),
            HostCommand::Start,
        ] {
            tx.send(cmd).unwrap();
        }
    }

    #[test]
    fn scripted_session_plays_to_completion() {
        let script = short_script();
        let bytes = Arc::new(AtomicUsize::new(0));
        let audio = AudioSink::new(
            Box::new(CountingBackend {
                bytes: bytes.clone(),
            }),
            4096,
        );
        let mut session =
            PlaybackSession::new(ScriptedFactory::new(script.clone()), audio, SessionConfig::default());
        let subtitles = Arc::new(Mutex::new(Vec::new()));
        let seen = subtitles.clone();
        session.set_on_timed_text(move |text| {
            if let TimedText::Text(line) = text {
                seen.lock().unwrap().push(line.clone());
            }
        });
        let prepared = Arc::new(AtomicUsize::new(0));
        let count = prepared.clone();
        session.set_on_prepared(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });

        let (tx, rx) = crossbeam_channel::unbounded();
        startup(&tx, &script);
        drop(tx);
        let mut control = ControlLoop::new(session, rx);

        assert_eq!(control.run(), StopReason::Completed);
        let status = control.session().status();
        assert_eq!(status.current_state, PlayerState::PlaybackCompleted);
        assert_eq!(status.video_width, 640);
        assert_eq!(status.cached_segments.len(), 2);
        assert_eq!(status.cached_segments[1].start, 500);
        assert_eq!(prepared.load(Ordering::SeqCst), 1);
        assert_eq!(
            *subtitles.lock().unwrap(),
            vec!["first".to_string(), "second".to_string()]
        );
        assert!(bytes.load(Ordering::SeqCst) > 0);
        assert_eq!(
            control.session().audio_track_map(None).unwrap(),
            BTreeMap::from([(1, "1.English".to_string()), (2, "2.French".to_string())])
        );

        control.session_mut().release();
        assert_eq!(control.session().current_state(), PlayerState::Idle);
    }

    #[test]
    fn failed_prepare_stops_the_loop_with_an_error() {
        let script = EngineScript {
            fail_prepare: true,
            ..short_script()
        };
        let mut session = PlaybackSession::new(
            ScriptedFactory::new(script.clone()),
            AudioSink::disabled(),
            SessionConfig::default(),
        );
        let errors = Arc::new(AtomicUsize::new(0));
        let count = errors.clone();
        session.set_on_error(move |_, _| {
            count.fetch_add(1, Ordering::SeqCst);
            true
        });
        let (tx, rx) = crossbeam_channel::unbounded();
        startup(&tx, &script);
        let mut control = ControlLoop::new(session, rx);

        assert_eq!(control.run(), StopReason::Failed);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(control.session().target_state(), PlayerState::Error);
    }

    #[test]
    fn shutdown_command_ends_the_loop() {
        let session = PlaybackSession::new(
            ScriptedFactory::default(),
            AudioSink::disabled(),
            SessionConfig::default(),
        );
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(HostCommand::Pause).unwrap();
        tx.send(HostCommand::Shutdown).unwrap();
        let mut control = ControlLoop::new(session, rx);
        assert_eq!(control.run(), StopReason::Shutdown);
        assert_eq!(control.session().current_state(), PlayerState::Idle);
    }

    #[test]
    fn probe_tracks_decodes_blob_files() {
        let path = std::env::temp_dir().join(format!("session-host-tracks-{}.bin", std::process::id()));
        std::fs::write(&path, "0.English!#!1.French!#!garbage!#!2").unwrap();
        let tracks = probe_tracks(&path, TextEncoding::Utf8).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(
            tracks,
            BTreeMap::from([
                (0, "0.English".to_string()),
                (1, "1.French".to_string()),
                (2, "2".to_string()),
            ])
        );
    }

    #[test]
    fn probe_tracks_reports_missing_files() {
        let err = probe_tracks(Path::new("/nonexistent/tracks.bin"), TextEncoding::Utf8).unwrap_err();
        assert!(format!("{err:#}").contains("read track blob"));
    }

    #[test]
    fn second_shutdown_handler_is_refused_without_panicking() {
        let (tx, rx) = crossbeam_channel::unbounded();
        install_shutdown_handler(tx.clone());
        assert!(!install_shutdown_handler(tx));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn normalize_device_name_trims_and_drops_empty() {
        assert_eq!(normalize_device_name(None), None);
        assert_eq!(normalize_device_name(Some("  ".to_string())), None);
        assert_eq!(
            normalize_device_name(Some("  USB DAC ".to_string())),
            Some("USB DAC".to_string())
        );
    }
}

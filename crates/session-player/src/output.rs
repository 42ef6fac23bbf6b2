//! cpal-backed [`AudioBackend`].
//!
//! Each opened device runs its cpal stream on a dedicated thread (streams are not `Send`
//! on every platform). PCM written by the sink is converted to `f32` and pushed into a
//! bounded [`SharedAudio`] queue that the stream callback drains.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use anyhow::{Context, Result, anyhow, bail};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::Sender;

use crate::device;
use crate::playback::{self, OutputOptions, StereoGain};
use crate::queue::{SharedAudio, calc_max_buffered_samples};
use crate::sink::{AudioBackend, AudioDevice};

/// Opens cpal output devices at the engine's exact sample rate.
#[derive(Clone, Debug)]
pub struct CpalBackend {
    /// Substring of the output device name; `None` selects the default device.
    pub device_name: Option<String>,
    pub buffer_seconds: f32,
    pub refill_max_frames: usize,
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self {
            device_name: None,
            buffer_seconds: 0.5,
            refill_max_frames: 4096,
        }
    }
}

impl AudioBackend for CpalBackend {
    fn open(&self, sample_rate: u32, channels: u16) -> Result<Box<dyn AudioDevice>> {
        Ok(Box::new(CpalAudioDevice::open(self, sample_rate, channels)?))
    }
}

pub struct CpalAudioDevice {
    queue: Arc<SharedAudio>,
    paused: Arc<AtomicBool>,
    gain: Arc<StereoGain>,
    underrun_frames: Arc<AtomicU64>,
    min_buffer_bytes: usize,
    carry: Mutex<Option<u8>>,
    shutdown: Mutex<Option<Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CpalAudioDevice {
    pub fn open(backend: &CpalBackend, sample_rate: u32, channels: u16) -> Result<Self> {
        let max_samples =
            calc_max_buffered_samples(sample_rate, usize::from(channels), backend.buffer_seconds);
        let queue = Arc::new(SharedAudio::new(usize::from(channels), max_samples));
        let paused = Arc::new(AtomicBool::new(true));
        let gain = Arc::new(StereoGain::default());
        let underrun_frames = Arc::new(AtomicU64::new(0));
        let opts = OutputOptions {
            refill_max_frames: backend.refill_max_frames,
            paused: paused.clone(),
            gain: gain.clone(),
            underrun_frames: underrun_frames.clone(),
        };

        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<String>>(1);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let device_name = backend.device_name.clone();
        let stream_queue = queue.clone();
        let worker = std::thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let stream = match open_stream(
                    device_name.as_deref(),
                    sample_rate,
                    channels,
                    &stream_queue,
                    opts,
                ) {
                    Ok((stream, name)) => {
                        let _ = ready_tx.send(Ok(name));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Returns once the device is closed (sender dropped).
                let _ = shutdown_rx.recv();
                drop(stream);
            })
            .context("spawn audio output thread")?;

        let name = match ready_rx.recv() {
            Ok(Ok(name)) => name,
            Ok(Err(e)) => {
                let _ = worker.join();
                return Err(e);
            }
            Err(_) => {
                let _ = worker.join();
                bail!("audio output thread exited during setup");
            }
        };
        tracing::info!(
            device = %name,
            sample_rate,
            channels,
            queue_samples = max_samples,
            "audio output opened"
        );

        let min_buffer_bytes = (max_samples / 4).max(usize::from(channels)) * 2;
        Ok(Self {
            queue,
            paused,
            gain,
            underrun_frames,
            min_buffer_bytes,
            carry: Mutex::new(None),
            shutdown: Mutex::new(Some(shutdown_tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn underrun_frames(&self) -> u64 {
        self.underrun_frames.load(Ordering::Relaxed)
    }
}

fn open_stream(
    device_name: Option<&str>,
    sample_rate: u32,
    channels: u16,
    queue: &Arc<SharedAudio>,
    opts: OutputOptions,
) -> Result<(cpal::Stream, String)> {
    let host = cpal::default_host();
    let device = device::pick_device(&host, device_name)?;
    let name = device
        .description()
        .map(|d| d.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let config = device::pick_config_at_rate(&device, sample_rate, channels)
        .with_context(|| format!("configure {name}"))?;
    let mut stream_config: cpal::StreamConfig = config.clone().into();
    if let Some(buf) = device::pick_buffer_size(&config) {
        stream_config.buffer_size = buf;
    }
    tracing::debug!(
        device = %name,
        device_channels = stream_config.channels,
        buffer_size = ?stream_config.buffer_size,
        sample_format = ?config.sample_format(),
        "device output config"
    );
    let stream =
        playback::build_output_stream(&device, &stream_config, config.sample_format(), queue, opts)?;
    stream.play()?;
    Ok((stream, name))
}

impl AudioDevice for CpalAudioDevice {
    fn min_buffer_size(&self) -> usize {
        self.min_buffer_bytes
    }

    fn write(&self, bytes: &[u8]) -> Result<()> {
        if self.queue.is_closed() {
            bail!("audio device closed");
        }
        let samples = {
            let mut carry = self.carry.lock().map_err(|_| anyhow!("audio device poisoned"))?;
            playback::pcm16_to_f32(&mut carry, bytes)
        };
        let pushed = self.queue.push_blocking(&samples);
        if pushed < samples.len() {
            bail!("audio device closed during write");
        }
        Ok(())
    }

    fn play(&self) -> Result<()> {
        self.paused.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        self.paused.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.paused.store(true, Ordering::Relaxed);
        self.queue.clear();
        if let Ok(mut carry) = self.carry.lock() {
            *carry = None;
        }
        Ok(())
    }

    fn is_playing(&self) -> bool {
        !self.paused.load(Ordering::Relaxed)
    }

    fn set_volume(&self, left: f32, right: f32) {
        self.gain.set(left, right);
    }

    fn close(&self) {
        self.paused.store(true, Ordering::Relaxed);
        self.queue.close();
        if let Ok(mut shutdown) = self.shutdown.lock() {
            shutdown.take();
        }
        let worker = self.worker.lock().ok().and_then(|mut w| w.take());
        if let Some(worker) = worker {
            if worker.join().is_err() {
                tracing::warn!("audio output thread panicked");
            }
        }
    }
}

impl Drop for CpalAudioDevice {
    fn drop(&mut self) {
        self.close();
    }
}

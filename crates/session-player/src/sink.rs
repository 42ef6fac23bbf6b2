//! Audio output sink: the PCM path from engine decode threads to an output device.
//!
//! The sink owns at most one [`AudioDevice`] at a time. `init` always tears down the
//! previous device first. Writes are blocking and split into device-sized chunks; the
//! device lock is never held across a device call, so `release` can run while a writer
//! is blocked and unblocks it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::error::SessionError;

/// A PCM output device accepting interleaved 16-bit little-endian samples.
pub trait AudioDevice: Send + Sync {
    /// Largest write the device takes in one call, in bytes.
    fn min_buffer_size(&self) -> usize;
    /// Blocks until `bytes` is queued or the device is closed.
    fn write(&self, bytes: &[u8]) -> Result<()>;
    fn play(&self) -> Result<()>;
    fn pause(&self) -> Result<()>;
    fn stop(&self) -> Result<()>;
    fn is_playing(&self) -> bool;
    fn set_volume(&self, left: f32, right: f32);
    /// Free the device and wake any blocked writer. Idempotent.
    fn close(&self);
}

/// Opens output devices for a sample format.
pub trait AudioBackend: Send + Sync {
    fn open(&self, sample_rate: u32, channels: u16) -> Result<Box<dyn AudioDevice>>;
}

pub struct AudioSink {
    backend: Option<Box<dyn AudioBackend>>,
    max_chunk_bytes: usize,
    device: Mutex<Option<Arc<dyn AudioDevice>>>,
    buffer_size: AtomicUsize,
}

impl AudioSink {
    pub fn new(backend: Box<dyn AudioBackend>, max_chunk_bytes: usize) -> Self {
        Self {
            backend: Some(backend),
            max_chunk_bytes: max_chunk_bytes.max(2),
            device: Mutex::new(None),
            buffer_size: AtomicUsize::new(0),
        }
    }

    /// A sink that never opens a device; every `init` reports 0 (video-only playback).
    pub fn disabled() -> Self {
        Self {
            backend: None,
            max_chunk_bytes: 2,
            device: Mutex::new(None),
            buffer_size: AtomicUsize::new(0),
        }
    }

    /// Open a device for `sample_rate`/`channels` and return the write chunk size in bytes.
    ///
    /// Returns 0 and leaves the sink unusable when no device can be opened.
    pub fn init(&self, sample_rate: u32, channels: u16) -> usize {
        self.release();
        let Some(backend) = &self.backend else {
            tracing::info!("audio output disabled");
            return 0;
        };
        if sample_rate == 0 || channels == 0 {
            tracing::warn!(sample_rate, channels, "invalid audio format; audio disabled");
            return 0;
        }
        let device: Arc<dyn AudioDevice> = match backend.open(sample_rate, channels) {
            Ok(device) => Arc::from(device),
            Err(e) => {
                tracing::warn!(sample_rate, channels, "audio device open failed: {e:#}");
                return 0;
            }
        };

        let frame_bytes = usize::from(channels) * 2;
        let chunk = device.min_buffer_size().min(self.max_chunk_bytes);
        let chunk = (chunk - chunk % frame_bytes).max(frame_bytes);

        if let Ok(mut slot) = self.device.lock() {
            *slot = Some(device);
        }
        self.buffer_size.store(chunk, Ordering::Release);
        tracing::info!(sample_rate, channels, buffer_bytes = chunk, "audio sink ready");
        chunk
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size.load(Ordering::Acquire)
    }

    pub fn is_initialized(&self) -> bool {
        self.current().is_some()
    }

    /// Write `bytes[offset..offset + length]`, blocking until every byte is queued.
    ///
    /// Returns the number of bytes handed to the device. Writes to an uninitialized sink are
    /// dropped and report 0.
    pub fn write(&self, bytes: &[u8], offset: usize, length: usize) -> Result<usize, SessionError> {
        let end = offset
            .checked_add(length)
            .filter(|end| *end <= bytes.len())
            .ok_or(SessionError::WriteOutOfBounds {
                offset,
                length,
                len: bytes.len(),
            })?;
        let Some(device) = self.current() else {
            tracing::debug!(length, "audio sink not initialized; write dropped");
            return Ok(0);
        };
        let chunk = self.buffer_size().max(1);

        self.start();
        let mut written = 0;
        for piece in bytes[offset..end].chunks(chunk) {
            if let Err(e) = device.write(piece) {
                tracing::warn!(written, "audio write failed: {e:#}");
                break;
            }
            written += piece.len();
        }
        Ok(written)
    }

    pub fn start(&self) {
        if let Some(device) = self.current() {
            if !device.is_playing() {
                if let Err(e) = device.play() {
                    tracing::warn!("audio start failed: {e:#}");
                }
            }
        }
    }

    pub fn pause(&self) {
        if let Some(device) = self.current() {
            if device.is_playing() {
                if let Err(e) = device.pause() {
                    tracing::warn!("audio pause failed: {e:#}");
                }
            }
        }
    }

    /// Halt output but keep the device open.
    pub fn stop(&self) {
        if let Some(device) = self.current() {
            if device.is_playing() {
                if let Err(e) = device.stop() {
                    tracing::warn!("audio stop failed: {e:#}");
                }
            }
        }
    }

    pub fn set_volume(&self, left: f32, right: f32) {
        if let Some(device) = self.current() {
            device.set_volume(left, right);
        }
    }

    /// Stop and free the device. Safe when `init` never succeeded.
    pub fn release(&self) {
        let device = self.device.lock().ok().and_then(|mut slot| slot.take());
        self.buffer_size.store(0, Ordering::Release);
        if let Some(device) = device {
            if device.is_playing() {
                let _ = device.stop();
            }
            device.close();
            tracing::debug!("audio sink released");
        }
    }

    fn current(&self) -> Option<Arc<dyn AudioDevice>> {
        self.device.lock().ok().and_then(|slot| slot.clone())
    }
}

impl Drop for AudioSink {
    fn drop(&mut self) {
        self.release();
    }
}

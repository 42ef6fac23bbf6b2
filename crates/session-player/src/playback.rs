//! cpal output stream for the audio sink.
//!
//! The callback refills a small local buffer from the [`SharedAudio`] queue without
//! blocking, maps source channels onto device channels, applies the per-side gain and
//! converts to the device sample format. Underruns and pauses produce silence.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use cpal::traits::DeviceTrait;

use crate::queue::SharedAudio;

/// Linear left/right gain shared with the output callback.
#[derive(Debug)]
pub struct StereoGain {
    left: AtomicU32,
    right: AtomicU32,
}

impl Default for StereoGain {
    fn default() -> Self {
        Self {
            left: AtomicU32::new(1.0f32.to_bits()),
            right: AtomicU32::new(1.0f32.to_bits()),
        }
    }
}

impl StereoGain {
    pub fn set(&self, left: f32, right: f32) {
        self.left.store(left.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
        self.right.store(right.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> (f32, f32) {
        (
            f32::from_bits(self.left.load(Ordering::Relaxed)),
            f32::from_bits(self.right.load(Ordering::Relaxed)),
        )
    }
}

/// Gain for device channel `ch`: even channels follow left, odd ones right.
fn side_gain(ch: usize, (left, right): (f32, f32)) -> f32 {
    if ch % 2 == 0 { left } else { right }
}

/// Shared handles the output callback reads and updates.
#[derive(Clone, Debug)]
pub struct OutputOptions {
    /// Frames pulled from the queue per refill.
    pub refill_max_frames: usize,
    /// While `true` the callback outputs silence and leaves the queue alone.
    pub paused: Arc<AtomicBool>,
    pub gain: Arc<StereoGain>,
    /// Incremented by the number of silent frames emitted on underrun.
    pub underrun_frames: Arc<AtomicU64>,
}

/// Build a cpal output stream fed from `queue`.
pub fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    queue: &Arc<SharedAudio>,
    opts: OutputOptions,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, queue, opts),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, queue, opts),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, queue, opts),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, queue, opts),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: &Arc<SharedAudio>,
    opts: OutputOptions,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
{
    let channels_out = (config.channels as usize).max(1);
    let state = Mutex::new(MixState {
        pos: 0,
        src_channels: queue.channels(),
        src: Vec::new(),
    });
    let queue = queue.clone();
    let refill_max_frames = opts.refill_max_frames.max(1);
    let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);

    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            if opts.paused.load(Ordering::Relaxed) {
                data.fill(silence);
                return;
            }
            let Ok(mut st) = state.lock() else {
                data.fill(silence);
                return;
            };
            let gain = opts.gain.get();
            let frames = data.len() / channels_out;

            for frame in 0..frames {
                if st.pos >= st.src.len() {
                    st.pos = 0;
                    st.src.clear();
                    match queue.pop_frames(refill_max_frames) {
                        Some(v) => st.src = v,
                        None => {
                            let remaining = frames - frame;
                            opts.underrun_frames
                                .fetch_add(remaining as u64, Ordering::Relaxed);
                            data[frame * channels_out..].fill(silence);
                            break;
                        }
                    }
                }
                for ch in 0..channels_out {
                    let sample = st.next_sample(channels_out, ch) * side_gain(ch, gain);
                    data[frame * channels_out + ch] = <T as cpal::Sample>::from_sample::<f32>(sample);
                }
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

/// Local buffer of interleaved samples taken from the queue.
struct MixState {
    pos: usize,
    src_channels: usize,
    src: Vec<f32>,
}

impl MixState {
    /// Next sample for device channel `dst_ch`.
    ///
    /// Mono is duplicated to every channel, stereo folds to mono by averaging, and other
    /// layouts clamp to the last available source channel. `pos` advances after the last
    /// device channel of a frame.
    fn next_sample(&mut self, dst_channels: usize, dst_ch: usize) -> f32 {
        if self.pos >= self.src.len() {
            return 0.0;
        }
        let frame = &self.src[self.pos..];
        let get = |ch: usize| frame.get(ch).copied().filter(|_| ch < self.src_channels).unwrap_or(0.0);

        let out = match (self.src_channels, dst_channels) {
            (2, 1) => 0.5 * (get(0) + get(1)),
            (1, _) => get(0),
            (src, _) => get(dst_ch.min(src.saturating_sub(1))),
        };

        if dst_ch + 1 == dst_channels {
            self.pos += self.src_channels;
        }
        out
    }
}

/// Convert 16-bit little-endian PCM to `f32`, carrying an odd trailing byte over to the
/// next call.
pub fn pcm16_to_f32(carry: &mut Option<u8>, bytes: &[u8]) -> Vec<f32> {
    let mut out = Vec::with_capacity(bytes.len() / 2 + 1);
    let mut rest = bytes;
    if let Some(lo) = carry.take() {
        match rest.split_first() {
            Some((&hi, tail)) => {
                out.push(pcm16_sample([lo, hi]));
                rest = tail;
            }
            None => *carry = Some(lo),
        }
    }
    let mut pairs = rest.chunks_exact(2);
    out.extend(pairs.by_ref().map(|p| pcm16_sample([p[0], p[1]])));
    if let [last] = pairs.remainder() {
        *carry = Some(*last);
    }
    out
}

fn pcm16_sample(bytes: [u8; 2]) -> f32 {
    f32::from(i16::from_le_bytes(bytes)) / 32768.0
}

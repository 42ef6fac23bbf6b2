//! Engine notifications as delivered to the control thread.

use std::io;

use playback_proto::{MessageKind, SUBTITLE_BITMAP, SUBTITLE_TEXT, TextEncoding};
use playback_types::CachingTelemetry;

/// A subtitle cue produced by the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimedText {
    Text(String),
    /// ARGB8888 pixels, row-major.
    Bitmap {
        pixels: Vec<u8>,
        width: u32,
        height: u32,
    },
}

/// A decoded engine notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    Prepared,
    PlaybackComplete,
    BufferingUpdate(i32),
    SeekComplete,
    VideoSizeChanged { width: u32, height: u32 },
    Error { code: i32, extra: i32 },
    Info { code: i32, extra: i32 },
    HardwareRenderFailed,
    TimedText(TimedText),
    CachingUpdate(CachingTelemetry),
}

/// Out-of-band data attached to a raw engine message.
#[derive(Clone, Debug, Default)]
pub enum NativePayload {
    #[default]
    None,
    /// Subtitle bytes; `arg1` carries `SUBTITLE_TEXT` or `SUBTITLE_BITMAP`.
    TimedText {
        bytes: Vec<u8>,
        encoding: Option<String>,
    },
    /// Caching telemetry; `arg1` carries the `CACHE_TYPE_*` discriminant.
    Caching { segments: Vec<i64> },
}

impl EngineEvent {
    /// Decode a raw `(what, arg1, arg2, payload)` message.
    ///
    /// Returns `Ok(None)` for messages the controller ignores (`NOP`, legacy `CACHE`).
    pub fn from_native(
        what: i32,
        arg1: i32,
        arg2: i32,
        payload: NativePayload,
        default_encoding: TextEncoding,
    ) -> io::Result<Option<Self>> {
        let event = match MessageKind::from_code(what)? {
            MessageKind::Nop | MessageKind::Cache => return Ok(None),
            MessageKind::Prepared => EngineEvent::Prepared,
            MessageKind::PlaybackComplete => EngineEvent::PlaybackComplete,
            MessageKind::BufferingUpdate => EngineEvent::BufferingUpdate(arg1),
            MessageKind::SeekComplete => EngineEvent::SeekComplete,
            MessageKind::SetVideoSize => EngineEvent::VideoSizeChanged {
                width: arg1.max(0) as u32,
                height: arg2.max(0) as u32,
            },
            MessageKind::Error => EngineEvent::Error {
                code: arg1,
                extra: arg2,
            },
            MessageKind::Info => EngineEvent::Info {
                code: arg1,
                extra: arg2,
            },
            MessageKind::HardwareError => EngineEvent::HardwareRenderFailed,
            MessageKind::TimedText => {
                let NativePayload::TimedText { bytes, encoding } = payload else {
                    return Err(invalid("timed text message without payload"));
                };
                EngineEvent::TimedText(decode_timed_text(
                    arg1,
                    arg2,
                    bytes,
                    encoding.as_deref(),
                    default_encoding,
                )?)
            }
            MessageKind::CachingUpdate => {
                let segments = match payload {
                    NativePayload::Caching { segments } => segments,
                    _ => Vec::new(),
                };
                EngineEvent::CachingUpdate(playback_proto::caching_from_parts(
                    arg1, arg2, &segments,
                )?)
            }
        };
        Ok(Some(event))
    }
}

fn decode_timed_text(
    kind: i32,
    width: i32,
    bytes: Vec<u8>,
    encoding: Option<&str>,
    default_encoding: TextEncoding,
) -> io::Result<TimedText> {
    match kind {
        SUBTITLE_TEXT => {
            let encoding = encoding
                .and_then(TextEncoding::from_label)
                .unwrap_or(default_encoding);
            Ok(TimedText::Text(encoding.decode(&bytes)))
        }
        SUBTITLE_BITMAP => {
            let width = u32::try_from(width)
                .ok()
                .filter(|w| *w > 0)
                .ok_or_else(|| invalid("bitmap subtitle without width"))?;
            let row = width as usize * 4;
            if bytes.len() % row != 0 {
                return Err(invalid("bitmap subtitle size is not a whole number of rows"));
            }
            let height = (bytes.len() / row) as u32;
            Ok(TimedText::Bitmap {
                pixels: bytes,
                width,
                height,
            })
        }
        other => Err(invalid(&format!("unknown subtitle type {other}"))),
    }
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

//! Wire formats spoken by the media engine.
//!
//! Three small protocols live here:
//! - engine message codes posted through the event bridge
//! - track descriptor blobs: text records joined by `"!#!"`, one blob per track type
//! - caching telemetry: a kind discriminant followed by a reason, a speed, or a flat
//!   array of alternating start/end offsets
//!
//! Caching frame format (engine byte channel):
//! - kind: u8 (1 = not available, 2 = segment update, 3 = speed update)
//! - kind 1 / 3: i32 LE (reason code / kbps)
//! - kind 2: u32 LE count, then `count` i64 LE offsets

use std::collections::BTreeMap;
use std::io;

use playback_types::{CachedSegment, CachingTelemetry};

/// Separator between records inside a track descriptor blob.
pub const TRACK_DELIMITER: &str = "!#!";

pub const CACHE_TYPE_NOT_AVAILABLE: i32 = 1;
pub const CACHE_TYPE_UPDATE: i32 = 2;
pub const CACHE_TYPE_SPEED: i32 = 3;

pub const SUBTITLE_TEXT: i32 = 0;
pub const SUBTITLE_BITMAP: i32 = 1;

/// Message codes the engine posts to the controller.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Nop = 0,
    Prepared = 1,
    PlaybackComplete = 2,
    BufferingUpdate = 3,
    SeekComplete = 4,
    SetVideoSize = 5,
    Error = 100,
    Info = 200,
    /// Legacy cache notification; carries nothing the controller uses.
    Cache = 300,
    HardwareError = 400,
    TimedText = 1000,
    CachingUpdate = 2000,
}

impl MessageKind {
    pub fn from_code(code: i32) -> io::Result<Self> {
        let k = match code {
            0 => MessageKind::Nop,
            1 => MessageKind::Prepared,
            2 => MessageKind::PlaybackComplete,
            3 => MessageKind::BufferingUpdate,
            4 => MessageKind::SeekComplete,
            5 => MessageKind::SetVideoSize,
            100 => MessageKind::Error,
            200 => MessageKind::Info,
            300 => MessageKind::Cache,
            400 => MessageKind::HardwareError,
            1000 => MessageKind::TimedText,
            2000 => MessageKind::CachingUpdate,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown engine message {code}"),
                ));
            }
        };
        Ok(k)
    }
}

/// Character encodings accepted for track labels, metadata and timed text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TextEncoding {
    #[default]
    Utf8,
    Latin1,
    Utf16Le,
    Utf16Be,
}

impl TextEncoding {
    /// Parse an encoding label (case-insensitive, surrounding whitespace ignored).
    pub fn from_label(label: &str) -> Option<Self> {
        let norm = label.trim().to_ascii_lowercase().replace('_', "-");
        match norm.as_str() {
            "utf-8" | "utf8" => Some(TextEncoding::Utf8),
            "iso-8859-1" | "latin1" | "latin-1" | "us-ascii" | "ascii" => {
                Some(TextEncoding::Latin1)
            }
            "utf-16le" | "utf16le" => Some(TextEncoding::Utf16Le),
            "utf-16be" | "utf16be" | "utf-16" => Some(TextEncoding::Utf16Be),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "UTF-8",
            TextEncoding::Latin1 => "ISO-8859-1",
            TextEncoding::Utf16Le => "UTF-16LE",
            TextEncoding::Utf16Be => "UTF-16BE",
        }
    }

    /// Decode `bytes`, replacing invalid sequences with U+FFFD.
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            TextEncoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
            TextEncoding::Utf16Le => decode_utf16(bytes, u16::from_le_bytes),
            TextEncoding::Utf16Be => decode_utf16(bytes, u16::from_be_bytes),
        }
    }

    /// Encode `text`; characters Latin-1 cannot represent become `?`.
    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            TextEncoding::Utf8 => text.as_bytes().to_vec(),
            TextEncoding::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
            TextEncoding::Utf16Le => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
            TextEncoding::Utf16Be => text.encode_utf16().flat_map(u16::to_be_bytes).collect(),
        }
    }
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| unit([pair[0], pair[1]]))
        .collect();
    let mut out = String::from_utf16_lossy(&units);
    if bytes.len() % 2 == 1 {
        out.push(char::REPLACEMENT_CHARACTER);
    }
    out
}

/// Index of one track record: the text before the first `.`, or the whole record.
///
/// Returns `None` when that prefix is not an integer.
pub fn parse_track_index(record: &str) -> Option<i32> {
    let head = match record.split_once('.') {
        Some((head, _)) => head,
        None => record,
    };
    head.parse::<i32>().ok()
}

/// Split decoded track text into `(index, label)` records, in wire order.
///
/// Records whose index does not parse are skipped.
pub fn parse_track_records(text: &str) -> Vec<(i32, String)> {
    text.split(TRACK_DELIMITER)
        .filter_map(|record| parse_track_index(record).map(|idx| (idx, record.to_string())))
        .collect()
}

/// Decode one track blob into an index-keyed table; later duplicates replace earlier ones.
pub fn decode_track_blob(blob: &[u8], encoding: TextEncoding) -> BTreeMap<i32, String> {
    parse_track_records(&encoding.decode(blob))
        .into_iter()
        .collect()
}

/// Join labels into a track blob (engine side of the format).
pub fn encode_track_blob(labels: &[&str], encoding: TextEncoding) -> Vec<u8> {
    encoding.encode(&labels.join(TRACK_DELIMITER))
}

/// Pair a flat `[start0, end0, start1, end1, ..]` array into segments.
///
/// Values are surfaced verbatim; a trailing unpaired offset is ignored.
pub fn segments_from_offsets(offsets: &[i64]) -> Vec<CachedSegment> {
    offsets
        .chunks_exact(2)
        .map(|pair| CachedSegment {
            start: pair[0],
            end: pair[1],
        })
        .collect()
}

/// Build caching telemetry from the engine's `(type, info, segments)` triple.
pub fn caching_from_parts(kind: i32, info: i32, segments: &[i64]) -> io::Result<CachingTelemetry> {
    match kind {
        CACHE_TYPE_NOT_AVAILABLE => Ok(CachingTelemetry::NotAvailable { reason: info }),
        CACHE_TYPE_UPDATE => Ok(CachingTelemetry::SegmentUpdate {
            segments: segments_from_offsets(segments),
        }),
        CACHE_TYPE_SPEED => Ok(CachingTelemetry::SpeedUpdate { kbps: info }),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown caching kind {other}"),
        )),
    }
}

/// Encode caching telemetry as a frame (see module docs).
pub fn encode_caching_frame(telemetry: &CachingTelemetry) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    match telemetry {
        CachingTelemetry::NotAvailable { reason } => {
            out.push(CACHE_TYPE_NOT_AVAILABLE as u8);
            out.extend_from_slice(&reason.to_le_bytes());
        }
        CachingTelemetry::SegmentUpdate { segments } => {
            let count: u32 = segments
                .len()
                .checked_mul(2)
                .and_then(|n| n.try_into().ok())
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "too many segments"))?;
            out.reserve(1 + 4 + count as usize * 8);
            out.push(CACHE_TYPE_UPDATE as u8);
            out.extend_from_slice(&count.to_le_bytes());
            for seg in segments {
                out.extend_from_slice(&seg.start.to_le_bytes());
                out.extend_from_slice(&seg.end.to_le_bytes());
            }
        }
        CachingTelemetry::SpeedUpdate { kbps } => {
            out.push(CACHE_TYPE_SPEED as u8);
            out.extend_from_slice(&kbps.to_le_bytes());
        }
    }
    Ok(out)
}

/// Decode a caching frame.
pub fn decode_caching_frame(frame: &[u8]) -> io::Result<CachingTelemetry> {
    let (&kind, payload) = frame
        .split_first()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "empty caching frame"))?;
    match i32::from(kind) {
        CACHE_TYPE_NOT_AVAILABLE | CACHE_TYPE_SPEED => {
            let value = read_i32(payload)?;
            caching_from_parts(i32::from(kind), value, &[])
        }
        CACHE_TYPE_UPDATE => {
            if payload.len() < 4 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "short caching segment header",
                ));
            }
            let count = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
            let body = &payload[4..];
            if count.checked_mul(8) != Some(body.len()) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "caching segment length mismatch",
                ));
            }
            let offsets: Vec<i64> = body
                .chunks_exact(8)
                .map(|b| i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
                .collect();
            caching_from_parts(CACHE_TYPE_UPDATE, 0, &offsets)
        }
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown caching kind {other}"),
        )),
    }
}

fn read_i32(payload: &[u8]) -> io::Result<i32> {
    if payload.len() != 4 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "bad caching value length"));
    }
    Ok(i32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_blob_skips_garbage_records() {
        let table = decode_track_blob(b"0.English!#!1.French!#!garbage!#!2", TextEncoding::Utf8);
        let keys: Vec<i32> = table.keys().copied().collect();
        assert_eq!(keys, vec![0, 1, 2]);
        assert_eq!(table[&0], "0.English");
        assert_eq!(table[&1], "1.French");
        assert_eq!(table[&2], "2");
    }

    #[test]
    fn track_blob_duplicate_index_last_wins() {
        let table = decode_track_blob(b"3.eng!#!3.eng-commentary", TextEncoding::Utf8);
        assert_eq!(table.len(), 1);
        assert_eq!(table[&3], "3.eng-commentary");
    }

    #[test]
    fn track_records_keep_wire_order_and_duplicates() {
        let records = parse_track_records("3.a!#!1.b!#!3.c");
        assert_eq!(
            records,
            vec![(3, "3.a".to_string()), (1, "1.b".to_string()), (3, "3.c".to_string())]
        );
    }

    #[test]
    fn track_index_rejects_empty_and_non_numeric_prefix() {
        assert_eq!(parse_track_index(""), None);
        assert_eq!(parse_track_index(".5"), None);
        assert_eq!(parse_track_index("x.English"), None);
        assert_eq!(parse_track_index("12.Deutsch.forced"), Some(12));
    }

    #[test]
    fn track_blob_honours_latin1() {
        let blob = [b'0', b'.', b'F', b'r', 0xE9, b'n', b'c', b'h'];
        let table = decode_track_blob(&blob, TextEncoding::Latin1);
        assert_eq!(table[&0], "0.Fr\u{e9}nch");
    }

    #[test]
    fn encode_track_blob_joins_with_delimiter() {
        let blob = encode_track_blob(&["0.eng", "1.fre"], TextEncoding::Utf8);
        assert_eq!(blob, b"0.eng!#!1.fre");
    }

    #[test]
    fn text_encoding_labels() {
        assert_eq!(TextEncoding::from_label(" UTF-8 "), Some(TextEncoding::Utf8));
        assert_eq!(TextEncoding::from_label("iso_8859-1"), Some(TextEncoding::Latin1));
        assert_eq!(TextEncoding::from_label("utf-16le"), Some(TextEncoding::Utf16Le));
        assert_eq!(TextEncoding::from_label("gbk"), None);
    }

    #[test]
    fn utf16_decode_marks_odd_tail() {
        let mut bytes = TextEncoding::Utf16Le.encode("hi");
        bytes.push(0x41);
        assert_eq!(TextEncoding::Utf16Le.decode(&bytes), "hi\u{fffd}");
    }

    #[test]
    fn segment_offsets_surface_verbatim() {
        let segments = segments_from_offsets(&[100, 200, 500, 700]);
        assert_eq!(
            segments,
            vec![
                CachedSegment { start: 100, end: 200 },
                CachedSegment { start: 500, end: 700 },
            ]
        );
    }

    #[test]
    fn segment_offsets_are_not_validated() {
        let segments = segments_from_offsets(&[900, 100, 50, 60, 7]);
        assert_eq!(
            segments,
            vec![
                CachedSegment { start: 900, end: 100 },
                CachedSegment { start: 50, end: 60 },
            ]
        );
    }

    #[test]
    fn caching_from_parts_maps_kinds() {
        assert_eq!(
            caching_from_parts(1, 2, &[]).unwrap(),
            CachingTelemetry::NotAvailable { reason: 2 }
        );
        assert_eq!(
            caching_from_parts(3, 128, &[]).unwrap(),
            CachingTelemetry::SpeedUpdate { kbps: 128 }
        );
        let err = caching_from_parts(9, 0, &[]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn caching_frame_segment_update_roundtrip() {
        let telemetry = CachingTelemetry::SegmentUpdate {
            segments: segments_from_offsets(&[100, 200, 500, 700]),
        };
        let frame = encode_caching_frame(&telemetry).unwrap();
        assert_eq!(frame[0], 2);
        assert_eq!(&frame[1..5], &4u32.to_le_bytes());
        assert_eq!(decode_caching_frame(&frame).unwrap(), telemetry);
    }

    #[test]
    fn caching_frame_rejects_truncated_segments() {
        let mut frame = vec![2u8];
        frame.extend_from_slice(&2u32.to_le_bytes());
        frame.extend_from_slice(&100i64.to_le_bytes());
        let err = decode_caching_frame(&frame).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn caching_frame_rejects_empty_and_unknown() {
        assert_eq!(
            decode_caching_frame(&[]).unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );
        assert_eq!(
            decode_caching_frame(&[7, 0, 0, 0, 0]).unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );
    }

    #[test]
    fn message_kind_codes() {
        assert_eq!(MessageKind::from_code(1).unwrap(), MessageKind::Prepared);
        assert_eq!(MessageKind::from_code(2000).unwrap(), MessageKind::CachingUpdate);
        assert_eq!(MessageKind::from_code(400).unwrap(), MessageKind::HardwareError);
        assert!(MessageKind::from_code(6).is_err());
    }
}

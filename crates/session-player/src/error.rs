use std::fmt;

/// Usage errors rejected at the session boundary.
///
/// Readiness problems (calling a control before `Prepared`) are not errors: they are
/// deferred or answered with defaults.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// The source locator is empty.
    EmptySource,
    /// Track indices are non-negative engine indices.
    InvalidTrackIndex(i32),
    /// The index is not listed in the engine's track table.
    UnknownTrack(i32),
    /// Volume gains are linear and must lie in `0.0..=1.0`.
    VolumeOutOfRange { left: f32, right: f32 },
    /// Seek offsets are milliseconds from the start of the source.
    NegativeSeek(i64),
    /// A write range falls outside the supplied buffer.
    WriteOutOfBounds { offset: usize, length: usize, len: usize },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::EmptySource => write!(f, "source locator is empty"),
            SessionError::InvalidTrackIndex(index) => {
                write!(f, "track index {index} is negative")
            }
            SessionError::UnknownTrack(index) => write!(f, "no track with index {index}"),
            SessionError::VolumeOutOfRange { left, right } => {
                write!(f, "volume ({left}, {right}) outside 0.0..=1.0")
            }
            SessionError::NegativeSeek(ms) => write!(f, "seek offset {ms} ms is negative"),
            SessionError::WriteOutOfBounds {
                offset,
                length,
                len,
            } => write!(
                f,
                "write range {offset}+{length} exceeds buffer of {len} bytes"
            ),
        }
    }
}

impl std::error::Error for SessionError {}

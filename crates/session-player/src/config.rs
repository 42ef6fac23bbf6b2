use playback_proto::TextEncoding;

/// Session tuning parameters shared by the controller and the audio sink.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Encoding used for track labels and timed text when the caller gives none.
    pub text_encoding: TextEncoding,
    /// Target audio queue duration for the output device.
    pub audio_buffer_seconds: f32,
    /// Upper bound for a single device write, in bytes.
    ///
    /// The effective chunk is the smaller of this and the device's minimum buffer size.
    pub max_write_chunk_bytes: usize,
    /// Hold the keep-awake flag while a render target is bound and playback runs.
    pub keep_screen_on: bool,
    /// Treat `Prepared` as an implicit `start()` request.
    pub auto_start: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            text_encoding: TextEncoding::Utf8,
            audio_buffer_seconds: 0.5,
            max_write_chunk_bytes: 16 * 1024,
            keep_screen_on: true,
            auto_start: false,
        }
    }
}

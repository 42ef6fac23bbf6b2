//! Host configuration loaded from TOML.
//!
//! Every table and key is optional; CLI flags override file values.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use session_player::{SessionConfig, resolve_encoding};

use crate::sim_engine::EngineScript;

/// Top-level host configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Session tuning (`[session]`).
    pub session: SessionSection,
    /// Scripted engine timeline (`[engine]`).
    pub engine: EngineScript,
}

/// `[session]` table.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Default text encoding label (for example `"UTF-8"`).
    pub text_encoding: Option<String>,
    pub audio_buffer_seconds: Option<f32>,
    pub max_write_chunk_bytes: Option<usize>,
    pub keep_screen_on: Option<bool>,
    pub auto_start: Option<bool>,
    /// Output device substring match.
    pub device: Option<String>,
    /// Playback callback refill cap in frames.
    pub refill_max_frames: Option<usize>,
}

/// Resolved settings for `session-host play`.
#[derive(Clone, Debug)]
pub struct PlayConfig {
    pub source: String,
    pub device: Option<String>,
    pub no_audio: bool,
    pub refill_max_frames: usize,
    pub seek_ms: Option<i64>,
    pub volume: Option<f32>,
    pub session: SessionConfig,
    pub engine: EngineScript,
}

impl HostConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<HostConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }

    /// Resolve `[session]` into a [`SessionConfig`], filling gaps with defaults.
    pub fn session_config(&self) -> SessionConfig {
        let defaults = SessionConfig::default();
        let s = &self.session;
        SessionConfig {
            text_encoding: resolve_encoding(s.text_encoding.as_deref(), defaults.text_encoding),
            audio_buffer_seconds: s
                .audio_buffer_seconds
                .filter(|v| *v > 0.0)
                .unwrap_or(defaults.audio_buffer_seconds),
            max_write_chunk_bytes: s
                .max_write_chunk_bytes
                .filter(|v| *v > 0)
                .unwrap_or(defaults.max_write_chunk_bytes),
            keep_screen_on: s.keep_screen_on.unwrap_or(defaults.keep_screen_on),
            auto_start: s.auto_start.unwrap_or(defaults.auto_start),
        }
    }
}

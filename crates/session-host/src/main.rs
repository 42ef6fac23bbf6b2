//! Session host: runs a playback session controller against the scripted engine.
//!
//! ## Commands
//! - `play <source>`: open the source on a virtual render target, play it through the
//!   audio output, log every listener callback and exit on completion or Ctrl-C.
//! - `probe-tracks <file>`: decode a raw track descriptor blob and print its table.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use session_host::cli::{Args, Command};
use session_host::config::{HostConfig, PlayConfig};
use session_host::runtime;
use session_player::resolve_encoding;

const DEFAULT_REFILL_MAX_FRAMES: usize = 4096;

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,session_host=info,session_player=info")
        }))
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    let host_config = match args.config.as_deref() {
        Some(path) => HostConfig::load(path)?,
        None => HostConfig::default(),
    };
    let mut session = host_config.session_config();
    if args.encoding.is_some() {
        session.text_encoding = resolve_encoding(args.encoding.as_deref(), session.text_encoding);
    }

    match args.cmd {
        Command::Play {
            source,
            seek_ms,
            volume,
        } => {
            let config = PlayConfig {
                source,
                device: args.device.or_else(|| host_config.session.device.clone()),
                no_audio: args.no_audio,
                refill_max_frames: host_config
                    .session
                    .refill_max_frames
                    .unwrap_or(DEFAULT_REFILL_MAX_FRAMES),
                seek_ms,
                volume,
                session,
                engine: host_config.engine,
            };
            runtime::run_play(config, true)?;
        }
        Command::ProbeTracks { file } => {
            let tracks = runtime::probe_tracks(&file, session.text_encoding)?;
            if tracks.is_empty() {
                println!("no tracks");
            }
            for (index, label) in tracks {
                println!("#{index}: {label}");
            }
        }
    }

    Ok(())
}

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "session-host", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// TOML config with optional [session] and [engine] tables
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Default text encoding for track labels and timed text (e.g. UTF-8, ISO-8859-1)
    #[arg(long)]
    pub encoding: Option<String>,

    /// Run without an audio device (decoded PCM is dropped)
    #[arg(long)]
    pub no_audio: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play a source through the scripted engine on a virtual render target
    Play {
        /// Source URI handed to the engine
        source: String,

        /// Seek to this offset (ms) once prepared
        #[arg(long)]
        seek_ms: Option<i64>,

        /// Linear volume applied to both channels (0.0..=1.0)
        #[arg(long)]
        volume: Option<f32>,
    },

    /// Decode a raw track descriptor blob and print its index -> label table
    ProbeTracks {
        /// File holding one "!#!"-delimited blob
        file: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_play_with_global_flags() {
        let args = Args::try_parse_from([
            "session-host",
            "--no-audio",
            "--encoding",
            "latin1",
            "play",
            "scripted://demo",
            "--seek-ms",
            "500",
        ])
        .unwrap();
        assert!(args.no_audio);
        assert_eq!(args.encoding.as_deref(), Some("latin1"));
        match args.cmd {
            Command::Play { source, seek_ms, volume } => {
                assert_eq!(source, "scripted://demo");
                assert_eq!(seek_ms, Some(500));
                assert_eq!(volume, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parses_probe_tracks() {
        let args = Args::try_parse_from(["session-host", "probe-tracks", "tracks.bin"]).unwrap();
        assert!(matches!(args.cmd, Command::ProbeTracks { file } if file == PathBuf::from("tracks.bin")));
    }
}

use std::path::PathBuf;

use clap::{Args, Parser as ClapParser, Subcommand, ValueEnum};

#[derive(Debug, ClapParser)]
#[command(
    name       = env!("CARGO_PKG_NAME"),
    version    = env!("CARGO_PKG_VERSION"),
    author     = env!("CARGO_PKG_AUTHORS"),
    about      = "Tools for inspecting and demuxing USM container files",
    long_about = None,
)]
pub struct Cli {
    /// Set the log level
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    pub loglevel: LogLevel,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Plain)]
    pub log_format: LogFormat,

    /// Show progress bars during operations.
    #[arg(long, global = true)]
    pub progress: bool,

    /// Choose an operation to perform.
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Demux a USM container's tracks into elementary-stream files.
    Demux(DemuxArgs),

    /// Print container and track information
    Info(InfoArgs),
}

#[derive(Debug, Args)]
pub struct DemuxArgs {
    /// Input USM container.
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Output directory for demuxed elementary streams.
    #[arg(short, long, value_name = "PATH")]
    pub output: PathBuf,

    /// 64-bit decimal seed used to derive the video/audio obfuscation keys.
    #[arg(long, value_name = "SEED")]
    pub key: Option<u64>,

    /// Skip video tracks.
    #[arg(long)]
    pub no_video: bool,

    /// Skip audio tracks.
    #[arg(long)]
    pub no_audio: bool,

    /// Skip alpha-mask tracks.
    #[arg(long)]
    pub no_alpha: bool,
}

#[derive(Debug, Args)]
pub struct InfoArgs {
    /// Input USM container.
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    /// Disable logging output.
    Off,
    /// No output except errors.
    Error,
    /// Show warnings and errors.
    Warn,
    /// Show info, warnings and errors (default).
    Info,
    /// Show debug, info, warnings and errors.
    Debug,
    /// Show all log messages including trace.
    Trace,
}

impl LogLevel {
    /// Convert LogLevel to log::LevelFilter
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Colorized human-readable text.
    Plain,
    /// Structured JSON per log record.
    Json,
}

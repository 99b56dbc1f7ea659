use clap::{Parser, Subcommand};
use std::path::PathBuf;
use trimforge::timecode::parse_time;

#[derive(Parser)]
#[command(name = "trimforge")]
#[command(author, version, about = "Lossless MP4 trimming")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Copy a time range of a file into a new MP4 without re-encoding
    Trim {
        /// Source file
        #[arg(required = true)]
        input: PathBuf,

        /// Destination file (parent directories are created)
        #[arg(required = true)]
        output: PathBuf,

        /// Range start: seconds, MM:SS(.fff), HH:MM:SS(.fff), or <n>ms / <n>us
        #[arg(short, long, value_parser = parse_time, allow_hyphen_values = true)]
        start: i64,

        /// Range end, same formats as --start
        #[arg(short, long, value_parser = parse_time, allow_hyphen_values = true)]
        end: i64,
    },

    /// List the tracks of a file and what a trim would select
    Probe {
        /// File to probe
        #[arg(required = true)]
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}

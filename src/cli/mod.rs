//! CLI Module
//!
//! Command-line front end for probing devices and running separations
//! outside a host application.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// STEMwerk - stem separation job runner
#[derive(Parser, Debug)]
#[command(name = "stemwerk")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Python interpreter to use instead of the resolved one
    #[arg(long, global = true)]
    pub python: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List compute devices the worker can use
    #[command(name = "devices")]
    Devices {
        /// Print the full probe report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show which Python interpreter would be used
    #[command(name = "interpreter")]
    Interpreter {
        /// Fail instead of falling back when --python is unusable
        #[arg(long)]
        strict: bool,
    },

    /// Separate a WAV file into stems
    #[command(name = "separate")]
    Separate {
        /// Input WAV file
        input: PathBuf,

        /// Start of the time range to separate, in seconds
        #[arg(long)]
        start: Option<f64>,

        /// End of the time range to separate, in seconds
        #[arg(long)]
        end: Option<f64>,

        /// Model: htdemucs, htdemucs_ft or htdemucs_6s
        #[arg(short, long)]
        model: Option<String>,

        /// Comma-separated stems, e.g. vocals,drums
        #[arg(short, long, value_delimiter = ',')]
        stems: Vec<String>,

        /// Quick preset (overrides --model and --stems)
        #[arg(short, long)]
        preset: Option<String>,

        /// Device token: auto, cpu, mps, cuda:N, directml[:N]
        #[arg(short, long)]
        device: Option<String>,

        /// Root folder for run output
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

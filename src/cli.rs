//! Command-line interface for livebuddy
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Talk with a friendly voice buddy
#[derive(Parser, Debug)]
#[command(name = "livebuddy", version, about = "Talk with a friendly voice buddy")]
pub struct Cli {
    /// Subcommand to execute (default: chat)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: level meter + debug log, -vv: trace log)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(flatten)]
    pub chat: ChatArgs,
}

/// Options for a conversation
#[derive(clap::Args, Debug, Default, Clone, PartialEq)]
pub struct ChatArgs {
    /// Voice model (e.g., gemini-2.5-flash-native-audio-preview-09-2025)
    #[arg(long, value_name = "MODEL")]
    pub model: Option<String>,

    /// Prebuilt voice name (e.g., Puck, Kore, Charon)
    #[arg(long, value_name = "VOICE")]
    pub voice: Option<String>,

    /// Audio input device (see `livebuddy devices`)
    #[arg(long, value_name = "DEVICE")]
    pub input_device: Option<String>,

    /// Audio output device (see `livebuddy devices`)
    #[arg(long, value_name = "DEVICE")]
    pub output_device: Option<String>,

    /// Speak from a WAV file instead of the microphone
    #[arg(long, value_name = "FILE")]
    pub input_wav: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a voice conversation
    Chat {
        #[command(flatten)]
        args: ChatArgs,
    },

    /// List available audio input and output devices
    Devices,

    /// View configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug, PartialEq)]
pub enum ConfigAction {
    /// Show the effective configuration (file, environment and defaults)
    Show,
    /// Print the configuration file path
    Path,
}

use anyhow::Result;
use clap::{CommandFactory, Parser};
use livebuddy::app::run_chat;
use livebuddy::audio::capture::{list_input_devices, list_output_devices};
use livebuddy::cli::{Cli, Commands, ConfigAction};
use livebuddy::config::Config;
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);
    log::debug!("livebuddy {}", livebuddy::version_string());

    match cli.command {
        None => {
            let config = load_config(cli.config.as_deref())?;
            run_chat(config, cli.chat, cli.quiet, cli.verbose).await?;
        }
        Some(Commands::Chat { args }) => {
            let config = load_config(cli.config.as_deref())?;
            run_chat(config, args, cli.quiet, cli.verbose).await?;
        }
        Some(Commands::Devices) => {
            list_audio_devices()?;
        }
        Some(Commands::Config { action }) => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(shell, &mut Cli::command(), "livebuddy", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Route `log` output to stderr. `RUST_LOG` wins over the -v/-q flags.
fn init_logging(quiet: bool, verbosity: u8) {
    let level = match (quiet, verbosity) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();
}

fn config_path(custom_path: Option<&Path>) -> Option<PathBuf> {
    custom_path.map(PathBuf::from).or_else(Config::default_path)
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config), which must exist
/// 2. Default config path (~/.config/livebuddy/config.toml)
/// 3. Built-in defaults
///
/// Environment variables override whichever was loaded.
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = match (custom_path, Config::default_path()) {
        (Some(path), _) => Config::load(path)?,
        (None, Some(path)) => Config::load_or_default(&path)?,
        (None, None) => Config::default(),
    };
    Ok(config.with_env_overrides())
}

/// List available audio input and output devices.
fn list_audio_devices() -> Result<()> {
    let inputs = list_input_devices()?;
    let outputs = list_output_devices()?;

    if inputs.is_empty() && outputs.is_empty() {
        eprintln!("{}", "No audio devices found".red());
        std::process::exit(1);
    }

    println!("{}", "Input devices:".bold());
    for (idx, device) in inputs.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }
    println!("{}", "Output devices:".bold());
    for (idx, device) in outputs.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }

    Ok(())
}

/// Handle configuration commands.
fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(custom_path)?;
            print!("{}", config.to_display_toml()?);
        }
        ConfigAction::Path => match config_path(custom_path) {
            Some(path) => {
                let marker = if path.exists() {
                    "(exists)".green().to_string()
                } else {
                    "(not created, using defaults)".dimmed().to_string()
                };
                println!("{} {}", path.display(), marker);
            }
            None => {
                eprintln!("{}", "No configuration directory on this system".yellow());
                std::process::exit(1);
            }
        },
    }
    Ok(())
}

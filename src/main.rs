//! armorykit: runs bitcoind and the Armory wallet as a supervised pair.
//!
//! This is the entry point of the application. It parses command-line arguments,
//! sets up logging, loads configuration and hands the resolved profile to the
//! launcher.

mod config;
mod error;
mod events;
mod flags;
mod launcher;
mod output;
mod process;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::Styles;
use clap::{Parser, Subcommand};

use crate::config::DEFAULT_CONFIG_PATH;
use crate::launcher::{LaunchPlan, Launcher};

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "armorykit",
    version,
    about = "Launch bitcoind and Armory together from a named profile",
    styles = help_styles()
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to the configuration file.
    #[arg(short, long, env = "ARMORYKIT_CONFIG", default_value = DEFAULT_CONFIG_PATH, global = true)]
    config: PathBuf,
    /// Enable debug logging, including bitcoind output.
    #[arg(short, long, env = "ARMORYKIT_DEBUG", global = true)]
    debug: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Launch bitcoind and Armory for a profile.
    #[command(visible_alias = "l")]
    Launch {
        /// Profile name from the configuration file.
        #[arg(short = 'k', long, env = "ARMORYKIT_PROFILE")]
        profile: String,
        /// Print the commands that would run instead of running them.
        #[arg(long)]
        dry_run: bool,
        /// Print the dry run as JSON.
        #[arg(long, requires = "dry_run")]
        json: bool,
    },
    /// List the profiles defined in the configuration file.
    Profiles,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(cli.debug);

    let config = config::load_config(&cli.config)?;
    match cli.command {
        Commands::Profiles => {
            for name in config.profile_names() {
                println!("{}", name);
            }
        }
        Commands::Launch {
            profile,
            dry_run,
            json,
        } => {
            let profile = config.profile(&profile)?;
            if dry_run {
                let plan = LaunchPlan::new(&profile, &config.launch);
                if json {
                    println!("{}", serde_json::to_string_pretty(&plan)?);
                } else {
                    println!("{}", plan.render());
                }
                return Ok(());
            }

            log::info!("launcher: starting profile {}", profile.name);
            Launcher::from_profile(&profile, &config.launch)
                .run()
                .await
                .with_context(|| format!("profile {} failed", profile.name))?;
            log::info!("launcher: profile {} finished", profile.name);
        }
    }
    Ok(())
}

fn init_logger(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    let env = env_logger::Env::default().default_filter_or(level);
    env_logger::Builder::from_env(env)
        .format_timestamp_secs()
        .init();
}

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            Style::new()
                .fg_color(Some(AnsiColor::Cyan.into()))
                .effects(Effects::BOLD),
        )
        .usage(
            Style::new()
                .fg_color(Some(AnsiColor::Green.into()))
                .effects(Effects::BOLD),
        )
        .literal(Style::new().fg_color(Some(AnsiColor::Yellow.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::Magenta.into())))
        .valid(Style::new().fg_color(Some(AnsiColor::Green.into())))
        .invalid(
            Style::new()
                .fg_color(Some(AnsiColor::Red.into()))
                .effects(Effects::BOLD),
        )
}

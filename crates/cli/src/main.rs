//! Kenning CLI: the main entry point.
//!
//! Commands:
//! - `ingest`      Store an utterance and run it through the pipeline
//! - `process`     Drain pending pipeline tasks
//! - `recover`     Re-queue tasks left mid-flight by a crash
//! - `retry`       Re-queue a failed task
//! - `status`      Show queue and memory status
//! - `decay`       Run one decay pass
//! - `consolidate` Promote claims that earned long-term memory
//! - `top`         Show what is top of mind
//! - `session-end` Run session-end observers
//! - `observe`     Run observers on a schedule or manual trigger
//! - `daemon`      Run queue, decay, and observer sweeps on a timer
//! - `config`      Configuration management

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod runtime;

#[derive(Parser)]
#[command(
    name = "kenning",
    about = "Kenning: conversational memory that extracts, decays, and observes",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to a config file (defaults to ~/.kenning/config.toml)
    #[arg(short, long, global = true, env = "KENNING_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Store an utterance and run it through the pipeline
    Ingest {
        /// The raw text of the utterance
        text: String,

        /// Conversation session the utterance belongs to
        #[arg(short, long, default_value = "default")]
        session: String,

        /// Who said it
        #[arg(long, default_value = "user")]
        speaker: String,
    },

    /// Drain pending pipeline tasks
    Process,

    /// Re-queue tasks interrupted mid-processing
    Recover,

    /// Re-queue a failed task
    Retry {
        /// Task ID
        task_id: String,
    },

    /// Show queue and memory status
    Status,

    /// Run one decay pass over every claim
    Decay,

    /// Promote claims whose consolidation score crossed the threshold
    Consolidate,

    /// Show what is top of mind
    Top {
        /// Maximum entries per section
        #[arg(short, long)]
        limit: Option<usize>,

        /// Print JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Run session-end observers for a session
    SessionEnd {
        /// Session ID
        session: String,
    },

    /// Run observers with a schedule or manual trigger
    Observe {
        /// Run as a scheduled sweep instead of a manual request
        #[arg(long)]
        scheduled: bool,
    },

    /// Run the queue, decay, and scheduled observers on a timer
    Daemon {
        /// Seconds between queue drains
        #[arg(long, default_value_t = 5)]
        tick_secs: u64,

        /// Minutes between decay passes
        #[arg(long, default_value_t = 60)]
        decay_minutes: u64,

        /// Minutes between scheduled observer sweeps
        #[arg(long, default_value_t = 60)]
        sweep_minutes: u64,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate the configuration file
    Validate,
    /// Show the resolved configuration
    Show,
    /// Print the config file path
    Path,
    /// Write a default config file if none exists
    Init,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Config subcommands report load failures themselves.
    if let Commands::Config { action } = &cli.command {
        runtime::init_tracing(&Default::default(), cli.verbose);
        let path = cli.config.as_deref();
        return match action {
            ConfigAction::Validate => commands::config_cmd::validate(path).await,
            ConfigAction::Show => commands::config_cmd::show(path).await,
            ConfigAction::Path => commands::config_cmd::path(path).await,
            ConfigAction::Init => commands::config_cmd::init(path).await,
        };
    }

    let config = runtime::load_config(cli.config.as_deref())?;
    runtime::init_tracing(&config.logging, cli.verbose);
    let rt = runtime::Runtime::build(config).await?;

    match cli.command {
        Commands::Ingest { text, session, speaker } => {
            commands::ingest::run(&rt, &session, &speaker, &text).await?
        }
        Commands::Process => commands::queue::process(&rt).await?,
        Commands::Recover => commands::queue::recover(&rt).await?,
        Commands::Retry { task_id } => commands::queue::retry(&rt, &task_id).await?,
        Commands::Status => commands::status::run(&rt).await?,
        Commands::Decay => commands::memory::decay(&rt).await?,
        Commands::Consolidate => commands::memory::consolidate(&rt).await?,
        Commands::Top { limit, json } => commands::memory::top(&rt, limit, json).await?,
        Commands::SessionEnd { session } => commands::observe::session_end(&rt, &session).await?,
        Commands::Observe { scheduled } => commands::observe::sweep(&rt, scheduled).await?,
        Commands::Daemon {
            tick_secs,
            decay_minutes,
            sweep_minutes,
        } => commands::daemon::run(rt, tick_secs, decay_minutes, sweep_minutes).await?,
        Commands::Config { .. } => unreachable!("handled above"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn ingest_defaults_session_and_speaker() {
        let cli = Cli::parse_from(["kenning", "ingest", "I'm worried about my job"]);
        match cli.command {
            Commands::Ingest { text, session, speaker } => {
                assert_eq!(text, "I'm worried about my job");
                assert_eq!(session, "default");
                assert_eq!(speaker, "user");
            }
            _ => panic!("expected ingest"),
        }
    }

    #[test]
    fn daemon_intervals_are_overridable() {
        let cli = Cli::parse_from(["kenning", "daemon", "--tick-secs", "1", "--decay-minutes", "5"]);
        match cli.command {
            Commands::Daemon {
                tick_secs,
                decay_minutes,
                sweep_minutes,
            } => {
                assert_eq!((tick_secs, decay_minutes, sweep_minutes), (1, 5, 60));
            }
            _ => panic!("expected daemon"),
        }
    }

    #[test]
    fn global_config_flag_follows_subcommand() {
        let cli = Cli::parse_from(["kenning", "status", "--config", "/tmp/k.toml", "-v"]);
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("/tmp/k.toml")));
        assert!(cli.verbose);
    }
}

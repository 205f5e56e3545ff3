//! CLI interface for Appforge
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags of the `appforge` binary.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Appforge application generator
///
/// Creates web applications from natural-language prompts, iterates on them
/// through chat, and publishes them under a stable deploy key.
#[derive(Parser, Debug)]
#[command(name = "appforge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create an application from an initial prompt
    Create {
        /// What the application should be
        prompt: String,

        /// Acting user id
        #[arg(short, long)]
        user: i64,
    },

    /// Send a chat message and stream the generated code
    Chat {
        /// Application id
        app: i64,

        /// Message for the model
        message: String,

        /// Acting user id
        #[arg(short, long)]
        user: i64,
    },

    /// Build (if needed) and publish an application
    Deploy {
        /// Application id
        app: i64,

        /// Acting user id
        #[arg(short, long)]
        user: i64,
    },

    /// Show conversation history, newest first
    History {
        /// Application id
        app: i64,

        /// Acting user id
        #[arg(short, long)]
        user: i64,

        /// Number of turns to show
        #[arg(short, long, default_value = "10")]
        limit: i64,

        /// Only turns created before this timestamp (ms)
        #[arg(long)]
        before: Option<i64>,

        /// Id of the last turn already shown, for turns sharing `--before`
        #[arg(long, requires = "before")]
        before_id: Option<i64>,
    },

    /// List a user's applications
    List {
        /// Acting user id
        #[arg(short, long)]
        user: i64,
    },

    /// Write an application's generated code to a zip file
    Download {
        /// Application id
        app: i64,

        /// Acting user id
        #[arg(short, long)]
        user: i64,

        /// Output file (defaults to the archive name in the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Delete an application and its history
    Delete {
        /// Application id
        app: i64,

        /// Acting user id
        #[arg(short, long)]
        user: i64,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,

    /// Store a secret in the OS keychain
    SetSecret {
        /// Secret name (e.g. openai_api_key)
        name: String,

        /// Secret value
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from(["appforge", "config", "show"]);
        assert!(matches!(
            cli.command,
            Command::Config {
                action: ConfigAction::Show
            }
        ));
        assert!(!cli.json);
        assert!(cli.log.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from(["appforge", "--json", "--log", "debug", "list", "-u", "3"]);
        assert!(cli.json);
        assert_eq!(cli.log, Some("debug".to_string()));
        assert!(matches!(cli.command, Command::List { user: 3 }));
    }

    #[test]
    fn test_chat_command() {
        let cli = Cli::parse_from(["appforge", "chat", "7", "make it blue", "--user", "1"]);
        if let Command::Chat { app, message, user } = cli.command {
            assert_eq!(app, 7);
            assert_eq!(message, "make it blue");
            assert_eq!(user, 1);
        } else {
            panic!("Expected Chat command");
        }
    }

    #[test]
    fn test_history_defaults() {
        let cli = Cli::parse_from(["appforge", "history", "7", "-u", "1"]);
        if let Command::History {
            limit,
            before,
            before_id,
            ..
        } = cli.command
        {
            assert_eq!(limit, 10);
            assert!(before.is_none());
            assert!(before_id.is_none());
        } else {
            panic!("Expected History command");
        }
    }

    #[test]
    fn test_history_cursor_flags() {
        let cli = Cli::parse_from([
            "appforge", "history", "7", "-u", "1", "--before", "1700000000123", "--before-id", "42",
        ]);
        if let Command::History {
            before, before_id, ..
        } = cli.command
        {
            assert_eq!(before, Some(1_700_000_000_123));
            assert_eq!(before_id, Some(42));
        } else {
            panic!("Expected History command");
        }

        assert!(Cli::try_parse_from(["appforge", "history", "7", "-u", "1", "--before-id", "42"])
            .is_err());
    }

    #[test]
    fn test_user_is_required() {
        assert!(Cli::try_parse_from(["appforge", "deploy", "7"]).is_err());
    }
}

//! Command-line interface for strictly_chess.

use clap::{Parser, Subcommand};

/// Strictly Chess - live chess client
#[derive(Parser, Debug)]
#[command(name = "strictly_chess")]
#[command(about = "Play live chess games against a remote server", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Path to the client config file
    #[arg(long, global = true, env = "STRICTLY_CHESS_CONFIG")]
    pub config: Option<std::path::PathBuf>,

    /// Access token (JWT); its subject is the user id
    #[arg(long, global = true, env = "STRICTLY_CHESS_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// User id, when no access token is at hand
    #[arg(long, global = true)]
    pub user_id: Option<String>,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Join a live game and play moves typed on stdin (e2e4, e7e8q, resign, quit)
    Play {
        /// Live game id
        game_id: String,
    },

    /// Create a live game
    New {
        /// Time control as minutes+increment
        #[arg(default_value = "5+0")]
        time_format: String,
    },

    /// Show a completed game
    Show {
        /// Game id
        game_id: String,
    },

    /// Show win/loss/draw totals
    Stats {
        /// User to report on (defaults to the authenticated user)
        user: Option<String>,

        /// List every completed game and tally the results locally
        #[arg(long)]
        games: bool,
    },
}

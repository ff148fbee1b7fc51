//! CLI command definitions and dispatch for the `colloquy` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod chat;
pub mod history;
pub mod sink;

use clap::{Parser, Subcommand};

/// Conversational turns against a local model backend.
#[derive(Debug, Parser)]
#[command(name = "colloquy", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true, env = "COLLOQUY_OTEL")]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the REST API server.
    Serve {
        /// Port to listen on (defaults to `[server] port`).
        #[arg(short, long, env = "COLLOQUY_PORT")]
        port: Option<u16>,

        /// Host to bind to (defaults to `[server] host`).
        #[arg(long, env = "COLLOQUY_HOST")]
        host: Option<String>,

        /// Default model for turns that do not name one.
        #[arg(long, env = "COLLOQUY_MODEL")]
        model: Option<String>,
    },

    /// Send one message and print the reply.
    Chat {
        /// Conversation id (created on first use).
        conversation: String,

        /// The message to send.
        message: String,

        /// Model to use for this turn.
        #[arg(long, env = "COLLOQUY_MODEL")]
        model: Option<String>,

        /// Wait for the whole reply instead of streaming it.
        #[arg(long)]
        no_stream: bool,

        /// User the turn is recorded for.
        #[arg(long, env = "COLLOQUY_USER", default_value = "anonymous")]
        user: String,
    },

    /// Print one page of a conversation's history.
    #[command(alias = "log")]
    History {
        /// Conversation id.
        conversation: String,

        /// Maximum messages to show.
        #[arg(short, long)]
        limit: Option<u32>,

        /// Only messages older than this message id.
        #[arg(long)]
        before: Option<String>,
    },
}

impl Cli {
    /// Default tracing directives for the chosen verbosity.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 if self.quiet => "error",
            0 => "warn",
            1 => "info,colloquy_core=debug,colloquy_infra=debug,colloquy_api=debug",
            _ => "trace",
        }
    }
}

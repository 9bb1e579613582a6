//! CLI argument parsing using clap.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

use crate::workspace::ThreadId;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Watch thread workspaces and stream change notifications
#[derive(Parser, Debug)]
#[command(
    name = "workspace-watch",
    version = env!("CARGO_PKG_VERSION"),
    about = "Watch thread workspaces and stream change notifications",
    long_about = "Watch one directory tree per thread and print a JSON line whenever a \
                  workspace changes. Bursts of filesystem events are coalesced, and a \
                  safety poll keeps notifications flowing when native events are lost.",
    next_line_help = true,
    styles = clap_cargo_style()
)]
pub struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize project
    #[command(about = "Set up .workspace-watch directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show configuration
    #[command(about = "Display active settings")]
    Config,

    /// Watch workspaces until interrupted
    #[command(about = "Watch workspaces and print one JSON line per change notification")]
    Watch {
        /// Thread bindings as THREAD=PATH (repeatable)
        #[arg(value_name = "THREAD=PATH", required = true, value_parser = parse_binding)]
        bindings: Vec<ThreadBinding>,

        /// Quiet period in milliseconds (overrides config)
        #[arg(long)]
        debounce_ms: Option<u64>,

        /// Safety poll interval in milliseconds, 0 disables (overrides config)
        #[arg(long)]
        poll_interval_ms: Option<u64>,

        /// Include the refreshed entry count with each notification
        #[arg(long)]
        list: bool,
    },

    /// List workspace entries once
    #[command(about = "List the entries of a workspace, skipping hidden and vendor directories")]
    List {
        /// Workspace directory
        path: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// A `THREAD=PATH` pair from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadBinding {
    pub thread_id: ThreadId,
    pub path: PathBuf,
}

fn parse_binding(raw: &str) -> Result<ThreadBinding, String> {
    let (thread, path) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected THREAD=PATH, got '{raw}'"))?;

    if thread.is_empty() {
        return Err("thread id must not be empty".to_string());
    }
    if path.is_empty() {
        return Err(format!("missing path for thread '{thread}'"));
    }

    Ok(ThreadBinding {
        thread_id: ThreadId::from(thread),
        path: PathBuf::from(path),
    })
}

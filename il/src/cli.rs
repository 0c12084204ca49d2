//! CLI argument parsing for il

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "il")]
#[command(author, version, about = "Launch and talk to an external code editor", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Open a file in the external editor, launching it if needed
    Open {
        /// File to open
        #[arg(required = true)]
        file: PathBuf,

        /// 1-based line
        #[arg(short, long)]
        line: Option<u32>,

        /// 1-based column (requires --line)
        #[arg(long, requires = "line")]
        column: Option<u32>,

        /// Editor to use (default: from config)
        #[arg(short, long)]
        editor: Option<String>,

        /// Solution or project the editor should open (default: current directory)
        #[arg(short, long)]
        project: Option<PathBuf>,

        /// Milliseconds to wait for the editor to connect
        #[arg(short, long)]
        timeout_ms: Option<u64>,
    },

    /// Run the messaging endpoint and log editor connections until Ctrl-C
    Serve {
        /// Solution or project path advertised to editors
        #[arg(short, long)]
        project: Option<PathBuf>,
    },
}

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// aitrail — tamper-evident audit proxy for LLM APIs
#[derive(Parser)]
#[command(name = "aitrail", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the proxy server
    Serve {
        /// Port to bind (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,

        /// Path to the YAML configuration file
        #[arg(short, long, default_value = "config.yaml")]
        config: PathBuf,
    },
}

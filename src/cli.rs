use std::path::PathBuf;

use clap::Parser;

/// State-reconciliation backend for a Docker host.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Path to the config file.
    #[arg(short, long, default_value = "dockhand.toml")]
    pub config: PathBuf,
}

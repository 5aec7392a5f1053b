use clap::Parser;
use std::path::PathBuf;

/// Upload a table, transform it with an external command, get JSON rows back.
///
/// Every option overrides the matching environment variable.
#[derive(Debug, Default, Parser)]
#[command(name = "table-transform", version, about)]
pub struct Cli {
    /// Address to bind (HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on (PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory for per-job workspaces (WORK_DIR)
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Transformation program (TRANSFORM_COMMAND)
    #[arg(long)]
    pub command: Option<String>,

    /// Directory for rolling log files (LOG_DIR)
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Validate the configuration, print it and exit
    #[arg(long)]
    pub check_config: bool,
}

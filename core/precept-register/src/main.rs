//! precept-register: log a network scan against a project without going
//! through the chat.
//!
//! ```text
//! precept-register <PROJECT> <SCAN_TYPE> <FILEPATH> [RAW_OUTPUT]
//! ```
//!
//! `FILEPATH` may be relative to the project directory and must stay inside
//! it. Without `RAW_OUTPUT` the file's contents are stored; `-` reads the raw
//! output from stdin.

use std::io::Read;
use std::path::PathBuf;

use clap::Parser;
use precept_core::{load_config, register_scan, Db, PreceptError, ScanRequest};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "precept-register")]
#[command(about = "Register a network scan with Precept")]
#[command(version)]
struct Cli {
    /// Project directory name
    #[arg(value_name = "PROJECT")]
    project: String,

    /// Kind of scan (nmap, arp, wifi, ...)
    #[arg(value_name = "SCAN_TYPE")]
    scan_type: String,

    /// Scan file, absolute or relative to the project directory
    #[arg(value_name = "FILEPATH")]
    filepath: PathBuf,

    /// Raw scan output; `-` reads stdin
    #[arg(value_name = "RAW_OUTPUT")]
    raw_output: Option<String>,

    /// Config file (defaults to ~/.config/precept/precept.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    match run(cli) {
        Ok(message) => println!("{message}"),
        Err(err) => {
            tracing::error!(error = %err, "precept-register failed");
            eprintln!("{err}");
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<String, PreceptError> {
    let config = load_config(cli.config)?;
    let raw_output = match cli.raw_output.as_deref() {
        Some("-") => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .map_err(|err| PreceptError::io("read stdin", err))?;
            Some(buffer)
        }
        Some(raw) => Some(raw.to_string()),
        None => None,
    };

    let db = Db::open(config.db_path.clone())?;
    let registered = register_scan(
        &db,
        &config.projects_dir,
        &ScanRequest {
            project: cli.project,
            scan_type: cli.scan_type,
            filepath: cli.filepath,
            raw_output,
        },
    )?;
    Ok(format!(
        "Registered scan #{} ({})",
        registered.scan_id,
        registered.path.display()
    ))
}

fn init_logging() {
    let debug_enabled = std::env::var("PRECEPT_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

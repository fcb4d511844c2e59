//! Command-line interface for the cmsgate service
//!
//! This module defines the command line using the clap framework:
//!
//! - `serve` runs the HTTP service
//! - `scan` validates one domain and runs the scanner locally
//! - `validate` only runs the domain validator
//!
//! Every service option can also be supplied through an environment
//! variable, which is how the container deployment configures it. The API
//! key in particular is expected to come from `API_KEY`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::scanner::ScannerConfig;

/// Main command-line interface structure for cmsgate
///
/// # Examples
///
/// ```
/// use clap::Parser;
/// use cmsgate::cli::{Cli, Commands};
///
/// let cli = Cli::try_parse_from(["cmsgate", "validate", "--domain", "ma.rkus.io"]).unwrap();
/// assert!(matches!(cli.command, Commands::Validate { .. }));
/// ```
#[derive(Parser, Debug)]
#[command(
    name = "cmsgate",
    about = "HTTP gateway that validates domain names and runs CMS detection scans",
    version
)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP service
    Serve(ServeArgs),

    /// Scan a single domain and print the report as JSON
    Scan {
        /// Domain to scan (e.g., example.com)
        #[arg(short, long)]
        domain: String,

        #[command(flatten)]
        scanner: ScannerArgs,
    },

    /// Check a domain name against the validation rules
    ///
    /// Prints `ok` or the reason for rejection; exits non-zero on rejection.
    Validate {
        /// Domain name to validate
        #[arg(short, long)]
        domain: String,
    },
}

/// Options of the `serve` subcommand
#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address to bind the HTTP server to
    #[arg(short, long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Key clients must send in the X-API-KEY header
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Scan requests allowed per client and minute
    #[arg(short, long, env = "RATE_LIMIT", default_value = "10")]
    pub rate_limit: u32,

    /// Refuse to scan domains that do not resolve
    #[arg(long, env = "REQUIRE_DNS")]
    pub require_dns: bool,

    #[command(flatten)]
    pub scanner: ScannerArgs,
}

/// Options controlling the scanner process
#[derive(Args, Debug, Clone)]
pub struct ScannerArgs {
    /// Interpreter or executable that runs the scanner
    #[arg(long, env = "SCANNER_PROGRAM", default_value = "python")]
    pub scanner_program: String,

    /// Scanner script passed as first argument
    #[arg(long, env = "SCANNER_SCRIPT", default_value = "cmseek.py")]
    pub scanner_script: String,

    /// Working directory of the scanner process
    #[arg(long, env = "SCANNER_DIR")]
    pub scanner_dir: Option<PathBuf>,

    /// Directory the scanner writes `<domain>/cms.json` reports to
    #[arg(long, env = "RESULT_DIR", default_value = "/app/Result")]
    pub result_dir: PathBuf,

    /// Seconds after which a scan is killed
    #[arg(long, env = "SCAN_TIMEOUT_SECS", default_value = "120")]
    pub scan_timeout_secs: u64,

    /// Maximum number of scanner processes running at once
    #[arg(long, env = "MAX_CONCURRENT_SCANS", default_value = "4")]
    pub max_concurrent_scans: usize,
}

impl ScannerArgs {
    /// Builds the scanner configuration these options describe.
    pub fn to_config(&self) -> ScannerConfig {
        ScannerConfig {
            program: self.scanner_program.clone(),
            script: self.scanner_script.clone(),
            working_dir: self.scanner_dir.clone(),
            result_dir: self.result_dir.clone(),
            timeout: Duration::from_secs(self.scan_timeout_secs),
            max_concurrent: self.max_concurrent_scans,
            ..ScannerConfig::default()
        }
    }
}

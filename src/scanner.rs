//! CMS detection scans driven through an external scanner process
//!
//! This module runs the CMSeeK scanner for a validated domain and reads back
//! the JSON report it leaves on disk:
//!
//! - Commands are built as argument vectors, never through a shell
//! - Only a [`DomainName`] can be turned into a command line or result path
//! - Concurrent scans are bounded by a semaphore
//! - Every scan has a timeout, after which the process is killed
//! - Scanner output is logged (sanitized) only when a scan fails
//!
//! Process execution sits behind the [`CommandRunner`] trait so the scan
//! workflow can be exercised without spawning real processes.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::sanitize::summarize_output;
use crate::validation::DomainName;

/// Name of the report file the scanner writes per domain.
pub const RESULT_FILE_NAME: &str = "cms.json";

/// Default user agent sent by the scanner; `{domain}` is replaced.
pub const DEFAULT_USER_AGENT_TEMPLATE: &str = "Domaner.xyz Analysis Bot - Please contact support@domaner.xyz regarding any abuse or problem. Visit https://www.domaner.xyz/domains/{domain} for more information";

/// Errors that can occur while producing a scan report.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for scanner: {0}")]
    Io(#[source] std::io::Error),

    #[error("scanner timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("scanner exited unsuccessfully ({})", describe_exit(.exit_code))]
    Failed { exit_code: Option<i32> },

    #[error("scan result {} not found", .path.display())]
    MissingResult { path: PathBuf },

    #[error("failed to read scan result {}: {source}", .path.display())]
    ReadResult {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("scan result {} is not a JSON object: {source}", .path.display())]
    InvalidResult {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("scanner is shutting down")]
    Unavailable,
}

fn describe_exit(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

/// CMS detection report as written by the scanner
///
/// The well-known fields are typed; everything else the scanner reports
/// (WordPress users, Joomla versions, ...) is preserved in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CmsReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cms_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cms_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cms_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection_param: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scanned: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A fully resolved process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Duration,
}

/// Exit code and captured output of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOutput {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ScanOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs external commands for the scanner.
///
/// The production implementation uses tokio; test doubles can return
/// canned results without spawning processes.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `command` to completion or until its timeout fires.
    async fn run(&self, command: &ScanCommand) -> Result<ScanOutput, ScanError>;
}

/// Production [`CommandRunner`] backed by `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioCommandRunner;

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, command: &ScanCommand) -> Result<ScanOutput, ScanError> {
        let mut cmd = tokio::process::Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|source| ScanError::Spawn {
            program: command.program.clone(),
            source,
        })?;

        // wait_with_output drains stdout and stderr while waiting, so a
        // chatty scanner cannot fill the pipe and stall. On timeout the
        // child is dropped and kill_on_drop terminates it.
        match tokio::time::timeout(command.timeout, child.wait_with_output()).await {
            Ok(output) => {
                let output = output.map_err(ScanError::Io)?;
                Ok(ScanOutput {
                    exit_code: output.status.code(),
                    stdout: output.stdout,
                    stderr: output.stderr,
                })
            }
            Err(_) => Err(ScanError::Timeout(command.timeout)),
        }
    }
}

/// Settings for launching the scanner and locating its reports.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Interpreter or executable to launch
    pub program: String,
    /// Script passed as the first argument; empty to pass none
    pub script: String,
    /// Working directory for the scanner process
    pub working_dir: Option<PathBuf>,
    /// Directory under which the scanner writes `<domain>/cms.json`
    pub result_dir: PathBuf,
    pub timeout: Duration,
    pub max_concurrent: usize,
    pub user_agent_template: String,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            program: "python".to_string(),
            script: "cmseek.py".to_string(),
            working_dir: None,
            result_dir: PathBuf::from("/app/Result"),
            timeout: Duration::from_secs(120),
            max_concurrent: 4,
            user_agent_template: DEFAULT_USER_AGENT_TEMPLATE.to_string(),
        }
    }
}

/// Runs scans and reads back their reports.
pub struct Scanner {
    config: ScannerConfig,
    runner: Arc<dyn CommandRunner>,
    permits: Arc<Semaphore>,
}

impl Scanner {
    /// Creates a scanner that spawns real processes.
    pub fn new(config: ScannerConfig) -> Self {
        Self::with_runner(config, Arc::new(TokioCommandRunner))
    }

    /// Creates a scanner with a custom process runner.
    pub fn with_runner(config: ScannerConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            config,
            runner,
            permits,
        }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Builds the scanner invocation for `domain`.
    pub fn command_for(&self, domain: &DomainName) -> ScanCommand {
        let mut args = Vec::with_capacity(6);
        if !self.config.script.is_empty() {
            args.push(self.config.script.clone());
        }
        args.push("-u".to_string());
        args.push(format!("https://{domain}"));
        args.push("--follow-redirect".to_string());
        args.push("--user-agent".to_string());
        args.push(
            self.config
                .user_agent_template
                .replace("{domain}", domain.as_str()),
        );

        ScanCommand {
            program: self.config.program.clone(),
            args,
            working_dir: self.config.working_dir.clone(),
            timeout: self.config.timeout,
        }
    }

    /// Location of the report the scanner writes for `domain`.
    pub fn result_path(&self, domain: &DomainName) -> PathBuf {
        self.config
            .result_dir
            .join(domain.as_str())
            .join(RESULT_FILE_NAME)
    }

    /// Scans `domain` and returns the parsed report
    ///
    /// 1. Waits for a free scan slot
    /// 2. Runs the scanner process
    /// 3. Reads `<result_dir>/<domain>/cms.json`
    pub async fn scan(&self, domain: &DomainName) -> Result<CmsReport, ScanError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ScanError::Unavailable)?;

        let command = self.command_for(domain);
        info!(%domain, program = %command.program, "starting scan");

        let output = self.runner.run(&command).await?;
        if !output.success() {
            warn!(
                %domain,
                exit = %describe_exit(&output.exit_code),
                stdout = %summarize_output(&output.stdout),
                stderr = %summarize_output(&output.stderr),
                "scanner failed"
            );
            return Err(ScanError::Failed {
                exit_code: output.exit_code,
            });
        }

        let path = self.result_path(domain);
        let report = read_report(&path).await.inspect_err(|err| {
            warn!(
                %domain,
                error = %err,
                stdout = %summarize_output(&output.stdout),
                "scan produced no usable report"
            );
        })?;

        debug!(%domain, cms = ?report.cms_id, "scan finished");
        Ok(report)
    }
}

async fn read_report(path: &Path) -> Result<CmsReport, ScanError> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ScanError::MissingResult {
                path: path.to_path_buf(),
            })
        }
        Err(source) => {
            return Err(ScanError::ReadResult {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_slice(&data).map_err(|source| ScanError::InvalidResult {
        path: path.to_path_buf(),
        source,
    })
}

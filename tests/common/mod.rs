//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cmsgate::scanner::{
    CommandRunner, ScanCommand, ScanError, ScanOutput, Scanner, ScannerConfig, RESULT_FILE_NAME,
};

pub const WORDPRESS_REPORT: &str = r#"{
    "cms_id": "wp",
    "cms_name": "WordPress",
    "cms_url": "https://wordpress.org",
    "detection_param": "header",
    "last_scanned": "2022-02-27 17:44:17.602201",
    "url": "https://ma.rkus.io",
    "wp_license": "https://ma.rkus.io/license.txt",
    "wp_readme_file": "https://ma.rkus.io/readme.html",
    "wp_themes": "ma-rkus-io Version 5.9.1,",
    "wp_users": "markus,"
}"#;

/// What the fake scanner does when run.
#[derive(Clone)]
pub enum FakeBehavior {
    /// Exit 0 and write this report for the scanned domain
    Report(String),
    /// Exit 0 without writing anything
    NoReport,
    /// Exit with this code, writing nothing
    Fail(i32),
    /// Return this error instead of running
    Timeout,
}

/// A [`CommandRunner`] that records invocations instead of spawning.
pub struct FakeRunner {
    result_dir: PathBuf,
    behavior: FakeBehavior,
    calls: Mutex<Vec<ScanCommand>>,
}

impl FakeRunner {
    pub fn new(result_dir: &Path, behavior: FakeBehavior) -> Arc<Self> {
        Arc::new(Self {
            result_dir: result_dir.to_path_buf(),
            behavior,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<ScanCommand> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, command: &ScanCommand) -> Result<ScanOutput, ScanError> {
        self.calls.lock().unwrap().push(command.clone());

        let url_index = command.args.iter().position(|a| a == "-u").unwrap() + 1;
        let domain = command.args[url_index].trim_start_matches("https://");

        match &self.behavior {
            FakeBehavior::Report(report) => {
                let dir = self.result_dir.join(domain);
                std::fs::create_dir_all(&dir).unwrap();
                std::fs::write(dir.join(RESULT_FILE_NAME), report).unwrap();
                Ok(ScanOutput {
                    exit_code: Some(0),
                    stdout: b"\x1b[92m[+]\x1b[0m CMS Detected".to_vec(),
                    stderr: Vec::new(),
                })
            }
            FakeBehavior::NoReport => Ok(ScanOutput {
                exit_code: Some(0),
                ..ScanOutput::default()
            }),
            FakeBehavior::Fail(code) => Ok(ScanOutput {
                exit_code: Some(*code),
                stdout: Vec::new(),
                stderr: b"Traceback (most recent call last):\nConnectionError".to_vec(),
            }),
            FakeBehavior::Timeout => Err(ScanError::Timeout(command.timeout)),
        }
    }
}

pub fn scanner_config(result_dir: &Path) -> ScannerConfig {
    ScannerConfig {
        result_dir: result_dir.to_path_buf(),
        timeout: Duration::from_secs(5),
        ..ScannerConfig::default()
    }
}

pub fn fake_scanner(result_dir: &Path, behavior: FakeBehavior) -> (Scanner, Arc<FakeRunner>) {
    let runner = FakeRunner::new(result_dir, behavior);
    let scanner = Scanner::with_runner(scanner_config(result_dir), runner.clone());
    (scanner, runner)
}

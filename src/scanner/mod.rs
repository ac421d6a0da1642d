pub mod masscan;
pub mod output;
pub mod targets;

use std::{io, path::PathBuf, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::ports::PortSpec;

pub use self::masscan::Masscan;

/// Everything a scanner needs to know to run one scan.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    /// Prefixes or address ranges, one per entry.
    pub targets: Vec<String>,
    pub ports: PortSpec,
    /// Where results are written in list format.
    pub output_path: PathBuf,
}

/// How the scanner process ended.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub success: bool,
    /// None if the process was killed by a signal.
    pub exit_status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl ScanOutcome {
    /// Turn a non-zero exit into an error. The output file may still have
    /// useful results in it either way.
    pub fn check(&self) -> Result<(), ScanError> {
        if self.success {
            return Ok(());
        }
        let status = match self.exit_status {
            Some(code) => format!("exit code {code}"),
            None => "a signal".to_string(),
        };
        Err(ScanError::Process {
            status,
            stdout: self.stdout.trim().to_string(),
            stderr: self.stderr.trim().to_string(),
        })
    }
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to start {}: {source}", .binary.display())]
    Spawn {
        binary: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("scanner exited with {status}: {stderr}")]
    Process {
        status: String,
        stdout: String,
        stderr: String,
    },
    #[error("scanner didn't finish within {0:?} and was killed")]
    Timeout(Duration),
    #[error("scan was cancelled")]
    Cancelled,
    #[error("{0}")]
    Io(#[from] io::Error),
}

/// Something that can scan targets for open ports and write the results to a
/// file. The real one is [`Masscan`].
#[async_trait]
pub trait ScanTool: Send + Sync {
    async fn scan(
        &self,
        request: &ScanRequest,
        cancel: &CancellationToken,
    ) -> Result<ScanOutcome, ScanError>;
}

use std::{
    ffi::OsString,
    io,
    path::Path,
    process::{ExitStatus, Stdio},
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Command,
    sync::Mutex,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ScanError, ScanOutcome, ScanRequest, ScanTool};
use crate::config::ScannerConfig;

/// Runs the masscan binary.
///
/// masscan wants the network interface to itself, so clones of the same
/// `Masscan` share a lock and only one scan runs at a time.
#[derive(Clone)]
pub struct Masscan {
    config: ScannerConfig,
    scan_lock: Arc<Mutex<()>>,
}

enum Ended {
    Exited(io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

impl Masscan {
    pub fn new(config: ScannerConfig) -> Self {
        Self {
            config,
            scan_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn args(&self, request: &ScanRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = request.targets.iter().map(OsString::from).collect();
        args.push(format!("-p{}", request.ports).into());
        args.push(format!("--rate={}", self.config.rate).into());
        args.push(format!("--wait={}", self.config.wait_secs).into());
        args.extend(self.config.extra_args.iter().map(OsString::from));
        // list output, the default is binary
        args.push("-oL".into());
        args.push(request.output_path.clone().into_os_string());
        args
    }
}

#[async_trait]
impl ScanTool for Masscan {
    async fn scan(
        &self,
        request: &ScanRequest,
        cancel: &CancellationToken,
    ) -> Result<ScanOutcome, ScanError> {
        let _guard = tokio::select! {
            guard = self.scan_lock.lock() => guard,
            _ = cancel.cancelled() => return Err(ScanError::Cancelled),
        };

        // so a missing file afterwards always means masscan didn't write one
        remove_if_exists(&request.output_path).await?;
        if let Some(parent) = request.output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let args = self.args(request);
        info!(
            "Executing {} against {} targets on ports {}",
            self.config.binary.display(),
            request.targets.len(),
            request.ports
        );
        debug!("masscan args: {args:?}");

        let mut child = Command::new(&self.config.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ScanError::Spawn {
                binary: self.config.binary.clone(),
                source,
            })?;
        let start = Instant::now();

        let stdout = read_pipe(child.stdout.take());
        let stderr = read_pipe(child.stderr.take());

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let ended = tokio::select! {
            status = child.wait() => Ended::Exited(status),
            _ = tokio::time::sleep(timeout) => Ended::TimedOut,
            _ = cancel.cancelled() => Ended::Cancelled,
        };

        let status = match ended {
            Ended::Exited(status) => status?,
            Ended::TimedOut => {
                warn!("masscan still running after {timeout:?}, killing it");
                child.kill().await?;
                return Err(ScanError::Timeout(timeout));
            }
            Ended::Cancelled => {
                info!("Scan cancelled, killing masscan");
                child.kill().await?;
                remove_if_exists(&request.output_path).await?;
                return Err(ScanError::Cancelled);
            }
        };

        let outcome = ScanOutcome {
            success: status.success(),
            exit_status: status.code(),
            stdout: stdout.await.unwrap_or_default(),
            stderr: stderr.await.unwrap_or_default(),
            elapsed: start.elapsed(),
        };
        if outcome.success {
            info!("Scan completed successfully in {:?}", outcome.elapsed);
        }
        Ok(outcome)
    }
}

fn read_pipe<R>(pipe: Option<R>) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            // a read error just means we get less of the output
            let _ = pipe.read_to_end(&mut buf).await;
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

async fn remove_if_exists(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

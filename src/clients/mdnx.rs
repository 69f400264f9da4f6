//! Subprocess wrapper around the multi-downloader-nx command line tool.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MdnxConfig;
use crate::constants::{DOWNLOAD_FILE_STEM, STDBUF_PATH, intervals};
use crate::domain::ServiceKind;

#[derive(Debug, Error)]
pub enum MdnxError {
    #[error("Failed to start {path}: {source}")]
    Spawn {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("A download is already running")]
    Busy,

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("Cancelled")]
    Cancelled,

    #[error("Tool exited with {0}")]
    ExitStatus(String),

    #[error("Tool finished without a success marker")]
    NoSuccessMarker,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Captured output of a short, query-only invocation.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// stdout followed by stderr; the tool prints some headers on stderr.
    #[must_use]
    pub fn combined(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub series_id: String,
    pub season_id: String,
    pub download_number: u32,
    /// Passed as `--dubLang`; empty leaves the tool's default.
    pub dubs: Vec<String>,
}

struct ActiveDownload {
    cancel: CancellationToken,
    finished: watch::Receiver<bool>,
}

/// Clears the active slot and signals waiters when a download ends, however it ends.
struct ActiveGuard<'a> {
    slot: &'a Mutex<Option<ActiveDownload>>,
    finished: watch::Sender<bool>,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let _ = self.finished.send(true);
    }
}

#[must_use]
pub fn contains_marker(output: &str, markers: &[String]) -> bool {
    let lowered = output.to_lowercase();
    markers
        .iter()
        .any(|m| !m.is_empty() && lowered.contains(&m.to_lowercase()))
}

pub struct MdnxClient {
    config: MdnxConfig,
    service: ServiceKind,
    active: Mutex<Option<ActiveDownload>>,
}

impl MdnxClient {
    #[must_use]
    pub const fn new(config: MdnxConfig, service: ServiceKind) -> Self {
        Self {
            config,
            service,
            active: Mutex::new(None),
        }
    }

    #[must_use]
    pub const fn service(&self) -> ServiceKind {
        self.service
    }

    #[must_use]
    pub const fn config(&self) -> &MdnxConfig {
        &self.config
    }

    fn command(&self, args: &[String]) -> Command {
        let bin = &self.config.bin_path;
        let mut cmd = if self.config.use_stdbuf && Path::new(STDBUF_PATH).exists() {
            let mut cmd = Command::new(STDBUF_PATH);
            cmd.arg("-oL").arg("-eL").arg(bin);
            cmd
        } else {
            Command::new(bin)
        };

        cmd.arg("--service").arg(self.service.cli_name()).args(args);
        if let Some(dir) = bin.parent()
            && !dir.as_os_str().is_empty()
            && dir.is_dir()
        {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, source: std::io::Error) -> MdnxError {
        MdnxError::Spawn {
            path: self.config.bin_path.clone(),
            source,
        }
    }

    /// Runs a query-only invocation and captures its output.
    pub async fn run_capture(&self, args: &[String], timeout_secs: u64) -> Result<CommandOutput, MdnxError> {
        debug!(service = %self.service, ?args, "Running tool");
        let mut child = self.command(args).spawn().map_err(|e| self.spawn_error(e))?;

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();

        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                pipe.read_to_end(&mut buf).await?;
            }
            Ok::<Vec<u8>, std::io::Error>(buf)
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                pipe.read_to_end(&mut buf).await?;
            }
            Ok::<Vec<u8>, std::io::Error>(buf)
        });

        match tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait()).await {
            Ok(status) => {
                let status = status?;
                let stdout = stdout_task.await.map_err(std::io::Error::other)??;
                let stderr = stderr_task.await.map_err(std::io::Error::other)??;
                Ok(CommandOutput {
                    success: status.success(),
                    stdout: String::from_utf8_lossy(&stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&stderr).into_owned(),
                })
            }
            Err(_) => {
                let _ = child.kill().await;
                stdout_task.abort();
                stderr_task.abort();
                Err(MdnxError::Timeout(timeout_secs))
            }
        }
    }

    /// Lists a series.
    pub async fn list_series(&self, series_id: &str) -> Result<CommandOutput, MdnxError> {
        let args = vec!["--srz".to_string(), series_id.to_string()];
        self.run_capture(&args, self.config.list_timeout_seconds).await
    }

    /// Asks the tool which tracks an episode has without downloading it.
    pub async fn probe_tracks(
        &self,
        series_id: &str,
        season_id: &str,
        download_number: u32,
    ) -> Result<CommandOutput, MdnxError> {
        let args = vec![
            "--srz".to_string(),
            series_id.to_string(),
            "-s".to_string(),
            season_id.to_string(),
            "-e".to_string(),
            download_number.to_string(),
            "--dubLang".to_string(),
            "und".to_string(),
        ];
        self.run_capture(&args, self.config.probe_timeout_seconds).await
    }

    pub async fn authenticate(&self, username: &str, password: &str) -> Result<CommandOutput, MdnxError> {
        let args = vec![
            "--auth".to_string(),
            "--username".to_string(),
            username.to_string(),
            "--password".to_string(),
            password.to_string(),
            "--silentAuth".to_string(),
        ];
        self.run_capture(&args, self.config.list_timeout_seconds).await
    }

    fn download_args(request: &DownloadRequest) -> Vec<String> {
        let mut args = vec![
            "--srz".to_string(),
            request.series_id.clone(),
            "-s".to_string(),
            request.season_id.clone(),
            "-e".to_string(),
            request.download_number.to_string(),
        ];
        if !request.dubs.is_empty() {
            args.push("--dubLang".to_string());
            args.extend(request.dubs.iter().cloned());
        }
        args.extend([
            "--fileName".to_string(),
            DOWNLOAD_FILE_STEM.to_string(),
            "--skipUpdate".to_string(),
            "true".to_string(),
        ]);
        args
    }

    /// Downloads one episode, streaming the tool's output into the log.
    ///
    /// Only one download runs per client; a second call while one is in
    /// flight fails with [`MdnxError::Busy`]. Succeeds only when the tool
    /// exits cleanly and printed one of the configured success markers.
    pub async fn download(&self, request: &DownloadRequest) -> Result<(), MdnxError> {
        let cancel = CancellationToken::new();
        let (finished_tx, finished_rx) = watch::channel(false);
        {
            let mut slot = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_some() {
                return Err(MdnxError::Busy);
            }
            *slot = Some(ActiveDownload {
                cancel: cancel.clone(),
                finished: finished_rx,
            });
        }
        let _guard = ActiveGuard {
            slot: &self.active,
            finished: finished_tx,
        };

        let args = Self::download_args(request);
        info!(
            service = %self.service,
            series_id = %request.series_id,
            season_id = %request.season_id,
            episode = request.download_number,
            dubs = ?request.dubs,
            "Starting download"
        );

        let mut child = self.command(&args).spawn().map_err(|e| self.spawn_error(e))?;

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        if let Some(stdout) = child.stdout.take() {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        let timeout_secs = self.config.download_timeout_seconds;
        let deadline = tokio::time::sleep(Duration::from_secs(timeout_secs));
        tokio::pin!(deadline);

        let mut saw_marker = false;
        loop {
            tokio::select! {
                line = rx.recv() => match line {
                    Some(line) => {
                        if contains_marker(&line, &self.config.success_markers) {
                            saw_marker = true;
                        }
                        debug!(service = %self.service, "[mdnx] {}", line);
                    }
                    None => break,
                },
                () = cancel.cancelled() => {
                    warn!(service = %self.service, "Download cancelled, stopping tool");
                    let _ = child.kill().await;
                    return Err(MdnxError::Cancelled);
                }
                () = &mut deadline => {
                    warn!(service = %self.service, timeout_secs, "Download timed out, stopping tool");
                    let _ = child.kill().await;
                    return Err(MdnxError::Timeout(timeout_secs));
                }
            }
        }

        let status = tokio::select! {
            status = child.wait() => status?,
            () = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(MdnxError::Cancelled);
            }
        };

        if !status.success() {
            warn!(service = %self.service, %status, "Download failed");
            return Err(MdnxError::ExitStatus(status.to_string()));
        }
        if !saw_marker {
            warn!(service = %self.service, "Tool exited cleanly but printed no success marker");
            return Err(MdnxError::NoSuccessMarker);
        }

        info!(service = %self.service, series_id = %request.series_id, episode = request.download_number, "Download finished");
        Ok(())
    }

    #[must_use]
    pub fn is_downloading(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Stops the running download, if any, and waits briefly for it to wind down.
    pub async fn cancel_active_download(&self) {
        let finished = {
            let slot = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(active) => {
                    active.cancel.cancel();
                    active.finished.clone()
                }
                None => {
                    debug!(service = %self.service, "No active download to cancel");
                    return;
                }
            }
        };

        let mut finished = finished;
        match tokio::time::timeout(intervals::CANCEL_GRACE, finished.wait_for(|done| *done)).await {
            Ok(_) => info!(service = %self.service, "Active download cancelled"),
            Err(_) => warn!(
                service = %self.service,
                grace_secs = intervals::CANCEL_GRACE.as_secs(),
                "Download did not stop within the grace period"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_marker_ignores_case() {
        let markers = vec!["[mkvmerge Done]".to_string()];
        assert!(contains_marker("[MKVMERGE DONE] muxing", &markers));
        assert!(!contains_marker("[mkvmerge] running", &markers));
        assert!(!contains_marker("anything", &[String::new()]));
    }

    #[test]
    fn test_download_args() {
        let request = DownloadRequest {
            series_id: "G1".to_string(),
            season_id: "GY1".to_string(),
            download_number: 7,
            dubs: vec!["jpn".to_string(), "eng".to_string()],
        };
        let args = MdnxClient::download_args(&request);
        assert_eq!(
            args,
            vec![
                "--srz", "G1", "-s", "GY1", "-e", "7", "--dubLang", "jpn", "eng", "--fileName",
                "output", "--skipUpdate", "true"
            ]
        );
    }

    #[test]
    fn test_download_args_without_dubs() {
        let request = DownloadRequest {
            series_id: "G1".to_string(),
            season_id: "GY1".to_string(),
            download_number: 1,
            dubs: vec![],
        };
        assert!(!MdnxClient::download_args(&request).contains(&"--dubLang".to_string()));
    }

    #[test]
    fn test_combined_output() {
        let output = CommandOutput {
            success: true,
            stdout: "a".to_string(),
            stderr: "b".to_string(),
        };
        assert_eq!(output.combined(), "a\nb");
    }
}

//! Supervised inference-server process.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::client::BackendClient;
use crate::config::BackendConfig;
use crate::error::BackendError;
use crate::ready::{wait_until_ready, Probe, ReadyPolicy};

/// Lifecycle of the backend process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Starting,
    Ready,
    Stopped,
}

/// Owns the inference-server child process.
///
/// The process is stopped by [`BackendProcess::shutdown`]; dropping the
/// handle without shutting down kills it.
pub struct BackendProcess {
    child: Option<Child>,
    state: BackendState,
    stop_timeout: Duration,
    output_tasks: Vec<JoinHandle<()>>,
}

impl BackendProcess {
    /// Start the inference server described by `config`.
    pub fn spawn(config: &BackendConfig) -> Result<Self, BackendError> {
        if !config.model_path.exists() {
            return Err(BackendError::ModelNotFound(config.model_path.clone()));
        }

        info!("Starting inference server on {}", config.base_url());
        info!("Command: {}", config.command_line());

        let mut child = Command::new(&config.program)
            .args(config.command_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BackendError::SpawnFailed(format!("{}: {}", config.program, e)))?;

        debug!("Inference server process started with PID: {:?}", child.id());

        let mut output_tasks = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            output_tasks.push(tokio::spawn(forward_output(stdout)));
        }
        if let Some(stderr) = child.stderr.take() {
            output_tasks.push(tokio::spawn(forward_output(stderr)));
        }

        Ok(Self {
            child: Some(child),
            state: BackendState::Starting,
            stop_timeout: config.stop_timeout,
            output_tasks,
        })
    }

    pub fn state(&self) -> BackendState {
        self.state
    }

    /// OS process id, while the child is alive.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    /// Exit code if the child has exited; `Some(None)` means killed by a
    /// signal or already released.
    pub fn try_exit_code(&mut self) -> Option<Option<i32>> {
        exit_code(&mut self.child)
    }

    /// Wait until the server answers health checks.
    ///
    /// Every attempt first checks whether the process died, which is fatal.
    /// On timeout the process is stopped before the error is returned.
    pub async fn wait_ready(
        &mut self,
        client: &BackendClient,
        policy: ReadyPolicy,
    ) -> Result<u32, BackendError> {
        info!("Waiting for inference server to start...");

        let child = &mut self.child;
        let result = wait_until_ready(policy, || {
            let exited = exit_code(child);
            let client = client.clone();
            async move {
                if let Some(code) = exited {
                    return Probe::Failed(BackendError::ProcessExited(code));
                }
                let report = client.probe().await;
                match (report.healthy, report.method) {
                    (true, method) => {
                        info!("Inference server is ready! ({} check)", method.unwrap_or("health"));
                        Probe::Ready
                    }
                    (false, _) => Probe::Pending(report.error.unwrap_or_default()),
                }
            }
        })
        .await;

        match result {
            Ok(attempts) => {
                self.state = BackendState::Ready;
                Ok(attempts)
            }
            Err(BackendError::ProcessExited(code)) => {
                error!("Inference server process exited with code {:?}", code);
                self.state = BackendState::Stopped;
                self.child = None;
                self.drain_output().await;
                Err(BackendError::ProcessExited(code))
            }
            Err(e) => {
                error!("Timeout waiting for inference server to start");
                self.stop().await;
                Err(e)
            }
        }
    }

    /// Stop the process and release the handle.
    pub async fn shutdown(mut self) -> Option<ExitStatus> {
        self.stop().await
    }

    async fn stop(&mut self) -> Option<ExitStatus> {
        let mut child = self.child.take()?;
        self.state = BackendState::Stopped;

        if let Ok(Some(status)) = child.try_wait() {
            debug!("Inference server already exited with status: {:?}", status);
            self.drain_output().await;
            return Some(status);
        }

        info!("Stopping inference server (PID: {:?})", child.id());
        terminate(&child);

        let status = match timeout(self.stop_timeout, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                warn!("Error waiting for inference server: {}", e);
                None
            }
            Err(_) => {
                warn!("Inference server didn't exit gracefully, killing...");
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill inference server: {}", e);
                }
                child.try_wait().ok().flatten()
            }
        };

        self.drain_output().await;
        debug!("Inference server exited with status: {:?}", status);
        status
    }

    async fn drain_output(&mut self) {
        for task in self.output_tasks.drain(..) {
            if timeout(Duration::from_secs(1), task).await.is_err() {
                debug!("Output forwarder still running after process exit");
            }
        }
    }
}

impl Drop for BackendProcess {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            warn!("Inference server handle dropped without shutdown, killing process");
            let _ = child.start_kill();
        }
    }
}

/// Spawn the inference server and wait until it is ready.
pub async fn start_backend(config: &BackendConfig) -> Result<BackendProcess, BackendError> {
    let mut process = BackendProcess::spawn(config)?;
    let client = BackendClient::from_config(config);
    let policy = ReadyPolicy::fixed(Duration::from_secs(1), config.startup_timeout);
    process.wait_ready(&client, policy).await?;
    Ok(process)
}

fn exit_code(child: &mut Option<Child>) -> Option<Option<i32>> {
    match child.as_mut() {
        Some(c) => c.try_wait().ok().flatten().map(|s| s.code()),
        None => Some(None),
    }
}

#[cfg(unix)]
fn terminate(child: &Child) {
    if let Some(pid) = child.id() {
        // SAFETY: plain signal delivery to a child we own and have not reaped.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn terminate(_child: &Child) {}

async fn forward_output<R>(reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(256);
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end();
                if !line.trim().is_empty() {
                    info!(target: "harbor::backend", "[llama-cpp] {}", line);
                }
            }
            Err(e) => {
                debug!("Stopped reading inference server output: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::{closed_url, spawn_server};
    use axum::routing::get;
    use axum::Router;
    use tempfile::NamedTempFile;

    fn shell_config(script: &str, model: &NamedTempFile) -> BackendConfig {
        BackendConfig::builder()
            .program("sh")
            .program_args(["-c", script, "backend"])
            .model_path(model.path())
            .stop_timeout(Duration::from_secs(5))
            .build()
    }

    fn quick_policy(deadline: Duration) -> ReadyPolicy {
        ReadyPolicy::fixed(Duration::from_millis(20), deadline)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_drained_past_invalid_utf8() {
        let model = NamedTempFile::new().unwrap();
        let marker = tempfile::TempDir::new().unwrap();
        let done = marker.path().join("done");
        let script = format!(
            "printf '\\377\\n'; i=0; while [ $i -lt 20000 ]; do echo \"llama log line number $i\"; i=$((i+1)); done; touch '{}'; exec sleep 30",
            done.display()
        );
        let process = BackendProcess::spawn(&shell_config(&script, &model)).unwrap();

        let mut finished = false;
        for _ in 0..200 {
            if done.exists() {
                finished = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(finished, "backend blocked writing its output");

        process.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_model_is_rejected() {
        let config = BackendConfig::builder()
            .model_path("/nonexistent/harbor/model.gguf")
            .build();
        let err = BackendProcess::spawn(&config).err().unwrap();
        assert!(matches!(err, BackendError::ModelNotFound(_)));
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_spawn() {
        let model = NamedTempFile::new().unwrap();
        let config = BackendConfig::builder()
            .program("/nonexistent/harbor-backend-binary")
            .model_path(model.path())
            .build();
        let err = BackendProcess::spawn(&config).err().unwrap();
        assert!(matches!(err, BackendError::SpawnFailed(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_exit_is_fatal() {
        let model = NamedTempFile::new().unwrap();
        let config = shell_config("echo loading model; exit 3", &model);
        let mut process = BackendProcess::spawn(&config).unwrap();
        let client = BackendClient::new(closed_url().await, "k");

        let err = process
            .wait_ready(&client, quick_policy(Duration::from_secs(10)))
            .await
            .unwrap_err();

        assert!(matches!(err, BackendError::ProcessExited(Some(3))));
        assert_eq!(process.state(), BackendState::Stopped);
        assert_eq!(process.try_exit_code(), Some(None));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_stops_process() {
        let model = NamedTempFile::new().unwrap();
        let config = shell_config("exec sleep 30", &model);
        let mut process = BackendProcess::spawn(&config).unwrap();
        let client = BackendClient::new(closed_url().await, "k");

        let err = process
            .wait_ready(&client, quick_policy(Duration::from_millis(150)))
            .await
            .unwrap_err();

        assert!(matches!(err, BackendError::StartupTimeout(_)));
        assert_eq!(process.state(), BackendState::Stopped);
        assert!(process.pid().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ready_then_shutdown() {
        let model = NamedTempFile::new().unwrap();
        let config = shell_config("exec sleep 30", &model);
        let mut process = BackendProcess::spawn(&config).unwrap();
        assert_eq!(process.state(), BackendState::Starting);

        let url = spawn_server(Router::new().route("/health", get(|| async { "ok" }))).await;
        let client = BackendClient::new(url, "k");
        let attempts = process
            .wait_ready(&client, quick_policy(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(attempts, 1);
        assert_eq!(process.state(), BackendState::Ready);
        assert!(process.pid().is_some());
        assert_eq!(process.try_exit_code(), None);

        let status = process.shutdown().await.unwrap();
        assert!(!status.success());
    }
}

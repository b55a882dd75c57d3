//! Speech synthesis backends
//!
//! Each backend implements `SpeechBackend`. `probe` tries the variants in
//! rank order and returns the first one that works on this machine.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use super::espeak::EspeakBackend;
use super::sapi::SapiBackend;
use crate::persona::VoiceParams;
use crate::{Error, Result};

/// Bound on probing a candidate backend
pub(super) const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on file synthesis
pub(super) const FILE_SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(30);

/// Which backend implementation is in use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// `espeak` or `espeak-ng` command-line synthesizer
    Espeak,
    /// Windows System.Speech via PowerShell
    Sapi,
    /// In-process backend supplied by the embedding application
    Custom,
}

/// A voice offered by a backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoiceInfo {
    pub code: String,
    pub name: String,
}

/// One running synthesis
#[async_trait]
pub trait SpeechJob: Send {
    /// Wait for the job to finish
    async fn wait(&mut self) -> Result<()>;

    /// Ask the job to stop on its own
    ///
    /// Returns false when there is no way to ask and the job must be killed.
    fn request_stop(&mut self) -> bool;

    /// Stop the job at once and reap it
    async fn kill(&mut self);
}

/// Stop `job`, killing it if it is still running after `grace`
pub(crate) async fn terminate(job: &mut dyn SpeechJob, grace: Duration) {
    if job.request_stop() {
        if tokio::time::timeout(grace, job.wait()).await.is_ok() {
            return;
        }
        tracing::warn!(
            grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
            "speech job ignored stop request, killing"
        );
    }
    job.kill().await;
}

/// Capability set shared by all synthesis backends
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Backend identifier for status reporting
    fn kind(&self) -> BackendKind;

    /// Start speaking `text` through the audio device
    async fn start(&self, text: &str, params: &VoiceParams) -> Result<Box<dyn SpeechJob>>;

    /// Render `text` to a WAV file at `path`
    async fn synthesize_to_file(&self, text: &str, params: &VoiceParams, path: &Path)
    -> Result<()>;

    /// Voices the backend can use
    async fn voices(&self) -> Result<Vec<VoiceInfo>>;
}

/// Find the best available backend
///
/// An explicit `espeak_path` is tried first, then `espeak`, `espeak-ng`,
/// `espeak-ng.exe` and `espeak.exe` on `PATH`, then the OS speech API.
pub async fn probe(espeak_path: Option<&Path>) -> Option<Arc<dyn SpeechBackend>> {
    if let Some(backend) = EspeakBackend::probe(espeak_path).await {
        tracing::info!(program = %backend.program().display(), "using espeak speech backend");
        return Some(Arc::new(backend));
    }

    if let Some(backend) = SapiBackend::probe().await {
        tracing::info!("using Windows SAPI speech backend");
        return Some(Arc::new(backend));
    }

    tracing::warn!("no speech backend available, speech output disabled");
    None
}

/// Check that `program` runs, returning its first line of `--version` output
pub(super) async fn check_program(program: &Path, args: &[&str]) -> Option<String> {
    let output = tokio::time::timeout(
        PROBE_TIMEOUT,
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .ok()?
    .ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Some(stdout.lines().next().unwrap_or_default().trim().to_string())
}

/// A synthesis running as a child process
pub(super) struct ProcessJob {
    child: Child,
    program: PathBuf,
    stderr: Option<JoinHandle<String>>,
}

impl ProcessJob {
    /// Spawn `command`, optionally feeding `stdin_text`
    pub(super) async fn spawn(
        mut command: Command,
        program: PathBuf,
        stdin_text: Option<&str>,
    ) -> Result<Self> {
        let mut child = command
            .stdin(if stdin_text.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::SynthesisFailed(format!("failed to spawn {}: {e}", program.display()))
            })?;

        // Drain stderr as it arrives so a chatty synthesizer can't fill the pipe
        let stderr = child.stderr.take().map(|mut pipe| {
            tokio::spawn(async move {
                let mut text = String::new();
                let _ = pipe.read_to_string(&mut text).await;
                text
            })
        });

        if let (Some(text), Some(mut stdin)) = (stdin_text, child.stdin.take()) {
            stdin
                .write_all(text.as_bytes())
                .await
                .map_err(|e| Error::SynthesisFailed(format!("failed to write text: {e}")))?;
        }

        Ok(Self {
            child,
            program,
            stderr,
        })
    }

    async fn stderr_text(&mut self) -> String {
        match self.stderr.take() {
            Some(reader) => reader.await.unwrap_or_default(),
            None => String::new(),
        }
    }
}

#[async_trait]
impl SpeechJob for ProcessJob {
    async fn wait(&mut self) -> Result<()> {
        let status = self.child.wait().await?;
        if status.success() {
            return Ok(());
        }

        let stderr = self.stderr_text().await;
        let code = status.code().unwrap_or(-1);
        tracing::warn!(
            program = %self.program.display(),
            code,
            stderr = %stderr.trim(),
            "speech process failed"
        );
        Err(Error::SynthesisFailed(format!(
            "{} exited with code {code}: {}",
            self.program.display(),
            stderr.trim()
        )))
    }

    #[cfg(unix)]
    fn request_stop(&mut self) -> bool {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id().and_then(|id| i32::try_from(id).ok()) else {
            return false;
        };
        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(pid, error = %e, "could not signal speech process");
                false
            }
        }
    }

    // No polite stop for a console child on this platform
    #[cfg(not(unix))]
    fn request_stop(&mut self) -> bool {
        false
    }

    async fn kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            // Already exited
            tracing::debug!(error = %e, "speech process not running");
        }
        if let Err(e) = self.child.wait().await {
            tracing::warn!(program = %self.program.display(), error = %e, "failed to reap speech process");
        }
    }
}

/// Run `command` to completion within `limit`, mapping failures to synthesis errors
pub(super) async fn run_to_completion(
    command: Command,
    program: &Path,
    stdin_text: Option<&str>,
    limit: Duration,
) -> Result<()> {
    let mut job = ProcessJob::spawn(command, program.to_path_buf(), stdin_text).await?;

    let outcome = tokio::time::timeout(limit, job.wait()).await;
    match outcome {
        Ok(result) => result,
        Err(_) => {
            terminate(&mut job, Duration::from_millis(100)).await;
            Err(Error::SynthesisFailed(format!(
                "{} timed out after {limit:?}",
                program.display()
            )))
        }
    }
}

//! Voice renderer: one speech backend, one job at a time

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{oneshot, watch};

use super::audio;
use super::backend::{BackendKind, SpeechBackend, SpeechJob, VoiceInfo, terminate};
use super::clean::clean_for_speech;
use crate::config::VoiceConfig;
use crate::persona::VoiceParams;
use crate::{Error, Result};

/// Snapshot of renderer state
#[derive(Debug, Clone, Serialize)]
pub struct RendererStatus {
    pub available: bool,
    pub enabled: bool,
    pub speaking: bool,
    pub voice: VoiceParams,
    pub backend: Option<BackendKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Handle on the job occupying the slot
struct ActiveJob {
    id: u64,
    cancel: oneshot::Sender<()>,
    done: watch::Receiver<Option<bool>>,
}

impl ActiveJob {
    fn is_running(&self) -> bool {
        self.done.borrow().is_none()
    }

    /// Cancel the job and wait until its task has finished
    async fn cancel_and_wait(self) {
        let _ = self.cancel.send(());
        let mut done = self.done;
        let _ = done.wait_for(Option::is_some).await;
        tracing::debug!(job = self.id, "speech job stopped");
    }
}

/// Renders text as speech through the selected backend
///
/// At most one synthesis job runs at a time. Starting a new one cancels
/// the previous job and waits for it to end first.
pub struct VoiceRenderer {
    backend: Option<Arc<dyn SpeechBackend>>,
    params: RwLock<VoiceParams>,
    enabled: AtomicBool,
    stop_grace: Duration,
    job: tokio::sync::Mutex<Option<ActiveJob>>,
    next_job_id: AtomicU64,
    last_error: Arc<Mutex<Option<String>>>,
}

impl VoiceRenderer {
    /// Create a renderer around `backend`
    #[must_use]
    pub fn new(backend: Option<Arc<dyn SpeechBackend>>, config: &VoiceConfig) -> Self {
        Self {
            backend,
            params: RwLock::new(VoiceParams::default()),
            enabled: AtomicBool::new(config.enabled),
            stop_grace: config.stop_grace,
            job: tokio::sync::Mutex::new(None),
            next_job_id: AtomicU64::new(1),
            last_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Probe for a backend and create a renderer around it
    pub async fn detect(config: &VoiceConfig) -> Self {
        let backend = if config.enabled {
            super::backend::probe(config.espeak_path.as_deref()).await
        } else {
            tracing::info!("voice disabled, skipping speech backend probe");
            None
        };
        Self::new(backend, config)
    }

    /// A renderer with no backend; every speak call returns false
    #[must_use]
    pub fn unavailable() -> Self {
        Self::new(None, &VoiceConfig::default())
    }

    /// Whether a backend was found
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    /// Whether speech output is enabled
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Set voice parameters for later synthesis, clamped to valid ranges
    pub fn configure(&self, params: VoiceParams) {
        let params = params.clamped();
        tracing::debug!(
            voice = %params.voice_id,
            rate = params.rate_wpm,
            pitch = params.pitch,
            gain = params.gain,
            "voice configured"
        );
        *self.params.write().unwrap_or_else(PoisonError::into_inner) = params;
    }

    /// Current voice parameters
    #[must_use]
    pub fn voice_params(&self) -> VoiceParams {
        self.params
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Speak `text` with the configured voice
    ///
    /// Returns false without side effects when disabled, unavailable or
    /// given empty text. A blocking call returns once speech has finished
    /// and observes false if it was stopped or failed. A non-blocking call
    /// returns once the job has started.
    pub async fn speak(&self, text: &str, blocking: bool) -> bool {
        let params = self.voice_params();
        self.speak_with(text, &params, blocking).await
    }

    /// Speak `text` with explicit voice parameters, leaving the configured ones alone
    pub async fn speak_with(&self, text: &str, params: &VoiceParams, blocking: bool) -> bool {
        if !self.is_enabled() {
            tracing::debug!("speech disabled, ignoring speak request");
            return false;
        }
        let Some(backend) = &self.backend else {
            tracing::debug!("no speech backend, ignoring speak request");
            return false;
        };

        let cleaned = clean_for_speech(text);
        if cleaned.is_empty() {
            return false;
        }
        let params = params.clone().clamped();

        let done = {
            let mut slot = self.job.lock().await;
            if let Some(previous) = slot.take() {
                previous.cancel_and_wait().await;
            }

            let job = match backend.start(&cleaned, &params).await {
                Ok(job) => job,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to start speech");
                    self.record_error(&e);
                    return false;
                }
            };

            let id = self.next_job_id.fetch_add(1, Ordering::SeqCst);
            let (cancel_tx, cancel_rx) = oneshot::channel();
            let (done_tx, done_rx) = watch::channel(None);
            tokio::spawn(drive_job(
                id,
                job,
                cancel_rx,
                done_tx,
                self.stop_grace,
                self.last_error.clone(),
            ));
            tracing::debug!(job = id, voice = %params.voice_id, chars = cleaned.len(), "speech started");

            *slot = Some(ActiveJob {
                id,
                cancel: cancel_tx,
                done: done_rx.clone(),
            });
            done_rx
        };

        if !blocking {
            return true;
        }
        wait_outcome(done).await
    }

    /// Stop any in-flight speech; a no-op when idle
    pub async fn stop(&self) {
        let previous = self.job.lock().await.take();
        if let Some(job) = previous {
            job.cancel_and_wait().await;
        }
    }

    /// Allow speech output
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
        tracing::info!("speech enabled");
    }

    /// Stop speaking and refuse further speech until enabled again
    pub async fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        self.stop().await;
        tracing::info!("speech disabled");
    }

    /// Synthesize `text` into a WAV file at `path`
    pub async fn speak_to_file(&self, text: &str, path: &Path) -> bool {
        let params = self.voice_params();
        match self.render_file(text, &params, path).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "speech to file failed");
                self.record_error(&e);
                false
            }
        }
    }

    /// Synthesize `text` and return the WAV bytes
    ///
    /// # Errors
    ///
    /// `SynthesisUnavailable` without a backend, `EmptyInput` for empty
    /// text, `SynthesisFailed` or `Audio` if the backend output is unusable
    pub async fn synthesize_wav(&self, text: &str, params: Option<&VoiceParams>) -> Result<Vec<u8>> {
        let params = params.cloned().unwrap_or_else(|| self.voice_params());
        let path = tempfile::Builder::new()
            .prefix("remo-speech-")
            .suffix(".wav")
            .tempfile()?
            .into_temp_path();

        let result = async {
            self.render_file(text, &params, &path).await?;
            let bytes = tokio::fs::read(&path).await?;
            audio::validate_wav(&bytes)?;
            Ok::<_, Error>(bytes)
        }
        .await;

        if let Err(e) = &result {
            self.record_error(e);
        }
        result
    }

    async fn render_file(&self, text: &str, params: &VoiceParams, path: &Path) -> Result<()> {
        let backend = self.backend.as_ref().ok_or(Error::SynthesisUnavailable)?;
        let cleaned = clean_for_speech(text);
        if cleaned.is_empty() {
            return Err(Error::EmptyInput);
        }
        backend
            .synthesize_to_file(&cleaned, &params.clone().clamped(), path)
            .await
    }

    /// Voices offered by the backend
    ///
    /// # Errors
    ///
    /// `SynthesisUnavailable` without a backend, or the backend's listing error
    pub async fn voices(&self) -> Result<Vec<VoiceInfo>> {
        let backend = self.backend.as_ref().ok_or(Error::SynthesisUnavailable)?;
        backend.voices().await
    }

    /// Current state, including the most recent synthesis error
    pub async fn status(&self) -> RendererStatus {
        let speaking = self
            .job
            .lock()
            .await
            .as_ref()
            .is_some_and(ActiveJob::is_running);

        RendererStatus {
            available: self.is_available(),
            enabled: self.is_enabled(),
            speaking,
            voice: self.voice_params(),
            backend: self.backend.as_ref().map(|b| b.kind()),
            last_error: self
                .last_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    fn record_error(&self, error: &Error) {
        record_error(&self.last_error, error);
    }
}

fn record_error(slot: &Mutex<Option<String>>, error: &Error) {
    *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(error.to_string());
}

/// Run one job until it finishes or is cancelled, then publish the outcome
async fn drive_job(
    id: u64,
    mut job: Box<dyn SpeechJob>,
    cancel: oneshot::Receiver<()>,
    done: watch::Sender<Option<bool>>,
    grace: Duration,
    last_error: Arc<Mutex<Option<String>>>,
) {
    let finished = tokio::select! {
        result = job.wait() => Some(result),
        _ = cancel => None,
    };

    let outcome = match finished {
        Some(Ok(())) => {
            tracing::debug!(job = id, "speech finished");
            true
        }
        Some(Err(e)) => {
            tracing::warn!(job = id, error = %e, "speech failed");
            record_error(&last_error, &e);
            false
        }
        None => {
            terminate(job.as_mut(), grace).await;
            false
        }
    };

    let _ = done.send(Some(outcome));
}

async fn wait_outcome(mut done: watch::Receiver<Option<bool>>) -> bool {
    done.wait_for(Option::is_some)
        .await
        .map(|outcome| (*outcome).unwrap_or(false))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::testing::MockBackend;

    fn renderer(backend: MockBackend) -> VoiceRenderer {
        VoiceRenderer::new(Some(Arc::new(backend)), &VoiceConfig::default())
    }

    #[tokio::test]
    async fn blocking_speak_completes() {
        let backend = MockBackend::new(Duration::from_millis(10));
        let spoken = backend.spoken.clone();
        let renderer = renderer(backend);

        assert!(renderer.speak("Hello **there**", true).await);
        assert!(!renderer.status().await.speaking);
        assert_eq!(spoken.lock().unwrap()[0].0, "Hello there");
    }

    #[tokio::test]
    async fn at_most_one_job_in_flight() {
        let backend = MockBackend::new(Duration::from_secs(30));
        let peak = backend.peak.clone();
        let started = backend.started.clone();
        let renderer = renderer(backend);

        assert!(renderer.speak("first", false).await);
        assert!(renderer.speak("second", false).await);
        assert!(renderer.speak("third", false).await);

        assert_eq!(started.load(Ordering::SeqCst), 3);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(renderer.status().await.speaking);

        renderer.stop().await;
        assert!(!renderer.status().await.speaking);
    }

    #[tokio::test]
    async fn stop_interrupts_blocking_speak() {
        let renderer = Arc::new(renderer(MockBackend::new(Duration::from_secs(30))));

        let speaker = {
            let renderer = renderer.clone();
            tokio::spawn(async move { renderer.speak("long story", true).await })
        };

        while !renderer.status().await.speaking {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        renderer.stop().await;

        assert!(!speaker.await.unwrap());
    }

    fn renderer_with_grace(backend: MockBackend, grace: Duration) -> VoiceRenderer {
        let config = VoiceConfig {
            stop_grace: grace,
            ..VoiceConfig::default()
        };
        VoiceRenderer::new(Some(Arc::new(backend)), &config)
    }

    #[tokio::test]
    async fn stop_asks_before_killing() {
        let backend = MockBackend::new(Duration::from_secs(30));
        let kills = backend.kills.clone();
        let running = backend.running.clone();
        let renderer = renderer_with_grace(backend, Duration::from_secs(10));

        assert!(renderer.speak("long story", false).await);
        renderer.stop().await;

        assert_eq!(kills.load(Ordering::SeqCst), 0);
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stop_kills_job_that_ignores_the_request() {
        let mut backend = MockBackend::new(Duration::from_secs(30));
        backend.ignores_stop = true;
        let kills = backend.kills.clone();
        let running = backend.running.clone();
        let renderer = renderer_with_grace(backend, Duration::from_millis(50));

        assert!(renderer.speak("long story", false).await);
        let started = std::time::Instant::now();
        renderer.stop().await;

        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(kills.load(Ordering::SeqCst), 1);
        assert_eq!(running.load(Ordering::SeqCst), 0);
        assert!(!renderer.status().await.speaking);
    }

    #[tokio::test]
    async fn stop_when_idle_is_noop() {
        let renderer = renderer(MockBackend::new(Duration::from_millis(1)));
        renderer.stop().await;
        renderer.stop().await;
        assert!(!renderer.status().await.speaking);
    }

    #[tokio::test]
    async fn disabled_renderer_never_invokes_backend() {
        let backend = MockBackend::new(Duration::from_millis(1));
        let started = backend.started.clone();
        let renderer = renderer(backend);

        renderer.disable().await;
        assert!(!renderer.speak("hello", true).await);
        assert!(!renderer.speak("hello", false).await);
        assert_eq!(started.load(Ordering::SeqCst), 0);

        renderer.enable();
        assert!(renderer.speak("hello", true).await);
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_text_is_rejected() {
        let backend = MockBackend::new(Duration::from_millis(1));
        let started = backend.started.clone();
        let renderer = renderer(backend);

        assert!(!renderer.speak("   \n ", false).await);
        assert_eq!(started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unavailable_renderer_degrades() {
        let renderer = VoiceRenderer::unavailable();
        assert!(!renderer.speak("hello", true).await);
        assert!(matches!(
            renderer.synthesize_wav("hello", None).await,
            Err(Error::SynthesisUnavailable)
        ));

        let status = renderer.status().await;
        assert!(!status.available);
        assert!(status.backend.is_none());
    }

    #[tokio::test]
    async fn failures_surface_in_status() {
        let mut backend = MockBackend::new(Duration::from_millis(1));
        backend.fail = true;
        let renderer = renderer(backend);

        assert!(!renderer.speak("hello", true).await);
        let status = renderer.status().await;
        assert!(status.last_error.unwrap().contains("mock failure"));
    }

    #[tokio::test]
    async fn configure_clamps_and_override_leaves_config() {
        let backend = MockBackend::new(Duration::from_millis(1));
        let spoken = backend.spoken.clone();
        let renderer = renderer(backend);

        renderer.configure(VoiceParams {
            voice_id: "en".into(),
            rate_wpm: 1000,
            pitch: 200,
            gain: 300,
        });
        let configured = renderer.voice_params();
        assert_eq!((configured.rate_wpm, configured.pitch, configured.gain), (500, 99, 200));

        let other = VoiceParams {
            voice_id: "en-gb".into(),
            rate_wpm: 200,
            pitch: 60,
            gain: 105,
        };
        assert!(renderer.speak_with("hi", &other, true).await);
        assert_eq!(spoken.lock().unwrap()[0].1, other);
        assert_eq!(renderer.voice_params(), configured);
    }

    #[tokio::test]
    async fn synthesizes_valid_wav() {
        let renderer = renderer(MockBackend::new(Duration::from_millis(1)));
        let wav = renderer.synthesize_wav("hello", None).await.unwrap();
        assert_eq!(&wav[..4], b"RIFF");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        assert!(renderer.speak_to_file("hello", &path).await);
        assert!(path.exists());
        assert!(!renderer.speak_to_file("  ", &path).await);
    }
}

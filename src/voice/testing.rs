//! In-memory speech backend for unit tests

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::audio;
use super::backend::{BackendKind, SpeechBackend, SpeechJob, VoiceInfo};
use crate::persona::VoiceParams;
use crate::{Error, Result};

/// Backend whose jobs last `duration` and count how many run at once
pub(crate) struct MockBackend {
    pub(crate) duration: Duration,
    pub(crate) fail: bool,
    /// Jobs keep running when asked to stop and must be killed
    pub(crate) ignores_stop: bool,
    pub(crate) kills: Arc<AtomicUsize>,
    pub(crate) running: Arc<AtomicUsize>,
    pub(crate) peak: Arc<AtomicUsize>,
    pub(crate) started: Arc<AtomicUsize>,
    pub(crate) spoken: Arc<Mutex<Vec<(String, VoiceParams)>>>,
}

impl MockBackend {
    pub(crate) fn new(duration: Duration) -> Self {
        Self {
            duration,
            fail: false,
            ignores_stop: false,
            kills: Arc::default(),
            running: Arc::default(),
            peak: Arc::default(),
            started: Arc::default(),
            spoken: Arc::default(),
        }
    }
}

struct MockJob {
    duration: Duration,
    fail: bool,
    ignores_stop: bool,
    stop_requested: bool,
    kills: Arc<AtomicUsize>,
    running: Arc<AtomicUsize>,
    finished: bool,
}

impl MockJob {
    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.running.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl SpeechJob for MockJob {
    async fn wait(&mut self) -> Result<()> {
        if !self.stop_requested || self.ignores_stop {
            tokio::time::sleep(self.duration).await;
        }
        self.finish();
        if self.fail {
            Err(Error::SynthesisFailed("mock failure".into()))
        } else {
            Ok(())
        }
    }

    fn request_stop(&mut self) -> bool {
        self.stop_requested = true;
        true
    }

    async fn kill(&mut self) {
        self.kills.fetch_add(1, Ordering::SeqCst);
        self.finish();
    }
}

#[async_trait]
impl SpeechBackend for MockBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Custom
    }

    async fn start(&self, text: &str, params: &VoiceParams) -> Result<Box<dyn SpeechJob>> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.started.fetch_add(1, Ordering::SeqCst);
        self.spoken
            .lock()
            .unwrap()
            .push((text.to_string(), params.clone()));
        Ok(Box::new(MockJob {
            duration: self.duration,
            fail: self.fail,
            ignores_stop: self.ignores_stop,
            stop_requested: false,
            kills: self.kills.clone(),
            running: self.running.clone(),
            finished: false,
        }))
    }

    async fn synthesize_to_file(&self, _text: &str, _params: &VoiceParams, path: &Path) -> Result<()> {
        std::fs::write(path, audio::tests::sine_wav(16_000, 0.1))?;
        Ok(())
    }

    async fn voices(&self) -> Result<Vec<VoiceInfo>> {
        Ok(vec![VoiceInfo {
            code: "en".into(),
            name: "English".into(),
        }])
    }
}

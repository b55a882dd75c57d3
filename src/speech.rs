//! Persona-aware speech surface
//!
//! `SpeechService` sits between callers and the `VoiceRenderer`. It resolves
//! persona ids to voice parameters and runs fire-and-forget speech on a
//! spawned task, keeping at most one such dispatch alive.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::persona::{PersonaCatalog, VoiceParams};
use crate::voice::{RendererStatus, VoiceInfo, VoiceRenderer};
use crate::{Error, Result};

/// Called when a background speech request finishes
///
/// Receives whether speech completed, the text and the persona id used.
pub type SpeechCallback = Box<dyn FnOnce(bool, String, String) + Send + 'static>;

/// Renderer status plus the persona currently driving the voice
#[derive(Debug, Clone, Serialize)]
pub struct SpeechStatus {
    #[serde(flatten)]
    pub renderer: RendererStatus,
    pub persona: String,
}

/// A callback that has not been told the outcome yet
struct PendingCallback {
    callback: SpeechCallback,
    text: String,
    persona: String,
}

type CallbackSlot = Arc<Mutex<Option<PendingCallback>>>;

/// Report `success` unless the callback already fired
fn report(slot: &CallbackSlot, success: bool) {
    let pending = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(pending) = pending {
        (pending.callback)(success, pending.text, pending.persona);
    }
}

/// The background speech task currently in flight
struct Dispatch {
    id: u64,
    handle: JoinHandle<()>,
    callback: CallbackSlot,
    done: watch::Receiver<bool>,
}

/// Speech operations addressed by persona
pub struct SpeechService {
    renderer: Arc<VoiceRenderer>,
    catalog: Arc<PersonaCatalog>,
    dispatch: Mutex<Option<Dispatch>>,
    next_dispatch_id: AtomicU64,
}

impl SpeechService {
    #[must_use]
    pub fn new(renderer: Arc<VoiceRenderer>, catalog: Arc<PersonaCatalog>) -> Self {
        Self {
            renderer,
            catalog,
            dispatch: Mutex::new(None),
            next_dispatch_id: AtomicU64::new(1),
        }
    }

    fn lock_dispatch(&self) -> MutexGuard<'_, Option<Dispatch>> {
        self.dispatch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The underlying renderer
    #[must_use]
    pub fn renderer(&self) -> &Arc<VoiceRenderer> {
        &self.renderer
    }

    /// Resolve a persona to its id and voice; `None` means the active persona
    fn resolve(&self, persona: Option<&str>) -> Result<(String, VoiceParams)> {
        match persona {
            Some(id) => self
                .catalog
                .get(id)
                .map(|p| (p.id, p.voice))
                .ok_or_else(|| Error::UnknownPersona(id.to_string())),
            None => Ok((self.catalog.active_id(), self.renderer.voice_params())),
        }
    }

    /// Speak `text` in the voice of `persona`, or the active voice
    ///
    /// Returns false for unknown personas and whenever the renderer refuses.
    pub async fn speak(&self, text: &str, persona: Option<&str>, blocking: bool) -> bool {
        match self.resolve(persona) {
            Ok((_, params)) => self.renderer.speak_with(text, &params, blocking).await,
            Err(e) => {
                tracing::warn!(error = %e, "speak rejected");
                false
            }
        }
    }

    /// Speak `text` on a background task and return at once
    ///
    /// Any earlier background dispatch is aborted first and its callback
    /// receives `false`. Every callback fires exactly once. Returns false,
    /// without spawning, if the request can't produce speech.
    pub fn speak_async(
        &self,
        text: String,
        persona: Option<&str>,
        callback: Option<SpeechCallback>,
    ) -> bool {
        let (persona_id, params) = match self.resolve(persona) {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!(error = %e, "background speech rejected");
                return false;
            }
        };
        if !self.renderer.is_enabled() || !self.renderer.is_available() || text.trim().is_empty() {
            return false;
        }

        let slot: CallbackSlot = Arc::new(Mutex::new(callback.map(|callback| PendingCallback {
            callback,
            text: text.clone(),
            persona: persona_id.clone(),
        })));
        let (done_tx, done) = watch::channel(false);
        let id = self.next_dispatch_id.fetch_add(1, Ordering::SeqCst);

        let superseded = {
            let mut dispatch = self.lock_dispatch();
            let previous = dispatch.take();
            if let Some(previous) = &previous {
                previous.handle.abort();
            }

            tracing::debug!(dispatch = id, persona = %persona_id, chars = text.len(), "dispatching background speech");
            let renderer = self.renderer.clone();
            let task_slot = slot.clone();
            let handle = tokio::spawn(async move {
                let success = renderer.speak_with(&text, &params, true).await;
                tracing::debug!(dispatch = id, persona = %persona_id, success, "background speech finished");
                report(&task_slot, success);
                let _ = done_tx.send(true);
            });

            *dispatch = Some(Dispatch {
                id,
                handle,
                callback: slot,
                done,
            });
            previous
        };

        // Outside the lock so the callback may dispatch again
        if let Some(previous) = superseded {
            tracing::debug!(dispatch = previous.id, "background speech superseded");
            report(&previous.callback, false);
        }
        true
    }

    /// Wait until no background speech is in flight
    pub async fn wait_idle(&self) {
        loop {
            let current = self
                .lock_dispatch()
                .as_ref()
                .map(|d| (d.id, d.done.clone()));
            let Some((id, mut done)) = current else {
                return;
            };

            // An aborted task drops its sender, which also ends the wait
            let _ = done.wait_for(|finished| *finished).await;

            let mut dispatch = self.lock_dispatch();
            if dispatch.as_ref().is_some_and(|d| d.id == id) {
                *dispatch = None;
                return;
            }
        }
    }

    /// Stop any speech in progress
    pub async fn stop(&self) {
        self.renderer.stop().await;
    }

    pub fn enable(&self) {
        self.renderer.enable();
    }

    pub async fn disable(&self) {
        self.renderer.disable().await;
    }

    /// Synthesize `text` as WAV bytes in the voice of `persona`
    ///
    /// # Errors
    ///
    /// `UnknownPersona` for an unregistered id, otherwise as
    /// [`VoiceRenderer::synthesize_wav`]
    pub async fn synthesize_wav(&self, text: &str, persona: Option<&str>) -> Result<Vec<u8>> {
        let (_, params) = self.resolve(persona)?;
        self.renderer.synthesize_wav(text, Some(&params)).await
    }

    /// Voices offered by the speech backend
    ///
    /// # Errors
    ///
    /// `SynthesisUnavailable` without a backend
    pub async fn voices(&self) -> Result<Vec<VoiceInfo>> {
        self.renderer.voices().await
    }

    pub async fn status(&self) -> SpeechStatus {
        SpeechStatus {
            renderer: self.renderer.status().await,
            persona: self.catalog.active_id(),
        }
    }
}

//! Keeps the voice renderer in step with the active persona

use std::sync::Arc;

use super::{PersonaCatalog, PersonaDefinition, PersonaObserver};
use crate::voice::VoiceRenderer;

/// Applies the active persona's voice parameters to a renderer
pub struct PersonaSpeechBinding {
    renderer: Arc<VoiceRenderer>,
}

impl PersonaSpeechBinding {
    /// Configure `renderer` for the current persona and follow later switches
    pub fn attach(catalog: &PersonaCatalog, renderer: Arc<VoiceRenderer>) -> Arc<Self> {
        let binding = Arc::new(Self { renderer });
        binding.persona_changed(&catalog.active());
        catalog.subscribe(binding.clone());
        binding
    }
}

impl PersonaObserver for PersonaSpeechBinding {
    fn persona_changed(&self, persona: &PersonaDefinition) {
        tracing::debug!(
            persona = %persona.id,
            voice = %persona.voice.voice_id,
            rate = persona.voice.rate_wpm,
            "applying persona voice"
        );
        self.renderer.configure(persona.voice.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follows_active_persona() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = PersonaCatalog::open(dir.path().join("personas.yaml"));
        let renderer = Arc::new(VoiceRenderer::unavailable());

        let _binding = PersonaSpeechBinding::attach(&catalog, renderer.clone());
        assert_eq!(renderer.voice_params().voice_id, "en");
        assert_eq!(renderer.voice_params().rate_wpm, 180);

        assert!(catalog.set_active("professional"));
        assert_eq!(renderer.voice_params().voice_id, "en-us");
        assert_eq!(renderer.voice_params().gain, 95);

        assert!(!catalog.set_active("nobody"));
        assert_eq!(renderer.voice_params().voice_id, "en-us");
    }
}

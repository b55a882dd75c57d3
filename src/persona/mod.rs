//! Persona definitions and management
//!
//! A persona bundles a system prompt for the model backend with the voice
//! parameters used when its replies are spoken.

mod binding;
mod catalog;

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

pub use binding::PersonaSpeechBinding;
pub use catalog::{PersonaCatalog, PersonaObserver};

/// Persona used when nothing else is selected
pub const DEFAULT_PERSONA_ID: &str = "remo";

/// Built-in personas, embedded at compile time
const BUILTIN_PERSONAS: &[(&str, &str)] = &[
    ("remo", include_str!("../../personas/remo.yaml")),
    ("professional", include_str!("../../personas/professional.yaml")),
    ("creative", include_str!("../../personas/creative.yaml")),
];

/// Greeting used by personas that don't define one
const DEFAULT_GREETING: &str = "Hello! How can I help you today?";

/// Acoustic parameters for the speech backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceParams {
    /// Backend voice identifier (e.g. "en", "en-us")
    pub voice_id: String,

    /// Speaking rate in words per minute
    pub rate_wpm: u32,

    /// Pitch, 0-99
    pub pitch: u32,

    /// Amplitude, 0-200 (100 is normal)
    pub gain: u32,
}

impl VoiceParams {
    /// Accepted speaking rate range
    pub const RATE_RANGE: RangeInclusive<u32> = 80..=500;

    /// Accepted pitch range
    pub const PITCH_RANGE: RangeInclusive<u32> = 0..=99;

    /// Accepted gain range
    pub const GAIN_RANGE: RangeInclusive<u32> = 0..=200;

    /// Clamp every numeric parameter into its accepted range
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            rate_wpm: clamp(self.rate_wpm, &Self::RATE_RANGE),
            pitch: clamp(self.pitch, &Self::PITCH_RANGE),
            gain: clamp(self.gain, &Self::GAIN_RANGE),
            voice_id: self.voice_id,
        }
    }
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            voice_id: "en".to_string(),
            rate_wpm: 175,
            pitch: 50,
            gain: 100,
        }
    }
}

fn clamp(value: u32, range: &RangeInclusive<u32>) -> u32 {
    value.clamp(*range.start(), *range.end())
}

/// A named persona
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaDefinition {
    /// Unique identifier
    pub id: String,

    /// Human-readable name
    pub display_name: String,

    /// Short description shown in listings
    #[serde(default)]
    pub description: String,

    /// Prompt sent with every chat request
    #[serde(default)]
    pub system_prompt: String,

    /// Voice parameters for spoken replies
    pub voice: VoiceParams,

    /// Opening line for new conversations
    #[serde(default = "default_greeting")]
    pub greeting: String,
}

fn default_greeting() -> String {
    DEFAULT_GREETING.to_string()
}

/// A caller-supplied persona, validated before it enters the catalog
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersonaDraft {
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub system_prompt: Option<String>,
    pub voice_id: Option<String>,
    pub rate_wpm: Option<u32>,
    pub pitch: Option<u32>,
    pub gain: Option<u32>,
    pub greeting: Option<String>,
}

impl PersonaDraft {
    /// Build a definition, or `None` if a required field is missing
    ///
    /// Voice id, rate, pitch and gain are required, plus at least one of
    /// description and system prompt.
    #[must_use]
    pub fn into_definition(self, id: &str) -> Option<PersonaDefinition> {
        let voice_id = self.voice_id.filter(|v| !v.trim().is_empty())?;
        let (rate_wpm, pitch, gain) = (self.rate_wpm?, self.pitch?, self.gain?);

        let description = non_blank(self.description);
        let system_prompt = non_blank(self.system_prompt);
        if description.is_none() && system_prompt.is_none() {
            return None;
        }

        Some(PersonaDefinition {
            id: id.to_string(),
            display_name: non_blank(self.display_name).unwrap_or_else(|| id.to_string()),
            description: description.clone().unwrap_or_default(),
            system_prompt: system_prompt.or(description).unwrap_or_default(),
            voice: VoiceParams {
                voice_id,
                rate_wpm,
                pitch,
                gain,
            },
            greeting: non_blank(self.greeting).unwrap_or_else(default_greeting),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Whether `id` names a built-in persona
#[must_use]
pub fn is_builtin(id: &str) -> bool {
    BUILTIN_PERSONAS.iter().any(|(builtin, _)| *builtin == id)
}

/// Parse the embedded built-in personas
///
/// An embedded file that fails to parse is logged and skipped.
#[must_use]
pub fn builtin_personas() -> Vec<PersonaDefinition> {
    BUILTIN_PERSONAS
        .iter()
        .filter_map(|(id, yaml)| match serde_yaml::from_str::<PersonaDefinition>(yaml) {
            Ok(persona) => Some(persona),
            Err(e) => {
                tracing::error!(persona = id, error = %e, "invalid built-in persona");
                None
            }
        })
        .collect()
}

/// Fallback used only if the embedded default persona is unusable
fn minimal_default() -> PersonaDefinition {
    PersonaDefinition {
        id: DEFAULT_PERSONA_ID.to_string(),
        display_name: "Remo".to_string(),
        description: "A friendly, helpful AI assistant".to_string(),
        system_prompt: String::new(),
        voice: VoiceParams {
            voice_id: "en".to_string(),
            rate_wpm: 180,
            pitch: 55,
            gain: 100,
        },
        greeting: default_greeting(),
    }
}

//! Voice processing module
//!
//! Speech output goes through a `VoiceRenderer` backed by a local
//! synthesizer. Speech input is transcribed by a remote Whisper-compatible
//! endpoint.

mod audio;
mod backend;
mod clean;
mod espeak;
mod renderer;
mod sapi;
mod stt;
#[cfg(test)]
pub(crate) mod testing;

pub use audio::{WavInfo, extension_for, validate_wav};
pub use backend::{BackendKind, SpeechBackend, SpeechJob, VoiceInfo, probe};
pub use clean::{SPOKEN_SYMBOLS, clean_for_speech};
pub use espeak::EspeakBackend;
pub use renderer::{RendererStatus, VoiceRenderer};
pub use sapi::SapiBackend;
pub use stt::Transcriber;

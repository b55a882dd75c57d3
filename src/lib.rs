//! Remo Gateway - Voice-enabled assistant gateway
//!
//! This library provides the core functionality for the Remo gateway:
//! - Chat with a remote workspace model, whole or streamed
//! - Persona management (system prompt and voice per persona)
//! - Speech output through local synthesizers, speech input through Whisper
//! - An HTTP API over all of the above
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Interfaces                        │
//! │          HTTP API        │        CLI               │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Remo Gateway                        │
//! │  ChatGateway  │  PersonaCatalog  │  SpeechService   │
//! └───────┬────────────────────────────────┬────────────┘
//!         │                                │
//! ┌───────▼──────────────┐   ┌─────────────▼────────────┐
//! │ Workspace chat API   │   │ espeak / System.Speech   │
//! │ Whisper STT          │   │ (VoiceRenderer)          │
//! └──────────────────────┘   └──────────────────────────┘
//! ```

pub mod api;
pub mod chat;
pub mod config;
pub mod error;
pub mod persona;
pub mod speech;
pub mod voice;

pub use chat::{ChatGateway, ChatReply, ConversationSession, Message, Role};
pub use config::Config;
pub use error::{Error, Result};
pub use persona::{PersonaCatalog, PersonaDefinition, PersonaSpeechBinding, VoiceParams};
pub use speech::SpeechService;
pub use voice::{Transcriber, VoiceRenderer, clean_for_speech};

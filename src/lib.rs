//! Topic-to-dialogue media generation.
//!
//! A [`Pipeline`] asks a chat-completion model for a short two-persona
//! transcript, synthesizes each line with a TTS provider, and joins the
//! clips (optionally over background music) with `ffmpeg`.

pub mod args;
pub mod audio;
pub mod config;
pub mod error;
pub mod http;
pub mod persona;
pub mod pipeline;
pub mod transcript;
pub mod tts;
pub mod utils;
pub mod voices;

pub use config::PipelineConfig;
pub use error::{ErrorKind, PipelineError};
pub use persona::{Persona, VoiceTable};
pub use pipeline::{GenerationRequest, GenerationResult, Pipeline, PipelineSettings, Stage};

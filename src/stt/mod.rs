//! Speech-to-Text (STT) provider abstraction and implementations.
//!
//! A provider turns a recorded consultation file into text. Providers never
//! retry on their own; a failed transcription aborts the attempt.

mod decode;
mod gemini;
mod whisper;

pub use decode::{decode_file_to_pcm, TARGET_SAMPLE_RATE};
pub use gemini::GeminiSttProvider;
#[cfg(feature = "local-whisper")]
pub use whisper::WhisperCppLoader;
pub use whisper::{
    default_model_dir, LocalWhisperConfig, LocalWhisperProvider, ModelTier, SpeechModel,
    SpeechModelLoader,
};

use crate::llm::LlmError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Extensions accepted for consultation recordings.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "ogg", "flac"];

/// MIME type sent to the cloud transcription provider for `path`.
///
/// Unrecognised extensions are sent as `audio/mpeg`.
pub fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("m4a") => "audio/mp4",
        Some("ogg") => "audio/ogg",
        Some("flac") => "audio/flac",
        _ => "audio/mpeg",
    }
}

/// Whether `path` has one of the [`AUDIO_EXTENSIONS`].
pub fn is_supported_audio(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Result of a transcription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcription {
    pub text: String,
    /// Language the engine transcribed in.
    pub language: String,
}

/// Errors that can occur during STT operations
#[derive(Debug, thiserror::Error)]
pub enum SttError {
    #[error("Audio file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Audio processing error: {0}")]
    Audio(String),

    #[error("Failed to load speech model: {0}")]
    ModelLoad(String),

    #[error("Speech engine error: {0}")]
    Engine(String),

    #[error("Local speech engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Remote transcription failed: {0}")]
    Remote(#[from] LlmError),

    #[error("Timeout: {0}")]
    Timeout(String),
}

/// Trait for Speech-to-Text providers
#[async_trait]
pub trait SttProvider: Send + Sync {
    /// Transcribe the audio file at `audio_path`.
    async fn transcribe(&self, audio_path: &Path) -> Result<Transcription, SttError>;

    /// Get the name of this provider
    fn name(&self) -> &'static str;
}

//! Consultation transcription and report generation for veterinary clinics.
//!
//! Audio (or pasted text) plus the consultation form goes in; a Markdown
//! clinical report comes out, saved under a deterministic file name. The
//! presentation layer sits on top of [`ConsultationPipeline`] and
//! [`ReportLibrary`].

pub mod clock;
pub mod config;
pub mod history;
pub mod llm;
pub mod patient;
pub mod pipeline;
pub mod providers;
pub mod retry;
pub mod storage;
pub mod stt;
pub mod template;

#[cfg(test)]
mod tests;

pub use config::{AppConfig, ConfigError, ProviderConfig};
pub use history::{ReportLibrary, ReportStats, ReportSummary};
pub use patient::{PatientForm, PatientInfo, ValidationError};
pub use pipeline::{
    text_source_label, ConsultationPipeline, ErrorCategory, PipelineError, PipelineState, ReportHandle,
    Transcript, TranscriptSource,
};
pub use providers::{GenerationBackend, ProviderSelector, TranscriptionBackend};
pub use retry::RetryConfig;
pub use storage::{ArtifactStore, StorageError, StorageLayout};

/// Initialize `env_logger`, honoring `RUST_LOG` and defaulting to `info`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

//! Consultation pipeline.
//!
//! Ties the pieces together for one consultation attempt:
//! transcript (from audio or pasted text) -> prompt -> generation -> report.
//! The transcript is written to disk before generation starts, so a failed
//! generation never loses the transcription work.

use crate::config::{AppConfig, ConfigError};
use crate::llm::{LlmError, LlmProvider};
use crate::patient::{PatientInfo, ValidationError, FIELD_KEYS};
use crate::providers::ProviderSelector;
use crate::storage::{ArtifactStore, StorageError, StoredArtifact};
use crate::stt::{is_supported_audio, SttError, SttProvider};
use crate::template::{PromptTemplate, TemplateError, TemplateStore, REPORT_TEMPLATE, TUTOR_SUMMARY_TEMPLATE};
use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Transcripts at or below this many characters are too short to be useful.
pub const MIN_USEFUL_TRANSCRIPT_CHARS: usize = 100;

/// Label used for pasted transcripts when the caller has none.
pub const DEFAULT_TEXT_LABEL: &str = "transcrição_manual";

const TRANSCRIPTION_KEY: &str = "transcription";
const FULL_REPORT_KEY: &str = "full_report";
const LABEL_REASON_CHARS: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Transcription error: {0}")]
    Stt(#[from] SttError),

    #[error("Generation error: {0}")]
    Llm(#[from] LlmError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Transcript is empty")]
    EmptyTranscript,

    #[error("No transcription provider configured; only text input is available")]
    NoTranscriptionProvider,

    #[error("Not an audio file: {0}")]
    InvalidAudioPath(PathBuf),
}

/// Coarse fault category for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    RateLimit,
    Connectivity,
    Authentication,
    FileNotFound,
    Validation,
    Unexpected,
}

fn llm_category(err: &LlmError) -> ErrorCategory {
    match err {
        LlmError::RateLimited { .. } => ErrorCategory::RateLimit,
        LlmError::Connection(_) | LlmError::Timeout(_) | LlmError::Server { .. } => {
            ErrorCategory::Connectivity
        }
        LlmError::Authentication { .. } | LlmError::NoApiKey(_) => ErrorCategory::Authentication,
        LlmError::InvalidRequest { .. } | LlmError::InvalidResponse(_) | LlmError::Api(_) => {
            ErrorCategory::Unexpected
        }
    }
}

impl PipelineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            PipelineError::Validation(_) | PipelineError::EmptyTranscript => ErrorCategory::Validation,
            PipelineError::InvalidAudioPath(_) => ErrorCategory::Validation,
            PipelineError::Config(ConfigError::MissingApiKey { .. }) => ErrorCategory::Authentication,
            PipelineError::Config(ConfigError::InvalidValue { .. }) => ErrorCategory::Validation,
            PipelineError::Template(TemplateError::NotFound(_)) => ErrorCategory::FileNotFound,
            PipelineError::Template(_) => ErrorCategory::Unexpected,
            PipelineError::Stt(SttError::FileNotFound(_)) => ErrorCategory::FileNotFound,
            PipelineError::Stt(SttError::Remote(e)) => llm_category(e),
            PipelineError::Stt(SttError::Timeout(_)) => ErrorCategory::Connectivity,
            PipelineError::Stt(_) => ErrorCategory::Unexpected,
            PipelineError::Llm(e) => llm_category(e),
            PipelineError::Storage(e) if e.is_not_found() => ErrorCategory::FileNotFound,
            PipelineError::Storage(_) => ErrorCategory::Unexpected,
            PipelineError::NoTranscriptionProvider => ErrorCategory::Unexpected,
        }
    }

    /// Portuguese message for the clinic staff.
    pub fn user_message(&self) -> String {
        match self.category() {
            ErrorCategory::RateLimit => "Limite de requisições da API excedido. Aguarde alguns minutos antes de tentar novamente.".to_string(),
            ErrorCategory::Connectivity => "Erro de conexão com o provedor. Verifique sua conexão com a internet.".to_string(),
            ErrorCategory::Authentication => "Erro de autenticação. Verifique as chaves de API no arquivo .env".to_string(),
            ErrorCategory::FileNotFound => format!("Arquivo não encontrado: {}", self),
            ErrorCategory::Validation => format!("Erro de validação: {}", self),
            ErrorCategory::Unexpected => format!("Erro inesperado ao processar: {}", self),
        }
    }
}

/// Where a consultation attempt currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    Transcribing,
    Generating,
    Persisting,
    Done,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }

    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (Init, Transcribing) | (Init, Generating) => true,
            (Transcribing, Generating) => true,
            (Generating, Persisting) => true,
            (Persisting, Done) => true,
            (Done, _) | (Failed, _) => false,
            (_, Failed) => true,
            _ => false,
        }
    }
}

/// One pass through the pipeline, tagged for the logs.
struct Attempt {
    id: Uuid,
    state: PipelineState,
}

impl Attempt {
    fn start(kind: &str, origin: &str) -> Self {
        let id = Uuid::new_v4();
        log::info!("[{}] Processing consultation ({}: {})", id, kind, origin);
        Self {
            id,
            state: PipelineState::Init,
        }
    }

    fn advance(&mut self, next: PipelineState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {:?} -> {:?}",
            self.state,
            next
        );
        log::debug!("[{}] {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
    }

    fn finish<T>(&mut self, result: &Result<T, PipelineError>) {
        match result {
            Ok(_) => {
                self.advance(PipelineState::Done);
                log::info!("[{}] Consultation processed", self.id);
            }
            Err(e) => {
                log::error!("[{}] Failed while {:?}: {}", self.id, self.state, e);
                self.advance(PipelineState::Failed);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptSource {
    Audio,
    PastedText,
}

/// Raw consultation text and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub text: String,
    pub source: TranscriptSource,
    /// Audio file stem or caller-supplied label.
    pub origin: String,
    /// Where the transcript was saved.
    pub path: PathBuf,
}

impl Transcript {
    pub fn char_count(&self) -> usize {
        self.text.trim().chars().count()
    }

    /// Whether the text is long enough to be worth a report.
    pub fn meets_length_gate(&self) -> bool {
        self.char_count() > MIN_USEFUL_TRANSCRIPT_CHARS
    }
}

/// A persisted report.
#[derive(Debug, Clone)]
pub struct ReportHandle {
    artifact: StoredArtifact,
    text: String,
    transcript: Transcript,
    attempt_id: Uuid,
}

impl ReportHandle {
    pub fn path(&self) -> &Path {
        &self.artifact.path
    }

    pub fn filename(&self) -> &str {
        &self.artifact.filename
    }

    /// Report text as generated.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Report text as currently on disk, including any later edits.
    pub fn reload(&self) -> Result<String, StorageError> {
        std::fs::read_to_string(&self.artifact.path).map_err(|e| StorageError::io(&self.artifact.path, e))
    }

    pub fn created_at(&self) -> NaiveDateTime {
        self.artifact.created_at
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn transcript_path(&self) -> &Path {
        &self.transcript.path
    }

    pub fn attempt_id(&self) -> Uuid {
        self.attempt_id
    }
}

/// Label for a pasted transcript: patient name plus the start of the visit reason.
pub fn text_source_label(patient: &PatientInfo) -> String {
    let reason: String = patient.visit_reason().chars().take(LABEL_REASON_CHARS).collect();
    format!("{}_{}", patient.patient_name(), reason.trim())
}

/// Fail at construction if a template references a key nothing will provide.
fn check_fields(template: &PromptTemplate, extra: &str) -> Result<(), TemplateError> {
    for field in template.fields() {
        if field != extra && !FIELD_KEYS.contains(&field) {
            return Err(TemplateError::MissingField(field.to_string()));
        }
    }
    Ok(())
}

pub struct ConsultationPipeline {
    stt: Option<Arc<dyn SttProvider>>,
    llm: Arc<dyn LlmProvider>,
    store: ArtifactStore,
    report_template: PromptTemplate,
    summary_template: PromptTemplate,
}

impl ConsultationPipeline {
    /// Build a pipeline. Both templates are loaded and checked here.
    ///
    /// `stt` may be `None` for text-only use; audio input then fails with
    /// [`PipelineError::NoTranscriptionProvider`].
    pub fn new(
        stt: Option<Arc<dyn SttProvider>>,
        llm: Arc<dyn LlmProvider>,
        templates: &TemplateStore,
        store: ArtifactStore,
    ) -> Result<Self, PipelineError> {
        let report_template = templates.load(REPORT_TEMPLATE)?;
        check_fields(&report_template, TRANSCRIPTION_KEY)?;
        let summary_template = templates.load(TUTOR_SUMMARY_TEMPLATE)?;
        check_fields(&summary_template, FULL_REPORT_KEY)?;

        log::info!(
            "Consultation pipeline ready (transcription: {}, generation: {} / {})",
            stt.as_ref().map(|s| s.name()).unwrap_or("none"),
            llm.name(),
            llm.model()
        );

        Ok(Self {
            stt,
            llm,
            store,
            report_template,
            summary_template,
        })
    }

    /// Build with both providers from a configuration snapshot.
    pub fn from_config(config: &AppConfig) -> Result<Self, PipelineError> {
        let selector = ProviderSelector::new(config.providers.clone());
        let stt = selector.transcription_provider()?;
        let llm = selector.generation_provider()?;
        Self::new(
            Some(stt),
            llm,
            &TemplateStore::new(&config.template_dir),
            ArtifactStore::new(config.storage_layout())?,
        )
    }

    /// Build for pasted text only; no transcription provider is constructed.
    pub fn text_only_from_config(config: &AppConfig) -> Result<Self, PipelineError> {
        let selector = ProviderSelector::new(config.providers.clone());
        let llm = selector.generation_provider()?;
        Self::new(
            None,
            llm,
            &TemplateStore::new(&config.template_dir),
            ArtifactStore::new(config.storage_layout())?,
        )
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn has_transcription(&self) -> bool {
        self.stt.is_some()
    }

    pub fn generation_provider(&self) -> &dyn LlmProvider {
        self.llm.as_ref()
    }

    /// Transcribe `audio_path`, generate the report and save it.
    ///
    /// `patient` must already be validated.
    pub async fn process_consultation(
        &self,
        audio_path: &Path,
        patient: &PatientInfo,
    ) -> Result<ReportHandle, PipelineError> {
        let origin = audio_path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .ok_or_else(|| PipelineError::InvalidAudioPath(audio_path.to_path_buf()))?;

        let mut attempt = Attempt::start("audio", &origin);
        let result = self.run_audio(&mut attempt, audio_path, origin, patient).await;
        attempt.finish(&result);
        result
    }

    async fn run_audio(
        &self,
        attempt: &mut Attempt,
        audio_path: &Path,
        origin: String,
        patient: &PatientInfo,
    ) -> Result<ReportHandle, PipelineError> {
        let stt = self.stt.as_ref().ok_or(PipelineError::NoTranscriptionProvider)?;
        if !is_supported_audio(audio_path) {
            return Err(PipelineError::InvalidAudioPath(audio_path.to_path_buf()));
        }

        attempt.advance(PipelineState::Transcribing);
        let transcription = stt.transcribe(audio_path).await?;
        if transcription.text.trim().is_empty() {
            return Err(PipelineError::EmptyTranscript);
        }
        log::info!(
            "[{}] Transcribed {} ({} chars, {})",
            attempt.id,
            audio_path.display(),
            transcription.text.len(),
            transcription.language
        );

        let path = self.store.save_audio_transcript(&origin, &transcription.text)?;
        let transcript = Transcript {
            text: transcription.text,
            source: TranscriptSource::Audio,
            origin,
            path,
        };

        self.generate_and_save(attempt, transcript, patient).await
    }

    /// Generate and save a report from already-transcribed text.
    ///
    /// The text is saved verbatim as `{timestamp}_{label}_transcricao.txt`
    /// before generation starts. A blank `source_label` uses
    /// [`DEFAULT_TEXT_LABEL`].
    pub async fn process_from_text(
        &self,
        text: &str,
        patient: &PatientInfo,
        source_label: &str,
    ) -> Result<ReportHandle, PipelineError> {
        let label = match source_label.trim() {
            "" => DEFAULT_TEXT_LABEL,
            trimmed => trimmed,
        };

        let mut attempt = Attempt::start("text", label);
        let result = self.run_text(&mut attempt, text, patient, label).await;
        attempt.finish(&result);
        result
    }

    async fn run_text(
        &self,
        attempt: &mut Attempt,
        text: &str,
        patient: &PatientInfo,
        label: &str,
    ) -> Result<ReportHandle, PipelineError> {
        if text.trim().is_empty() {
            return Err(PipelineError::EmptyTranscript);
        }

        let path = self.store.save_pasted_transcript(label, text)?;
        let transcript = Transcript {
            text: text.to_string(),
            source: TranscriptSource::PastedText,
            origin: label.to_string(),
            path,
        };
        if !transcript.meets_length_gate() {
            log::warn!(
                "[{}] Transcript has only {} characters; the report may be thin",
                attempt.id,
                transcript.char_count()
            );
        }

        attempt.advance(PipelineState::Generating);
        self.generate_and_save(attempt, transcript, patient).await
    }

    async fn generate_and_save(
        &self,
        attempt: &mut Attempt,
        transcript: Transcript,
        patient: &PatientInfo,
    ) -> Result<ReportHandle, PipelineError> {
        if attempt.state != PipelineState::Generating {
            attempt.advance(PipelineState::Generating);
        }

        let mut fields = patient.to_field_map();
        fields.insert(TRANSCRIPTION_KEY, transcript.text.clone());
        let prompt = self.report_template.render(&fields)?;

        let report = self.llm.generate(&prompt, None).await?;
        log::info!("[{}] Report generated ({} chars)", attempt.id, report.len());

        attempt.advance(PipelineState::Persisting);
        let artifact = self
            .store
            .save_report(&report, patient.patient_name(), &transcript.origin)?;

        Ok(ReportHandle {
            artifact,
            text: report,
            transcript,
            attempt_id: attempt.id,
        })
    }

    /// Simplified summary of a finished report for the pet's tutor.
    ///
    /// Nothing is saved; see [`ArtifactStore::save_tutor_summary`].
    pub async fn generate_tutor_summary(
        &self,
        report_text: &str,
        patient: &PatientInfo,
    ) -> Result<String, PipelineError> {
        if report_text.trim().is_empty() {
            return Err(PipelineError::EmptyTranscript);
        }

        let mut fields: HashMap<&str, String> = patient.to_field_map();
        fields.insert(FULL_REPORT_KEY, report_text.to_string());
        let prompt = self.summary_template.render(&fields)?;

        log::info!("Generating tutor summary for {}", patient.patient_name());
        let summary = self.llm.generate(&prompt, None).await?;
        Ok(summary)
    }

    /// Supported audio files waiting in the audio directory, oldest name first.
    pub fn pending_audio(&self) -> Result<Vec<PathBuf>, StorageError> {
        let dir = &self.store.layout().audio_dir;
        let entries = std::fs::read_dir(dir).map_err(|e| StorageError::io(dir, e))?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_supported_audio(path))
            .collect();
        files.sort();
        Ok(files)
    }

    /// Process several recordings in order. A failure is logged and the
    /// batch carries on with the next one.
    pub async fn process_batch(
        &self,
        jobs: &[(PathBuf, PatientInfo)],
    ) -> Vec<(PathBuf, Result<ReportHandle, PipelineError>)> {
        log::info!("Processing {} recording(s)", jobs.len());
        let mut results = Vec::with_capacity(jobs.len());

        for (path, patient) in jobs {
            let result = self.process_consultation(path, patient).await;
            if let Err(e) = &result {
                log::error!("Skipping {}: {}", path.display(), e);
            }
            results.push((path.clone(), result));
        }

        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        log::info!(
            "Batch finished: {} succeeded, {} failed",
            results.len() - failed,
            failed
        );
        results
    }
}

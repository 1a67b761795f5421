//! Local Whisper transcription.
//!
//! The model is loaded on the first transcription and kept for the lifetime
//! of the provider. Loading and inference are blocking, so both run on the
//! blocking thread pool. The whisper.cpp engine is only compiled in with the
//! `local-whisper` feature; without it the provider still constructs and the
//! first transcription reports [`SttError::EngineUnavailable`].

use super::decode::decode_file_to_pcm;
use super::{SttError, SttProvider, Transcription};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Whisper model sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelTier {
    Tiny,
    #[default]
    Base,
    Small,
    Medium,
    Large,
}

impl ModelTier {
    /// Parse a tier name. Unknown names fall back to [`ModelTier::Base`].
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "tiny" => ModelTier::Tiny,
            "base" => ModelTier::Base,
            "small" => ModelTier::Small,
            "medium" => ModelTier::Medium,
            "large" => ModelTier::Large,
            other => {
                log::warn!("Unknown whisper model '{}', using base", other);
                ModelTier::Base
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Tiny => "tiny",
            ModelTier::Base => "base",
            ModelTier::Small => "small",
            ModelTier::Medium => "medium",
            ModelTier::Large => "large",
        }
    }

    pub fn file_name(&self) -> String {
        format!("ggml-{}.bin", self.as_str())
    }
}

/// Default directory holding `ggml-*.bin` model files.
pub fn default_model_dir() -> PathBuf {
    #[cfg(feature = "local-whisper")]
    {
        if let Some(dir) = dirs::data_dir() {
            return dir.join("vetscribe").join("whisper-models");
        }
    }
    PathBuf::from("models")
}

/// A loaded speech model.
pub trait SpeechModel: Send + Sync {
    /// Transcribe 16 kHz mono samples in `language`.
    fn transcribe_pcm(&self, samples: &[f32], language: &str) -> Result<String, SttError>;
}

/// Loads a [`SpeechModel`] from a model file. Called at most once per provider.
pub trait SpeechModelLoader: Send + Sync {
    fn load(&self, model_path: &Path) -> Result<Arc<dyn SpeechModel>, SttError>;
}

#[derive(Debug, Clone)]
pub struct LocalWhisperConfig {
    pub tier: ModelTier,
    pub model_dir: PathBuf,
    pub language: String,
}

impl Default for LocalWhisperConfig {
    fn default() -> Self {
        Self {
            tier: ModelTier::default(),
            model_dir: default_model_dir(),
            language: "pt".to_string(),
        }
    }
}

pub struct LocalWhisperProvider {
    config: LocalWhisperConfig,
    loader: Arc<dyn SpeechModelLoader>,
    model: OnceCell<Arc<dyn SpeechModel>>,
}

impl LocalWhisperProvider {
    /// Create a provider backed by whisper.cpp (when compiled in).
    pub fn new(config: LocalWhisperConfig) -> Self {
        Self::with_loader(config, default_loader())
    }

    pub fn with_loader(config: LocalWhisperConfig, loader: Arc<dyn SpeechModelLoader>) -> Self {
        Self {
            config,
            loader,
            model: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &LocalWhisperConfig {
        &self.config
    }

    pub fn model_path(&self) -> PathBuf {
        self.config.model_dir.join(self.config.tier.file_name())
    }

    /// Whether the model has been loaded yet.
    pub fn is_loaded(&self) -> bool {
        self.model.initialized()
    }

    async fn model(&self) -> Result<Arc<dyn SpeechModel>, SttError> {
        let model = self
            .model
            .get_or_try_init(|| async {
                let loader = self.loader.clone();
                let path = self.model_path();
                log::info!("Loading whisper model from {}", path.display());
                let start = std::time::Instant::now();

                let model = tokio::task::spawn_blocking(move || loader.load(&path))
                    .await
                    .map_err(|e| SttError::ModelLoad(format!("loader task failed: {}", e)))??;

                log::info!(
                    "Whisper model '{}' loaded in {:?}",
                    self.config.tier.as_str(),
                    start.elapsed()
                );
                Ok::<_, SttError>(model)
            })
            .await?;
        Ok(model.clone())
    }
}

#[async_trait]
impl SttProvider for LocalWhisperProvider {
    async fn transcribe(&self, audio_path: &Path) -> Result<Transcription, SttError> {
        if !audio_path.is_file() {
            return Err(SttError::FileNotFound(audio_path.to_path_buf()));
        }

        let model = self.model().await?;
        let path = audio_path.to_path_buf();
        let language = self.config.language.clone();

        log::info!("Transcribing {} locally", path.display());
        let text = tokio::task::spawn_blocking(move || {
            let samples = decode_file_to_pcm(&path)?;
            model.transcribe_pcm(&samples, &language)
        })
        .await
        .map_err(|e| SttError::Engine(format!("transcription task failed: {}", e)))??;

        Ok(Transcription {
            text: text.trim().to_string(),
            language: self.config.language.clone(),
        })
    }

    fn name(&self) -> &'static str {
        "local-whisper"
    }
}

#[cfg(feature = "local-whisper")]
fn default_loader() -> Arc<dyn SpeechModelLoader> {
    Arc::new(WhisperCppLoader)
}

#[cfg(not(feature = "local-whisper"))]
fn default_loader() -> Arc<dyn SpeechModelLoader> {
    Arc::new(UnavailableLoader)
}

#[cfg(not(feature = "local-whisper"))]
struct UnavailableLoader;

#[cfg(not(feature = "local-whisper"))]
impl SpeechModelLoader for UnavailableLoader {
    fn load(&self, _model_path: &Path) -> Result<Arc<dyn SpeechModel>, SttError> {
        Err(SttError::EngineUnavailable(
            "built without the local-whisper feature".to_string(),
        ))
    }
}

#[cfg(feature = "local-whisper")]
pub use whisper_cpp::WhisperCppLoader;

#[cfg(feature = "local-whisper")]
mod whisper_cpp {
    use super::{SpeechModel, SpeechModelLoader, SttError};
    use std::path::Path;
    use std::sync::Arc;
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

    /// Loads `ggml-*.bin` models with whisper.cpp.
    pub struct WhisperCppLoader;

    impl SpeechModelLoader for WhisperCppLoader {
        fn load(&self, model_path: &Path) -> Result<Arc<dyn SpeechModel>, SttError> {
            if !model_path.is_file() {
                return Err(SttError::ModelLoad(format!(
                    "model file not found: {}",
                    model_path.display()
                )));
            }
            let path = model_path.to_str().ok_or_else(|| {
                SttError::ModelLoad(format!("non UTF-8 model path: {}", model_path.display()))
            })?;

            let ctx = WhisperContext::new_with_params(path, WhisperContextParameters::default())
                .map_err(|e| SttError::ModelLoad(e.to_string()))?;

            Ok(Arc::new(WhisperCppModel { ctx }))
        }
    }

    struct WhisperCppModel {
        ctx: WhisperContext,
    }

    impl SpeechModel for WhisperCppModel {
        fn transcribe_pcm(&self, samples: &[f32], language: &str) -> Result<String, SttError> {
            let mut state = self
                .ctx
                .create_state()
                .map_err(|e| SttError::Engine(format!("create state: {}", e)))?;

            let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
            params.set_language(Some(language));
            params.set_translate(false);
            params.set_temperature(0.0);
            params.set_print_progress(false);
            params.set_print_realtime(false);
            params.set_print_special(false);
            params.set_print_timestamps(false);

            state
                .full(params, samples)
                .map_err(|e| SttError::Engine(format!("inference: {}", e)))?;

            let segments = state
                .full_n_segments()
                .map_err(|e| SttError::Engine(format!("segments: {}", e)))?;

            let mut text = String::new();
            for i in 0..segments {
                let segment = state
                    .full_get_segment_text(i)
                    .map_err(|e| SttError::Engine(format!("segment {}: {}", i, e)))?;
                text.push_str(&segment);
            }
            Ok(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct EchoModel;

    impl SpeechModel for EchoModel {
        fn transcribe_pcm(&self, samples: &[f32], language: &str) -> Result<String, SttError> {
            Ok(format!("  {} samples em {}  ", samples.len(), language))
        }
    }

    #[derive(Default)]
    struct CountingLoader {
        loads: AtomicU32,
    }

    impl SpeechModelLoader for CountingLoader {
        fn load(&self, _model_path: &Path) -> Result<Arc<dyn SpeechModel>, SttError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(EchoModel))
        }
    }

    struct FailingLoader;

    impl SpeechModelLoader for FailingLoader {
        fn load(&self, model_path: &Path) -> Result<Arc<dyn SpeechModel>, SttError> {
            Err(SttError::ModelLoad(format!("missing {}", model_path.display())))
        }
    }

    fn write_tone(path: &Path) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..1600 {
            writer.write_sample(((i % 32) as i16 - 16) * 500).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_model_tier_parsing() {
        assert_eq!(ModelTier::from_name("tiny"), ModelTier::Tiny);
        assert_eq!(ModelTier::from_name(" MEDIUM "), ModelTier::Medium);
        assert_eq!(ModelTier::from_name("gigantic"), ModelTier::Base);
        assert_eq!(ModelTier::Large.file_name(), "ggml-large.bin");
    }

    #[test]
    fn test_model_path() {
        let provider = LocalWhisperProvider::with_loader(
            LocalWhisperConfig {
                tier: ModelTier::Small,
                model_dir: PathBuf::from("/models"),
                language: "pt".to_string(),
            },
            Arc::new(CountingLoader::default()),
        );
        assert_eq!(provider.model_path(), PathBuf::from("/models/ggml-small.bin"));
    }

    #[tokio::test]
    async fn test_model_loads_once() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("consulta.wav");
        write_tone(&audio);

        let loader = Arc::new(CountingLoader::default());
        let provider =
            LocalWhisperProvider::with_loader(LocalWhisperConfig::default(), loader.clone());
        assert!(!provider.is_loaded());

        let first = provider.transcribe(&audio).await.unwrap();
        let second = provider.transcribe(&audio).await.unwrap();

        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert!(provider.is_loaded());
        assert_eq!(first.text, "1600 samples em pt");
        assert_eq!(first, second);
        assert_eq!(first.language, "pt");
    }

    #[tokio::test]
    async fn test_missing_audio_does_not_load_model() {
        let loader = Arc::new(CountingLoader::default());
        let provider =
            LocalWhisperProvider::with_loader(LocalWhisperConfig::default(), loader.clone());

        let err = provider
            .transcribe(Path::new("/nonexistent/consulta.mp3"))
            .await
            .unwrap_err();
        assert!(matches!(err, SttError::FileNotFound(_)));
        assert_eq!(loader.loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_load_is_retried_on_next_call() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("consulta.wav");
        write_tone(&audio);

        let provider =
            LocalWhisperProvider::with_loader(LocalWhisperConfig::default(), Arc::new(FailingLoader));
        assert!(matches!(
            provider.transcribe(&audio).await,
            Err(SttError::ModelLoad(_))
        ));
        assert!(!provider.is_loaded());
    }

    #[cfg(not(feature = "local-whisper"))]
    #[tokio::test]
    async fn test_engine_unavailable_without_feature() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("consulta.wav");
        write_tone(&audio);

        let provider = LocalWhisperProvider::new(LocalWhisperConfig::default());
        assert!(matches!(
            provider.transcribe(&audio).await,
            Err(SttError::EngineUnavailable(_))
        ));
    }
}

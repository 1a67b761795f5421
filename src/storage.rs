//! On-disk artifacts: transcripts, reports, tutor summaries and staged audio.
//!
//! File names follow `{YYYYMMDD_HHMMSS}_{patient}_{source}` and are parsed
//! back by [`crate::history`], so every writer goes through this module.

use crate::clock::{Clock, SystemClock};
use crate::stt::is_supported_audio;
use chrono::NaiveDateTime;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Timestamp prefix used in every generated artifact name.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Replacement for names that sanitize to nothing.
pub const UNKNOWN_TOKEN: &str = "Desconhecido";

const TRANSCRIPT_SUFFIX: &str = "_transcricao.txt";
pub const TUTOR_SUMMARY_SUFFIX: &str = "_resumo_tutor";

/// Longest sanitized token, in bytes. Keeps generated names under NAME_MAX.
pub const MAX_TOKEN_BYTES: usize = 80;

/// Upper bound on numbered suffixes tried for one stem.
const MAX_COLLISION_SUFFIX: u32 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unsupported audio file: {0}")]
    UnsupportedAudio(String),

    #[error("Could not find a free file name for {0}")]
    NameExhausted(String),

    #[error("Path is not inside {}: {}", .dir.display(), .path.display())]
    OutsideDirectory { dir: PathBuf, path: PathBuf },
}

impl StorageError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

/// Reduce `raw` to characters that are safe in a file name.
///
/// Keeps alphanumerics (any script), space, `-` and `_`, cuts the result to
/// [`MAX_TOKEN_BYTES`] on a char boundary, then trims. An empty result becomes
/// [`UNKNOWN_TOKEN`].
pub fn sanitize_token(raw: &str) -> String {
    let mut kept = String::new();
    for c in raw
        .trim_start()
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
    {
        if kept.len() + c.len_utf8() > MAX_TOKEN_BYTES {
            break;
        }
        kept.push(c);
    }
    let trimmed = kept.trim();
    if trimmed.is_empty() {
        UNKNOWN_TOKEN.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Where each kind of artifact lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    pub audio_dir: PathBuf,
    pub transcripts_dir: PathBuf,
    pub reports_dir: PathBuf,
}

impl StorageLayout {
    /// Standard `audios` / `transcricoes` / `relatorios` layout under `root`.
    pub fn under(root: &Path) -> Self {
        Self {
            audio_dir: root.join("audios"),
            transcripts_dir: root.join("transcricoes"),
            reports_dir: root.join("relatorios"),
        }
    }
}

/// A file written by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub path: PathBuf,
    pub filename: String,
    pub created_at: NaiveDateTime,
}

/// Writes transcripts, reports and staged audio under a [`StorageLayout`].
pub struct ArtifactStore {
    layout: StorageLayout,
    clock: Arc<dyn Clock>,
}

impl ArtifactStore {
    pub fn new(layout: StorageLayout) -> Result<Self, StorageError> {
        for dir in [&layout.audio_dir, &layout.transcripts_dir, &layout.reports_dir] {
            fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))?;
        }
        Ok(Self {
            layout,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    /// Save a report as `{timestamp}_{patient}_{source}.md`.
    pub fn save_report(
        &self,
        content: &str,
        patient_name: &str,
        source_token: &str,
    ) -> Result<StoredArtifact, StorageError> {
        let created_at = self.clock.now();
        let stem = format!(
            "{}_{}_{}",
            created_at.format(TIMESTAMP_FORMAT),
            sanitize_token(patient_name),
            sanitize_token(source_token)
        );
        let path = write_unique(&self.layout.reports_dir, &stem, "md", content)?;
        log::info!("Report saved: {}", path.display());

        Ok(StoredArtifact {
            filename: file_name_of(&path),
            path,
            created_at,
        })
    }

    /// Save the transcript of an audio file as `{stem}_transcricao.txt`.
    ///
    /// Re-processing the same audio replaces the previous transcript.
    pub fn save_audio_transcript(&self, audio_stem: &str, text: &str) -> Result<PathBuf, StorageError> {
        let path = self
            .layout
            .transcripts_dir
            .join(format!("{}{}", sanitize_token(audio_stem), TRANSCRIPT_SUFFIX));
        write_replacing(&path, text)?;
        log::info!("Transcript saved: {}", path.display());
        Ok(path)
    }

    /// Save a pasted transcript as `{timestamp}_{label}_transcricao.txt`.
    pub fn save_pasted_transcript(&self, label: &str, text: &str) -> Result<PathBuf, StorageError> {
        let stem = format!(
            "{}_{}_transcricao",
            self.clock.now().format(TIMESTAMP_FORMAT),
            sanitize_token(label)
        );
        let path = write_unique(&self.layout.transcripts_dir, &stem, "txt", text)?;
        log::info!("Transcript saved: {}", path.display());
        Ok(path)
    }

    /// Save a tutor summary next to its report as `{report stem}_resumo_tutor.md`.
    pub fn save_tutor_summary(&self, report_path: &Path, text: &str) -> Result<PathBuf, StorageError> {
        let stem = report_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(UNKNOWN_TOKEN);
        let dir = report_path
            .parent()
            .unwrap_or(self.layout.reports_dir.as_path());
        let path = dir.join(format!("{}{}.md", stem, TUTOR_SUMMARY_SUFFIX));
        write_replacing(&path, text)?;
        log::info!("Tutor summary saved: {}", path.display());
        Ok(path)
    }

    /// Copy uploaded audio into the audio directory under a sanitized name.
    pub fn stage_audio(&self, original_name: &str, bytes: &[u8]) -> Result<PathBuf, StorageError> {
        let original = Path::new(original_name);
        if !is_supported_audio(original) {
            return Err(StorageError::UnsupportedAudio(original_name.to_string()));
        }
        if bytes.is_empty() {
            return Err(StorageError::UnsupportedAudio(format!("{} is empty", original_name)));
        }

        let stem = sanitize_token(
            original
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default(),
        );
        let ext = original
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        let path = write_unique_bytes(&self.layout.audio_dir, &stem, &ext, bytes)?;
        log::info!("Audio staged: {} ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }

    /// Remove staged audio files not modified within `max_age`.
    pub fn cleanup_stale_audio(&self, max_age: Duration) -> Result<usize, StorageError> {
        let dir = &self.layout.audio_dir;
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut removed = 0;
        for entry in fs::read_dir(dir).map_err(|e| StorageError::io(dir, e))? {
            let entry = entry.map_err(|e| StorageError::io(dir, e))?;
            let path = entry.path();
            if !path.is_file() || !is_supported_audio(&path) {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .map_err(|e| StorageError::io(&path, e))?;
            if modified <= cutoff {
                fs::remove_file(&path).map_err(|e| StorageError::io(&path, e))?;
                removed += 1;
            }
        }

        if removed > 0 {
            log::info!("Removed {} stale audio file(s) from {}", removed, dir.display());
        }
        Ok(removed)
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn write_unique(dir: &Path, stem: &str, ext: &str, content: &str) -> Result<PathBuf, StorageError> {
    write_unique_bytes(dir, stem, ext, content.as_bytes())
}

/// Write to `{stem}.{ext}`, or `{stem}-2.{ext}`, `{stem}-3.{ext}`, ... if taken.
/// Existing files are never overwritten.
fn write_unique_bytes(dir: &Path, stem: &str, ext: &str, bytes: &[u8]) -> Result<PathBuf, StorageError> {
    for n in 1..=MAX_COLLISION_SUFFIX {
        let name = match n {
            1 => format!("{}.{}", stem, ext),
            _ => format!("{}-{}.{}", stem, n, ext),
        };
        let path = dir.join(&name);

        let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                log::debug!("{} already exists, trying next suffix", name);
                continue;
            }
            Err(e) => return Err(StorageError::io(&path, e)),
        };

        write_all_or_remove(file, &path, bytes)?;
        return Ok(path);
    }
    Err(StorageError::NameExhausted(stem.to_string()))
}

fn write_replacing(path: &Path, content: &str) -> Result<(), StorageError> {
    let file = fs::File::create(path).map_err(|e| StorageError::io(path, e))?;
    write_all_or_remove(file, path, content.as_bytes())
}

fn write_all_or_remove(mut file: fs::File, path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let result = file.write_all(bytes).and_then(|_| file.sync_all());
    if let Err(e) = result {
        drop(file);
        if let Err(remove_err) = fs::remove_file(path) {
            log::warn!("Failed to remove partial file {}: {}", path.display(), remove_err);
        }
        return Err(StorageError::io(path, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Duration as ChronoDuration, NaiveDate};

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 11, 15)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn store(clock: Arc<ManualClock>) -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(StorageLayout::under(dir.path()))
            .unwrap()
            .with_clock(clock);
        (dir, store)
    }

    #[test]
    fn test_sanitize_token() {
        assert_eq!(sanitize_token("Bob"), "Bob");
        assert_eq!(sanitize_token("  Rex / Thor & Cia.  "), "Rex  Thor  Cia");
        assert_eq!(sanitize_token("João_da-Silva"), "João_da-Silva");
        assert_eq!(sanitize_token("../../etc/passwd"), "etcpasswd");
        assert_eq!(sanitize_token("/&*"), UNKNOWN_TOKEN);
        assert_eq!(sanitize_token(""), UNKNOWN_TOKEN);
    }

    #[test]
    fn test_long_tokens_are_bounded() {
        let long = sanitize_token(&"Bartholomew ".repeat(25));
        assert!(long.len() <= MAX_TOKEN_BYTES);
        assert!(long.starts_with("Bartholomew Bartholomew"));
        assert!(!long.ends_with(' '));

        // Multi-byte characters are never split.
        let accented = sanitize_token(&"ç".repeat(100));
        assert_eq!(accented.chars().count(), MAX_TOKEN_BYTES / 2);
    }

    #[test]
    fn test_long_patient_name_still_saves_report() {
        let (_dir, store) = store(Arc::new(ManualClock::new(at(0, 0, 0))));
        let artifact = store
            .save_report("# Relatório", &"Bartholomew ".repeat(25), &"consulta longa ".repeat(20))
            .unwrap();
        assert!(artifact.filename.len() < 255);
        assert!(artifact.filename.starts_with("20251115_000000_Bartholomew"));
        assert_eq!(fs::read_to_string(&artifact.path).unwrap(), "# Relatório");
    }

    #[test]
    fn test_layout_creates_directories() {
        let (dir, _store) = store(Arc::new(ManualClock::new(at(10, 30, 0))));
        for sub in ["audios", "transcricoes", "relatorios"] {
            assert!(dir.path().join(sub).is_dir(), "{}", sub);
        }
    }

    #[test]
    fn test_report_name_schema() {
        let (_dir, store) = store(Arc::new(ManualClock::new(at(10, 30, 5))));
        let artifact = store
            .save_report("# Relatório\nBob", "Bob", "consulta_bob")
            .unwrap();

        assert_eq!(artifact.filename, "20251115_103005_Bob_consulta_bob.md");
        assert_eq!(artifact.created_at, at(10, 30, 5));
        assert_eq!(
            fs::read_to_string(&artifact.path).unwrap(),
            "# Relatório\nBob"
        );
    }

    #[test]
    fn test_same_second_collision_gets_suffix() {
        let clock = Arc::new(ManualClock::new(at(10, 30, 0)));
        let (_dir, store) = store(clock.clone());

        let first = store.save_report("a", "Bob", "texto").unwrap();
        let second = store.save_report("b", "Bob", "texto").unwrap();
        let third = store.save_report("c", "Bob", "texto").unwrap();

        assert_eq!(first.filename, "20251115_103000_Bob_texto.md");
        assert_eq!(second.filename, "20251115_103000_Bob_texto-2.md");
        assert_eq!(third.filename, "20251115_103000_Bob_texto-3.md");
        assert_eq!(fs::read_to_string(&first.path).unwrap(), "a");

        clock.advance(ChronoDuration::seconds(1));
        let later = store.save_report("d", "Bob", "texto").unwrap();
        assert_eq!(later.filename, "20251115_103001_Bob_texto.md");
    }

    #[test]
    fn test_unsafe_names_stay_inside_reports_dir() {
        let (dir, store) = store(Arc::new(ManualClock::new(at(9, 0, 0))));
        let artifact = store.save_report("x", "../Bob/&", "a/b").unwrap();

        assert_eq!(artifact.path.parent().unwrap(), dir.path().join("relatorios"));
        assert!(!artifact.filename.contains('/'));
        assert!(!artifact.filename.contains('&'));
    }

    #[test]
    fn test_audio_transcript_overwrites() {
        let (dir, store) = store(Arc::new(ManualClock::new(at(9, 0, 0))));
        let first = store.save_audio_transcript("consulta_bob", "primeira").unwrap();
        let second = store.save_audio_transcript("consulta_bob", "segunda").unwrap();

        assert_eq!(first, second);
        assert_eq!(first, dir.path().join("transcricoes/consulta_bob_transcricao.txt"));
        assert_eq!(fs::read_to_string(first).unwrap(), "segunda");
    }

    #[test]
    fn test_pasted_transcript_is_timestamped_and_unique() {
        let (_dir, store) = store(Arc::new(ManualClock::new(at(14, 2, 9))));
        let a = store.save_pasted_transcript("texto_colado", "um").unwrap();
        let b = store.save_pasted_transcript("texto_colado", "dois").unwrap();

        assert_eq!(
            file_name_of(&a),
            "20251115_140209_texto_colado_transcricao.txt"
        );
        assert_eq!(
            file_name_of(&b),
            "20251115_140209_texto_colado_transcricao-2.txt"
        );
    }

    #[test]
    fn test_tutor_summary_next_to_report() {
        let (_dir, store) = store(Arc::new(ManualClock::new(at(11, 0, 0))));
        let report = store.save_report("r", "Bob", "texto").unwrap();
        let summary = store.save_tutor_summary(&report.path, "resumo").unwrap();

        assert_eq!(
            file_name_of(&summary),
            "20251115_110000_Bob_texto_resumo_tutor.md"
        );
        assert_eq!(summary.parent(), report.path.parent());
    }

    #[test]
    fn test_stage_audio() {
        let (dir, store) = store(Arc::new(ManualClock::new(at(11, 0, 0))));
        let staged = store.stage_audio("Consulta Bob!.MP3", b"ID3....").unwrap();
        assert_eq!(staged, dir.path().join("audios/Consulta Bob.mp3"));

        let again = store.stage_audio("Consulta Bob!.MP3", b"ID3....").unwrap();
        assert_eq!(file_name_of(&again), "Consulta Bob-2.mp3");

        assert!(matches!(
            store.stage_audio("notes.txt", b"hello"),
            Err(StorageError::UnsupportedAudio(_))
        ));
        assert!(matches!(
            store.stage_audio("vazio.wav", b""),
            Err(StorageError::UnsupportedAudio(_))
        ));
    }

    #[test]
    fn test_cleanup_stale_audio() {
        let (dir, store) = store(Arc::new(ManualClock::new(at(11, 0, 0))));
        store.stage_audio("a.wav", b"RIFF").unwrap();
        fs::write(dir.path().join("audios/leia-me.txt"), "keep").unwrap();

        assert_eq!(store.cleanup_stale_audio(Duration::from_secs(3600)).unwrap(), 0);
        assert_eq!(store.cleanup_stale_audio(Duration::ZERO).unwrap(), 1);
        assert!(dir.path().join("audios/leia-me.txt").exists());
    }
}

//! Report history: listing, search, edits and usage stats.
//!
//! Everything is read back from the reports directory; metadata comes from
//! the file name written by [`crate::storage::ArtifactStore::save_report`].

use crate::storage::{StorageError, TIMESTAMP_FORMAT, TUTOR_SUMMARY_SUFFIX, UNKNOWN_TOKEN};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Body marker that identifies a follow-up visit.
const FOLLOW_UP_MARKER: &str = "Motivo do retorno:";

/// Kind of visit, inferred from the report body.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConsultationKind {
    Consulta,
    Retorno,
    /// Body could not be read.
    Unknown,
}

/// A report listed from the reports directory.
#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub path: PathBuf,
    pub filename: String,
    pub patient: String,
    pub source: Option<String>,
    /// Parsed from the file name; `None` when the prefix is not a valid timestamp.
    pub timestamp: Option<NaiveDateTime>,
    pub kind: ConsultationKind,
    pub modified: DateTime<Utc>,
}

impl ReportSummary {
    /// `DD/MM/YYYY HH:MM`, or a placeholder for unparseable names.
    pub fn display_date(&self) -> String {
        match self.timestamp {
            Some(ts) => ts.format("%d/%m/%Y %H:%M").to_string(),
            None => "Data inválida".to_string(),
        }
    }
}

/// Report counters and the derived cost estimate.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct ReportStats {
    pub total: usize,
    pub today: usize,
    pub cost_total: f64,
    pub cost_today: f64,
}

/// Read-side view over the reports directory.
#[derive(Debug, Clone)]
pub struct ReportLibrary {
    dir: PathBuf,
}

impl ReportLibrary {
    pub fn new(reports_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: reports_dir.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// Report files (tutor summaries excluded), newest first by modification time.
    fn report_files(&self) -> Result<Vec<(PathBuf, SystemTime)>, StorageError> {
        if !self.dir.exists() {
            log::warn!("Report directory does not exist: {}", self.dir.display());
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(|e| StorageError::io(&self.dir, e))? {
            let entry = entry.map_err(|e| StorageError::io(&self.dir, e))?;
            let path = entry.path();
            if !is_report_file(&path) {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            files.push((path, modified));
        }

        files.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(files)
    }

    /// One page of reports, newest first.
    pub fn recent(&self, limit: usize, offset: usize) -> Result<Vec<ReportSummary>, StorageError> {
        let summaries: Vec<ReportSummary> = self
            .report_files()?
            .into_iter()
            .skip(offset)
            .take(limit)
            .filter_map(|(path, modified)| summarize(&path, modified))
            .collect();

        log::debug!(
            "Listed {} reports (limit={}, offset={})",
            summaries.len(),
            limit,
            offset
        );
        Ok(summaries)
    }

    /// Filter by patient name (case-insensitive substring) and/or `DD/MM/YYYY` date.
    pub fn search(
        &self,
        term: Option<&str>,
        date: Option<&str>,
    ) -> Result<Vec<ReportSummary>, StorageError> {
        let term = term
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase);
        let date = date.map(str::trim).filter(|d| !d.is_empty());

        let results: Vec<ReportSummary> = self
            .report_files()?
            .into_iter()
            .filter_map(|(path, modified)| summarize(&path, modified))
            .filter(|r| {
                term.as_ref()
                    .map_or(true, |t| r.patient.to_lowercase().contains(t.as_str()))
            })
            .filter(|r| date.map_or(true, |d| r.display_date().contains(d)))
            .collect();

        log::debug!("Report search returned {} results", results.len());
        Ok(results)
    }

    pub fn read(&self, path: &Path) -> Result<String, StorageError> {
        let path = self.checked(path)?;
        fs::read_to_string(path).map_err(|e| StorageError::io(path, e))
    }

    /// Replace a report's body after manual editing.
    pub fn update(&self, path: &Path, content: &str) -> Result<(), StorageError> {
        let path = self.checked(path)?;
        if !path.is_file() {
            return Err(StorageError::io(
                path,
                std::io::Error::from(std::io::ErrorKind::NotFound),
            ));
        }
        fs::write(path, content).map_err(|e| StorageError::io(path, e))?;
        log::info!("Report updated: {}", path.display());
        Ok(())
    }

    /// Delete a report. Its tutor summary, if any, is left in place.
    pub fn delete(&self, path: &Path) -> Result<(), StorageError> {
        let path = self.checked(path)?;
        fs::remove_file(path).map_err(|e| StorageError::io(path, e))?;
        log::info!("Report deleted: {}", path.display());
        Ok(())
    }

    pub fn stats(&self, today: NaiveDate, cost_per_report: f64) -> Result<ReportStats, StorageError> {
        let files = self.report_files()?;
        let today_count = files
            .iter()
            .filter(|(path, _)| file_date(path) == Some(today))
            .count();

        Ok(ReportStats {
            total: files.len(),
            today: today_count,
            cost_total: files.len() as f64 * cost_per_report,
            cost_today: today_count as f64 * cost_per_report,
        })
    }

    /// Reports whose file-name date falls in `start..=end`.
    pub fn count_between(&self, start: NaiveDate, end: NaiveDate) -> Result<usize, StorageError> {
        Ok(self
            .report_files()?
            .iter()
            .filter_map(|(path, _)| file_date(path))
            .filter(|d| (start..=end).contains(d))
            .count())
    }

    /// Only paths directly inside the library directory are accepted.
    fn checked<'a>(&self, path: &'a Path) -> Result<&'a Path, StorageError> {
        if path.parent() == Some(self.dir.as_path()) && path.file_name().is_some() {
            Ok(path)
        } else {
            Err(StorageError::OutsideDirectory {
                dir: self.dir.clone(),
                path: path.to_path_buf(),
            })
        }
    }
}

fn is_report_file(path: &Path) -> bool {
    let is_md = path.extension().and_then(|e| e.to_str()) == Some("md");
    let is_summary = path
        .file_stem()
        .and_then(|s| s.to_str())
        .map_or(false, |s| s.ends_with(TUTOR_SUMMARY_SUFFIX));
    path.is_file() && is_md && !is_summary
}

fn file_date(path: &Path) -> Option<NaiveDate> {
    let stem = path.file_stem()?.to_str()?;
    let date = stem.split('_').next()?;
    NaiveDate::parse_from_str(date, "%Y%m%d").ok()
}

/// Parsed `YYYYMMDD_HHMMSS_{patient}_{source}` file name.
#[derive(Debug, PartialEq, Eq)]
struct ParsedName {
    timestamp: Option<NaiveDateTime>,
    patient: String,
    source: Option<String>,
}

fn parse_report_name(stem: &str) -> Option<ParsedName> {
    let parts: Vec<&str> = stem.splitn(4, '_').collect();
    if parts.len() < 3 {
        return None;
    }

    let timestamp =
        NaiveDateTime::parse_from_str(&format!("{}_{}", parts[0], parts[1]), TIMESTAMP_FORMAT).ok();
    let patient = match parts[2].trim() {
        "" => UNKNOWN_TOKEN.to_string(),
        p => p.to_string(),
    };

    Some(ParsedName {
        timestamp,
        patient,
        source: parts.get(3).map(|s| s.to_string()),
    })
}

fn summarize(path: &Path, modified: SystemTime) -> Option<ReportSummary> {
    let stem = path.file_stem()?.to_str()?;
    let Some(parsed) = parse_report_name(stem) else {
        log::warn!("Skipping report with unrecognised name: {}", path.display());
        return None;
    };
    if parsed.timestamp.is_none() {
        log::warn!("Invalid timestamp in report name: {}", path.display());
    }

    let kind = match fs::read_to_string(path) {
        Ok(body) if body.contains(FOLLOW_UP_MARKER) => ConsultationKind::Retorno,
        Ok(_) => ConsultationKind::Consulta,
        Err(e) => {
            log::error!("Failed to read report {}: {}", path.display(), e);
            ConsultationKind::Unknown
        }
    };

    Some(ReportSummary {
        path: path.to_path_buf(),
        filename: path.file_name()?.to_string_lossy().into_owned(),
        patient: parsed.patient,
        source: parsed.source,
        timestamp: parsed.timestamp,
        kind,
        modified: DateTime::<Utc>::from(modified),
    })
}

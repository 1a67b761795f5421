//! Prompt templates with `{placeholder}` substitution.
//!
//! `{{` and `}}` render as literal braces. Anything else between braces must
//! be a placeholder name with a value in the supplied field map.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Template for the full clinical report.
pub const REPORT_TEMPLATE: &str = "prompt_veterinario";
/// Template for the owner-facing summary.
pub const TUTOR_SUMMARY_TEMPLATE: &str = "prompt_resumo_tutor";

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Template not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read template {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Template field has no value: {0}")]
    MissingField(String),

    #[error("Malformed template at byte {offset}: {reason}")]
    Malformed { offset: usize, reason: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(String),
}

/// A parsed template. Parsing happens once at load time so a malformed
/// resource is reported before any consultation runs.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    name: String,
    segments: Vec<Segment>,
}

impl PromptTemplate {
    pub fn parse(name: impl Into<String>, source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((offset, c)) = chars.next() {
            match c {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    literal.push('{');
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    literal.push('}');
                }
                '}' => {
                    return Err(TemplateError::Malformed {
                        offset,
                        reason: "unmatched '}'",
                    })
                }
                '{' => {
                    let mut field = String::new();
                    loop {
                        match chars.next() {
                            Some((_, '}')) => break,
                            Some((_, c)) if c.is_ascii_alphanumeric() || c == '_' => field.push(c),
                            Some((_, _)) => {
                                return Err(TemplateError::Malformed {
                                    offset,
                                    reason: "invalid character in placeholder",
                                })
                            }
                            None => {
                                return Err(TemplateError::Malformed {
                                    offset,
                                    reason: "unclosed '{'",
                                })
                            }
                        }
                    }
                    if field.is_empty() {
                        return Err(TemplateError::Malformed {
                            offset,
                            reason: "empty placeholder",
                        });
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(field));
                }
                c => literal.push(c),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            name: name.into(),
            segments,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Placeholder names in order of first appearance.
    pub fn fields(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for segment in &self.segments {
            if let Segment::Field(name) = segment {
                if !seen.contains(&name.as_str()) {
                    seen.push(name.as_str());
                }
            }
        }
        seen
    }

    /// Substitute every placeholder. Extra entries in `fields` are ignored.
    pub fn render<K, V>(&self, fields: &HashMap<K, V>) -> Result<String, TemplateError>
    where
        K: std::borrow::Borrow<str> + std::hash::Hash + Eq,
        V: AsRef<str>,
    {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(name) => {
                    let value = fields
                        .get(name.as_str())
                        .ok_or_else(|| TemplateError::MissingField(name.clone()))?;
                    out.push_str(value.as_ref());
                }
            }
        }
        Ok(out)
    }
}

/// Directory of `*.txt` prompt templates.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    dir: PathBuf,
}

impl TemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn load(&self, name: &str) -> Result<PromptTemplate, TemplateError> {
        let path = self.dir.join(format!("{}.txt", name));
        let source = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => TemplateError::NotFound(path.clone()),
            _ => TemplateError::Io {
                path: path.clone(),
                source: e,
            },
        })?;

        let template = PromptTemplate::parse(name, &source)?;
        log::debug!(
            "Loaded template '{}' with {} fields",
            name,
            template.fields().len()
        );
        Ok(template)
    }
}

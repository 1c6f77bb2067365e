//! File references recovered from model output.
//!
//! A reference is only accepted when its path has the shape
//! `<base>/<top>/<sub>/<name>.<ext>` for the configured [`SourceLayout`].
//! Everything else in the model's answer is ignored, so extraction can
//! legitimately come back empty.

use crate::config::{Config, SourceLayout};
use crate::error::{Error, Result};
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// A structurally valid path taken from model output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileReference {
    /// Absolute path to a source file
    pub path: PathBuf,
}

impl FileReference {
    /// Creates a reference from a path string.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// The compiled reference shape for one base directory.
#[derive(Debug, Clone)]
pub struct ReferencePattern {
    regex: Regex,
}

impl ReferencePattern {
    /// Compiles the pattern for files under `root` with the given layout.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the root is not valid UTF-8 or the
    /// resulting expression does not compile.
    pub fn new(root: &Path, layout: &SourceLayout) -> Result<Self> {
        let root = root.to_str().ok_or_else(|| {
            Error::config(format!("base directory is not UTF-8: {}", root.display()))
        })?;
        let root = root.trim_end_matches('/');

        let pattern = format!(
            r"{root}/({tops})/({subs})/[a-zA-Z0-9_\-]+\.{ext}\b",
            root = regex::escape(root),
            tops = alternation(&layout.top_dirs),
            subs = alternation(&layout.sub_dirs),
            ext = regex::escape(&layout.extension),
        );

        let regex = Regex::new(&pattern)
            .map_err(|e| Error::config(format!("invalid reference pattern: {e}")))?;

        Ok(Self { regex })
    }

    /// Compiles the pattern for the configured base directory and layout.
    ///
    /// # Errors
    ///
    /// See [`ReferencePattern::new`].
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.base_dir, &config.layout)
    }

    /// Returns true when the whole of `candidate` is a valid reference.
    #[must_use]
    pub fn is_valid(&self, candidate: &str) -> bool {
        self.regex
            .find(candidate)
            .is_some_and(|m| m.start() == 0 && m.end() == candidate.len())
    }

    /// Every match in `text`, in order of appearance.
    ///
    /// Repeated mentions of the same path produce repeated entries.
    #[must_use]
    pub fn extract(&self, text: &str) -> Vec<FileReference> {
        self.regex
            .find_iter(text)
            .map(|m| FileReference::new(m.as_str()))
            .collect()
    }

    /// Reads a structured `{"files": [...]}` answer.
    ///
    /// Returns `None` when `text` is not that object (after stripping an
    /// optional Markdown code fence), so the caller can fall back to
    /// [`extract`](Self::extract). Paths that fail [`is_valid`](Self::is_valid)
    /// are dropped; order and duplicates are kept.
    #[must_use]
    pub fn extract_structured(&self, text: &str) -> Option<Vec<FileReference>> {
        let listing: FileListing = serde_json::from_str(strip_code_fence(text)).ok()?;

        Some(
            listing
                .files
                .iter()
                .map(|p| p.trim())
                .filter(|p| self.is_valid(p))
                .map(FileReference::new)
                .collect(),
        )
    }
}

#[derive(Debug, Deserialize)]
struct FileListing {
    files: Vec<String>,
}

/// JSON schema `response_format` for the structured relevant-files request.
#[must_use]
pub(crate) fn file_listing_format() -> serde_json::Value {
    serde_json::json!({
        "type": "json_schema",
        "json_schema": {
            "name": "relevant_files",
            "strict": true,
            "schema": {
                "type": "object",
                "properties": {
                    "files": {
                        "type": "array",
                        "items": { "type": "string" }
                    }
                },
                "required": ["files"],
                "additionalProperties": false
            }
        }
    })
}

fn alternation(names: &[String]) -> String {
    names
        .iter()
        .map(|n| regex::escape(n))
        .collect::<Vec<_>>()
        .join("|")
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern() -> ReferencePattern {
        ReferencePattern::new(Path::new("/root"), &SourceLayout::default()).unwrap()
    }

    #[test]
    fn test_accepts_known_layout() {
        let p = pattern();
        assert!(p.is_valid("/root/rtl/core/pipemem.v"));
        assert!(p.is_valid("/root/bench/formal/f_idecode.v"));
        assert!(p.is_valid("/root/sim/rtl/zip-sim_top.v"));
    }

    #[test]
    fn test_rejects_wrong_subdirectory() {
        assert!(!pattern().is_valid("/root/other/pipemem.v"));
        assert!(!pattern().is_valid("/root/rtl/other/pipemem.v"));
    }

    #[test]
    fn test_rejects_wrong_extension() {
        let p = pattern();
        assert!(!p.is_valid("/root/rtl/core/pipemem.txt"));
        assert!(!p.is_valid("/root/rtl/core/pipemem.vh"));
        assert!(p.extract("see /root/rtl/core/pipemem.vh").is_empty());
    }

    #[test]
    fn test_rejects_other_root() {
        assert!(!pattern().is_valid("/home/rtl/core/pipemem.v"));
    }

    #[test]
    fn test_trailing_slash_root() {
        let p = ReferencePattern::new(Path::new("/root/"), &SourceLayout::default()).unwrap();
        assert!(p.is_valid("/root/rtl/core/pipemem.v"));
    }

    #[test]
    fn test_root_with_regex_metacharacters() {
        let p = ReferencePattern::new(Path::new("/tmp/a+b (1)"), &SourceLayout::default()).unwrap();
        assert!(p.is_valid("/tmp/a+b (1)/rtl/core/div.v"));
        assert!(!p.is_valid("/tmp/aab (1)/rtl/core/div.v"));
    }

    #[test]
    fn test_extract_from_markdown_prose() {
        let response = "To answer the query the relevant files are:\n\n\
            1. **File: pipemem.v**\n   - **Path**: /root/rtl/core/pipemem.v\n   - **Purpose**: memory\n\n\
            2. **File: memops.v**\n   - **Path**: `/root/rtl/core/memops.v`.\n";

        let refs = pattern().extract(response);
        assert_eq!(
            refs,
            vec![
                FileReference::new("/root/rtl/core/pipemem.v"),
                FileReference::new("/root/rtl/core/memops.v"),
            ]
        );
    }

    #[test]
    fn test_extract_keeps_duplicates() {
        let response = "Look at /root/rtl/core/pipemem.v first. \
                        Then re-read /root/rtl/core/pipemem.v for the stall logic.";

        let refs = pattern().extract(response);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0], refs[1]);
    }

    #[test]
    fn test_extract_nothing() {
        assert!(pattern().extract("No file seems relevant.").is_empty());
        assert!(pattern().extract("/Path/To/File/file.v").is_empty());
    }

    #[test]
    fn test_extract_structured() {
        let text = r#"{"files": ["/root/rtl/core/div.v", "/etc/passwd", "/root/rtl/core/div.v"]}"#;
        let refs = pattern().extract_structured(text).unwrap();

        assert_eq!(
            refs,
            vec![
                FileReference::new("/root/rtl/core/div.v"),
                FileReference::new("/root/rtl/core/div.v"),
            ]
        );
    }

    #[test]
    fn test_extract_structured_in_code_fence() {
        let text = "```json\n{\"files\": [\"/root/rtl/core/mpyop.v\"]}\n```";
        let refs = pattern().extract_structured(text).unwrap();
        assert_eq!(refs, vec![FileReference::new("/root/rtl/core/mpyop.v")]);
    }

    #[test]
    fn test_extract_structured_rejects_prose() {
        assert!(pattern().extract_structured("See /root/rtl/core/div.v").is_none());
        assert!(pattern().extract_structured(r#"{"paths": []}"#).is_none());
    }

    #[test]
    fn test_file_listing_format_shape() {
        let format = file_listing_format();
        assert_eq!(format["type"], "json_schema");
        assert_eq!(format["json_schema"]["schema"]["required"][0], "files");
    }
}

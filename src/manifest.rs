//! The file manifest: one `File Name: <name>, File Path: <path>` line per source.

use crate::error::{Error, Result};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

const NAME_LABEL: &str = "File Name:";
const PATH_LABEL: &str = "File Path:";

/// One Verilog source file known to the tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFileRecord {
    /// File name, e.g. `pipemem.v`
    pub name: String,

    /// Absolute path to the file
    pub path: PathBuf,

    /// LLM-generated description, filled in by the generator
    pub description: Option<String>,
}

impl SourceFileRecord {
    /// Creates a record without a description.
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            description: None,
        }
    }

    /// Returns a copy of this record carrying `description`.
    #[must_use]
    pub fn described(&self, description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..self.clone()
        }
    }

    /// Renders the manifest line for this record.
    #[must_use]
    pub fn manifest_line(&self) -> String {
        format!(
            "{NAME_LABEL} {}, {PATH_LABEL} {}",
            self.name,
            self.path.display()
        )
    }
}

/// Parses manifest text into record stubs, skipping blank lines.
///
/// # Errors
///
/// Returns [`Error::InvalidManifest`] for a line without a comma separator or
/// with an empty name or path.
pub(crate) fn parse(text: &str) -> Result<Vec<SourceFileRecord>> {
    let mut records = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let stripped = line.replace(NAME_LABEL, "").replace(PATH_LABEL, "");
        let (name, path) = stripped
            .split_once(',')
            .ok_or_else(|| Error::invalid_manifest(idx + 1, "expected '<name>, <path>'"))?;

        let (name, path) = (name.trim(), path.trim());
        if name.is_empty() {
            return Err(Error::invalid_manifest(idx + 1, "empty file name"));
        }
        if path.is_empty() {
            return Err(Error::invalid_manifest(idx + 1, "empty file path"));
        }

        records.push(SourceFileRecord::new(name, path));
    }

    Ok(records)
}

/// Renders records as manifest text, one line each.
#[must_use]
pub(crate) fn render(records: &[SourceFileRecord]) -> String {
    records.iter().fold(String::new(), |mut out, record| {
        let _ = writeln!(out, "{}", record.manifest_line());
        out
    })
}

/// Reads and parses the manifest at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or a line is malformed.
pub(crate) fn load(path: &Path) -> Result<Vec<SourceFileRecord>> {
    info!("Reading Verilog file manifest from {}", path.display());
    let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let records = parse(&text)?;
    info!("Found {} Verilog files to process", records.len());
    Ok(records)
}

/// Writes `records` to `path`, replacing any previous manifest.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub(crate) fn save(path: &Path, records: &[SourceFileRecord]) -> Result<()> {
    fs::write(path, render(records)).map_err(|e| Error::io(path, e))?;
    info!("Wrote {} manifest entries to {}", records.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    #[test]
    fn test_parse_manifest_lines() {
        let text = "File Name: pipemem.v, File Path: /root/rtl/core/pipemem.v\n\
                    \n\
                    File Name: mpyop.v, File Path: /root/rtl/core/mpyop.v\n";

        let records = parse(text).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "pipemem.v");
        assert_eq!(records[0].path, PathBuf::from("/root/rtl/core/pipemem.v"));
        assert_eq!(records[1].name, "mpyop.v");
        assert!(records.iter().all(|r| r.description.is_none()));
    }

    #[test]
    fn test_parse_without_labels() {
        let records = parse("div.v,   /root/rtl/core/div.v").unwrap();
        assert_eq!(records[0], SourceFileRecord::new("div.v", "/root/rtl/core/div.v"));
    }

    #[test]
    fn test_parse_rejects_missing_separator() {
        let text = "File Name: ok.v, File Path: /root/rtl/core/ok.v\nbroken line";
        let err = parse(text).unwrap_err();
        assert!(matches!(err, Error::InvalidManifest { line: 2, .. }));
    }

    #[test]
    fn test_parse_rejects_empty_path() {
        let err = parse("File Name: a.v, File Path:   ").unwrap_err();
        assert!(err.to_string().contains("empty file path"));
    }

    #[test]
    fn test_render_then_parse() {
        let records = vec![
            SourceFileRecord::new("pipemem.v", "/root/rtl/core/pipemem.v"),
            SourceFileRecord::new("zipdma.v", "/root/rtl/zipdma/zipdma.v"),
        ];

        let text = render(&records);
        assert!(text.starts_with("File Name: pipemem.v, File Path: /root/rtl/core/pipemem.v\n"));
        assert_eq!(parse(&text).unwrap(), records);
    }

    #[test]
    fn test_save_and_load() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("manifest.txt");
        let records = vec![SourceFileRecord::new("a.v", "/src/rtl/core/a.v")];

        save(file.path(), &records).unwrap();
        assert_eq!(load(file.path()).unwrap(), records);
    }

    #[test]
    fn test_load_missing_manifest() {
        let err = load(Path::new("/nonexistent/manifest.txt")).unwrap_err();
        assert!(err.is_io());
    }

    #[test]
    fn test_described_keeps_identity() {
        let stub = SourceFileRecord::new("a.v", "/src/a.v");
        let done = stub.described("Adds numbers.");
        assert_eq!(done.name, stub.name);
        assert_eq!(done.description.as_deref(), Some("Adds numbers."));
        assert!(stub.description.is_none());
    }
}

use crate::{
    config::Config,
    error::{Error, Result},
    manifest::SourceFileRecord,
    template::{BUILTIN_PREAMBLE, PromptEngine},
};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

/// Builds the reference document from described records and writes it.
pub struct DocumentAssembler {
    prompts: PromptEngine,
    preamble: String,
    output_path: PathBuf,
    backup_existing: bool,
}

impl DocumentAssembler {
    /// Creates an assembler. The preamble file, when configured, is read once
    /// here.
    ///
    /// # Errors
    ///
    /// Returns an error if the templates fail to compile or the preamble file
    /// cannot be read.
    pub fn new(config: &Config) -> Result<Self> {
        let preamble = match &config.preamble_path {
            Some(path) => fs::read_to_string(path).map_err(|e| Error::io(path, e))?,
            None => BUILTIN_PREAMBLE.to_string(),
        };

        Ok(Self {
            prompts: PromptEngine::new()?,
            preamble,
            output_path: config.document_path.clone(),
            backup_existing: config.backup_existing,
        })
    }

    /// Renders the document text. Identical records give identical bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the template fails to render.
    pub fn assemble(&self, records: &[SourceFileRecord]) -> Result<String> {
        self.prompts.render_document(&self.preamble, records)
    }

    /// Renders the document and replaces the file at the output path.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering, the optional backup, or the write fails.
    pub fn write(&self, records: &[SourceFileRecord]) -> Result<PathBuf> {
        let content = self.assemble(records)?;

        if let Some(parent) = self.output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        self.write_file_atomic(&self.output_path, &content)?;

        info!(
            "Wrote reference document with {} file descriptions to {}",
            records.len(),
            self.output_path.display()
        );
        Ok(self.output_path.clone())
    }

    /// Writes through a temporary sibling file and renames it into place.
    /// The temporary file is removed if any step fails.
    fn write_file_atomic(&self, path: &Path, content: &str) -> Result<()> {
        if path.exists() && self.backup_existing {
            backup_file(path)?;
        }

        let temp_path = temp_sibling(path)?;
        let result = write_and_rename(&temp_path, path, content);
        if result.is_err() && temp_path.exists() {
            if let Err(e) = fs::remove_file(&temp_path) {
                warn!("Failed to remove {}: {}", temp_path.display(), e);
            }
        }
        result
    }
}

/// `<name>.tmp` next to `path`, so `README.md` stages as `README.md.tmp`.
fn temp_sibling(path: &Path) -> Result<PathBuf> {
    let filename = path
        .file_name()
        .ok_or_else(|| Error::config("Invalid document path"))?
        .to_string_lossy();
    Ok(path.with_file_name(format!("{filename}.tmp")))
}

fn write_and_rename(temp_path: &Path, path: &Path, content: &str) -> Result<()> {
    let mut temp_file = fs::File::create(temp_path).map_err(|e| Error::io(temp_path, e))?;

    temp_file
        .write_all(content.as_bytes())
        .map_err(|e| Error::io(temp_path, e))?;
    temp_file
        .sync_all()
        .map_err(|e| Error::io(temp_path, e))?;
    drop(temp_file);

    fs::rename(temp_path, path).map_err(|e| Error::io(path, e))
}

/// Copies `path` to `<name>.backup.<timestamp>` next to it.
fn backup_file(path: &Path) -> Result<()> {
    let timestamp = chrono::Local::now().format("%Y%m%d%H%M%S%f");

    let filename = path
        .file_name()
        .ok_or_else(|| Error::config("Invalid document path"))?
        .to_string_lossy();

    let backup_path = path.with_file_name(format!("{filename}.backup.{timestamp}"));

    fs::copy(path, &backup_path).map_err(|e| Error::io(&backup_path, e))?;

    debug!("Created backup: {}", backup_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use assert_fs::TempDir;

    fn records() -> Vec<SourceFileRecord> {
        vec![
            SourceFileRecord::new("pipemem.v", "/src/rtl/core/pipemem.v")
                .described("A pipelined memory unit."),
            SourceFileRecord::new("div.v", "/src/rtl/core/div.v").described("A divider."),
        ]
    }

    fn assembler(temp: &TempDir, backup: bool) -> DocumentAssembler {
        let config = Config::builder()
            .base_dir(temp.path())
            .document_path(temp.child("out/README.md").path())
            .backup_existing(backup)
            .build()
            .unwrap();
        DocumentAssembler::new(&config).unwrap()
    }

    #[test]
    fn test_assemble_is_deterministic() {
        let temp = TempDir::new().unwrap();
        let assembler = assembler(&temp, false);

        let first = assembler.assemble(&records()).unwrap();
        let second = assembler.assemble(&records()).unwrap();

        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn test_assemble_layout() {
        let temp = TempDir::new().unwrap();
        let doc = assembler(&temp, false).assemble(&records()).unwrap();

        assert!(doc.starts_with("# The Zip CPU"));
        let listing = doc.split("## Verilog File Descriptions\n\n").nth(1).unwrap();
        assert_eq!(
            listing,
            "### File: pipemem.v\n- **Path**: /src/rtl/core/pipemem.v\nA pipelined memory unit.\n\n\
             ### File: div.v\n- **Path**: /src/rtl/core/div.v\nA divider.\n\n"
        );
    }

    #[test]
    fn test_assemble_empty_has_header_only() {
        let temp = TempDir::new().unwrap();
        let doc = assembler(&temp, false).assemble(&[]).unwrap();

        assert!(doc.ends_with("## Verilog File Descriptions\n\n"));
        assert!(!doc.contains("### File:"));
    }

    #[test]
    fn test_custom_preamble() {
        let temp = TempDir::new().unwrap();
        let preamble = temp.child("preamble.md");
        preamble.write_str("# My Core\n\nNotes.\n").unwrap();

        let config = Config::builder()
            .base_dir(temp.path())
            .preamble_path(preamble.path())
            .build()
            .unwrap();
        let doc = DocumentAssembler::new(&config)
            .unwrap()
            .assemble(&records())
            .unwrap();

        assert!(doc.starts_with("# My Core\n\nNotes.\n\n## Verilog File Descriptions"));
    }

    #[test]
    fn test_write_overwrites_previous_document() {
        let temp = TempDir::new().unwrap();
        let target = temp.child("out/README.md");
        let assembler = assembler(&temp, false);

        assembler.write(&records()).unwrap();
        assembler.write(&records()[..1]).unwrap();

        let written = fs::read_to_string(target.path()).unwrap();
        assert_eq!(written, assembler.assemble(&records()[..1]).unwrap());
        assert!(!temp.child("out/README.md.tmp").exists());
    }

    #[test]
    fn test_write_document_with_tmp_extension() {
        let temp = TempDir::new().unwrap();
        let config = Config::builder()
            .base_dir(temp.path())
            .document_path(temp.child("notes.tmp").path())
            .build()
            .unwrap();
        let assembler = DocumentAssembler::new(&config).unwrap();

        assembler.write(&records()).unwrap();

        let written = fs::read_to_string(temp.child("notes.tmp").path()).unwrap();
        assert_eq!(written, assembler.assemble(&records()).unwrap());
        assert!(!temp.child("notes.tmp.tmp").exists());
    }

    #[test]
    fn test_failed_write_removes_temp_file() {
        let temp = TempDir::new().unwrap();
        // A non-empty directory at the target makes the final rename fail
        temp.child("out/README.md/keep.txt").write_str("x").unwrap();

        let err = assembler(&temp, false).write(&records()).unwrap_err();

        assert!(matches!(err, Error::Io { .. }));
        assert!(!temp.child("out/README.md.tmp").exists());
        assert!(temp.child("out/README.md/keep.txt").exists());
    }

    #[test]
    fn test_write_creates_backup() {
        let temp = TempDir::new().unwrap();
        temp.child("out/README.md").write_str("old document").unwrap();

        assembler(&temp, true).write(&records()).unwrap();

        let backups: Vec<_> = fs::read_dir(temp.child("out").path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|name| name.contains(".backup."))
            .collect();
        assert_eq!(backups.len(), 1);

        let backup = temp.child("out").child(&backups[0]);
        assert_eq!(fs::read_to_string(backup.path()).unwrap(), "old document");
    }
}

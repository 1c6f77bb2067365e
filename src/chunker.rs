use crate::{
    config::Config,
    error::{Error, Result},
    file::read_source,
    manifest::SourceFileRecord,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// The chunked content of one source file, as stored in the chunk JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChunks {
    /// File name, e.g. `pipemem.v`
    pub file_name: String,

    /// Consecutive slices of the file content
    pub chunks: Vec<String>,
}

impl FileChunks {
    /// Returns the number of chunks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Returns true if the file produced no chunks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Splits source files into fixed-size character chunks.
pub struct Chunker {
    chunk_chars: usize,
}

impl Chunker {
    /// Creates a new chunker from configuration.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            chunk_chars: config.chunk_chars,
        }
    }

    /// Splits `text` into consecutive pieces of at most `chunk_chars` characters.
    ///
    /// Empty input yields no chunks.
    #[must_use]
    pub fn split_text(&self, text: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut count = 0;

        for ch in text.chars() {
            current.push(ch);
            count += 1;
            if count == self.chunk_chars {
                chunks.push(std::mem::take(&mut current));
                count = 0;
            }
        }

        if !current.is_empty() {
            chunks.push(current);
        }

        chunks
    }

    /// Reads and splits every record. Unreadable files are skipped.
    #[must_use]
    pub fn chunk_records(&self, records: &[SourceFileRecord]) -> Vec<FileChunks> {
        let mut out = Vec::with_capacity(records.len());

        for record in records {
            let content = match read_source(&record.path) {
                Ok(content) => content,
                Err(e) => {
                    warn!("Skipping {} due to file read error: {}", record.name, e);
                    continue;
                }
            };

            let chunks = self.split_text(&content);
            debug!("{}: {} chunks", record.name, chunks.len());
            out.push(FileChunks {
                file_name: record.name.clone(),
                chunks,
            });
        }

        out
    }

    /// Writes chunk JSON to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn write_json(path: &Path, files: &[FileChunks]) -> Result<()> {
        let json = serde_json::to_string_pretty(files)?;
        fs::write(path, json).map_err(|e| Error::io(path, e))?;

        info!(
            "Wrote {} chunks for {} files to {}",
            files.iter().map(FileChunks::len).sum::<usize>(),
            files.len(),
            path.display()
        );
        Ok(())
    }
}

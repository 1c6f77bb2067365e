//! Token estimation and the per-file token report.

use crate::chunker::FileChunks;
use crate::error::{Error, Result};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tiktoken_rs::CoreBPE;
use tracing::{debug, info};

const SIMPLE_CHARS_PER_TOKEN: usize = 4;
const ENHANCED_WORD_MULTIPLIER: f64 = 1.3;
const ENHANCED_SPECIAL_DIVISOR: usize = 10;

/// Type of tokenizer to use for estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenizerKind {
    /// Exact `cl100k_base` BPE counts, the encoding of gpt-3.5-turbo and gpt-4
    #[default]
    Cl100k,
    /// Simple character-based tokenizer (~4 chars per token)
    Simple,
    /// Enhanced tokenizer with word and special character analysis
    Enhanced,
}

impl TokenizerKind {
    /// Creates a new tokenizer instance of this kind.
    ///
    /// # Errors
    ///
    /// Returns an error if the BPE ranks for [`TokenizerKind::Cl100k`] fail
    /// to load.
    pub fn create(self) -> Result<Arc<dyn TokenEstimator>> {
        Ok(match self {
            Self::Cl100k => Arc::new(Cl100kTokenizer::new()?),
            Self::Simple => Arc::new(SimpleTokenizer),
            Self::Enhanced => Arc::new(EnhancedTokenizer),
        })
    }
}

/// Trait for estimating token counts in text.
///
/// Implementations should be thread-safe and cheap to call.
pub trait TokenEstimator: Send + Sync {
    /// Estimates the number of tokens in the given text.
    fn estimate(&self, text: &str) -> usize;

    /// Estimates tokens for a batch of texts.
    ///
    /// Default implementation calls `estimate` for each text.
    fn estimate_batch(&self, texts: &[&str]) -> Vec<usize> {
        texts.iter().map(|t| self.estimate(t)).collect()
    }
}

/// Exact token counts with the `cl100k_base` encoding.
pub(crate) struct Cl100kTokenizer {
    bpe: CoreBPE,
}

impl Cl100kTokenizer {
    pub(crate) fn new() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| Error::config(format!("failed to load cl100k_base: {e}")))?;
        Ok(Self { bpe })
    }
}

impl TokenEstimator for Cl100kTokenizer {
    fn estimate(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// Simple character-based tokenizer.
///
/// Uses a heuristic of approximately 4 characters per token,
/// which works reasonably well for HDL sources.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SimpleTokenizer;

impl TokenEstimator for SimpleTokenizer {
    fn estimate(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        let char_count = text.chars().count();
        char_count
            .saturating_add(SIMPLE_CHARS_PER_TOKEN - 1)
            .saturating_div(SIMPLE_CHARS_PER_TOKEN)
            .max(1)
    }
}

/// Enhanced tokenizer with multiple heuristics.
///
/// This tokenizer considers:
/// - Word count (weighted by 1.3)
/// - Character count (divided by 4)
/// - Special characters (penalty factor)
#[derive(Debug, Clone, Copy)]
pub(crate) struct EnhancedTokenizer;

impl TokenEstimator for EnhancedTokenizer {
    fn estimate(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        let words = count_words(text);
        let chars = text.chars().count();
        let special_chars = count_special_chars(text);

        let word_estimate = (words as f64 * ENHANCED_WORD_MULTIPLIER) as usize;
        let char_estimate = chars.saturating_div(SIMPLE_CHARS_PER_TOKEN);
        let special_penalty = special_chars.saturating_div(ENHANCED_SPECIAL_DIVISOR);

        let base_estimate = word_estimate
            .saturating_add(char_estimate)
            .saturating_div(2);

        base_estimate.saturating_add(special_penalty).max(1)
    }
}

#[inline]
fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

#[inline]
fn count_special_chars(text: &str) -> usize {
    text.chars()
        .filter(|c| !c.is_alphanumeric() && !c.is_whitespace())
        .count()
}

/// Token totals across a chunk file, per source file in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenReport {
    /// Sum over every file
    pub total: usize,
    /// `(file_name, tokens)` in the order files appeared
    pub per_file: Vec<(String, usize)>,
}

impl TokenReport {
    /// Counts tokens in every chunk of every file.
    ///
    /// A file name that appears twice keeps its first position and takes the
    /// later count, the way a keyed map would.
    #[must_use]
    pub fn from_chunks(files: &[FileChunks], estimator: &dyn TokenEstimator) -> Self {
        let mut report = Self::default();

        for file in files {
            let texts: Vec<&str> = file.chunks.iter().map(String::as_str).collect();
            let count: usize = estimator.estimate_batch(&texts).into_iter().sum();
            debug!("{}: {} tokens in {} chunks", file.file_name, count, texts.len());

            match report
                .per_file
                .iter_mut()
                .find(|(name, _)| *name == file.file_name)
            {
                Some(entry) => entry.1 = count,
                None => report.per_file.push((file.file_name.clone(), count)),
            }
        }

        report.total = report.per_file.iter().map(|(_, c)| c).sum();
        report
    }

    /// Loads a chunk JSON file and counts it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not chunk JSON.
    pub fn from_chunk_file(path: &Path, estimator: &dyn TokenEstimator) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let files: Vec<FileChunks> = serde_json::from_str(&raw)?;
        info!("Loaded {} files from {}", files.len(), path.display());
        Ok(Self::from_chunks(&files, estimator))
    }

    /// Writes the per-file counts as an ordered JSON object.
    ///
    /// # Errors
    ///
    /// Returns an error if the report cannot be written.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|e| Error::io(path, e))?;
        info!("Token counts saved to {}", path.display());
        Ok(())
    }

    /// Prints the total and per-file counts to stdout.
    pub fn print_summary(&self) {
        println!("Total tokens across all Verilog files: {}", self.total);
        println!("Token counts per file:");
        for (name, count) in &self.per_file {
            println!("{name}: {count}");
        }
    }
}

impl Serialize for TokenReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.per_file.len()))?;
        for (name, count) in &self.per_file {
            map.serialize_entry(name, count)?;
        }
        map.end()
    }
}

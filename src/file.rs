use crate::error::{Error, Result};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::Path;

/// Reads a whole source file as UTF-8 text.
///
/// # Errors
///
/// Returns an IO error carrying the path when the file is missing, unreadable,
/// or not valid UTF-8.
pub(crate) fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| Error::io(path, e))
}

/// Returns the first `max_chars` characters of `text`.
///
/// Counts characters, not bytes, so a multi-byte code point is never split.
#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Determines if a file is likely binary by sampling its head.
///
/// # Algorithm
///
/// 1. Reads the first 8KB of the file
/// 2. Checks for null bytes (binary indicator)
/// 3. Checks that the sample decodes as UTF-8
/// 4. Files with null bytes or invalid UTF-8 are considered binary
///
/// A multi-byte sequence cut off by the end of the sample still counts as
/// text.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub(crate) fn is_likely_binary(path: &Path) -> Result<bool> {
    const BUFFER_SIZE: usize = 8192;

    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);
    let mut buffer = [0u8; BUFFER_SIZE];

    let bytes_read = reader.read(&mut buffer).map_err(|e| Error::io(path, e))?;

    if bytes_read == 0 {
        return Ok(false);
    }

    let sample = &buffer[..bytes_read];

    if memchr::memchr(0, sample).is_some() {
        return Ok(true);
    }

    match std::str::from_utf8(sample) {
        Ok(_) => Ok(false),
        Err(e) => Ok(e.error_len().is_some()),
    }
}

use crate::{
    config::{Config, SourceLayout},
    error::{Error, Result},
    file::is_likely_binary,
    manifest::SourceFileRecord,
};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// Statistics collected during scanning.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct ScanStats {
    /// Files visited by the walker
    pub visited: usize,

    /// Files matching the source layout
    pub matched: usize,

    /// Layout matches skipped as binary
    pub binary: usize,

    /// Walk or probe errors
    pub errors: usize,
}

/// Discovers Verilog sources under the base directory.
pub(crate) struct Scanner {
    base_dir: PathBuf,
    layout: SourceLayout,
    matcher: GlobSet,
}

impl Scanner {
    /// Creates a new scanner from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the layout cannot be compiled into glob patterns.
    pub(crate) fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            base_dir: config.base_dir.clone(),
            layout: config.layout.clone(),
            matcher: build_layout_matcher(&config.layout)?,
        })
    }

    /// Walks the base directory and returns one record per matching source,
    /// sorted by path relative to the base.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoFiles`] when nothing matches the layout.
    pub(crate) fn scan(&self) -> Result<Vec<SourceFileRecord>> {
        let mut stats = ScanStats::default();
        let mut found: Vec<(String, SourceFileRecord)> = Vec::new();

        debug!("Scanning {} for Verilog sources", self.base_dir.display());

        let walker = WalkBuilder::new(&self.base_dir)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .hidden(true)
            .follow_links(false)
            .build();

        for result in walker {
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Walk error: {}", e);
                    stats.errors += 1;
                    continue;
                }
            };

            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            stats.visited += 1;

            let Some(relative) = self.relative_key(entry.path()) else {
                continue;
            };
            if !self.matches_layout(&relative) {
                trace!("Outside layout: {}", relative);
                continue;
            }
            stats.matched += 1;

            match is_likely_binary(entry.path()) {
                Ok(true) => {
                    debug!("Skipping binary file {}", entry.path().display());
                    stats.binary += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("Failed to probe {}: {}", entry.path().display(), e);
                    stats.errors += 1;
                    continue;
                }
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            found.push((relative, SourceFileRecord::new(name, entry.path())));
        }

        debug!(
            "Scan complete: {} visited, {} matched, {} binary, {} errors",
            stats.visited, stats.matched, stats.binary, stats.errors
        );

        if found.is_empty() {
            return Err(Error::no_files(&self.base_dir));
        }

        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found.into_iter().map(|(_, record)| record).collect())
    }

    /// Path relative to the base with `/` separators.
    fn relative_key(&self, path: &Path) -> Option<String> {
        let rel = pathdiff::diff_paths(path, &self.base_dir)?;
        Some(rel.to_string_lossy().replace('\\', "/"))
    }

    /// Checks the `<top>/<sub>/<name>.<ext>` shape, with a plain file stem.
    fn matches_layout(&self, relative: &str) -> bool {
        if !self.matcher.is_match(relative) {
            return false;
        }

        let file_name = relative.rsplit('/').next().unwrap_or_default();
        let stem = file_name
            .strip_suffix(&self.layout.extension)
            .and_then(|s| s.strip_suffix('.'))
            .unwrap_or_default();

        !stem.is_empty()
            && stem
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }
}

fn build_layout_matcher(layout: &SourceLayout) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();

    for top in &layout.top_dirs {
        for sub in &layout.sub_dirs {
            let pattern = format!("{top}/{sub}/*.{}", layout.extension);
            let glob = GlobBuilder::new(&pattern)
                .literal_separator(true)
                .build()
                .map_err(|e| Error::config(format!("invalid layout glob '{pattern}': {e}")))?;
            builder.add(glob);
        }
    }

    builder
        .build()
        .map_err(|e| Error::config(format!("failed to build layout matcher: {e}")))
}

use crate::{
    config::{Config, ResolutionMode},
    error::Result,
    file::read_source,
    reference::{file_listing_format, FileReference, ReferencePattern},
    retry::RetryingCaller,
    session::QueryFailure,
    template::PromptEngine,
};
use std::path::PathBuf;
use tracing::{debug, info, instrument, warn};

/// The model's relevant-files answer and the references recovered from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Raw model answer
    pub response: String,
    /// Valid references in order of appearance, duplicates included
    pub references: Vec<FileReference>,
}

/// Asks the model which source files matter for a query.
pub struct RelevanceResolver {
    caller: RetryingCaller,
    prompts: PromptEngine,
    pattern: ReferencePattern,
    document_path: PathBuf,
    mode: ResolutionMode,
}

impl RelevanceResolver {
    /// Creates a resolver reading the configured reference document.
    ///
    /// # Errors
    ///
    /// Returns an error if the templates or the reference pattern fail to
    /// compile.
    pub fn new(caller: RetryingCaller, config: &Config) -> Result<Self> {
        Ok(Self {
            caller,
            prompts: PromptEngine::new()?,
            pattern: ReferencePattern::from_config(config)?,
            document_path: config.document_path.clone(),
            mode: config.resolution,
        })
    }

    /// Reads the document, asks for relevant files, and extracts references.
    ///
    /// # Errors
    ///
    /// - [`QueryFailure::DocumentUnavailable`] if the document is missing or
    ///   empty; no call is made
    /// - [`QueryFailure::NoResponse`] if every attempt failed
    /// - [`QueryFailure::NoRelevantFiles`] if the answer names no valid path
    #[instrument(skip(self), fields(mode = ?self.mode))]
    pub fn resolve(&self, query: &str) -> std::result::Result<Resolved, QueryFailure> {
        let document = match read_source(&self.document_path) {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                warn!("Reference document {} is empty", self.document_path.display());
                return Err(QueryFailure::DocumentUnavailable);
            }
            Err(e) => {
                warn!("Error reading reference document: {}", e);
                return Err(QueryFailure::DocumentUnavailable);
            }
        };

        let structured = self.mode == ResolutionMode::Structured;
        let prompt = self
            .prompts
            .render_relevance(&document, query, structured)
            .map_err(QueryFailure::internal)?;

        info!("Identifying relevant files based on the reference document...");
        let reply = if structured {
            self.caller.call_with_format(&prompt, file_listing_format())
        } else {
            self.caller.call(&prompt)
        };
        let response = reply.ok_or(QueryFailure::NoResponse)?;

        let references = self.extract(&response);
        if references.is_empty() {
            return Err(QueryFailure::NoRelevantFiles { response });
        }

        info!("Identified {} relevant file reference(s)", references.len());
        Ok(Resolved {
            response,
            references,
        })
    }

    fn extract(&self, response: &str) -> Vec<FileReference> {
        if self.mode == ResolutionMode::Structured {
            if let Some(references) = self.pattern.extract_structured(response) {
                return references;
            }
            debug!("Structured answer did not parse, falling back to text extraction");
        }
        self.pattern.extract(response)
    }
}

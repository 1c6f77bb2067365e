//! One design question, answered end to end.
//!
//! A query moves through a fixed sequence of stages:
//!
//! ```text
//! Received -> ResolvingFiles -> FilesIdentified -> ReadingContents
//!          -> ContentGathered -> Synthesizing -> Answered
//! ```
//!
//! Any stage may instead end in `Failed`. A failure is terminal for that
//! query only; the session itself stays usable.

use crate::{
    client::{ChatClient, OpenAiClient},
    config::Config,
    error::{Error, Result},
    reference::FileReference,
    resolver::RelevanceResolver,
    retry::RetryingCaller,
    synthesizer::AnswerSynthesizer,
};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error as ThisError;
use tracing::{debug, info, instrument, warn};

/// Where a query currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStage {
    /// Accepted, nothing done yet
    Received,
    /// Waiting for the relevant-files answer
    ResolvingFiles,
    /// At least one valid reference extracted
    FilesIdentified,
    /// Reading referenced files
    ReadingContents,
    /// At least one file read
    ContentGathered,
    /// Waiting for the final answer
    Synthesizing,
    /// Terminal: answer available
    Answered,
    /// Terminal: see the outcome's failure
    Failed,
}

/// Why a query ended without an answer.
///
/// The display text is the user-facing message.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
#[non_exhaustive]
pub enum QueryFailure {
    /// The reference document is missing, unreadable, or empty
    #[error("Unable to identify relevant files.")]
    DocumentUnavailable,

    /// Every relevant-files attempt failed
    #[error("Unable to identify relevant files.")]
    NoResponse,

    /// The model answered but named no valid source path
    #[error("No relevant files found based on the query.")]
    NoRelevantFiles {
        /// The model's answer
        response: String,
    },

    /// None of the referenced files could be read
    #[error("Unable to gather file contents.")]
    NoReadableFiles,

    /// Every answer attempt failed
    #[error("Unable to generate an answer based on the Verilog files.")]
    NoAnswer,

    /// A local fault such as a template rendering error
    #[error("{message}")]
    Internal {
        /// Rendered error
        message: String,
    },
}

impl QueryFailure {
    /// Wraps a library error that ended a query.
    #[must_use]
    pub fn internal(error: Error) -> Self {
        Self::Internal {
            message: error.to_string(),
        }
    }
}

/// Everything gathered while answering one query.
#[derive(Debug, Clone)]
pub struct QueryContext {
    /// The question as asked
    pub query: String,
    /// Last stage reached
    pub stage: QueryStage,
    /// Raw relevant-files answer, once received
    pub relevance_response: Option<String>,
    /// References extracted from that answer
    pub candidate_references: Vec<FileReference>,
    /// Full contents of the files that could be read
    pub file_contents: Vec<(PathBuf, String)>,
}

impl QueryContext {
    fn new(query: &str) -> Self {
        Self {
            query: query.to_string(),
            stage: QueryStage::Received,
            relevance_response: None,
            candidate_references: Vec::new(),
            file_contents: Vec::new(),
        }
    }

    fn advance(&mut self, stage: QueryStage) {
        debug!(from = ?self.stage, to = ?stage, "Query stage change");
        self.stage = stage;
    }
}

/// The result of [`DesignQa::ask`] together with its intermediate state.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    /// Intermediate state at the end of the query
    pub context: QueryContext,
    /// The answer, or why there is none
    pub result: std::result::Result<String, QueryFailure>,
}

impl QueryOutcome {
    /// The answer text, or the failure message.
    #[must_use]
    pub fn message(&self) -> String {
        match &self.result {
            Ok(answer) => answer.clone(),
            Err(failure) => failure.to_string(),
        }
    }

    /// True when the query produced an answer.
    #[must_use]
    pub fn is_answered(&self) -> bool {
        self.result.is_ok()
    }
}

/// Answers questions about the codebase using the reference document.
pub struct DesignQa {
    resolver: RelevanceResolver,
    synthesizer: AnswerSynthesizer,
}

impl DesignQa {
    /// Creates a session that talks to the model through `client`.
    ///
    /// # Errors
    ///
    /// Returns an error if the templates or the reference pattern fail to
    /// compile.
    pub fn new(client: Arc<dyn ChatClient>, config: &Config) -> Result<Self> {
        let caller = RetryingCaller::new(client, config);

        Ok(Self {
            resolver: RelevanceResolver::new(caller.clone(), config)?,
            synthesizer: AnswerSynthesizer::new(caller, config)?,
        })
    }

    /// Creates a session backed by the configured chat-completion endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if no API key is configured or the HTTP client
    /// cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = OpenAiClient::new(config)?;
        Self::new(Arc::new(client), config)
    }

    /// Answers `query`. Never fails as a whole: failures are reported in the
    /// outcome.
    #[instrument(skip(self))]
    pub fn ask(&self, query: &str) -> QueryOutcome {
        let mut context = QueryContext::new(query);
        let result = self.run(&mut context);

        match &result {
            Ok(_) => {
                context.advance(QueryStage::Answered);
                info!("Query answered");
            }
            Err(failure) => {
                warn!(stage = ?context.stage, "Query failed: {}", failure);
                context.advance(QueryStage::Failed);
            }
        }

        QueryOutcome { context, result }
    }

    fn run(&self, context: &mut QueryContext) -> std::result::Result<String, QueryFailure> {
        context.advance(QueryStage::ResolvingFiles);
        let resolved = self.resolver.resolve(&context.query).map_err(|failure| {
            if let QueryFailure::NoRelevantFiles { response } = &failure {
                context.relevance_response = Some(response.clone());
            }
            failure
        })?;
        context.relevance_response = Some(resolved.response);
        context.candidate_references = resolved.references;
        context.advance(QueryStage::FilesIdentified);

        context.advance(QueryStage::ReadingContents);
        context.file_contents = self.synthesizer.gather(&context.candidate_references)?;
        context.advance(QueryStage::ContentGathered);

        context.advance(QueryStage::Synthesizing);
        self.synthesizer.answer(&context.query, &context.file_contents)
    }
}

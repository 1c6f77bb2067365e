use crate::{
    config::Config,
    error::Result,
    file::{read_source, truncate_chars},
    reference::FileReference,
    retry::RetryingCaller,
    session::QueryFailure,
    template::PromptEngine,
};
use std::path::PathBuf;
use tracing::{info, warn};

/// Reads referenced files and asks the model for the final answer.
pub struct AnswerSynthesizer {
    caller: RetryingCaller,
    prompts: PromptEngine,
    content_budget: usize,
}

impl AnswerSynthesizer {
    /// Creates a synthesizer with the configured content budget.
    ///
    /// # Errors
    ///
    /// Returns an error if the templates fail to compile.
    pub fn new(caller: RetryingCaller, config: &Config) -> Result<Self> {
        Ok(Self {
            caller,
            prompts: PromptEngine::new()?,
            content_budget: config.content_budget,
        })
    }

    /// Reads every referenced file in order. Unreadable or empty files are
    /// skipped with a warning.
    ///
    /// # Errors
    ///
    /// [`QueryFailure::NoReadableFiles`] when nothing could be read.
    pub fn gather(
        &self,
        references: &[FileReference],
    ) -> std::result::Result<Vec<(PathBuf, String)>, QueryFailure> {
        let mut contents = Vec::with_capacity(references.len());

        for reference in references {
            match read_source(&reference.path) {
                Ok(content) if !content.is_empty() => {
                    contents.push((reference.path.clone(), content));
                }
                Ok(_) => warn!("Skipping {}: file is empty", reference.path.display()),
                Err(e) => warn!("Skipping {} due to read error: {}", reference.path.display(), e),
            }
        }

        if contents.is_empty() {
            return Err(QueryFailure::NoReadableFiles);
        }
        Ok(contents)
    }

    /// Builds the answer prompt: one `File: <path>` block per file, each
    /// truncated to the content budget, followed by the query.
    ///
    /// # Errors
    ///
    /// Returns an error if the template fails to render.
    pub fn build_prompt(&self, query: &str, contents: &[(PathBuf, String)]) -> Result<String> {
        let files_content = contents
            .iter()
            .map(|(path, content)| {
                format!(
                    "File: {}\n{}",
                    path.display(),
                    truncate_chars(content, self.content_budget)
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        self.prompts.render_answer(&files_content, query)
    }

    /// Asks the model to answer `query` from the gathered contents.
    ///
    /// # Errors
    ///
    /// [`QueryFailure::NoAnswer`] if every attempt failed.
    pub fn answer(
        &self,
        query: &str,
        contents: &[(PathBuf, String)],
    ) -> std::result::Result<String, QueryFailure> {
        let prompt = self
            .build_prompt(query, contents)
            .map_err(QueryFailure::internal)?;

        info!("Preparing final answer based on {} file(s)...", contents.len());
        self.caller.call(&prompt).ok_or(QueryFailure::NoAnswer)
    }

    /// [`gather`](Self::gather) followed by [`answer`](Self::answer).
    ///
    /// # Errors
    ///
    /// Whichever of the two steps fails first.
    pub fn synthesize(
        &self,
        query: &str,
        references: &[FileReference],
    ) -> std::result::Result<String, QueryFailure> {
        let contents = self.gather(references)?;
        self.answer(query, &contents)
    }
}

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::token::TokenizerKind;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_MANIFEST_PATH: &str = "verilog_files_metadata.txt";
const DEFAULT_DOCUMENT_PATH: &str = "verilog_descriptions.md";
const DEFAULT_CHUNKS_PATH: &str = "verilog_chunks.json";
const DEFAULT_TOKEN_REPORT_PATH: &str = "token_counts.json";
const DEFAULT_CONTENT_BUDGET: usize = 3_000;
const DEFAULT_CHUNK_CHARS: usize = 3_000;

/// Default OpenAI-compatible endpoint.
pub(crate) const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
/// Default chat model.
pub(crate) const DEFAULT_MODEL: &str = "gpt-4o-mini";
/// Default completion budget per call.
pub(crate) const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 1_024;
/// Default per-request timeout.
pub(crate) const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
/// System instruction sent ahead of every user message.
pub(crate) const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant with a deep understanding of Verilog and hardware design.";

/// How the relevance resolver asks for and reads back file paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolutionMode {
    /// Free-text answer, paths recovered with the reference pattern
    #[default]
    Prose,
    /// JSON-schema constrained answer, pattern used to validate each path
    Structured,
}

/// Directory shape that source files (and file references) must follow:
/// `<base>/<top>/<sub>/<name>.<extension>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLayout {
    /// Allowed first-level directories
    pub top_dirs: Vec<String>,
    /// Allowed second-level directories
    pub sub_dirs: Vec<String>,
    /// File extension without the leading dot
    pub extension: String,
}

impl Default for SourceLayout {
    fn default() -> Self {
        Self {
            top_dirs: ["bench", "rtl", "sim"].map(String::from).to_vec(),
            sub_dirs: [
                "formal",
                "mcy",
                "zipcpu",
                "zipdma",
                "core",
                "ex",
                "peripherals",
                "rtl",
            ]
            .map(String::from)
            .to_vec(),
            extension: "v".to_string(),
        }
    }
}

impl SourceLayout {
    /// Checks that every directory name and the extension are plain path segments.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first offending entry.
    pub fn validate(&self) -> Result<()> {
        if self.top_dirs.is_empty() || self.sub_dirs.is_empty() {
            return Err(Error::config(
                "source layout needs at least one top-level and one sub-level directory",
            ));
        }

        for name in self.top_dirs.iter().chain(&self.sub_dirs) {
            if !is_plain_segment(name) {
                return Err(Error::config(format!(
                    "invalid layout directory '{name}': use letters, digits, '_' or '-'"
                )));
            }
        }

        if !is_plain_segment(&self.extension) {
            return Err(Error::config(format!(
                "invalid source extension '{}'",
                self.extension
            )));
        }

        Ok(())
    }
}

fn is_plain_segment(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Settings for the chat-completion collaborator.
#[derive(Clone)]
pub struct LlmConfig {
    /// Base URL of the OpenAI-compatible API
    pub api_base: String,
    /// Bearer credential
    pub api_key: Option<String>,
    /// Model identifier
    pub model: String,
    /// Completion budget per call
    pub max_output_tokens: u32,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// System instruction preceding every user message
    pub system_prompt: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

// Keeps the key out of logs.
impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_base", &self.api_base)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("request_timeout", &self.request_timeout)
            .field("system_prompt", &self.system_prompt)
            .finish()
    }
}

/// Configuration shared by every verilog-qa component.
///
/// Use [`Config::builder()`] to construct a new configuration.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Config {
    /// Root of the Verilog source tree (canonical, absolute)
    pub base_dir: PathBuf,

    /// Manifest listing `(name, path)` pairs
    pub manifest_path: PathBuf,

    /// Assembled reference document
    pub document_path: PathBuf,

    /// Chunk JSON written by the chunker and read by the token counter
    pub chunks_path: PathBuf,

    /// Token report output
    pub token_report_path: PathBuf,

    /// Optional replacement for the built-in document preamble
    pub preamble_path: Option<PathBuf>,

    /// Keep a timestamped copy of a document before overwriting it
    pub backup_existing: bool,

    /// Directory shape of source files
    pub layout: SourceLayout,

    /// Chat-completion settings
    pub llm: LlmConfig,

    /// Retry policy for every chat call
    pub retry: RetryPolicy,

    /// Characters of each file passed to the answer prompt
    pub content_budget: usize,

    /// Characters per chunk written by the chunker
    pub chunk_chars: usize,

    /// Tokenizer used by the token counter
    pub tokenizer: TokenizerKind,

    /// How relevant files are requested and extracted
    pub resolution: ResolutionMode,
}

impl Config {
    /// Creates a new configuration builder.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use verilog_qa::Config;
    ///
    /// let config = Config::builder()
    ///     .base_dir("./zipcpu")
    ///     .document_path("./verilog_descriptions.md")
    ///     .build()
    ///     .expect("valid configuration");
    /// ```
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Base directory doesn't exist or is not a directory
    /// - A numeric limit is zero
    /// - The source layout or LLM settings are malformed
    /// - The preamble file is missing
    pub fn validate(&self) -> Result<()> {
        if !self.base_dir.exists() {
            return Err(Error::config(format!(
                "Base directory does not exist: {}",
                self.base_dir.display()
            )));
        }

        if !self.base_dir.is_dir() {
            return Err(Error::config(format!(
                "Base path is not a directory: {}",
                self.base_dir.display()
            )));
        }

        if self.content_budget == 0 {
            return Err(Error::config("content_budget must be greater than 0"));
        }

        if self.chunk_chars == 0 {
            return Err(Error::config("chunk_chars must be greater than 0"));
        }

        if self.retry.max_attempts == 0 {
            return Err(Error::config("max_attempts must be at least 1"));
        }

        self.layout.validate()?;

        if self.llm.model.trim().is_empty() {
            return Err(Error::config("model must not be empty"));
        }

        if self.llm.max_output_tokens == 0 {
            return Err(Error::config("max_output_tokens must be greater than 0"));
        }

        if !(self.llm.api_base.starts_with("http://") || self.llm.api_base.starts_with("https://"))
        {
            return Err(Error::config(format!(
                "api_base must be an http(s) URL: {}",
                self.llm.api_base
            )));
        }

        if let Some(ref preamble) = self.preamble_path {
            if !preamble.is_file() {
                return Err(Error::config(format!(
                    "Preamble file does not exist: {}",
                    preamble.display()
                )));
            }
        }

        Ok(())
    }

    /// Returns the configured API key or [`Error::MissingCredential`].
    ///
    /// # Errors
    ///
    /// Fails when no non-empty key was supplied.
    pub fn api_key(&self) -> Result<&str> {
        self.llm
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(Error::MissingCredential)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            manifest_path: PathBuf::from(DEFAULT_MANIFEST_PATH),
            document_path: PathBuf::from(DEFAULT_DOCUMENT_PATH),
            chunks_path: PathBuf::from(DEFAULT_CHUNKS_PATH),
            token_report_path: PathBuf::from(DEFAULT_TOKEN_REPORT_PATH),
            preamble_path: None,
            backup_existing: false,
            layout: SourceLayout::default(),
            llm: LlmConfig::default(),
            retry: RetryPolicy::default(),
            content_budget: DEFAULT_CONTENT_BUDGET,
            chunk_chars: DEFAULT_CHUNK_CHARS,
            tokenizer: TokenizerKind::default(),
            resolution: ResolutionMode::Prose,
        }
    }
}

/// Builder for creating a [`Config`].
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    base_dir: Option<PathBuf>,
    manifest_path: Option<PathBuf>,
    document_path: Option<PathBuf>,
    chunks_path: Option<PathBuf>,
    token_report_path: Option<PathBuf>,
    preamble_path: Option<PathBuf>,
    backup_existing: bool,
    layout: Option<SourceLayout>,
    api_base: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    max_output_tokens: Option<u32>,
    request_timeout: Option<Duration>,
    system_prompt: Option<String>,
    max_attempts: Option<usize>,
    retry_delay: Option<Duration>,
    content_budget: Option<usize>,
    chunk_chars: Option<usize>,
    tokenizer: Option<TokenizerKind>,
    resolution: Option<ResolutionMode>,
}

impl ConfigBuilder {
    /// Sets the root of the Verilog source tree.
    #[must_use]
    pub fn base_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(path.into());
        self
    }

    /// Sets the manifest location.
    #[must_use]
    pub fn manifest_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.manifest_path = Some(path.into());
        self
    }

    /// Sets the reference document location.
    #[must_use]
    pub fn document_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.document_path = Some(path.into());
        self
    }

    /// Sets the chunk JSON location.
    #[must_use]
    pub fn chunks_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.chunks_path = Some(path.into());
        self
    }

    /// Sets the token report location.
    #[must_use]
    pub fn token_report_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_report_path = Some(path.into());
        self
    }

    /// Replaces the built-in document preamble with the contents of a file.
    #[must_use]
    pub fn preamble_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.preamble_path = Some(path.into());
        self
    }

    /// Enables or disables backups of an existing document.
    #[must_use]
    pub fn backup_existing(mut self, enabled: bool) -> Self {
        self.backup_existing = enabled;
        self
    }

    /// Sets the source directory layout.
    #[must_use]
    pub fn layout(mut self, layout: SourceLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    /// Sets the API base URL.
    #[must_use]
    pub fn api_base(mut self, url: impl Into<String>) -> Self {
        self.api_base = Some(url.into());
        self
    }

    /// Sets the API credential.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the chat model.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the completion budget per call.
    #[must_use]
    pub fn max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = Some(tokens);
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Overrides the system instruction.
    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Sets the number of attempts per chat call.
    #[must_use]
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Sets the fixed delay between attempts.
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Sets the per-file character budget for the answer prompt.
    #[must_use]
    pub fn content_budget(mut self, chars: usize) -> Self {
        self.content_budget = Some(chars);
        self
    }

    /// Sets the chunk size in characters.
    #[must_use]
    pub fn chunk_chars(mut self, chars: usize) -> Self {
        self.chunk_chars = Some(chars);
        self
    }

    /// Sets the tokenizer implementation.
    #[must_use]
    pub fn tokenizer(mut self, kind: TokenizerKind) -> Self {
        self.tokenizer = Some(kind);
        self
    }

    /// Sets the resolution mode.
    #[must_use]
    pub fn resolution(mut self, mode: ResolutionMode) -> Self {
        self.resolution = Some(mode);
        self
    }

    /// Builds the configuration.
    ///
    /// The base directory is canonicalised so that file references can be
    /// matched against an absolute prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails or the base directory cannot be
    /// resolved.
    pub fn build(self) -> Result<Config> {
        let defaults = RetryPolicy::default();
        let llm_defaults = LlmConfig::default();

        let mut config = Config {
            base_dir: self.base_dir.unwrap_or_else(|| PathBuf::from(".")),
            manifest_path: self
                .manifest_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MANIFEST_PATH)),
            document_path: self
                .document_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DOCUMENT_PATH)),
            chunks_path: self
                .chunks_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CHUNKS_PATH)),
            token_report_path: self
                .token_report_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TOKEN_REPORT_PATH)),
            preamble_path: self.preamble_path,
            backup_existing: self.backup_existing,
            layout: self.layout.unwrap_or_default(),
            llm: LlmConfig {
                api_base: self
                    .api_base
                    .map(|url| url.trim_end_matches('/').to_string())
                    .unwrap_or(llm_defaults.api_base),
                api_key: self.api_key,
                model: self.model.unwrap_or(llm_defaults.model),
                max_output_tokens: self
                    .max_output_tokens
                    .unwrap_or(llm_defaults.max_output_tokens),
                request_timeout: self
                    .request_timeout
                    .unwrap_or(llm_defaults.request_timeout),
                system_prompt: self.system_prompt.unwrap_or(llm_defaults.system_prompt),
            },
            retry: RetryPolicy {
                max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts),
                delay: self.retry_delay.unwrap_or(defaults.delay),
            },
            content_budget: self.content_budget.unwrap_or(DEFAULT_CONTENT_BUDGET),
            chunk_chars: self.chunk_chars.unwrap_or(DEFAULT_CHUNK_CHARS),
            tokenizer: self.tokenizer.unwrap_or_default(),
            resolution: self.resolution.unwrap_or_default(),
        };

        config.validate()?;

        config.base_dir = std::fs::canonicalize(&config.base_dir)
            .map_err(|e| Error::io(&config.base_dir, e))?;

        Ok(config)
    }
}

//! # verilog-qa
//!
//! Describe a Verilog codebase with an LLM, then answer design questions
//! against the result.
//!
//! ## Features
//!
//! - Source discovery with `.gitignore` support and a configurable directory layout
//! - One description per file, collected into a single reference document
//! - Two-step question answering: pick relevant files, then answer from their contents
//! - Fixed-delay retries around every chat-completion call
//! - Character chunking and exact token counts for the whole codebase
//!
//! ## Quick Start
//!
//! ```no_run
//! use verilog_qa::{Config, DesignQa};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = Config::builder()
//!     .base_dir("./zipcpu")
//!     .document_path("./verilog_descriptions.md")
//!     .api_key(std::env::var("OPENAI_API_KEY")?)
//!     .build()?;
//!
//! verilog_qa::index(&config)?;
//! verilog_qa::describe(config.clone())?;
//!
//! let outcome = DesignQa::from_config(&config)?.ask("How does pipemem stall?");
//! println!("{}", outcome.message());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! Offline, a describe run turns the manifest into the reference document:
//! 1. **Scanner**: Lists source files matching the layout
//! 2. **Generator**: Asks the model to describe each file
//! 3. **Assembler**: Writes the preamble and every description
//!
//! At query time a [`DesignQa`] session chains:
//! 1. **Resolver**: Asks which files matter and extracts their paths
//! 2. **Synthesizer**: Reads those files and asks for the answer

#![warn(
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery
)]
#![allow(clippy::module_name_repetitions)]

mod chunker;
mod client;
mod config;
mod document;
mod error;
mod file;
mod generator;
mod manifest;
mod pipeline;
mod reference;
mod resolver;
mod retry;
mod scanner;
mod session;
mod synthesizer;
mod template;
mod token;

pub use chunker::{Chunker, FileChunks};
pub use client::{ChatClient, ChatMessage, ChatRequest, OpenAiClient, Role};
pub use config::{Config, ConfigBuilder, LlmConfig, ResolutionMode, SourceLayout};
pub use document::DocumentAssembler;
pub use error::{Error, Result};
pub use file::truncate_chars;
pub use generator::{Generated, MetadataGenerator};
pub use manifest::SourceFileRecord;
pub use pipeline::{DescribePipeline, GenerationStats};
pub use reference::{FileReference, ReferencePattern};
pub use resolver::{RelevanceResolver, Resolved};
pub use retry::{RetryPolicy, RetryingCaller};
pub use session::{DesignQa, QueryContext, QueryFailure, QueryOutcome, QueryStage};
pub use synthesizer::AnswerSynthesizer;
pub use token::{TokenEstimator, TokenReport, TokenizerKind};

/// Discovers source files under the base directory and writes the manifest.
///
/// # Errors
///
/// Returns an error if:
/// - No file matches the source layout
/// - The manifest cannot be written
pub fn index(config: &Config) -> Result<Vec<SourceFileRecord>> {
    let records = scanner::Scanner::new(config)?.scan()?;
    manifest::save(&config.manifest_path, &records)?;
    Ok(records)
}

/// Runs a describe pass against the configured chat-completion endpoint.
///
/// # Errors
///
/// Returns an error if the API key is missing, the manifest cannot be read,
/// or the document cannot be written.
pub fn describe(config: Config) -> Result<GenerationStats> {
    DescribePipeline::from_config(config)?.run()
}

/// Splits every manifest file into character chunks and writes the chunk JSON.
///
/// # Errors
///
/// Returns an error if the manifest cannot be read or the JSON cannot be
/// written.
pub fn chunk(config: &Config) -> Result<Vec<FileChunks>> {
    let records = manifest::load(&config.manifest_path)?;
    let files = Chunker::new(config).chunk_records(&records);
    Chunker::write_json(&config.chunks_path, &files)?;
    Ok(files)
}

/// Counts tokens in the chunk JSON and writes the token report.
///
/// # Errors
///
/// Returns an error if the chunk JSON cannot be read or the report cannot be
/// written.
pub fn count_tokens(config: &Config) -> Result<TokenReport> {
    let estimator = config.tokenizer.create()?;
    let report = TokenReport::from_chunk_file(&config.chunks_path, estimator.as_ref())?;
    report.write_json(&config.token_report_path)?;
    Ok(report)
}

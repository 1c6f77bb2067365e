use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use verilog_qa::{
    Config, ConfigBuilder, DesignQa, QueryOutcome, ResolutionMode, TokenizerKind, truncate_chars,
};

static EXIT_COMMANDS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["exit", "quit"].into_iter().collect());

#[derive(Parser, Debug)]
#[command(
    name = "verilog-qa",
    version,
    author,
    about = "Describe a Verilog codebase with an LLM and ask questions about it",
    long_about = "Describe a Verilog codebase with an LLM and ask questions about it.\n\n\
    The tool lists the Verilog sources under a base directory, asks the model for a \
    description of each file, and collects the descriptions into one reference document. \
    Questions are answered in two steps: the model first picks the relevant files from \
    the document, then answers from their contents.\n\n\
    USAGE EXAMPLES:\n  \
      # List sources and write the manifest\n  \
      verilog-qa --base-dir ./zipcpu index\n\n  \
      # Describe every file and write verilog_descriptions.md\n  \
      verilog-qa --base-dir ./zipcpu describe\n\n  \
      # Ask questions interactively\n  \
      verilog-qa --base-dir ./zipcpu ask\n\n  \
      # Ask a single question\n  \
      verilog-qa --base-dir ./zipcpu ask --query \"How does pipemem stall?\""
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Root of the Verilog source tree
    #[arg(short, long, global = true, default_value = ".", value_name = "PATH")]
    base_dir: PathBuf,

    /// File manifest written by `index` and read by `describe` and `chunk`
    #[arg(long, global = true, default_value = "verilog_files_metadata.txt", value_name = "FILE")]
    manifest: PathBuf,

    /// Reference document written by `describe` and read by `ask`
    #[arg(long, global = true, default_value = "verilog_descriptions.md", value_name = "FILE")]
    document: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Args, Debug)]
struct LlmArgs {
    /// API key for the chat-completion endpoint
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Base URL of the chat-completion API
    #[arg(long, env = "OPENAI_API_BASE", value_name = "URL")]
    api_base: Option<String>,

    /// Model name
    #[arg(short, long, default_value = "gpt-4o-mini")]
    model: String,

    /// Maximum tokens per completion
    #[arg(long, default_value_t = 1024)]
    max_tokens: u32,

    /// Attempts per call, including the first
    #[arg(long, default_value_t = 3)]
    max_attempts: usize,

    /// Seconds to wait after a failed attempt
    #[arg(long, default_value_t = 2)]
    retry_delay: u64,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 120)]
    timeout: u64,
}

impl LlmArgs {
    fn apply(self, mut builder: ConfigBuilder) -> ConfigBuilder {
        if let Some(key) = self.api_key {
            builder = builder.api_key(key);
        }
        if let Some(url) = self.api_base {
            builder = builder.api_base(url);
        }

        builder
            .model(self.model)
            .max_output_tokens(self.max_tokens)
            .max_attempts(self.max_attempts)
            .retry_delay(Duration::from_secs(self.retry_delay))
            .request_timeout(Duration::from_secs(self.timeout))
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Find Verilog sources under the base directory and write the manifest
    Index,

    /// Describe every manifest file and write the reference document
    Describe {
        #[command(flatten)]
        llm: LlmArgs,

        /// Replace the built-in document preamble with this file
        #[arg(long, value_name = "FILE")]
        preamble: Option<PathBuf>,

        /// Keep a timestamped copy of the previous document
        #[arg(long)]
        backup: bool,
    },

    /// Split every manifest file into character chunks
    Chunk {
        /// Output JSON file
        #[arg(short, long, default_value = "verilog_chunks.json", value_name = "FILE")]
        out: PathBuf,

        /// Characters per chunk
        #[arg(long, default_value_t = 3000)]
        chunk_chars: usize,
    },

    /// Estimate tokens in the chunk file
    CountTokens {
        /// Chunk JSON written by `chunk`
        #[arg(short, long, default_value = "verilog_chunks.json", value_name = "FILE")]
        chunks: PathBuf,

        /// Output JSON file
        #[arg(short, long, default_value = "token_counts.json", value_name = "FILE")]
        out: PathBuf,

        /// Tokenizer to use
        #[arg(long, value_enum, default_value = "cl100k")]
        tokenizer: CliTokenizer,
    },

    /// Ask questions about the design
    Ask {
        #[command(flatten)]
        llm: LlmArgs,

        /// Answer this question and exit instead of starting a prompt
        #[arg(short, long)]
        query: Option<String>,

        /// Characters of each file used for the answer
        #[arg(long, default_value_t = 3000)]
        content_budget: usize,

        /// Request the relevant files as JSON instead of prose
        #[arg(long)]
        structured: bool,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliTokenizer {
    /// Exact cl100k_base BPE counts
    Cl100k,
    /// About four characters per token
    Simple,
    /// Word, character and punctuation heuristic
    Enhanced,
}

impl From<CliTokenizer> for TokenizerKind {
    fn from(t: CliTokenizer) -> Self {
        match t {
            CliTokenizer::Cl100k => Self::Cl100k,
            CliTokenizer::Simple => Self::Simple,
            CliTokenizer::Enhanced => Self::Enhanced,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_tracing(cli.global.verbose)?;

    let builder = Config::builder()
        .base_dir(cli.global.base_dir)
        .manifest_path(cli.global.manifest)
        .document_path(cli.global.document);

    match cli.command {
        Command::Index => {
            let config = builder.build().context("Failed to build configuration")?;
            let records = verilog_qa::index(&config).context("Indexing failed")?;
            println!(
                "Listed {} Verilog files in {}",
                records.len(),
                config.manifest_path.display()
            );
        }

        Command::Describe {
            llm,
            preamble,
            backup,
        } => {
            let mut builder = llm.apply(builder).backup_existing(backup);
            if let Some(path) = preamble {
                builder = builder.preamble_path(path);
            }
            let config = builder.build().context("Failed to build configuration")?;

            verilog_qa::describe(config)
                .context("Describe run failed")?
                .print_summary();
        }

        Command::Chunk { out, chunk_chars } => {
            let config = builder
                .chunks_path(out)
                .chunk_chars(chunk_chars)
                .build()
                .context("Failed to build configuration")?;

            let files = verilog_qa::chunk(&config).context("Chunking failed")?;
            println!(
                "Chunked {} files into {}",
                files.len(),
                config.chunks_path.display()
            );
        }

        Command::CountTokens {
            chunks,
            out,
            tokenizer,
        } => {
            let config = builder
                .chunks_path(chunks)
                .token_report_path(out)
                .tokenizer(tokenizer.into())
                .build()
                .context("Failed to build configuration")?;

            verilog_qa::count_tokens(&config)
                .context("Token counting failed")?
                .print_summary();
        }

        Command::Ask {
            llm,
            query,
            content_budget,
            structured,
        } => {
            let mode = if structured {
                ResolutionMode::Structured
            } else {
                ResolutionMode::Prose
            };
            let config = llm
                .apply(builder)
                .content_budget(content_budget)
                .resolution(mode)
                .build()
                .context("Failed to build configuration")?;

            let session =
                DesignQa::from_config(&config).context("Failed to start the Q&A session")?;

            match query {
                Some(query) => print_outcome(&session.ask(&query), config.content_budget),
                None => run_prompt(&session, config.content_budget)?,
            }
        }
    }

    Ok(())
}

/// Reads one question per line until EOF or an exit command.
fn run_prompt(session: &DesignQa, content_budget: usize) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    println!("Ask about the design. Type 'exit' or 'quit' to leave.");

    loop {
        print!("\nQuery: ");
        io::stdout().flush().context("Failed to flush stdout")?;

        let Some(line) = lines.next() else {
            break;
        };
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                eprintln!("An error occurred: {e}");
                continue;
            }
        };

        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if EXIT_COMMANDS.contains(query.to_lowercase().as_str()) {
            break;
        }

        print_outcome(&session.ask(query), content_budget);
    }

    Ok(())
}

fn print_outcome(outcome: &QueryOutcome, content_budget: usize) {
    let context = &outcome.context;

    if let Some(response) = &context.relevance_response {
        println!("\nRelevant files response:\n{response}");
    }

    if !context.candidate_references.is_empty() {
        println!("\nIdentified files:");
        for reference in &context.candidate_references {
            println!("- {}", reference.path.display());
        }
    }

    for (path, content) in &context.file_contents {
        println!("\nFile: {}\n{}", path.display(), truncate_chars(content, content_budget));
    }

    println!("\nAnswer:\n{}", outcome.message());
}

fn setup_tracing(verbosity: u8) -> anyhow::Result<()> {
    let filter = match verbosity {
        0 => EnvFilter::new("verilog_qa=info"),
        1 => EnvFilter::new("verilog_qa=debug"),
        _ => EnvFilter::new("verilog_qa=trace"),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_writer(io::stderr),
        )
        .init();

    Ok(())
}

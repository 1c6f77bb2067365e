use crate::{
    client::{ChatClient, OpenAiClient},
    config::Config,
    document::DocumentAssembler,
    error::Result,
    generator::MetadataGenerator,
    manifest,
    retry::RetryingCaller,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

/// Statistics collected during a describe run.
#[derive(Debug, Clone)]
pub struct GenerationStats {
    /// Records listed in the manifest
    pub listed: usize,

    /// Records that received a description
    pub described: usize,

    /// Records skipped because the file could not be read
    pub skipped_read: usize,

    /// Records skipped because every LLM attempt failed
    pub skipped_call: usize,

    /// Total execution time
    pub duration: Duration,

    /// Time spent waiting on descriptions
    pub describe_duration: Duration,

    /// Time spent assembling and writing the document
    pub write_duration: Duration,

    /// Reference document path
    pub document_path: String,

    /// Local time the run finished
    pub generated_at: String,
}

impl GenerationStats {
    /// Records that did not make it into the document.
    #[must_use]
    pub const fn skipped(&self) -> usize {
        self.skipped_read + self.skipped_call
    }

    /// Prints a human-readable summary to stdout.
    pub fn print_summary(&self) {
        println!("\n╔═══════════════════════════════════════════════════════╗");
        println!("║              Describe Run Summary                     ║");
        println!("╠═══════════════════════════════════════════════════════╣");
        println!(
            "║ Files Listed:         {:>8}                        ║",
            self.listed
        );
        println!(
            "║ Files Described:      {:>8}                        ║",
            self.described
        );
        println!(
            "║   - Unreadable:       {:>8}                        ║",
            self.skipped_read
        );
        println!(
            "║   - LLM failures:     {:>8}                        ║",
            self.skipped_call
        );
        println!("║                                                       ║");
        println!("║ Reference Document:                                   ║");
        println!("║   {}", self.document_path);
        println!("║ Generated At:         {}           ║", self.generated_at);
        println!("║                                                       ║");
        println!("║ Timing Breakdown:                                     ║");
        println!(
            "║   - Describing:       {:>8.2}s                     ║",
            self.describe_duration.as_secs_f64()
        );
        println!(
            "║   - Writing:          {:>8.2}s                     ║",
            self.write_duration.as_secs_f64()
        );
        println!(
            "║   - Total:            {:>8.2}s                     ║",
            self.duration.as_secs_f64()
        );
        println!("╚═══════════════════════════════════════════════════════╝\n");
    }
}

/// Turns the manifest into the reference document.
///
/// Loads the manifest, describes each file through the model, then writes
/// the assembled document.
pub struct DescribePipeline {
    config: Config,
    generator: MetadataGenerator,
    assembler: DocumentAssembler,
}

impl DescribePipeline {
    /// Creates a pipeline that talks to the model through `client`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration validation fails
    /// - The templates or the preamble cannot be loaded
    pub fn new(config: Config, client: Arc<dyn ChatClient>) -> Result<Self> {
        config.validate()?;

        let caller = RetryingCaller::new(client, &config);
        let generator = MetadataGenerator::new(caller)?;
        let assembler = DocumentAssembler::new(&config)?;

        Ok(Self {
            config,
            generator,
            assembler,
        })
    }

    /// Creates a pipeline backed by the configured chat-completion endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if no API key is configured, the HTTP client cannot
    /// be built, or [`DescribePipeline::new`] fails.
    pub fn from_config(config: Config) -> Result<Self> {
        let client = OpenAiClient::new(&config)?;
        Self::new(config, Arc::new(client))
    }

    /// Executes the describe run and returns statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be loaded or the document
    /// cannot be written. Individual file failures are counted, not raised.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use verilog_qa::{Config, DescribePipeline};
    ///
    /// # fn main() -> anyhow::Result<()> {
    /// let config = Config::builder()
    ///     .base_dir("./zipcpu")
    ///     .api_key(std::env::var("OPENAI_API_KEY")?)
    ///     .build()?;
    ///
    /// let stats = DescribePipeline::from_config(config)?.run()?;
    /// println!("Described {} files", stats.described);
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip(self), fields(manifest = %self.config.manifest_path.display()))]
    pub fn run(&self) -> Result<GenerationStats> {
        let start = Instant::now();

        let records = manifest::load(&self.config.manifest_path)?;
        if records.is_empty() {
            warn!("Manifest is empty, the document will only contain the preamble");
        }

        let describe_start = Instant::now();
        let generated = self.generator.generate(&records)?;
        let describe_duration = describe_start.elapsed();

        let write_start = Instant::now();
        let document_path = self.assembler.write(&generated.records)?;
        let write_duration = write_start.elapsed();

        let stats = GenerationStats {
            listed: records.len(),
            described: generated.records.len(),
            skipped_read: generated.skipped_read,
            skipped_call: generated.skipped_call,
            duration: start.elapsed(),
            describe_duration,
            write_duration,
            document_path: document_path.display().to_string(),
            generated_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        };

        info!(
            "Describe run complete: {}/{} files in {:.2}s",
            stats.described,
            stats.listed,
            stats.duration.as_secs_f64()
        );

        Ok(stats)
    }
}

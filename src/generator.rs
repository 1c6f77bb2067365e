use crate::{
    error::Result,
    file::read_source,
    manifest::SourceFileRecord,
    retry::RetryingCaller,
    template::PromptEngine,
};
use tracing::{info, instrument, warn};

/// Described records plus what was skipped along the way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Generated {
    /// Records with a description, in input order
    pub records: Vec<SourceFileRecord>,

    /// Records dropped because the file could not be read
    pub skipped_read: usize,

    /// Records dropped because every LLM attempt failed
    pub skipped_call: usize,
}

/// Asks the model for a description of each source file.
pub struct MetadataGenerator {
    caller: RetryingCaller,
    prompts: PromptEngine,
}

impl MetadataGenerator {
    /// Creates a generator.
    ///
    /// # Errors
    ///
    /// Returns an error if the templates fail to compile.
    pub fn new(caller: RetryingCaller) -> Result<Self> {
        Ok(Self {
            caller,
            prompts: PromptEngine::new()?,
        })
    }

    /// Describes every record in order, one model call per readable file.
    ///
    /// A file that cannot be read (or is empty) is skipped without a call. A
    /// file whose call fails after all retries is skipped as well. Neither
    /// stops the run.
    ///
    /// # Errors
    ///
    /// Returns an error only if a prompt fails to render.
    #[instrument(skip_all, fields(files = records.len()))]
    pub fn generate(&self, records: &[SourceFileRecord]) -> Result<Generated> {
        let total = records.len();
        let mut generated = Generated::default();

        for (idx, record) in records.iter().enumerate() {
            info!("Processing file {}/{}: {}", idx + 1, total, record.name);

            let content = match read_source(&record.path) {
                Ok(content) if !content.is_empty() => content,
                Ok(_) => {
                    warn!("Skipping {}: file is empty", record.path.display());
                    generated.skipped_read += 1;
                    continue;
                }
                Err(e) => {
                    warn!("Error reading file {}: {}", record.path.display(), e);
                    generated.skipped_read += 1;
                    continue;
                }
            };

            let prompt = self.prompts.render_describe(record, &content, records)?;

            match self.caller.call(&prompt) {
                Some(description) => generated.records.push(record.described(description)),
                None => {
                    warn!("No description for {}, leaving it out", record.name);
                    generated.skipped_call += 1;
                }
            }
        }

        info!(
            "Described {}/{} files ({} unreadable, {} failed)",
            generated.records.len(),
            total,
            generated.skipped_read,
            generated.skipped_call
        );

        Ok(generated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{testing::ScriptedClient, ChatClient};
    use crate::config::Config;
    use crate::error::Error;
    use assert_fs::prelude::*;
    use assert_fs::TempDir;
    use std::sync::Arc;
    use std::time::Duration;

    fn generator(temp: &TempDir, client: &Arc<ScriptedClient>) -> MetadataGenerator {
        let config = Config::builder()
            .base_dir(temp.path())
            .retry_delay(Duration::ZERO)
            .build()
            .unwrap();
        let caller = RetryingCaller::new(Arc::clone(client) as Arc<dyn ChatClient>, &config);
        MetadataGenerator::new(caller).unwrap()
    }

    fn record(temp: &TempDir, rel: &str, content: Option<&str>) -> SourceFileRecord {
        let child = temp.child(rel);
        if let Some(text) = content {
            child.write_str(text).unwrap();
        }
        let name = rel.rsplit('/').next().unwrap();
        SourceFileRecord::new(name, child.path())
    }

    #[test]
    fn test_describes_in_order() {
        let temp = TempDir::new().unwrap();
        let records = vec![
            record(&temp, "rtl/core/pipemem.v", Some("module pipemem;")),
            record(&temp, "rtl/core/div.v", Some("module div;")),
        ];
        let client = Arc::new(ScriptedClient::replying(&[" Memory unit. ", "Divider."]));

        let generated = generator(&temp, &client).generate(&records).unwrap();

        let descriptions: Vec<_> = generated
            .records
            .iter()
            .map(|r| r.description.as_deref().unwrap())
            .collect();
        assert_eq!(descriptions, vec!["Memory unit.", "Divider."]);
        assert_eq!(generated.records[0].name, "pipemem.v");
        assert_eq!(generated.skipped_read + generated.skipped_call, 0);
    }

    #[test]
    fn test_prompt_lists_every_file_and_full_content() {
        let temp = TempDir::new().unwrap();
        let long = "wire x;\n".repeat(1000);
        let records = vec![
            record(&temp, "rtl/core/pipemem.v", Some(&long)),
            record(&temp, "rtl/core/div.v", Some("module div;")),
        ];
        let client = Arc::new(ScriptedClient::replying(&["a", "b"]));

        generator(&temp, &client).generate(&records).unwrap();

        let prompt = &client.user_prompts()[0];
        assert!(prompt.contains(&long));
        for r in &records {
            assert!(prompt.contains(&r.manifest_line()));
        }
        assert!(prompt.contains(&format!(
            "Now analyze the Verilog file pipemem.v located at {}.",
            records[0].path.display()
        )));
    }

    #[test]
    fn test_unreadable_file_skipped_without_call() {
        let temp = TempDir::new().unwrap();
        let records = vec![
            record(&temp, "rtl/core/missing.v", None),
            record(&temp, "rtl/core/empty.v", Some("")),
            record(&temp, "rtl/core/div.v", Some("module div;")),
        ];
        let client = Arc::new(ScriptedClient::replying(&["Divider."]));

        let generated = generator(&temp, &client).generate(&records).unwrap();

        assert_eq!(generated.records.len(), 1);
        assert_eq!(generated.records[0].name, "div.v");
        assert_eq!(generated.skipped_read, 2);
        assert_eq!(client.calls(), 1);
    }

    #[test]
    fn test_failed_call_skips_only_that_file() {
        let temp = TempDir::new().unwrap();
        let records = vec![
            record(&temp, "rtl/core/a.v", Some("module a;")),
            record(&temp, "rtl/core/b.v", Some("module b;")),
        ];
        let client = Arc::new(ScriptedClient::new(vec![
            Err(Error::api(500, "down")),
            Err(Error::api(500, "down")),
            Err(Error::api(500, "down")),
            Ok("B module.".to_string()),
        ]));

        let generated = generator(&temp, &client).generate(&records).unwrap();

        assert_eq!(generated.records.len(), 1);
        assert_eq!(generated.records[0].name, "b.v");
        assert_eq!(generated.skipped_call, 1);
        assert_eq!(client.calls(), 4);
    }
}

use crate::{
    error::{Error, Result},
    manifest::SourceFileRecord,
};
use serde::Serialize;
use tera::{Context, Tera};

const DOCUMENT: &str = "document.md";
const DESCRIBE: &str = "describe";
const RELEVANCE: &str = "relevance";
const ANSWER: &str = "answer";

/// Preamble used when no preamble file is configured.
pub(crate) const BUILTIN_PREAMBLE: &str = include_str!("../templates/preamble.md");

#[derive(Serialize)]
struct RecordView<'a> {
    name: &'a str,
    path: String,
    description: &'a str,
}

impl<'a> RecordView<'a> {
    fn new(record: &'a SourceFileRecord) -> Self {
        Self {
            name: &record.name,
            path: record.path.display().to_string(),
            description: record.description.as_deref().unwrap_or_default(),
        }
    }
}

/// Renders the reference document and every prompt from the built-in templates.
pub(crate) struct PromptEngine {
    tera: Tera,
}

impl PromptEngine {
    /// Creates an engine with all built-in templates registered.
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in template fails to parse.
    pub(crate) fn new() -> Result<Self> {
        let mut tera = Tera::default();
        Self::register_builtin_templates(&mut tera)?;
        Ok(Self { tera })
    }

    fn register_builtin_templates(tera: &mut Tera) -> Result<()> {
        let templates = [
            (DOCUMENT, include_str!("../templates/document.md.tera")),
            (DESCRIBE, include_str!("../templates/describe.tera")),
            (RELEVANCE, include_str!("../templates/relevance.tera")),
            (ANSWER, include_str!("../templates/answer.tera")),
        ];

        for (name, source) in templates {
            tera.add_raw_template(name, source)
                .map_err(|e| Error::template(name, e))?;
        }

        Ok(())
    }

    fn render(&self, name: &str, context: &Context) -> Result<String> {
        self.tera
            .render(name, context)
            .map_err(|e| Error::template(name, e))
    }

    /// Renders the reference document: preamble, then one subsection per
    /// record in the given order.
    pub(crate) fn render_document(
        &self,
        preamble: &str,
        records: &[SourceFileRecord],
    ) -> Result<String> {
        let views: Vec<RecordView<'_>> = records.iter().map(RecordView::new).collect();

        let mut context = Context::new();
        context.insert("preamble", preamble.trim_end());
        context.insert("records", &views);
        self.render(DOCUMENT, &context)
    }

    /// Renders the per-file description prompt.
    pub(crate) fn render_describe(
        &self,
        current: &SourceFileRecord,
        content: &str,
        all_files: &[SourceFileRecord],
    ) -> Result<String> {
        let files: Vec<RecordView<'_>> = all_files.iter().map(RecordView::new).collect();

        let mut context = Context::new();
        context.insert("files", &files);
        context.insert("current", &RecordView::new(current));
        context.insert("content", content);
        self.render(DESCRIBE, &context)
    }

    /// Renders the relevant-files prompt.
    pub(crate) fn render_relevance(
        &self,
        document: &str,
        query: &str,
        structured: bool,
    ) -> Result<String> {
        let mut context = Context::new();
        context.insert("document", document);
        context.insert("query", query);
        context.insert("structured", &structured);
        self.render(RELEVANCE, &context)
    }

    /// Renders the final answer prompt around pre-joined file blocks.
    pub(crate) fn render_answer(&self, files_content: &str, query: &str) -> Result<String> {
        let mut context = Context::new();
        context.insert("files_content", files_content);
        context.insert("query", query);
        self.render(ANSWER, &context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records() -> Vec<SourceFileRecord> {
        vec![
            SourceFileRecord::new("pipemem.v", "/root/rtl/core/pipemem.v")
                .described("Pipelined memory unit."),
            SourceFileRecord::new("div.v", "/root/rtl/core/div.v").described("Divider."),
        ]
    }

    #[test]
    fn test_engine_creation() {
        assert!(PromptEngine::new().is_ok());
    }

    #[test]
    fn test_render_document_layout() {
        let engine = PromptEngine::new().unwrap();
        let doc = engine.render_document("# Header\n\n- bullet\n", &records()).unwrap();

        assert!(doc.starts_with("# Header\n\n- bullet\n\n## Verilog File Descriptions\n\n"));
        assert!(doc.contains(
            "### File: pipemem.v\n- **Path**: /root/rtl/core/pipemem.v\nPipelined memory unit.\n\n"
        ));
        assert!(doc.ends_with("### File: div.v\n- **Path**: /root/rtl/core/div.v\nDivider.\n\n"));
    }

    #[test]
    fn test_render_document_keeps_template_syntax_in_values() {
        let engine = PromptEngine::new().unwrap();
        let record = SourceFileRecord::new("odd.v", "/root/rtl/core/odd.v")
            .described("uses {{ braces }} and {% tags %} and <html>");

        let doc = engine.render_document(BUILTIN_PREAMBLE, &[record]).unwrap();
        assert!(doc.contains("uses {{ braces }} and {% tags %} and <html>"));
    }

    #[test]
    fn test_builtin_preamble() {
        assert!(BUILTIN_PREAMBLE.starts_with("# The Zip CPU"));
        assert!(BUILTIN_PREAMBLE.contains("## Unique features and characteristics"));
    }

    #[test]
    fn test_render_describe() {
        let engine = PromptEngine::new().unwrap();
        let all = records();
        let prompt = engine
            .render_describe(&all[0], "module pipemem; endmodule", &all)
            .unwrap();

        assert!(prompt.contains("File Name: ffetch.v"));
        assert!(prompt.contains("File Name: pipemem.v, File Path: /root/rtl/core/pipemem.v\n"));
        assert!(prompt.contains("File Name: div.v, File Path: /root/rtl/core/div.v\n"));
        assert!(prompt.contains("Now analyze the Verilog file pipemem.v located at /root/rtl/core/pipemem.v."));
        assert!(prompt.contains("module pipemem; endmodule"));
    }

    #[test]
    fn test_render_relevance_modes() {
        let engine = PromptEngine::new().unwrap();

        let prose = engine.render_relevance("DOC", "Where is the divider?", false).unwrap();
        assert!(prose.starts_with("DOC\n"));
        assert!(prose.contains("Query: Where is the divider?"));
        assert!(prose.contains("**Path**: /Path/To/File/file.v"));
        assert!(!prose.contains("\"files\""));

        let structured = engine.render_relevance("DOC", "Where is the divider?", true).unwrap();
        assert!(structured.contains("{\"files\": [\"<absolute path>\", ...]}"));
        assert!(!structured.contains("**Purpose**"));
    }

    #[test]
    fn test_render_answer() {
        let engine = PromptEngine::new().unwrap();
        let prompt = engine
            .render_answer("File: /root/rtl/core/div.v\nmodule div;", "How does div stall?")
            .unwrap();

        assert!(prompt.contains("File: /root/rtl/core/div.v\nmodule div;"));
        assert!(prompt.contains("Query: How does div stall?"));
        assert!(prompt.contains("reference specific lines"));
        assert!(prompt.contains("Think step-by-step."));
    }
}

//! Markdown fragmentation.
//!
//! Splits at ATX headings (`#` .. `######`) outside fenced code blocks, then
//! packs each section under the word budget. Fragments carry the heading of
//! their section in `section` metadata. Overlap never crosses a section.

use ingest_types::{meta, Document};

use crate::config::FragmentOptions;
use crate::error::FragmentError;
use crate::fragmenter::{FragmentDraft, Fragmenter};
use crate::text::{paragraphs, WordPacker};

const MARKDOWN_EXTENSIONS: &[&str] = &[".md", ".markdown", ".mdx"];

/// A run of lines under one heading.
#[derive(Debug, PartialEq, Eq)]
struct Section {
    heading: Option<String>,
    body: String,
}

/// Heading text if `line` is an ATX heading.
fn atx_heading(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if line.len() - trimmed.len() > 3 {
        return None;
    }
    let level = trimmed.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &trimmed[level..];
    if !rest.is_empty() && !rest.starts_with(' ') && !rest.starts_with('\t') {
        return None;
    }
    Some(rest.trim().trim_end_matches('#').trim_end())
}

fn is_fence(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("```") || trimmed.starts_with("~~~")
}

fn sections(content: &str) -> Vec<Section> {
    let mut out = Vec::new();
    let mut heading: Option<String> = None;
    let mut body: Vec<&str> = Vec::new();
    let mut in_fence = false;

    for line in content.lines() {
        if is_fence(line) {
            in_fence = !in_fence;
        }
        if !in_fence {
            if let Some(text) = atx_heading(line) {
                if heading.is_some() || body.iter().any(|l| !l.trim().is_empty()) {
                    out.push(Section {
                        heading: heading.take(),
                        body: body.join("\n"),
                    });
                }
                body.clear();
                heading = Some(text.to_string());
                body.push(line);
                continue;
            }
        }
        body.push(line);
    }

    if heading.is_some() || body.iter().any(|l| !l.trim().is_empty()) {
        out.push(Section {
            heading,
            body: body.join("\n"),
        });
    }
    out
}

/// Fragmenter for Markdown documents.
#[derive(Debug, Clone, Default)]
pub struct MarkdownFragmenter;

impl MarkdownFragmenter {
    pub fn new() -> Self {
        Self
    }
}

impl Fragmenter for MarkdownFragmenter {
    fn name(&self) -> &'static str {
        "markdown"
    }

    fn can_handle(&self, document: &Document) -> bool {
        if let Some(content_type) = document.content_type() {
            return content_type.contains("markdown");
        }
        let id = document.document_id.to_ascii_lowercase();
        MARKDOWN_EXTENSIONS.iter().any(|ext| id.ends_with(ext))
    }

    fn fragment(
        &self,
        document: &Document,
        options: &FragmentOptions,
    ) -> Result<Vec<FragmentDraft>, FragmentError> {
        options.validate()?;

        let mut drafts = Vec::new();
        for section in sections(&document.content) {
            let mut packer = WordPacker::new(options);
            for paragraph in paragraphs(&section.body) {
                packer.push_paragraph(&paragraph);
            }
            for text in packer.finish() {
                let mut draft = FragmentDraft::new(text);
                if let Some(heading) = &section.heading {
                    draft = draft.with_metadata(meta::SECTION, heading.clone());
                }
                drafts.push(draft);
            }
        }
        Ok(drafts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, content: &str) -> Document {
        Document::new(id, "fs", "docs", content)
    }

    #[test]
    fn test_can_handle() {
        let f = MarkdownFragmenter::new();
        assert!(f.can_handle(&doc("guide.md", "")));
        assert!(f.can_handle(&doc("GUIDE.MARKDOWN", "")));
        assert!(!f.can_handle(&doc("notes.txt", "")));
        assert!(f.can_handle(
            &doc("notes", "").with_metadata(meta::CONTENT_TYPE, "text/markdown")
        ));
        assert!(!f.can_handle(
            &doc("x.md", "").with_metadata(meta::CONTENT_TYPE, "text/plain")
        ));
    }

    #[test]
    fn test_atx_heading() {
        assert_eq!(atx_heading("# Title"), Some("Title"));
        assert_eq!(atx_heading("### Sub ###"), Some("Sub"));
        assert_eq!(atx_heading("#hashtag"), None);
        assert_eq!(atx_heading("####### seven"), None);
        assert_eq!(atx_heading("plain"), None);
    }

    #[test]
    fn test_splits_at_headings() {
        let f = MarkdownFragmenter::new();
        let content = "intro text\n\n# Setup\n\ninstall it\n\n## Usage\n\nrun it";
        let drafts = f
            .fragment(&doc("a.md", content), &FragmentOptions::default())
            .unwrap();

        assert_eq!(drafts.len(), 3);
        assert_eq!(drafts[0].content, "intro text");
        assert!(drafts[0].metadata.get(meta::SECTION).is_none());
        assert_eq!(drafts[1].metadata.get(meta::SECTION).unwrap(), "Setup");
        assert!(drafts[1].content.contains("install it"));
        assert_eq!(drafts[2].metadata.get(meta::SECTION).unwrap(), "Usage");
    }

    #[test]
    fn test_headings_in_code_fences_are_ignored() {
        let f = MarkdownFragmenter::new();
        let content = "# Real\n\n```sh\n# not a heading\necho hi\n```";
        let drafts = f
            .fragment(&doc("a.md", content), &FragmentOptions::default())
            .unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].metadata.get(meta::SECTION).unwrap(), "Real");
    }

    #[test]
    fn test_long_section_respects_budget() {
        let f = MarkdownFragmenter::new();
        let body = (0..40).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ");
        let content = format!("# Big\n\n{}", body);
        let options = FragmentOptions::new(10, 2);
        let drafts = f.fragment(&doc("a.md", &content), &options).unwrap();

        assert!(drafts.len() > 1);
        for d in &drafts {
            assert!(d.content.split_whitespace().count() <= 10);
            assert_eq!(d.metadata.get(meta::SECTION).unwrap(), "Big");
        }
    }

    #[test]
    fn test_empty_markdown() {
        let f = MarkdownFragmenter::new();
        assert!(f
            .fragment(&doc("a.md", ""), &FragmentOptions::default())
            .unwrap()
            .is_empty());
    }
}

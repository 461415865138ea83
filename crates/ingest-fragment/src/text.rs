//! Plain-text fragmentation.
//!
//! Paragraphs are packed into fragments under a word budget. A paragraph
//! longer than the budget is cut into word windows. Consecutive fragments
//! share `overlap_words` words for context continuity.

use ingest_types::Document;
use tracing::trace;

use crate::config::FragmentOptions;
use crate::error::FragmentError;
use crate::fragmenter::{FragmentDraft, Fragmenter};

/// Split text into paragraphs at blank lines.
pub(crate) fn paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                out.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        out.push(current.join("\n"));
    }
    out
}

/// Accumulates paragraphs into word-bounded fragments with overlap.
pub(crate) struct WordPacker {
    max_words: usize,
    overlap_words: usize,
    /// Text of the fragment being built (may start with carried overlap)
    current: String,
    /// Word count of `current`
    words: usize,
    /// Whether `current` holds words not yet emitted
    fresh: bool,
    out: Vec<String>,
}

impl WordPacker {
    pub(crate) fn new(options: &FragmentOptions) -> Self {
        Self {
            max_words: options.max_words,
            overlap_words: options.overlap_words,
            current: String::new(),
            words: 0,
            fresh: false,
            out: Vec::new(),
        }
    }

    pub(crate) fn push_paragraph(&mut self, paragraph: &str) {
        let words: Vec<&str> = paragraph.split_whitespace().collect();
        if words.is_empty() {
            return;
        }

        if words.len() <= self.max_words {
            self.push_piece(&words, "\n\n");
            return;
        }

        // Windows leave room for the carried overlap.
        let step = self.max_words - self.overlap_words;
        for (i, window) in words.chunks(step).enumerate() {
            let sep = if i == 0 { "\n\n" } else { " " };
            self.push_piece(window, sep);
        }
    }

    fn push_piece(&mut self, piece: &[&str], sep: &str) {
        let n = piece.len();
        if self.words + n > self.max_words {
            if self.fresh {
                self.emit();
            }
            let keep = self.max_words.saturating_sub(n).min(self.words);
            self.keep_tail(keep);
        }

        if !self.current.is_empty() {
            self.current.push_str(sep);
        }
        self.current.push_str(&piece.join(" "));
        self.words += n;
        self.fresh = true;
    }

    fn emit(&mut self) {
        let text = std::mem::take(&mut self.current);
        trace!(words = self.words, "Emitting fragment");

        let all: Vec<&str> = text.split_whitespace().collect();
        let carry = self.overlap_words.min(all.len());
        self.current = all[all.len() - carry..].join(" ");
        self.words = carry;
        self.fresh = false;

        self.out.push(text);
    }

    fn keep_tail(&mut self, keep: usize) {
        if keep >= self.words {
            return;
        }
        let all: Vec<&str> = self.current.split_whitespace().collect();
        self.current = all[all.len() - keep..].join(" ");
        self.words = keep;
    }

    pub(crate) fn finish(mut self) -> Vec<String> {
        if self.fresh {
            self.out.push(std::mem::take(&mut self.current));
        }
        self.out
    }
}

/// Default fragmenter: handles any document.
#[derive(Debug, Clone, Default)]
pub struct TextFragmenter;

impl TextFragmenter {
    pub fn new() -> Self {
        Self
    }
}

impl Fragmenter for TextFragmenter {
    fn name(&self) -> &'static str {
        "text"
    }

    fn can_handle(&self, _document: &Document) -> bool {
        true
    }

    fn fragment(
        &self,
        document: &Document,
        options: &FragmentOptions,
    ) -> Result<Vec<FragmentDraft>, FragmentError> {
        options.validate()?;

        let mut packer = WordPacker::new(options);
        for paragraph in paragraphs(&document.content) {
            packer.push_paragraph(&paragraph);
        }

        Ok(packer.finish().into_iter().map(FragmentDraft::new).collect())
    }
}

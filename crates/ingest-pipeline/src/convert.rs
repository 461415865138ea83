//! Conversion of raw source items into documents.

use ingest_types::{meta, Document};
use tracing::warn;

use crate::source::{ItemBody, SourceItem};

/// Turns a raw item into a [`Document`].
///
/// Conversion never fails: when the item cannot be decoded, a fallback
/// document carrying a `conversion_error` metadata entry is produced instead.
pub trait Preprocessor: Send + Sync {
    fn convert(&self, source_type: &str, source_name: &str, item: SourceItem) -> Document;
}

/// Decodes bodies as UTF-8, falling back to lossy decoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Preprocessor;

impl Utf8Preprocessor {
    pub fn new() -> Self {
        Self
    }
}

impl Preprocessor for Utf8Preprocessor {
    fn convert(&self, source_type: &str, source_name: &str, item: SourceItem) -> Document {
        let (content, conversion_error) = match item.body {
            ItemBody::Text(text) => (text, None),
            ItemBody::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => (text, None),
                Err(e) => {
                    let reason = e.utf8_error().to_string();
                    let lossy = String::from_utf8_lossy(e.as_bytes()).into_owned();
                    (lossy, Some(reason))
                }
            },
        };

        let mut document = Document::new(item.document_id, source_type, source_name, content);
        document.metadata = item.metadata;
        if let Some(reason) = conversion_error {
            warn!(
                document_id = %document.document_id,
                error = %reason,
                "Conversion failed, using fallback text"
            );
            document
                .metadata
                .insert(meta::CONVERSION_ERROR.to_string(), reason);
        }
        document
    }
}

//! Document sources.
//!
//! A source yields a finite, lazily produced stream of items. Calling
//! [`DocumentSource::items`] again restarts the enumeration from scratch.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use futures::stream::{self, BoxStream, StreamExt};
use ingest_types::meta;
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

/// Failure to produce one item, or the whole enumeration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// A specific document could not be read
    #[error("Failed to read document {document_id}: {reason}")]
    Item { document_id: String, reason: String },

    /// Enumeration failed without a known document
    #[error("Source error: {0}")]
    Enumeration(String),
}

impl SourceError {
    pub fn item(document_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Item {
            document_id: document_id.into(),
            reason: reason.into(),
        }
    }

    /// Id of the affected document, when known.
    pub fn document_id(&self) -> Option<&str> {
        match self {
            SourceError::Item { document_id, .. } => Some(document_id),
            SourceError::Enumeration(_) => None,
        }
    }
}

/// Raw item body before conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemBody {
    Text(String),
    Binary(Vec<u8>),
}

/// One raw item as produced by a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceItem {
    pub document_id: String,
    pub body: ItemBody,
    pub metadata: BTreeMap<String, String>,
}

impl SourceItem {
    pub fn text(document_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            body: ItemBody::Text(content.into()),
            metadata: BTreeMap::new(),
        }
    }

    pub fn binary(document_id: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            document_id: document_id.into(),
            body: ItemBody::Binary(bytes),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Enumerates the documents of one named source.
pub trait DocumentSource: Send + Sync {
    /// Source type, e.g. "filesystem"
    fn source_type(&self) -> &str;

    /// Source name, unique within its tenant
    fn source_name(&self) -> &str;

    /// Enumerate all items. Each call starts a fresh enumeration.
    fn items(&self) -> BoxStream<'_, Result<SourceItem, SourceError>>;
}

/// In-memory source with a fixed list of items and errors.
#[derive(Debug, Clone)]
pub struct StaticSource {
    source_type: String,
    source_name: String,
    items: Vec<Result<SourceItem, SourceError>>,
}

impl StaticSource {
    pub fn new(source_type: impl Into<String>, source_name: impl Into<String>) -> Self {
        Self {
            source_type: source_type.into(),
            source_name: source_name.into(),
            items: Vec::new(),
        }
    }

    /// Add a text document (builder pattern).
    pub fn with_text(self, document_id: impl Into<String>, content: impl Into<String>) -> Self {
        self.with_item(SourceItem::text(document_id, content))
    }

    pub fn with_item(mut self, item: SourceItem) -> Self {
        self.items.push(Ok(item));
        self
    }

    pub fn with_error(mut self, error: SourceError) -> Self {
        self.items.push(Err(error));
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl DocumentSource for StaticSource {
    fn source_type(&self) -> &str {
        &self.source_type
    }

    fn source_name(&self) -> &str {
        &self.source_name
    }

    fn items(&self) -> BoxStream<'_, Result<SourceItem, SourceError>> {
        stream::iter(self.items.iter().cloned()).boxed()
    }
}

/// Files under a root directory, one document per file.
///
/// Document ids are root-relative paths with `/` separators. Files that are
/// not valid UTF-8 are surfaced as binary items.
#[derive(Debug, Clone)]
pub struct FilesystemSource {
    name: String,
    root: PathBuf,
    extensions: Vec<String>,
}

impl FilesystemSource {
    pub const SOURCE_TYPE: &'static str = "filesystem";

    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            extensions: Vec::new(),
        }
    }

    /// Only include files with these extensions (without the dot).
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.into().trim_start_matches('.').to_lowercase())
            .collect();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn included(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.contains(&e.to_lowercase()))
            .unwrap_or(false)
    }

    /// Only a failure on a single file is attributable to one document. A
    /// directory that cannot be read hides an unknown set of documents, so
    /// it counts as an enumeration error.
    fn walk_error(&self, path: Option<&Path>, message: String) -> SourceError {
        match path {
            Some(path) if path != self.root && path.is_file() => {
                SourceError::item(self.document_id(path), message)
            }
            _ => SourceError::Enumeration(message),
        }
    }

    fn document_id(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

fn content_type_for(path: &Path) -> Option<&'static str> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("md") | Some("markdown") | Some("mdx") => Some("text/markdown"),
        Some("txt") => Some("text/plain"),
        Some("html") | Some("htm") => Some("text/html"),
        Some("json") => Some("application/json"),
        _ => None,
    }
}

impl DocumentSource for FilesystemSource {
    fn source_type(&self) -> &str {
        Self::SOURCE_TYPE
    }

    fn source_name(&self) -> &str {
        &self.name
    }

    fn items(&self) -> BoxStream<'_, Result<SourceItem, SourceError>> {
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();

        stream::iter(walker)
            .filter_map(move |entry| async move {
                match entry {
                    Ok(entry) if entry.file_type().is_file() && self.included(entry.path()) => {
                        Some(Ok(entry.into_path()))
                    }
                    Ok(_) => None,
                    Err(e) => Some(Err(self.walk_error(e.path(), e.to_string()))),
                }
            })
            .then(move |entry| async move {
                let path = entry?;
                let document_id = self.document_id(&path);
                let bytes = tokio::fs::read(&path)
                    .await
                    .map_err(|e| SourceError::item(&document_id, e.to_string()))?;

                debug!(source = %self.name, document_id = %document_id, bytes = bytes.len(), "Read file");
                let mut item = match String::from_utf8(bytes) {
                    Ok(text) => SourceItem::text(&document_id, text),
                    Err(e) => SourceItem::binary(&document_id, e.into_bytes()),
                };
                item.metadata
                    .insert(meta::PATH.to_string(), path.to_string_lossy().to_string());
                if let Some(content_type) = content_type_for(&path) {
                    item.metadata
                        .insert(meta::CONTENT_TYPE.to_string(), content_type.to_string());
                }
                Ok::<_, SourceError>(item)
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn collect(source: &dyn DocumentSource) -> Vec<Result<SourceItem, SourceError>> {
        source.items().collect().await
    }

    #[tokio::test]
    async fn test_static_source_is_restartable() {
        let source = StaticSource::new("static", "notes")
            .with_text("A", "alpha")
            .with_error(SourceError::item("B", "unreadable"));

        let first = collect(&source).await;
        let second = collect(&source).await;
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(first[1].as_ref().unwrap_err().document_id(), Some("B"));
    }

    #[tokio::test]
    async fn test_filesystem_source() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("guides")).unwrap();
        std::fs::write(dir.path().join("a.md"), "# Title\n\nbody").unwrap();
        std::fs::write(dir.path().join("guides/b.txt"), "plain").unwrap();
        std::fs::write(dir.path().join("c.bin"), [0xff, 0xfe, 0x00]).unwrap();

        let source = FilesystemSource::new("docs", dir.path());
        let items: Vec<SourceItem> = collect(&source)
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();

        let ids: Vec<&str> = items.iter().map(|i| i.document_id.as_str()).collect();
        assert_eq!(ids, vec!["a.md", "c.bin", "guides/b.txt"]);
        assert_eq!(items[0].metadata[meta::CONTENT_TYPE], "text/markdown");
        assert!(matches!(items[0].body, ItemBody::Text(_)));
        assert!(matches!(items[1].body, ItemBody::Binary(_)));
        assert_eq!(source.source_type(), "filesystem");
    }

    #[tokio::test]
    async fn test_filesystem_extension_filter() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.md"), "a").unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();

        let source = FilesystemSource::new("docs", dir.path()).with_extensions([".MD"]);
        let items = collect(&source).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap().document_id, "a.md");
    }

    #[tokio::test]
    async fn test_missing_root_is_anonymous_error() {
        let source = FilesystemSource::new("docs", "/nonexistent/ingest-root");
        let items = collect(&source).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap_err().document_id(), None);
    }

    #[test]
    fn test_directory_walk_error_is_anonymous() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/a.md"), "a").unwrap();
        let source = FilesystemSource::new("docs", dir.path());

        let err = source.walk_error(Some(&dir.path().join("sub")), "denied".into());
        assert_eq!(err.document_id(), None);

        let err = source.walk_error(Some(&dir.path().join("sub/a.md")), "denied".into());
        assert_eq!(err.document_id(), Some("sub/a.md"));

        let err = source.walk_error(Some(&dir.path().join("gone")), "vanished".into());
        assert_eq!(err.document_id(), None);
    }
}

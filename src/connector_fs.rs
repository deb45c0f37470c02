//! Filesystem connector.
//!
//! Walks a local directory, applies glob include/exclude patterns, and produces
//! [`SourceItem`]s with filesystem metadata (modification time, file path).
//! Non-UTF8 files are skipped; RagForge's canonical schema has no binary
//! document entity, so extraction of PDFs/DOCX/etc. is out of scope here.
//!
//! # Configuration
//!
//! ```toml
//! [connectors.filesystem]
//! root = "./docs"
//! include_globs = ["**/*.md", "**/*.rs"]
//! exclude_globs = ["**/drafts/**"]
//! follow_symlinks = false
//! ```
//!
//! # Default Excludes
//!
//! The following directories are always excluded regardless of configuration:
//! - `**/.git/**`
//! - `**/target/**`
//! - `**/node_modules/**`
//!
//! # Output
//!
//! Each file becomes a [`SourceItem`] with:
//! - `source`: `"filesystem:<name>"` (e.g. `"filesystem:docs"`)
//! - `source_id`: relative path from root (e.g. `"guides/deploy.md"`)
//! - `source_url`: `file://` URI
//! - `updated_at`: filesystem modification time
//! - `body`: file contents as UTF-8

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use crate::config::FilesystemConnectorConfig;
use crate::models::SourceItem;
use crate::traits::Connector;

/// A filesystem connector instance that implements the [`Connector`] trait.
///
/// Wraps the [`scan_filesystem`] function, allowing filesystem connectors
/// to be used through the unified trait-based dispatch.
///
/// # Example
///
/// ```rust,no_run
/// use ragforge::connector_fs::FilesystemConnector;
/// use ragforge::config::FilesystemConnectorConfig;
/// use ragforge::traits::Connector;
///
/// let config: FilesystemConnectorConfig = toml::from_str(r#"
///     root = "./docs"
///     include_globs = ["**/*.md"]
/// "#).unwrap();
/// let connector = FilesystemConnector::new("docs".into(), config);
/// assert_eq!(connector.source_label(), "filesystem:docs");
/// ```
pub struct FilesystemConnector {
    /// Instance name (e.g. `"docs"`).
    name: String,
    /// Configuration for this filesystem connector instance.
    config: FilesystemConnectorConfig,
}

impl FilesystemConnector {
    /// Create a new filesystem connector instance.
    pub fn new(name: String, config: FilesystemConnectorConfig) -> Self {
        Self { name, config }
    }

    pub fn config(&self) -> &FilesystemConnectorConfig {
        &self.config
    }
}

#[async_trait]
impl Connector for FilesystemConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Walk local directories with glob patterns"
    }

    fn connector_type(&self) -> &str {
        "filesystem"
    }

    async fn scan(&self) -> Result<Vec<SourceItem>> {
        scan_filesystem(&self.name, &self.config)
    }
}

/// Scan a local directory and produce [`SourceItem`]s.
///
/// Walks the configured `root` directory, applies include/exclude globs,
/// reads each matching file, and returns a sorted list of `SourceItem`s.
///
/// # Errors
///
/// Returns an error if the root directory does not exist, a glob pattern
/// is invalid, or a directory entry cannot be read.
pub fn scan_filesystem(name: &str, fs_config: &FilesystemConnectorConfig) -> Result<Vec<SourceItem>> {
    let root = &fs_config.root;
    if !root.exists() {
        bail!("Filesystem connector root does not exist: {}", root.display());
    }

    let include_set = build_globset(&fs_config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(fs_config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut items = Vec::new();

    let walker = WalkDir::new(root).follow_links(fs_config.follow_symlinks);
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !include_set.is_match(&rel_str) {
            continue;
        }

        let source_label = format!("filesystem:{}", name);
        if let Some(item) = file_to_source_item(path, &rel_str, &source_label)? {
            items.push(item);
        }
    }

    items.sort_by(|a, b| a.source_id.cmp(&b.source_id));

    Ok(items)
}

/// Convert a single file to a [`SourceItem`], or `None` if it cannot be
/// read as UTF-8 text.
fn file_to_source_item(path: &Path, relative_path: &str, source: &str) -> Result<Option<SourceItem>> {
    let metadata = std::fs::metadata(path)?;
    let modified = metadata.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);
    let modified_secs = modified
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;

    let title = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();

    match std::fs::read_to_string(path) {
        Ok(body) => Ok(Some(SourceItem {
            source: source.to_string(),
            source_id: relative_path.to_string(),
            source_url: Some(format!("file://{}", path.display())),
            title: Some(title),
            content_type: "text/plain".to_string(),
            body,
            updated_at: Utc.timestamp_opt(modified_secs, 0).unwrap(),
        })),
        Err(_) => Ok(None),
    }
}

/// Build a [`GlobSet`] from a list of glob pattern strings.
fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, rel: &str, contents: &str) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn scan_filesystem_respects_include_and_exclude_globs() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.md", "hello");
        write_file(dir.path(), "notes.txt", "skip me");
        write_file(dir.path(), "drafts/b.md", "draft");

        let config = FilesystemConnectorConfig {
            root: dir.path().to_path_buf(),
            include_globs: vec!["**/*.md".to_string()],
            exclude_globs: vec!["**/drafts/**".to_string()],
            follow_symlinks: false,
            watch_debounce_ms: 200,
        };

        let items = scan_filesystem("docs", &config).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source_id, "a.md");
        assert_eq!(items[0].source, "filesystem:docs");
    }

    #[test]
    fn scan_filesystem_errors_on_missing_root() {
        let config = FilesystemConnectorConfig {
            root: "/does/not/exist".into(),
            include_globs: vec!["**/*.md".to_string()],
            exclude_globs: vec![],
            follow_symlinks: false,
            watch_debounce_ms: 200,
        };
        assert!(scan_filesystem("docs", &config).is_err());
    }
}

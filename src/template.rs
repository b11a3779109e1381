//! Template store.
//!
//! Query templates live one per file as `<sql_directory>/<name>.sql`. Each
//! file is read once, on first use, and kept for the lifetime of the store.
//! Edits made while the process runs are not observed.

use crate::error::{SqlqError, SqlqResult};
use dashmap::DashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Lazily populated name → template text mapping.
#[derive(Debug)]
pub struct TemplateStore {
    directory: PathBuf,
    templates: DashMap<String, Arc<str>>,
}

impl TemplateStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            templates: DashMap::new(),
        }
    }

    /// Root directory templates are read from.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// File a query name resolves to.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.directory.join(format!("{}.sql", name))
    }

    /// Return the raw text of a template, reading it on first use.
    pub fn load(&self, name: &str) -> SqlqResult<Arc<str>> {
        if let Some(text) = self.templates.get(name) {
            return Ok(Arc::clone(&text));
        }

        let path = self.path_for(name);
        let text: Arc<str> = match std::fs::read_to_string(&path) {
            Ok(text) => text.into(),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SqlqError::not_found(name, path));
            }
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(name, path = %path.display(), "template loaded");

        // A concurrent first load may have won; keep whichever landed first.
        let entry = self.templates.entry(name.to_string()).or_insert(text);
        Ok(Arc::clone(&entry))
    }

    /// Number of templates currently resident.
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

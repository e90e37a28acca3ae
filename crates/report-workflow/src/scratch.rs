//! Scratch space for intermediate embeddings.
//!
//! Each workflow attempt stages one JSON file per work item under
//! `{root}/{pipeline}/{workflow_id}/{run_id}`. The commit step reads the
//! whole namespace back and cleanup removes it.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};
use walkdir::WalkDir;

use report_types::Embedding;

use crate::error::WorkflowError;

const ITEM_EXTENSION: &str = "json";

/// Scratch location owned by one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchNamespace {
    root: PathBuf,
    pipeline: String,
    workflow_id: String,
    run_id: String,
}

impl ScratchNamespace {
    pub fn new(
        root: impl Into<PathBuf>,
        pipeline: impl Into<String>,
        workflow_id: impl Into<String>,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            pipeline: pipeline.into(),
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
        }
    }

    /// Directory holding this attempt's items.
    pub fn path(&self) -> PathBuf {
        self.root
            .join(sanitize(&self.pipeline))
            .join(sanitize(&self.workflow_id))
            .join(sanitize(&self.run_id))
    }

    /// Path of the item staged under `item_id`.
    pub fn item_path(&self, item_id: &str) -> PathBuf {
        self.path()
            .join(format!("{}.{}", sanitize(item_id), ITEM_EXTENSION))
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

impl fmt::Display for ScratchNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path().display())
    }
}

/// Make an id safe to use as a single path component.
fn sanitize(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => format!("_{cleaned}"),
        _ => cleaned,
    }
}

/// Path-addressable blob storage for scratch data.
#[async_trait]
pub trait ScratchStore: Send + Sync {
    /// Write `bytes` at `path`, replacing any previous content.
    async fn put(&self, path: &Path, bytes: Vec<u8>) -> Result<(), WorkflowError>;

    async fn get(&self, path: &Path) -> Result<Vec<u8>, WorkflowError>;

    /// Every item under `prefix`, sorted. A missing prefix lists nothing.
    async fn list(&self, prefix: &Path) -> Result<Vec<PathBuf>, WorkflowError>;

    /// Remove `prefix` and everything below it. A missing prefix is not an error.
    async fn delete_recursive(&self, prefix: &Path) -> Result<(), WorkflowError>;
}

/// Scratch store on the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalScratchStore;

impl LocalScratchStore {
    pub fn new() -> Self {
        Self
    }
}

fn scratch_err(action: &str, path: &Path, err: impl fmt::Display) -> WorkflowError {
    WorkflowError::Scratch(format!("{} {}: {}", action, path.display(), err))
}

#[async_trait]
impl ScratchStore for LocalScratchStore {
    async fn put(&self, path: &Path, bytes: Vec<u8>) -> Result<(), WorkflowError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| scratch_err("create", parent, e))?;
        }
        // Readers never see a partially written item.
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| scratch_err("write", &tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| scratch_err("rename", path, e))?;
        Ok(())
    }

    async fn get(&self, path: &Path) -> Result<Vec<u8>, WorkflowError> {
        tokio::fs::read(path)
            .await
            .map_err(|e| scratch_err("read", path, e))
    }

    async fn list(&self, prefix: &Path) -> Result<Vec<PathBuf>, WorkflowError> {
        let prefix = prefix.to_path_buf();
        tokio::task::spawn_blocking(move || -> Result<Vec<PathBuf>, WorkflowError> {
            if !prefix.exists() {
                return Ok(Vec::new());
            }
            let mut items = Vec::new();
            for entry in WalkDir::new(&prefix).sort_by_file_name() {
                let entry = entry.map_err(|e| scratch_err("list", &prefix, e))?;
                let is_item = entry.file_type().is_file()
                    && entry.path().extension().is_some_and(|ext| ext == ITEM_EXTENSION);
                if is_item {
                    items.push(entry.into_path());
                }
            }
            Ok(items)
        })
        .await?
    }

    async fn delete_recursive(&self, prefix: &Path) -> Result<(), WorkflowError> {
        match tokio::fs::remove_dir_all(prefix).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(scratch_err("remove", prefix, e)),
        }
    }
}

/// Stages embeddings as JSON items within a namespace.
#[derive(Clone)]
pub struct ScratchStager {
    store: Arc<dyn ScratchStore>,
}

impl ScratchStager {
    pub fn new(store: Arc<dyn ScratchStore>) -> Self {
        Self { store }
    }

    /// Write one embedding under `item_id`. Returns the item path.
    pub async fn stage(
        &self,
        namespace: &ScratchNamespace,
        item_id: &str,
        embedding: &Embedding,
    ) -> Result<PathBuf, WorkflowError> {
        let path = namespace.item_path(item_id);
        self.store.put(&path, serde_json::to_vec(embedding)?).await?;
        debug!(path = %path.display(), "Staged embedding");
        Ok(path)
    }

    /// Items staged in `namespace`, sorted by path.
    pub async fn list(&self, namespace: &ScratchNamespace) -> Result<Vec<PathBuf>, WorkflowError> {
        self.store.list(&namespace.path()).await
    }

    pub async fn read(&self, path: &Path) -> Result<Embedding, WorkflowError> {
        Ok(serde_json::from_slice(&self.store.get(path).await?)?)
    }

    /// Read every staged embedding in `namespace`.
    pub async fn read_all(&self, namespace: &ScratchNamespace) -> Result<Vec<Embedding>, WorkflowError> {
        let mut embeddings = Vec::new();
        for path in self.list(namespace).await? {
            embeddings.push(self.read(&path).await?);
        }
        Ok(embeddings)
    }

    /// Remove the namespace and everything in it.
    pub async fn purge(&self, namespace: &ScratchNamespace) -> Result<(), WorkflowError> {
        self.store.delete_recursive(&namespace.path()).await?;
        info!(namespace = %namespace, "Removed scratch namespace");
        Ok(())
    }
}

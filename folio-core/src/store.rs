use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::annotation::{Annotation, AnnotationId, NewAnnotation};

pub type DocumentKey = Uuid;

static DOCUMENT_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("3f0b6c52-1d7e-5e0a-9a41-6c2d8e5b7f13").expect("valid namespace UUID")
});

/// Stable key for a document, derived from its canonical path.
pub fn document_key_for_path(path: &Path) -> DocumentKey {
    let resolved = path
        .canonicalize()
        .or_else(|_| {
            if path.is_absolute() {
                Ok(path.to_path_buf())
            } else {
                std::env::current_dir().map(|cwd| cwd.join(path))
            }
        })
        .unwrap_or_else(|_| path.to_path_buf());
    let rendered = resolved.to_string_lossy();
    Uuid::new_v5(&DOCUMENT_NAMESPACE, rendered.as_bytes())
}

/// Persistence for annotations. The viewport engine only reads from it;
/// hosts write in response to viewer events. Concurrent writers are
/// last-write-wins.
pub trait AnnotationStore: Send + Sync {
    fn list(&self, document: DocumentKey) -> Result<Vec<Annotation>>;
    fn create(&self, document: DocumentKey, new: NewAnnotation) -> Result<Annotation>;
    fn delete(&self, document: DocumentKey, id: AnnotationId) -> Result<()>;
    fn update_comment(&self, document: DocumentKey, id: AnnotationId, text: String) -> Result<Annotation>;
}

pub struct MemoryAnnotationStore {
    inner: Mutex<HashMap<DocumentKey, Vec<Annotation>>>,
}

impl MemoryAnnotationStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryAnnotationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AnnotationStore for MemoryAnnotationStore {
    fn list(&self, document: DocumentKey) -> Result<Vec<Annotation>> {
        Ok(self.inner.lock().get(&document).cloned().unwrap_or_default())
    }

    fn create(&self, document: DocumentKey, new: NewAnnotation) -> Result<Annotation> {
        let annotation = Annotation::create(new);
        self.inner
            .lock()
            .entry(document)
            .or_default()
            .push(annotation.clone());
        Ok(annotation)
    }

    fn delete(&self, document: DocumentKey, id: AnnotationId) -> Result<()> {
        if let Some(items) = self.inner.lock().get_mut(&document) {
            items.retain(|a| a.id != id);
        }
        Ok(())
    }

    fn update_comment(&self, document: DocumentKey, id: AnnotationId, text: String) -> Result<Annotation> {
        let mut inner = self.inner.lock();
        let item = inner
            .get_mut(&document)
            .and_then(|items| items.iter_mut().find(|a| a.id == id))
            .ok_or_else(|| anyhow!("annotation {} not found", id))?;
        item.set_comment(text);
        Ok(item.clone())
    }
}

/// One JSON file per document under `root`.
pub struct FileAnnotationStore {
    root: PathBuf,
    // Serializes read-modify-write cycles from this process.
    write_lock: Mutex<()>,
}

impl FileAnnotationStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create annotation directory at {:?}", root))?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    fn document_path(&self, document: DocumentKey) -> PathBuf {
        self.root.join(format!("{}.json", document))
    }

    fn read(&self, document: DocumentKey) -> Result<Vec<Annotation>> {
        let path = self.document_path(document);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut file = File::open(&path)
            .with_context(|| format!("failed to open annotation file {:?}", path))?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        let items = serde_json::from_str(&buf)
            .with_context(|| format!("failed to decode annotation file {:?}", path))?;
        Ok(items)
    }

    fn write(&self, document: DocumentKey, items: &[Annotation]) -> Result<()> {
        let path = self.document_path(document);
        let tmp = path.with_extension("json.tmp");
        let payload = serde_json::to_string_pretty(items)?;
        let mut file = File::create(&tmp)
            .with_context(|| format!("failed to open temp annotation file {:?}", tmp))?;
        file.write_all(payload.as_bytes())?;
        file.flush()?;
        fs::rename(tmp, path)?;
        Ok(())
    }
}

impl AnnotationStore for FileAnnotationStore {
    fn list(&self, document: DocumentKey) -> Result<Vec<Annotation>> {
        self.read(document)
    }

    fn create(&self, document: DocumentKey, new: NewAnnotation) -> Result<Annotation> {
        let _guard = self.write_lock.lock();
        let mut items = self.read(document)?;
        let annotation = Annotation::create(new);
        items.push(annotation.clone());
        self.write(document, &items)?;
        Ok(annotation)
    }

    fn delete(&self, document: DocumentKey, id: AnnotationId) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut items = self.read(document)?;
        let before = items.len();
        items.retain(|a| a.id != id);
        if items.len() != before {
            self.write(document, &items)?;
        }
        Ok(())
    }

    fn update_comment(&self, document: DocumentKey, id: AnnotationId, text: String) -> Result<Annotation> {
        let _guard = self.write_lock.lock();
        let mut items = self.read(document)?;
        let item = items
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| anyhow!("annotation {} not found", id))?;
        item.set_comment(text);
        let updated = item.clone();
        self.write(document, &items)?;
        Ok(updated)
    }
}

pub mod export;
pub mod ingest;
pub mod manage;
pub mod types;
pub mod validate;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use chrono::Utc;
use cnidarium::{Snapshot, StateDelta, StateRead, StateWrite, Storage};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{AnnotateError, Result};
use crate::lock::{Deadline, LockGuard, LockRegistry};
use crate::traversal;

use types::{AnnotationRecord, AnswerTag, DocId, Document, LastPosition, Position};

// Flat key namespace; the layout is private to this module.
const DOCUMENT_PREFIX: &str = "file-data-";
const LAST_POSITION_PREFIX: &str = "last-position-";
const ANNOTATION_PREFIX: &str = "annotation-";

fn document_key(id: &str) -> String {
    format!("{}{}", DOCUMENT_PREFIX, id)
}
fn last_position_key(id: &str) -> String {
    format!("{}{}", LAST_POSITION_PREFIX, id)
}
fn annotation_key(id: &str, pos: Position) -> String {
    format!(
        "{}{}-{}-{}-{}",
        ANNOTATION_PREFIX, id, pos.abstract_index, pos.sentence_index, pos.slot
    )
}

fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| AnnotateError::validation(format!("corrupt value at {}: {}", key, e)))
}

fn encode<T: serde::Serialize>(key: &str, value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value).with_context(|| format!("serialize {}", key))?)
}

/// What changed in a [`StoreEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Document,
    Annotation(Position),
    Removed,
}

/// Published on every write to a document or annotation key, so other
/// contexts can refresh their views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    /// Context that made the change.
    pub origin: u64,
    pub document_id: DocId,
    pub kind: ChangeKind,
}

struct Backend {
    storage: Storage,
    /// cnidarium commits must build on the latest snapshot, so single-key
    /// writes go through one at a time.
    write_gate: Mutex<()>,
    events: broadcast::Sender<StoreEvent>,
    next_context: AtomicU64,
}

/// Key/value persistence of documents, answers and resume positions.
///
/// Each call is a single key read or write with no atomicity across keys;
/// callers that need a read-modify-write sequence take [`Self::lock`] first.
/// A handle is one context: clones share its lock registry, while
/// [`Self::new_context`] shares only the durable backend.
#[derive(Clone)]
pub struct AnnotationStore {
    backend: Arc<Backend>,
    locks: LockRegistry,
    context: u64,
    operation_timeout: Duration,
}

impl AnnotationStore {
    pub async fn open(config: &Config) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("create data dir {:?}", config.data_dir))?;
        let storage = Storage::load(config.data_dir.clone(), vec![])
            .await
            .context("Failed to init cnidarium storage")?;
        let (events, _) = broadcast::channel(256);

        let backend = Arc::new(Backend {
            storage,
            write_gate: Mutex::new(()),
            events,
            next_context: AtomicU64::new(1),
        });
        debug!(data_dir = ?config.data_dir, "annotation store opened");

        Ok(Self {
            backend,
            locks: LockRegistry::new(config.lock_backoff),
            context: 0,
            operation_timeout: config.operation_timeout,
        })
    }

    /// Another context on the same backend, with its own lock registry.
    pub fn new_context(&self) -> Self {
        let context = self.backend.next_context.fetch_add(1, Ordering::Relaxed);
        Self {
            backend: self.backend.clone(),
            locks: LockRegistry::new(self.locks.backoff()),
            context,
            operation_timeout: self.operation_timeout,
        }
    }

    pub fn context_id(&self) -> u64 {
        self.context
    }

    /// A fresh deadline for one operation.
    pub fn deadline(&self) -> Deadline {
        Deadline::after(self.operation_timeout)
    }

    /// Take this context's lock for `doc_id`.
    pub async fn lock(&self, doc_id: &str, deadline: &Deadline) -> Result<LockGuard> {
        self.locks.acquire(doc_id, deadline).await
    }

    #[cfg(test)]
    pub fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.backend.events.subscribe()
    }

    fn publish(&self, document_id: &str, kind: ChangeKind) {
        // No receivers is fine.
        let _ = self.backend.events.send(StoreEvent {
            origin: self.context,
            document_id: document_id.to_string(),
            kind,
        });
    }

    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let snapshot = self.backend.storage.latest_snapshot();
        Ok(snapshot.get_raw(key).await?)
    }

    async fn commit<F>(&self, build: F) -> Result<()>
    where
        F: FnOnce(&mut StateDelta<Snapshot>),
    {
        let _gate = self.backend.write_gate.lock().await;
        let snapshot = self.backend.storage.latest_snapshot();
        let mut delta = StateDelta::new(snapshot);
        build(&mut delta);
        self.backend.storage.commit(delta).await?;
        Ok(())
    }

    pub async fn get_document(&self, id: &str) -> Result<Document> {
        let key = document_key(id);
        let bytes = self
            .get_raw(&key)
            .await?
            .ok_or_else(|| AnnotateError::not_found(format!("document {}", id)))?;
        decode(&key, &bytes)
    }

    pub async fn put_document(&self, doc: &Document) -> Result<()> {
        let key = document_key(&doc.id);
        let value = encode(&key, doc)?;
        self.commit(|delta| delta.put_raw(key, value)).await?;
        debug!(doc_id = %doc.id, progress = doc.progress, "document stored");
        self.publish(&doc.id, ChangeKind::Document);
        Ok(())
    }

    /// Delete a document, all of its answers and its resume position.
    pub async fn delete_document(&self, id: &str) -> Result<()> {
        let doc = self.get_document(id).await?;
        let keys: Vec<String> = traversal::positions(&doc)
            .map(|pos| annotation_key(id, pos))
            .chain([last_position_key(id), document_key(id)])
            .collect();
        let count = keys.len();

        self.commit(|delta| {
            for key in keys {
                delta.delete(key);
            }
        })
        .await?;
        debug!(doc_id = id, keys = count, "document deleted");
        self.publish(id, ChangeKind::Removed);
        Ok(())
    }

    /// Drop every answer and the resume position of `doc` and store it with
    /// zero progress, in one commit.
    pub async fn clear_annotations(&self, doc: &mut Document) -> Result<()> {
        let id = doc.id.clone();
        let keys: Vec<String> = traversal::positions(doc)
            .map(|pos| annotation_key(&id, pos))
            .chain([last_position_key(&id)])
            .collect();
        let count = keys.len();

        doc.progress = 0.0;
        let doc_key = document_key(&id);
        let value = encode(&doc_key, &*doc)?;

        self.commit(|delta| {
            for key in keys {
                delta.delete(key);
            }
            delta.put_raw(doc_key, value);
        })
        .await?;
        debug!(doc_id = %id, keys = count, "annotations cleared");
        self.publish(&id, ChangeKind::Document);
        Ok(())
    }

    /// Documents newest upload first. Undecodable entries are skipped.
    pub async fn list_documents(&self) -> Result<Vec<Document>> {
        let snapshot = self.backend.storage.latest_snapshot();
        let mut stream = snapshot.prefix_raw(DOCUMENT_PREFIX);
        let mut results = Vec::new();

        while let Some(entry) = stream.next().await {
            match entry {
                Ok((key, value)) => match decode::<Document>(&key, &value) {
                    Ok(doc) => results.push(doc),
                    Err(e) => warn!("Skipping document entry: {}", e),
                },
                Err(e) => warn!("Error reading document stream: {}", e),
            }
        }

        results.sort_by(|a, b| b.upload_date.cmp(&a.upload_date));
        Ok(results)
    }

    pub async fn get_annotation(
        &self,
        id: &str,
        pos: Position,
    ) -> Result<Option<AnnotationRecord>> {
        let key = annotation_key(id, pos);
        let Some(bytes) = self.get_raw(&key).await? else {
            return Ok(None);
        };
        let record: AnnotationRecord = decode(&key, &bytes)?;
        if record.position != pos {
            return Err(AnnotateError::validation(format!(
                "record at {} claims position {}",
                key, record.position
            )));
        }
        Ok(Some(record))
    }

    pub async fn put_annotation(
        &self,
        id: &str,
        pos: Position,
        answer: AnswerTag,
    ) -> Result<AnnotationRecord> {
        let key = annotation_key(id, pos);
        let record = AnnotationRecord {
            position: pos,
            answer,
            timestamp: Utc::now(),
        };
        let value = encode(&key, &record)?;
        self.commit(|delta| delta.put_raw(key, value)).await?;
        debug!(doc_id = id, position = %pos, answer = %answer, "annotation stored");
        self.publish(id, ChangeKind::Annotation(pos));
        Ok(record)
    }

    pub async fn delete_annotation(&self, id: &str, pos: Position) -> Result<()> {
        let key = annotation_key(id, pos);
        self.commit(|delta| delta.delete(key)).await?;
        self.publish(id, ChangeKind::Annotation(pos));
        Ok(())
    }

    pub async fn get_last_position(&self, id: &str) -> Result<Option<LastPosition>> {
        let key = last_position_key(id);
        match self.get_raw(&key).await? {
            Some(bytes) => Ok(Some(decode(&key, &bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn put_last_position(&self, id: &str, pos: Position) -> Result<()> {
        let key = last_position_key(id);
        let last = LastPosition {
            document_id: id.to_string(),
            position: pos,
            updated_at: Utc::now(),
        };
        let value = encode(&key, &last)?;
        self.commit(|delta| delta.put_raw(key, value)).await?;
        debug!(doc_id = id, position = %pos, "last position stored");
        Ok(())
    }

    pub async fn delete_last_position(&self, id: &str) -> Result<()> {
        let key = last_position_key(id);
        self.commit(|delta| delta.delete(key)).await
    }
}

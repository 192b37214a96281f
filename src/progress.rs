//! Completion accounting.
//!
//! A document's `progress` field is a cache. The truth is the set of stored
//! answers, so every mutation re-derives the percentage by scanning all
//! positions and writes the result back.

use serde::Serialize;
use tracing::{debug, warn};

use crate::docs::types::Document;
use crate::docs::AnnotationStore;
use crate::error::Result;
use crate::lock::Deadline;
use crate::traversal;

/// Number of questions in `doc`: one per sentence plus one per entity.
pub fn total_steps(doc: &Document) -> usize {
    doc.abstracts
        .iter()
        .flat_map(|abs| abs.sentences.iter())
        .map(|sentence| 1 + sentence.entities.len())
        .sum()
}

/// Percentage rounded to one decimal; an empty document is 0%.
pub fn percent(completed: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = 100.0 * completed as f64 / total as f64;
    (raw * 10.0).round() / 10.0
}

/// Count positions with a stored answer, giving up at `deadline`.
pub async fn completed_steps(
    store: &AnnotationStore,
    doc: &Document,
    deadline: &Deadline,
) -> Result<usize> {
    let mut completed = 0;
    for pos in traversal::positions(doc) {
        deadline.check("progress scan")?;
        if store.get_annotation(&doc.id, pos).await?.is_some() {
            completed += 1;
        }
    }
    Ok(completed)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    pub percent: f64,
}

/// Re-derive progress for `doc` and write it back when the cache is stale.
///
/// The caller must hold the document's lock.
pub async fn recompute(
    store: &AnnotationStore,
    doc: &mut Document,
    deadline: &Deadline,
) -> Result<Progress> {
    let completed = completed_steps(store, doc, deadline).await?;
    write_progress(store, doc, completed).await
}

/// Cache `completed` answers as the document's progress, also repairing a
/// stale step count.
pub async fn write_progress(
    store: &AnnotationStore,
    doc: &mut Document,
    completed: usize,
) -> Result<Progress> {
    let total = total_steps(doc);
    let progress = Progress {
        completed,
        total,
        percent: percent(completed, total),
    };

    if doc.progress != progress.percent || doc.total_steps != total {
        if doc.total_steps != total {
            warn!(doc_id = %doc.id, cached = doc.total_steps, total, "stale total steps");
        }
        doc.progress = progress.percent;
        doc.total_steps = total;
        store.put_document(doc).await?;
    }
    debug!(doc_id = %doc.id, completed, total, percent = progress.percent, "progress recomputed");
    Ok(progress)
}

/// Lock, load and recompute one document.
pub async fn refresh_progress(store: &AnnotationStore, id: &str) -> Result<(Document, Progress)> {
    let deadline = store.deadline();
    let guard = store.lock(id, &deadline).await?;
    let mut doc = store.get_document(id).await?;
    let progress = recompute(store, &mut doc, &deadline).await?;
    guard.release()?;
    Ok((doc, progress))
}

/// All documents, newest first, with freshly derived progress.
///
/// A document whose refresh fails is paired with `None`: its cached
/// `progress` is stale and must not be shown as current.
pub async fn list_with_progress(
    store: &AnnotationStore,
) -> Result<Vec<(Document, Option<Progress>)>> {
    let mut listed = Vec::new();
    for doc in store.list_documents().await? {
        match refresh_progress(store, &doc.id).await {
            Ok((fresh, progress)) => listed.push((fresh, Some(progress))),
            Err(e) => {
                warn!(doc_id = %doc.id, "progress indeterminate: {}", e);
                listed.push((doc, None));
            }
        }
    }
    Ok(listed)
}

/// Totals across every stored document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_annotations: usize,
    pub completed_files: usize,
    pub total_sentences: usize,
    pub total_entities: usize,
    pub completed_annotations: usize,
}

/// Aggregate statistics. A document whose progress cannot be computed
/// contributes nothing rather than failing the whole aggregation.
pub async fn aggregate_stats(store: &AnnotationStore) -> Result<Stats> {
    let mut stats = Stats::default();

    for doc in store.list_documents().await? {
        let progress = match refresh_progress(store, &doc.id).await {
            Ok((_, progress)) => progress,
            Err(e) => {
                warn!(doc_id = %doc.id, "excluded from stats: {}", e);
                continue;
            }
        };

        for sentence in doc.abstracts.iter().flat_map(|abs| abs.sentences.iter()) {
            stats.total_sentences += 1;
            stats.total_entities += sentence.entities.len();
        }
        stats.completed_annotations += progress.completed;
        if progress.total > 0 && progress.completed == progress.total {
            stats.completed_files += 1;
        }
    }

    stats.total_annotations = stats.total_sentences + stats.total_entities;
    Ok(stats)
}

use tracing::info;

use super::AnnotationStore;
use crate::error::Result;

/// Drop every answer and the resume position so the document can be
/// annotated again from the start.
pub async fn reset_document(store: &AnnotationStore, id: &str) -> Result<()> {
    let deadline = store.deadline();
    let guard = store.lock(id, &deadline).await?;

    let mut doc = store.get_document(id).await?;
    deadline.check("reset")?;
    store.clear_annotations(&mut doc).await?;
    guard.release()?;

    info!(doc_id = id, "document reset");
    Ok(())
}

/// Delete the document together with its answers and resume position.
pub async fn remove_document(store: &AnnotationStore, id: &str) -> Result<()> {
    let deadline = store.deadline();
    let guard = store.lock(id, &deadline).await?;
    store.delete_document(id).await?;
    guard.release()?;

    info!(doc_id = id, "document deleted");
    Ok(())
}

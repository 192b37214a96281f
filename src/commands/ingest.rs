use std::path::Path;

use anyhow::Context;
use tracing::info;

use crate::docs::ingest as doc_ingest;
use crate::state::AppState;

/// Upload a JSON file of abstracts as a new document.
pub async fn ingest(state: &AppState, file: &Path) -> anyhow::Result<()> {
    let name = file
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("{} has no usable file name", file.display()))?;
    let content = tokio::fs::read(file)
        .await
        .with_context(|| format!("read {}", file.display()))?;

    info!(file = %file.display(), bytes = content.len(), "Ingestion started");
    let doc = doc_ingest::ingest_file(&state.store, name, &content).await?;

    println!(
        "Ingested {} ({} abstracts, {} questions)\nDoc ID: {}",
        doc.name,
        doc.abstracts.len(),
        doc.total_steps,
        doc.id
    );
    Ok(())
}

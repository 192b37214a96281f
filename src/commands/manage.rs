use std::path::PathBuf;

use anyhow::Context;

use crate::docs::export::{export_document, export_file_name};
use crate::docs::manage::{remove_document, reset_document};
use crate::state::AppState;

/// Write the annotated copy next to the working directory, or to `out`.
pub async fn export(state: &AppState, id: &str, out: Option<PathBuf>) -> anyhow::Result<()> {
    let exported = export_document(&state.store, id).await?;
    let path = out.unwrap_or_else(|| PathBuf::from(export_file_name(&exported.file_name)));

    let json = serde_json::to_string_pretty(&exported)?;
    tokio::fs::write(&path, json)
        .await
        .with_context(|| format!("write {}", path.display()))?;

    println!("Exported {} to {}", id, path.display());
    Ok(())
}

pub async fn reset(state: &AppState, id: &str) -> anyhow::Result<()> {
    reset_document(&state.store, id).await?;
    println!("Cleared all answers for {}", id);
    Ok(())
}

pub async fn delete(state: &AppState, id: &str) -> anyhow::Result<()> {
    remove_document(&state.store, id).await?;
    println!("Deleted {}", id);
    Ok(())
}

use crate::progress::{aggregate_stats, list_with_progress, Progress};
use crate::state::AppState;

/// Right-aligned percentage, or `?` when it could not be derived.
fn progress_cell(progress: Option<Progress>) -> String {
    match progress {
        Some(p) => format!("{:>5.1}%", p.percent),
        None => format!("{:>6}", "?"),
    }
}

/// List uploaded documents, newest first.
pub async fn list(state: &AppState) -> anyhow::Result<()> {
    let docs = list_with_progress(&state.store).await?;

    if docs.is_empty() {
        println!("No documents uploaded yet. Use `abstract-annotator ingest <file>` to add one.");
        return Ok(());
    }

    for (doc, progress) in &docs {
        println!(
            "{}  {}  {}  (uploaded {})",
            progress_cell(*progress),
            doc.id,
            doc.name,
            doc.upload_date.format("%Y-%m-%d %H:%M")
        );
    }
    if docs.iter().any(|(_, progress)| progress.is_none()) {
        println!("? = document busy, progress unknown");
    }
    Ok(())
}

pub async fn stats(state: &AppState) -> anyhow::Result<()> {
    let stats = aggregate_stats(&state.store).await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

use chrono::Utc;
use tracing::info;

use super::types::{Abstract, DocId, Document};
use super::validate::validate_collection;
use super::AnnotationStore;
use crate::error::{AnnotateError, Result};
use crate::progress::total_steps;

/// Fresh id: blake3 over name, content and upload time.
fn assign_id(name: &str, content: &[u8], nanos: i64) -> DocId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(name.as_bytes());
    hasher.update(content);
    hasher.update(&nanos.to_le_bytes());
    let hex = hasher.finalize().to_hex();
    format!("file-{}", &hex[..16])
}

/// Validate an uploaded JSON file and store it as a new document with 0%
/// progress. Nothing is written unless validation passes.
pub async fn ingest_file(store: &AnnotationStore, name: &str, content: &[u8]) -> Result<Document> {
    if !name.ends_with(".json") {
        return Err(AnnotateError::validation(format!(
            "{}: please upload a JSON file",
            name
        )));
    }

    let text = std::str::from_utf8(content)
        .map_err(|e| AnnotateError::validation(format!("{}: not UTF-8: {}", name, e)))?;
    if text.trim().is_empty() {
        return Err(AnnotateError::validation(format!("{}: file is empty", name)));
    }

    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| AnnotateError::validation(format!("{}: invalid JSON: {}", name, e)))?;
    validate_collection(&value)?;
    let abstracts: Vec<Abstract> = serde_json::from_value(value)
        .map_err(|e| AnnotateError::validation(format!("{}: {}", name, e)))?;

    let upload_date = Utc::now();
    let mut doc = Document {
        id: assign_id(
            name,
            content,
            upload_date.timestamp_nanos_opt().unwrap_or_default(),
        ),
        name: name.to_string(),
        abstracts,
        upload_date,
        progress: 0.0,
        total_steps: 0,
    };
    doc.total_steps = total_steps(&doc);

    store.put_document(&doc).await?;
    info!(
        doc_id = %doc.id,
        name,
        abstracts = doc.abstracts.len(),
        total_steps = doc.total_steps,
        "document ingested"
    );
    Ok(doc)
}

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::types::{AnswerTag, Position};
use super::AnnotationStore;
use crate::error::Result;

/// Annotated copy of a document, in the upload format plus answers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportedFile {
    pub file_name: String,
    pub export_date: DateTime<Utc>,
    pub abstracts: Vec<ExportedAbstract>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportedAbstract {
    pub paper_code: String,
    #[serde(rename = "abstract")]
    pub text: String,
    pub sentences: Vec<ExportedSentence>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportedSentence {
    pub sentence_code: String,
    pub text: String,
    /// `null` when unanswered.
    pub sentence_type: Option<AnswerTag>,
    pub scientific_entities: Vec<ExportedEntity>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportedEntity {
    pub entity: String,
    #[serde(rename = "type")]
    pub answer: Option<AnswerTag>,
}

/// `batch.json` → `batch_annotated.json`.
pub fn export_file_name(name: &str) -> String {
    match name.strip_suffix(".json") {
        Some(stem) => format!("{}_annotated.json", stem),
        None => format!("{}_annotated.json", name),
    }
}

/// Every sentence and entity of the document with its stored answer.
pub async fn export_document(store: &AnnotationStore, id: &str) -> Result<ExportedFile> {
    let doc = store.get_document(id).await?;
    let answer_at = |pos: Position| async move {
        Ok::<_, crate::error::AnnotateError>(
            store.get_annotation(id, pos).await?.map(|r| r.answer),
        )
    };

    let mut abstracts = Vec::with_capacity(doc.abstracts.len());
    for (a, abs) in doc.abstracts.iter().enumerate() {
        let mut sentences = Vec::with_capacity(abs.sentences.len());
        for (s, sentence) in abs.sentences.iter().enumerate() {
            let mut entities = Vec::with_capacity(sentence.entities.len());
            for (e, entity) in sentence.entities.iter().enumerate() {
                entities.push(ExportedEntity {
                    entity: entity.text.clone(),
                    answer: answer_at(Position::entity(a, s, e)).await?,
                });
            }
            sentences.push(ExportedSentence {
                sentence_code: sentence.code.clone(),
                text: sentence.text.clone(),
                sentence_type: answer_at(Position::sentence(a, s)).await?,
                scientific_entities: entities,
            });
        }
        abstracts.push(ExportedAbstract {
            paper_code: abs.code.clone(),
            text: abs.text.clone(),
            sentences,
        });
    }

    Ok(ExportedFile {
        file_name: doc.name,
        export_date: Utc::now(),
        abstracts,
    })
}

use serde_json::Value;

use crate::error::{AnnotateError, Result};

/// Check an uploaded value against the abstract/sentence/entity shape.
///
/// Constraints are checked top-down and the first violation is reported.
/// There is no bound on the number of abstracts, sentences or entities.
pub fn validate_collection(value: &Value) -> Result<()> {
    let abstracts = value.as_array().ok_or_else(|| {
        AnnotateError::validation("invalid file format: root should be an array of abstracts")
    })?;

    for (a, item) in abstracts.iter().enumerate() {
        let at = format!("abstract {}", a);
        require_text(item, "paper_code", &at)?;
        require_text(item, "abstract", &at)?;
        let sentences = require_array(item, "sentences", &at)?;

        for (s, sentence) in sentences.iter().enumerate() {
            let at = format!("abstract {} sentence {}", a, s);
            require_text(sentence, "sentence_code", &at)?;
            require_text(sentence, "text", &at)?;
            let entities = require_array(sentence, "scientific_entities", &at)?;

            for (e, entity) in entities.iter().enumerate() {
                let at = format!("abstract {} sentence {} entity {}", a, s, e);
                require_text(entity, "entity", &at)?;
            }
        }
    }

    Ok(())
}

fn require_text(item: &Value, field: &str, at: &str) -> Result<()> {
    match item.get(field).and_then(Value::as_str) {
        Some(text) if !text.is_empty() => Ok(()),
        _ => Err(AnnotateError::validation(format!(
            "{}: missing or invalid {}",
            at, field
        ))),
    }
}

fn require_array<'a>(item: &'a Value, field: &str, at: &str) -> Result<&'a Vec<Value>> {
    item.get(field).and_then(Value::as_array).ok_or_else(|| {
        AnnotateError::validation(format!("{}: {} must be an array", at, field))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(value: Value) -> String {
        match validate_collection(&value) {
            Err(AnnotateError::Validation(msg)) => msg,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_accepts_valid_collection() {
        let value = json!([{
            "paper_code": "P1",
            "abstract": "Some abstract.",
            "sentences": [{
                "sentence_code": "S1",
                "text": "A sentence.",
                "scientific_entities": [{"entity": "graphene"}]
            }]
        }]);
        assert!(validate_collection(&value).is_ok());
    }

    #[test]
    fn test_accepts_empty_collection() {
        assert!(validate_collection(&json!([])).is_ok());
    }

    #[test]
    fn test_rejects_non_array_root() {
        assert!(message(json!({"abstracts": []})).contains("root should be an array"));
    }

    #[test]
    fn test_rejects_empty_code() {
        let msg = message(json!([{"paper_code": "", "abstract": "x", "sentences": []}]));
        assert_eq!(msg, "abstract 0: missing or invalid paper_code");
    }

    #[test]
    fn test_first_failure_wins() {
        // Both the abstract text and the sentence list are wrong; text is checked first.
        let msg = message(json!([{"paper_code": "P", "abstract": 7, "sentences": "nope"}]));
        assert_eq!(msg, "abstract 0: missing or invalid abstract");
    }

    #[test]
    fn test_rejects_nested_entity() {
        let msg = message(json!([{
            "paper_code": "P",
            "abstract": "A",
            "sentences": [
                {"sentence_code": "S0", "text": "t", "scientific_entities": []},
                {"sentence_code": "S1", "text": "t", "scientific_entities": [{"entity": "ok"}, {}]}
            ]
        }]));
        assert_eq!(msg, "abstract 0 sentence 1 entity 1: missing or invalid entity");
    }

    #[test]
    fn test_rejects_missing_entities_array() {
        let msg = message(json!([{
            "paper_code": "P",
            "abstract": "A",
            "sentences": [{"sentence_code": "S0", "text": "t"}]
        }]));
        assert!(msg.contains("scientific_entities must be an array"));
    }
}

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Document id assigned at ingest, e.g. `file-3fa2c91b0d7e4a51`.
pub type DocId = String;

/// An uploaded collection of abstracts plus cached progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: DocId,
    /// Original upload file name.
    pub name: String,
    pub abstracts: Vec<Abstract>,
    pub upload_date: DateTime<Utc>,
    /// Cached completion percentage; always re-derived, never authoritative.
    pub progress: f64,
    pub total_steps: usize,
}

impl Document {
    pub fn sentence(&self, abstract_index: usize, sentence_index: usize) -> Option<&Sentence> {
        self.abstracts
            .get(abstract_index)?
            .sentences
            .get(sentence_index)
    }

    /// Whether `position` addresses an existing question of this document.
    pub fn contains(&self, position: Position) -> bool {
        match self.sentence(position.abstract_index, position.sentence_index) {
            Some(sentence) => match position.slot {
                Slot::Sentence => true,
                Slot::Entity(n) => n < sentence.entities.len(),
            },
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Abstract {
    #[serde(rename = "paper_code")]
    pub code: String,
    #[serde(rename = "abstract")]
    pub text: String,
    pub sentences: Vec<Sentence>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sentence {
    #[serde(rename = "sentence_code")]
    pub code: String,
    pub text: String,
    #[serde(rename = "scientific_entities")]
    pub entities: Vec<Entity>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "entity")]
    pub text: String,
}

/// Which question of a sentence a position refers to.
///
/// `Sentence` orders before every `Entity`, and serializes as `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum Slot {
    Sentence,
    Entity(usize),
}

impl Slot {
    pub fn is_sentence(self) -> bool {
        matches!(self, Slot::Sentence)
    }
}

impl From<Slot> for i64 {
    fn from(slot: Slot) -> Self {
        match slot {
            Slot::Sentence => -1,
            Slot::Entity(n) => n as i64,
        }
    }
}

impl TryFrom<i64> for Slot {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Slot::Sentence),
            n if n >= 0 => Ok(Slot::Entity(n as usize)),
            n => Err(format!("invalid entity index {}", n)),
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", i64::from(*self))
    }
}

/// One answerable question within a document.
///
/// Field order gives the canonical lexicographic traversal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub abstract_index: usize,
    pub sentence_index: usize,
    #[serde(rename = "entityIndex")]
    pub slot: Slot,
}

impl Position {
    pub const FIRST: Position = Position {
        abstract_index: 0,
        sentence_index: 0,
        slot: Slot::Sentence,
    };

    pub fn new(abstract_index: usize, sentence_index: usize, slot: Slot) -> Self {
        Self {
            abstract_index,
            sentence_index,
            slot,
        }
    }

    pub fn sentence(abstract_index: usize, sentence_index: usize) -> Self {
        Self::new(abstract_index, sentence_index, Slot::Sentence)
    }

    pub fn entity(abstract_index: usize, sentence_index: usize, entity_index: usize) -> Self {
        Self::new(abstract_index, sentence_index, Slot::Entity(entity_index))
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({},{},{})",
            self.abstract_index, self.sentence_index, self.slot
        )
    }
}

/// Classification labels. Each applies to sentence questions, entity
/// questions, or both (`NotSure`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnswerTag {
    #[serde(rename = "Background/Introduction")]
    Background,
    #[serde(rename = "Methods/Approach")]
    Methods,
    #[serde(rename = "Results/Findings")]
    Results,
    #[serde(rename = "Conclusions/Implications")]
    Conclusions,
    #[serde(rename = "Agent/Subject")]
    Agent,
    #[serde(rename = "Object/Recipient")]
    Object,
    #[serde(rename = "Outcome/Effect")]
    Outcome,
    #[serde(rename = "Context/Condition")]
    Context,
    #[serde(rename = "Not sure")]
    NotSure,
}

impl AnswerTag {
    pub const SENTENCE_OPTIONS: [AnswerTag; 5] = [
        AnswerTag::Background,
        AnswerTag::Methods,
        AnswerTag::Results,
        AnswerTag::Conclusions,
        AnswerTag::NotSure,
    ];

    pub const ENTITY_OPTIONS: [AnswerTag; 5] = [
        AnswerTag::Agent,
        AnswerTag::Object,
        AnswerTag::Outcome,
        AnswerTag::Context,
        AnswerTag::NotSure,
    ];

    /// The options offered at a slot, in display order.
    pub fn options_for(slot: Slot) -> &'static [AnswerTag] {
        if slot.is_sentence() {
            &Self::SENTENCE_OPTIONS
        } else {
            &Self::ENTITY_OPTIONS
        }
    }

    pub fn applies_to(self, slot: Slot) -> bool {
        Self::options_for(slot).contains(&self)
    }

    pub fn label(self) -> &'static str {
        match self {
            AnswerTag::Background => "Background/Introduction",
            AnswerTag::Methods => "Methods/Approach",
            AnswerTag::Results => "Results/Findings",
            AnswerTag::Conclusions => "Conclusions/Implications",
            AnswerTag::Agent => "Agent/Subject",
            AnswerTag::Object => "Object/Recipient",
            AnswerTag::Outcome => "Outcome/Effect",
            AnswerTag::Context => "Context/Condition",
            AnswerTag::NotSure => "Not sure",
        }
    }

    /// Question shown to the annotator for this option.
    pub fn prompt(self) -> &'static str {
        match self {
            AnswerTag::Background => {
                "What is the background or the main problem discussed by this research?"
            }
            AnswerTag::Methods => "What methods or approaches are used to conduct the research?",
            AnswerTag::Results => "What are the key findings or outcomes of this study?",
            AnswerTag::Conclusions => {
                "What are the implications of these findings, and what future directions are suggested?"
            }
            AnswerTag::Agent => {
                "What is the main focus or who/what is performing the action in the sentence?"
            }
            AnswerTag::Object => {
                "What is receiving the action or being acted upon in the sentence?"
            }
            AnswerTag::Outcome => {
                "What is the result or effect of the action or focus in the sentence?"
            }
            AnswerTag::Context => {
                "What background conditions or circumstances are relevant to the action or subject in the sentence?"
            }
            AnswerTag::NotSure => "Not sure",
        }
    }
}

impl fmt::Display for AnswerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for AnswerTag {
    type Err = String;

    /// Accepts the full label (`Methods/Approach`) or its first word
    /// (`methods`), case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        let all = AnswerTag::SENTENCE_OPTIONS
            .iter()
            .chain(AnswerTag::ENTITY_OPTIONS.iter());
        for tag in all {
            let label = tag.label().to_lowercase();
            let short = label.split(['/', ' ']).next().unwrap_or_default();
            if wanted == label || wanted == short || wanted == label.replace(' ', "-") {
                return Ok(*tag);
            }
        }
        Err(format!("unknown answer tag: {}", s))
    }
}

/// A persisted answer for one position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub position: Position,
    pub answer: AnswerTag,
    pub timestamp: DateTime<Utc>,
}

/// Where the user last was in a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastPosition {
    pub document_id: DocId,
    #[serde(flatten)]
    pub position: Position,
    pub updated_at: DateTime<Utc>,
}

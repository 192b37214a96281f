//! Linearization of abstracts → sentences → entities into one question
//! sequence.
//!
//! Every sentence contributes its sentence-level question followed by one
//! question per entity. Abstracts without sentences contribute nothing and
//! are skipped by navigation.

use crate::docs::types::{Document, Position, Sentence, Slot};
use crate::docs::AnnotationStore;
use crate::error::Result;
use crate::lock::Deadline;

/// Where an annotator is within a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalState {
    /// The document has no questions at all.
    NotStarted,
    At(Position),
    /// Moved past the last question. Terminal.
    Completed,
}

impl TraversalState {
    pub fn position(self) -> Option<Position> {
        match self {
            TraversalState::At(position) => Some(position),
            _ => None,
        }
    }
}

fn last_slot(sentence: &Sentence) -> Slot {
    match sentence.entities.len() {
        0 => Slot::Sentence,
        n => Slot::Entity(n - 1),
    }
}

/// All positions of `doc` in canonical order.
pub fn positions(doc: &Document) -> impl Iterator<Item = Position> + '_ {
    doc.abstracts.iter().enumerate().flat_map(|(a, abs)| {
        abs.sentences.iter().enumerate().flat_map(move |(s, sentence)| {
            std::iter::once(Position::sentence(a, s))
                .chain((0..sentence.entities.len()).map(move |e| Position::entity(a, s, e)))
        })
    })
}

pub fn first_position(doc: &Document) -> Option<Position> {
    doc.abstracts
        .iter()
        .position(|abs| !abs.sentences.is_empty())
        .map(|a| Position::sentence(a, 0))
}

pub fn last_position(doc: &Document) -> Option<Position> {
    let (a, abs) = doc
        .abstracts
        .iter()
        .enumerate()
        .rev()
        .find(|(_, abs)| !abs.sentences.is_empty())?;
    let s = abs.sentences.len() - 1;
    Some(Position::new(a, s, last_slot(&abs.sentences[s])))
}

/// The position after `pos`, or `None` when `pos` is the last one.
pub fn next(doc: &Document, pos: Position) -> Option<Position> {
    let sentence = doc.sentence(pos.abstract_index, pos.sentence_index)?;
    let following = match pos.slot {
        Slot::Sentence => 0,
        Slot::Entity(n) => n + 1,
    };
    if following < sentence.entities.len() {
        return Some(Position::entity(
            pos.abstract_index,
            pos.sentence_index,
            following,
        ));
    }

    let abs = &doc.abstracts[pos.abstract_index];
    if pos.sentence_index + 1 < abs.sentences.len() {
        return Some(Position::sentence(
            pos.abstract_index,
            pos.sentence_index + 1,
        ));
    }

    doc.abstracts
        .iter()
        .enumerate()
        .skip(pos.abstract_index + 1)
        .find(|(_, abs)| !abs.sentences.is_empty())
        .map(|(a, _)| Position::sentence(a, 0))
}

/// The position before `pos`, or `None` when `pos` is the first one.
pub fn previous(doc: &Document, pos: Position) -> Option<Position> {
    let (a, s) = (pos.abstract_index, pos.sentence_index);
    match pos.slot {
        Slot::Entity(0) => return Some(Position::sentence(a, s)),
        Slot::Entity(n) => return Some(Position::entity(a, s, n - 1)),
        Slot::Sentence => {}
    }

    if s > 0 {
        let sentence = doc.sentence(a, s - 1)?;
        return Some(Position::new(a, s - 1, last_slot(sentence)));
    }

    let upto = a.min(doc.abstracts.len());
    doc.abstracts[..upto]
        .iter()
        .enumerate()
        .rev()
        .find(|(_, abs)| !abs.sentences.is_empty())
        .map(|(a, abs)| {
            let s = abs.sentences.len() - 1;
            Position::new(a, s, last_slot(&abs.sentences[s]))
        })
}

/// Zero-based index of `pos` in the canonical sequence.
pub fn step_index(doc: &Document, pos: Position) -> Option<usize> {
    positions(doc).position(|p| p == pos)
}

/// The first position without a stored answer.
///
/// A fully answered document resumes at its last position rather than
/// `Completed`, so it stays reviewable.
pub async fn find_first_unanswered(
    store: &AnnotationStore,
    doc: &Document,
    deadline: &Deadline,
) -> Result<TraversalState> {
    if first_position(doc).is_none() {
        return Ok(TraversalState::NotStarted);
    }
    for pos in positions(doc) {
        deadline.check("first-unanswered scan")?;
        if store.get_annotation(&doc.id, pos).await?.is_none() {
            return Ok(TraversalState::At(pos));
        }
    }
    Ok(last_position(doc).map_or(TraversalState::NotStarted, TraversalState::At))
}

//! One annotator working through one document.
//!
//! A session owns the in-memory view of a document and the current
//! traversal state. Navigation persists the resume position; answering
//! stores the record and recomputes progress under the document lock.

use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, warn};

use crate::docs::types::{AnswerTag, Document, Position};
use crate::docs::{AnnotationStore, ChangeKind, StoreEvent};
use crate::error::{AnnotateError, Result};
use crate::progress::{self, Progress};
use crate::traversal::{self, TraversalState};

/// Outcome of a navigation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Moved(Position),
    /// `next` without an answer at the current position.
    NeedsAnswer,
    /// `previous` at the first position.
    AtStart,
    Completed,
    /// Nothing to navigate (empty document, or already completed).
    Unchanged,
}

pub struct AnnotationSession {
    store: AnnotationStore,
    document: Document,
    state: TraversalState,
    events: broadcast::Receiver<StoreEvent>,
}

impl AnnotationSession {
    /// Load a document and resume where the annotator left off.
    ///
    /// Uses the stored last position when it still fits the document,
    /// otherwise the first unanswered position. Performs no writes, so it is
    /// safe to call again to refresh.
    pub async fn open(store: &AnnotationStore, id: &str) -> Result<Self> {
        let events = store.subscribe();
        let document = store.get_document(id).await?;
        let state = resume_state(store, &document).await?;
        debug!(doc_id = id, ?state, "session opened");

        Ok(Self {
            store: store.clone(),
            document,
            state,
            events,
        })
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn state(&self) -> TraversalState {
        self.state
    }

    pub fn position(&self) -> Option<Position> {
        self.state.position()
    }

    /// 1-based step number of the current position and the total.
    pub fn step(&self) -> Option<(usize, usize)> {
        let pos = self.position()?;
        let index = traversal::step_index(&self.document, pos)?;
        Some((index + 1, progress::total_steps(&self.document)))
    }

    fn current(&self) -> Result<Position> {
        self.position().ok_or_else(|| {
            AnnotateError::not_found(format!("no current question in {}", self.document.id))
        })
    }

    pub async fn current_answer(&self) -> Result<Option<AnswerTag>> {
        let pos = self.current()?;
        Ok(self
            .store
            .get_annotation(&self.document.id, pos)
            .await?
            .map(|record| record.answer))
    }

    /// Store `answer` at the current position and recompute progress.
    ///
    /// Does not advance.
    pub async fn select_answer(&mut self, answer: AnswerTag) -> Result<Progress> {
        let pos = self.current()?;
        if !answer.applies_to(pos.slot) {
            return Err(AnnotateError::validation(format!(
                "{} is not an option at {}",
                answer, pos
            )));
        }

        let id = self.document.id.clone();
        let deadline = self.store.deadline();
        let guard = self.store.lock(&id, &deadline).await?;

        let mut doc = self.store.get_document(&id).await?;
        if !doc.contains(pos) {
            return Err(AnnotateError::not_found(format!("position {} in {}", pos, id)));
        }
        // Scan before writing so a timeout leaves nothing behind.
        let overwrite = self.store.get_annotation(&id, pos).await?.is_some();
        let completed = progress::completed_steps(&self.store, &doc, &deadline).await?
            + usize::from(!overwrite);
        self.store.put_annotation(&id, pos, answer).await?;
        let progress = progress::write_progress(&self.store, &mut doc, completed).await?;
        guard.release()?;

        info!(doc_id = %id, position = %pos, %answer, percent = progress.percent, "answer saved");
        self.document = doc;
        Ok(progress)
    }

    /// Advance, but only once the current position has an answer.
    pub async fn next(&mut self) -> Result<Step> {
        let TraversalState::At(pos) = self.state else {
            return Ok(match self.state {
                TraversalState::Completed => Step::Completed,
                _ => Step::Unchanged,
            });
        };
        if self.current_answer().await?.is_none() {
            return Ok(Step::NeedsAnswer);
        }

        match traversal::next(&self.document, pos) {
            Some(next) => {
                self.move_to(next).await?;
                Ok(Step::Moved(next))
            }
            None => {
                info!(doc_id = %self.document.id, "all questions visited");
                self.state = TraversalState::Completed;
                Ok(Step::Completed)
            }
        }
    }

    pub async fn previous(&mut self) -> Result<Step> {
        let TraversalState::At(pos) = self.state else {
            return Ok(match self.state {
                TraversalState::Completed => Step::Completed,
                _ => Step::Unchanged,
            });
        };
        match traversal::previous(&self.document, pos) {
            Some(prev) => {
                self.move_to(prev).await?;
                Ok(Step::Moved(prev))
            }
            None => Ok(Step::AtStart),
        }
    }

    /// Move straight to `pos`.
    pub async fn jump(&mut self, pos: Position) -> Result<()> {
        if !self.document.contains(pos) {
            return Err(AnnotateError::not_found(format!(
                "position {} in {}",
                pos, self.document.id
            )));
        }
        self.move_to(pos).await
    }

    async fn move_to(&mut self, pos: Position) -> Result<()> {
        self.store.put_last_position(&self.document.id, pos).await?;
        self.state = TraversalState::At(pos);
        Ok(())
    }

    /// Apply changes made by other contexts. Returns whether anything was
    /// reloaded.
    pub async fn sync(&mut self) -> Result<bool> {
        let mut stale = false;
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    if event.document_id != self.document.id
                        || event.origin == self.store.context_id()
                    {
                        continue;
                    }
                    match event.kind {
                        ChangeKind::Removed => {
                            return Err(AnnotateError::not_found(format!(
                                "document {} was deleted",
                                self.document.id
                            )));
                        }
                        ChangeKind::Annotation(pos) => {
                            debug!(doc_id = %event.document_id, position = %pos, "answer changed elsewhere");
                        }
                        ChangeKind::Document => {}
                    }
                    stale = true;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                Err(TryRecvError::Lagged(missed)) => {
                    warn!(missed, "change notifications lagged");
                    stale = true;
                }
            }
        }

        if stale {
            self.document = self.store.get_document(&self.document.id).await?;
            if let Some(pos) = self.position() {
                if !self.document.contains(pos) {
                    self.state = resume_state(&self.store, &self.document).await?;
                }
            }
            debug!(doc_id = %self.document.id, "session reloaded");
        }
        Ok(stale)
    }
}

async fn resume_state(store: &AnnotationStore, doc: &Document) -> Result<TraversalState> {
    if let Some(last) = store.get_last_position(&doc.id).await? {
        if doc.contains(last.position) {
            return Ok(TraversalState::At(last.position));
        }
        warn!(doc_id = %doc.id, position = %last.position, "stored position no longer fits, rescanning");
    }
    traversal::find_first_unanswered(store, doc, &store.deadline()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docs::tests::test_store;
    use crate::docs::types::Slot;
    use crate::traversal::tests::doc_with_shape;
    use std::time::Duration;

    async fn stored(store: &AnnotationStore, shape: &[&[usize]]) -> Document {
        let mut doc = doc_with_shape(shape);
        doc.total_steps = progress::total_steps(&doc);
        store.put_document(&doc).await.unwrap();
        doc
    }

    fn answer_for(pos: Position) -> AnswerTag {
        if pos.slot.is_sentence() {
            AnswerTag::Background
        } else {
            AnswerTag::Context
        }
    }

    #[tokio::test]
    async fn test_fresh_document_starts_at_first_position() {
        let (_dir, store) = test_store().await;
        let doc = stored(&store, &[&[2]]).await;

        let session = AnnotationSession::open(&store, &doc.id).await.unwrap();
        assert_eq!(session.state(), TraversalState::At(Position::FIRST));
        assert_eq!(session.step(), Some((1, 3)));
        // Opening writes nothing.
        assert!(store.get_last_position(&doc.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_missing_document() {
        let (_dir, store) = test_store().await;
        let err = AnnotationSession::open(&store, "file-nope").await.err().unwrap();
        assert!(matches!(err, AnnotateError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_answer_does_not_advance_and_next_is_gated() {
        let (_dir, store) = test_store().await;
        let doc = stored(&store, &[&[2]]).await;
        let mut session = AnnotationSession::open(&store, &doc.id).await.unwrap();

        assert_eq!(session.next().await.unwrap(), Step::NeedsAnswer);
        assert_eq!(session.position(), Some(Position::FIRST));

        let progress = session.select_answer(AnswerTag::Methods).await.unwrap();
        assert_eq!(progress.percent, 33.3);
        assert_eq!(session.position(), Some(Position::FIRST));
        assert_eq!(session.document().progress, 33.3);

        assert_eq!(
            session.next().await.unwrap(),
            Step::Moved(Position::entity(0, 0, 0))
        );
        let last = store.get_last_position(&doc.id).await.unwrap().unwrap();
        assert_eq!(last.position, Position::entity(0, 0, 0));
    }

    #[tokio::test]
    async fn test_wrong_level_answer_rejected() {
        let (_dir, store) = test_store().await;
        let doc = stored(&store, &[&[1]]).await;
        let mut session = AnnotationSession::open(&store, &doc.id).await.unwrap();

        let err = session.select_answer(AnswerTag::Agent).await.unwrap_err();
        assert!(matches!(err, AnnotateError::Validation(_)));
        assert!(store
            .get_annotation(&doc.id, Position::FIRST)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_full_walkthrough_reaches_completed() {
        let (_dir, store) = test_store().await;
        let doc = stored(&store, &[&[2]]).await;
        let mut session = AnnotationSession::open(&store, &doc.id).await.unwrap();

        let mut visited = vec![];
        loop {
            let pos = session.position().unwrap();
            visited.push(pos);
            session.select_answer(answer_for(pos)).await.unwrap();
            match session.next().await.unwrap() {
                Step::Moved(_) => continue,
                Step::Completed => break,
                other => panic!("unexpected step {:?}", other),
            }
        }

        assert_eq!(
            visited,
            vec![
                Position::sentence(0, 0),
                Position::entity(0, 0, 0),
                Position::entity(0, 0, 1),
            ]
        );
        assert_eq!(session.state(), TraversalState::Completed);
        assert_eq!(session.document().progress, 100.0);
        assert_eq!(session.next().await.unwrap(), Step::Completed);

        // Reopening a finished document resumes at its last question.
        let reopened = AnnotationSession::open(&store, &doc.id).await.unwrap();
        assert_eq!(reopened.position(), Some(Position::entity(0, 0, 1)));
    }

    #[tokio::test]
    async fn test_all_answered_without_last_position_resumes_at_end() {
        let (_dir, store) = test_store().await;
        let doc = stored(&store, &[&[0], &[1]]).await;
        for pos in traversal::positions(&doc) {
            store.put_annotation(&doc.id, pos, answer_for(pos)).await.unwrap();
        }

        let session = AnnotationSession::open(&store, &doc.id).await.unwrap();
        assert_eq!(session.position(), Some(Position::entity(1, 0, 0)));
    }

    #[tokio::test]
    async fn test_resumes_at_first_unanswered() {
        let (_dir, store) = test_store().await;
        let doc = stored(&store, &[&[1, 1]]).await;
        store
            .put_annotation(&doc.id, Position::sentence(0, 0), AnswerTag::Results)
            .await
            .unwrap();
        store
            .put_annotation(&doc.id, Position::entity(0, 0, 0), AnswerTag::Agent)
            .await
            .unwrap();

        let session = AnnotationSession::open(&store, &doc.id).await.unwrap();
        assert_eq!(session.position(), Some(Position::sentence(0, 1)));
    }

    #[tokio::test]
    async fn test_stale_last_position_falls_back() {
        let (_dir, store) = test_store().await;
        let doc = stored(&store, &[&[0]]).await;
        store
            .put_last_position(&doc.id, Position::entity(4, 4, 4))
            .await
            .unwrap();

        let session = AnnotationSession::open(&store, &doc.id).await.unwrap();
        assert_eq!(session.position(), Some(Position::FIRST));
    }

    #[tokio::test]
    async fn test_previous_and_jump() {
        let (_dir, store) = test_store().await;
        let doc = stored(&store, &[&[1], &[0]]).await;
        let mut session = AnnotationSession::open(&store, &doc.id).await.unwrap();

        assert_eq!(session.previous().await.unwrap(), Step::AtStart);

        session.jump(Position::sentence(1, 0)).await.unwrap();
        assert_eq!(
            store.get_last_position(&doc.id).await.unwrap().unwrap().position,
            Position::sentence(1, 0)
        );
        assert_eq!(
            session.previous().await.unwrap(),
            Step::Moved(Position::new(0, 0, Slot::Entity(0)))
        );

        let err = session.jump(Position::entity(0, 0, 7)).await.unwrap_err();
        assert!(matches!(err, AnnotateError::NotFound(_)));
        assert_eq!(session.position(), Some(Position::entity(0, 0, 0)));

        // Navigation never touches answers.
        for pos in traversal::positions(&doc) {
            assert!(store.get_annotation(&doc.id, pos).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_empty_document_is_not_started() {
        let (_dir, store) = test_store().await;
        let doc = stored(&store, &[&[]]).await;
        let mut session = AnnotationSession::open(&store, &doc.id).await.unwrap();

        assert_eq!(session.state(), TraversalState::NotStarted);
        assert_eq!(session.next().await.unwrap(), Step::Unchanged);
        assert!(matches!(
            session.select_answer(AnswerTag::NotSure).await,
            Err(AnnotateError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_saves_serialize() {
        let (_dir, store) = test_store().await;
        let doc = stored(&store, &[&[2]]).await;
        let mut first = AnnotationSession::open(&store, &doc.id).await.unwrap();
        let mut second = AnnotationSession::open(&store, &doc.id).await.unwrap();
        second.jump(Position::entity(0, 0, 1)).await.unwrap();

        let (a, b) = tokio::join!(
            first.select_answer(AnswerTag::Methods),
            second.select_answer(AnswerTag::Outcome)
        );
        a.unwrap();
        b.unwrap();

        let stored = store.get_document(&doc.id).await.unwrap();
        assert_eq!(stored.progress, 66.7);
        assert!(!store.locks().is_held(&doc.id));
    }

    #[tokio::test]
    async fn test_save_waits_for_holder_then_times_out() {
        let (_dir, store) = test_store().await;
        let doc = stored(&store, &[&[1]]).await;
        let mut session = AnnotationSession::open(&store, &doc.id).await.unwrap();
        let before = store.get_document(&doc.id).await.unwrap();

        let held = store.lock(&doc.id, &store.deadline()).await.unwrap();
        let err = session.select_answer(AnswerTag::Methods).await.unwrap_err();
        assert!(err.is_transient());
        drop(held);

        assert_eq!(store.get_document(&doc.id).await.unwrap(), before);
        assert!(store
            .get_annotation(&doc.id, Position::FIRST)
            .await
            .unwrap()
            .is_none());

        // Once the holder is gone the same call goes through.
        session.select_answer(AnswerTag::Methods).await.unwrap();
    }

    #[tokio::test]
    async fn test_timed_out_save_keeps_holders_writes() {
        let (_dir, store) = test_store().await;
        let doc = stored(&store, &[&[1]]).await;
        let mut waiter = AnnotationSession::open(&store, &doc.id).await.unwrap();
        waiter.jump(Position::entity(0, 0, 0)).await.unwrap();

        // A save in flight on the same context: answer and progress written,
        // lock still held past the waiter's deadline.
        let holder = async {
            let deadline = store.deadline();
            let guard = store.lock(&doc.id, &deadline).await.unwrap();
            store
                .put_annotation(&doc.id, Position::FIRST, AnswerTag::Methods)
                .await
                .unwrap();
            let mut written = store.get_document(&doc.id).await.unwrap();
            progress::write_progress(&store, &mut written, 1).await.unwrap();
            tokio::time::sleep(Duration::from_millis(700)).await;
            guard.release().unwrap();
            written
        };
        let waiting = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waiter.select_answer(AnswerTag::Object).await
        };
        let (written, result) = tokio::join!(holder, waiting);

        assert!(result.unwrap_err().is_transient());
        assert_eq!(written.progress, 50.0);
        assert_eq!(store.get_document(&doc.id).await.unwrap(), written);
        let first = store
            .get_annotation(&doc.id, Position::FIRST)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.answer, AnswerTag::Methods);
        assert!(store
            .get_annotation(&doc.id, Position::entity(0, 0, 0))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_sync_picks_up_other_context() {
        let (_dir, store) = test_store().await;
        let doc = stored(&store, &[&[0, 0]]).await;
        let other_tab = store.new_context();

        let mut mine = AnnotationSession::open(&store, &doc.id).await.unwrap();
        let mut theirs = AnnotationSession::open(&other_tab, &doc.id).await.unwrap();

        assert!(!mine.sync().await.unwrap());
        theirs.select_answer(AnswerTag::Results).await.unwrap();

        assert!(mine.sync().await.unwrap());
        assert_eq!(mine.document().progress, 50.0);
        // Our own writes do not count as foreign changes.
        assert!(!theirs.sync().await.unwrap());
    }
}

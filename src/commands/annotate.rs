use anyhow::{bail, Context};

use crate::docs::types::{AnswerTag, Document, Position, Slot};
use crate::session::{AnnotationSession, Step};
use crate::state::AppState;
use crate::traversal::TraversalState;

/// Resolve `raw` to an option at `slot`: either its 1-based number or a label.
fn parse_answer(raw: &str, slot: Slot) -> anyhow::Result<AnswerTag> {
    let options = AnswerTag::options_for(slot);
    if let Ok(n) = raw.trim().parse::<usize>() {
        return match n.checked_sub(1).and_then(|i| options.get(i)) {
            Some(tag) => Ok(*tag),
            None => bail!("option {} is out of range 1-{}", n, options.len()),
        };
    }
    raw.parse::<AnswerTag>().map_err(anyhow::Error::msg)
}

/// Past the last question. Reachable by jumping, so not necessarily 100%.
fn end_of_document(doc: &Document) -> String {
    format!("{}: end of document ({:.1}% answered)", doc.name, doc.progress)
}

async fn render(session: &AnnotationSession) -> anyhow::Result<()> {
    let doc = session.document();
    let pos = match session.state() {
        TraversalState::At(pos) => pos,
        TraversalState::Completed => {
            println!("{}", end_of_document(doc));
            return Ok(());
        }
        TraversalState::NotStarted => {
            println!("{}: nothing to annotate", doc.name);
            return Ok(());
        }
    };

    let abs = &doc.abstracts[pos.abstract_index];
    let sentence = doc
        .sentence(pos.abstract_index, pos.sentence_index)
        .with_context(|| format!("position {} is outside {}", pos, doc.id))?;
    let (step, total) = session.step().unwrap_or((0, doc.total_steps));

    println!("{} [{}]  question {} of {}  ({:.1}% done)", doc.name, doc.id, step, total, doc.progress);
    println!("\nAbstract {}: {}", abs.code, abs.text);
    println!("\nSentence {}: {}", sentence.code, sentence.text);
    if let Slot::Entity(e) = pos.slot {
        let entity = sentence
            .entities
            .get(e)
            .with_context(|| format!("position {} is outside {}", pos, doc.id))?;
        println!("Entity: {}", entity.text);
    }

    let current = session.current_answer().await?;
    println!();
    for (i, option) in AnswerTag::options_for(pos.slot).iter().enumerate() {
        let mark = if current == Some(*option) { "*" } else { " " };
        println!("{} {}. {}  {}", mark, i + 1, option, option.prompt());
    }
    Ok(())
}

pub async fn show(state: &AppState, id: &str) -> anyhow::Result<()> {
    let session = AnnotationSession::open(&state.store, id).await?;
    render(&session).await
}

pub async fn answer(state: &AppState, id: &str, raw: &str) -> anyhow::Result<()> {
    let mut session = AnnotationSession::open(&state.store, id).await?;
    let pos = session
        .position()
        .with_context(|| format!("{} has no current question", id))?;
    let tag = parse_answer(raw, pos.slot)?;

    let progress = session.select_answer(tag).await?;
    println!(
        "Saved {} at {} ({}/{} answered, {:.1}%)",
        tag, pos, progress.completed, progress.total, progress.percent
    );
    Ok(())
}

pub async fn next(state: &AppState, id: &str) -> anyhow::Result<()> {
    let mut session = AnnotationSession::open(&state.store, id).await?;
    match session.next().await? {
        Step::NeedsAnswer => println!("Answer the current question first."),
        _ => render(&session).await?,
    }
    Ok(())
}

pub async fn prev(state: &AppState, id: &str) -> anyhow::Result<()> {
    let mut session = AnnotationSession::open(&state.store, id).await?;
    if session.previous().await? == Step::AtStart {
        println!("Already at the first question.");
    }
    render(&session).await
}

pub async fn jump(
    state: &AppState,
    id: &str,
    abstract_index: usize,
    sentence_index: usize,
    entity_index: i64,
) -> anyhow::Result<()> {
    let slot = Slot::try_from(entity_index).map_err(anyhow::Error::msg)?;
    let mut session = AnnotationSession::open(&state.store, id).await?;
    session
        .jump(Position::new(abstract_index, sentence_index, slot))
        .await?;
    render(&session).await
}

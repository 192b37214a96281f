mod annotate;
mod config;
mod ingest;
mod list;
mod manage;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::debug;

use crate::config::Config;
use crate::state::AppState;

/// Classify abstract sentences and scientific entities.
#[derive(Debug, Parser)]
#[command(name = "abstract-annotator", version)]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Upload a JSON file of abstracts
    Ingest { file: PathBuf },
    /// List documents with their progress
    List,
    /// Totals across all documents
    Stats,
    /// Show the current question of a document
    Show { id: String },
    /// Answer the current question, by label or option number
    Answer { id: String, tag: String },
    /// Move to the next question (requires an answer)
    Next { id: String },
    /// Move to the previous question
    Prev { id: String },
    /// Move to a position; entity -1 means the sentence question
    Jump {
        id: String,
        #[arg(value_name = "ABSTRACT")]
        abstract_index: usize,
        #[arg(value_name = "SENTENCE")]
        sentence_index: usize,
        #[arg(value_name = "ENTITY", allow_negative_numbers = true)]
        entity_index: i64,
    },
    /// Write an annotated copy of a document
    Export {
        id: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Clear all answers of a document
    Reset { id: String },
    /// Delete a document and its answers
    Delete { id: String },
    /// Print the effective configuration
    Config,
}

/// Run `command`. `config` only inspects settings, so the store is opened
/// for every other command.
pub async fn run(config: Config, command: Command) -> anyhow::Result<()> {
    if let Command::Config = command {
        return config::config(&config);
    }

    let state = AppState::open(config).await?;
    debug!("Annotation store opened at {:?}", state.config.data_dir);
    dispatch(&state, command).await
}

async fn dispatch(state: &AppState, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Ingest { file } => ingest::ingest(state, &file).await,
        Command::List => list::list(state).await,
        Command::Stats => list::stats(state).await,
        Command::Show { id } => annotate::show(state, &id).await,
        Command::Answer { id, tag } => annotate::answer(state, &id, &tag).await,
        Command::Next { id } => annotate::next(state, &id).await,
        Command::Prev { id } => annotate::prev(state, &id).await,
        Command::Jump {
            id,
            abstract_index,
            sentence_index,
            entity_index,
        } => annotate::jump(state, &id, abstract_index, sentence_index, entity_index).await,
        Command::Export { id, out } => manage::export(state, &id, out).await,
        Command::Reset { id } => manage::reset(state, &id).await,
        Command::Delete { id } => manage::delete(state, &id).await,
        Command::Config => config::config(&state.config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_shape() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_jump_accepts_sentence_slot() {
        let cli = Cli::parse_from(["abstract-annotator", "jump", "file-x", "0", "2", "-1"]);
        match cli.command {
            Command::Jump {
                id,
                sentence_index,
                entity_index,
                ..
            } => {
                assert_eq!(id, "file-x");
                assert_eq!(sentence_index, 2);
                assert_eq!(entity_index, -1);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_config_does_not_open_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let config = Config {
            data_dir: blocker.join("store"),
            ..Config::default()
        };

        assert!(run(config.clone(), Command::Config).await.is_ok());
        assert!(run(config, Command::List).await.is_err());
    }

    #[test]
    fn test_verbose_is_global() {
        let cli = Cli::parse_from(["abstract-annotator", "list", "--verbose"]);
        assert!(cli.verbose);
    }
}

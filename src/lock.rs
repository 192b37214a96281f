//! Per-document mutual exclusion for read-modify-write sequences.
//!
//! The store has no transactions, so operations such as "save an annotation,
//! then recompute and write progress" take a lock token for the document
//! first. Tokens live in a map from lock key to acquisition instant owned by
//! one store handle (one context). Waiters poll with a fixed backoff until the
//! token frees up or the operation deadline passes.
//!
//! Tokens are process-local per context: two contexts sharing the same
//! backend do not exclude each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::error::{AnnotateError, Result};

/// A time budget measured from the start of an operation.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.elapsed())
    }

    pub fn expired(&self) -> bool {
        self.elapsed() >= self.budget
    }

    /// Fail with `Timeout` if the budget is spent.
    pub fn check(&self, operation: &'static str) -> Result<()> {
        if self.expired() {
            return Err(AnnotateError::Timeout {
                operation,
                elapsed: self.elapsed(),
            });
        }
        Ok(())
    }
}

fn lock_key(doc_id: &str) -> String {
    format!("lock-{}", doc_id)
}

#[derive(Debug, Clone)]
pub struct LockRegistry {
    held: Arc<Mutex<HashMap<String, Instant>>>,
    backoff: Duration,
}

impl LockRegistry {
    pub fn new(backoff: Duration) -> Self {
        Self {
            held: Arc::new(Mutex::new(HashMap::new())),
            backoff,
        }
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    fn try_acquire(&self, key: &str) -> bool {
        let mut held = self.held.lock();
        if held.contains_key(key) {
            return false;
        }
        held.insert(key.to_string(), Instant::now());
        true
    }

    /// Take the token for `doc_id`, polling until it is free or `deadline`
    /// passes.
    pub async fn acquire(&self, doc_id: &str, deadline: &Deadline) -> Result<LockGuard> {
        let key = lock_key(doc_id);
        let mut attempts: u32 = 0;

        loop {
            if self.try_acquire(&key) {
                if attempts > 0 {
                    debug!(doc_id, attempts, waited = ?deadline.elapsed(), "lock acquired after waiting");
                }
                return Ok(LockGuard {
                    registry: self.clone(),
                    key,
                    released: false,
                });
            }

            if deadline.expired() {
                warn!(
                    doc_id,
                    attempts,
                    held_for = ?self.held_for(doc_id),
                    "gave up waiting for lock"
                );
                return Err(AnnotateError::Timeout {
                    operation: "lock acquisition",
                    elapsed: deadline.elapsed(),
                });
            }

            attempts += 1;
            tokio::time::sleep(self.backoff.min(deadline.remaining())).await;
        }
    }

    #[cfg(test)]
    pub fn is_held(&self, doc_id: &str) -> bool {
        self.held.lock().contains_key(&lock_key(doc_id))
    }

    /// How long the current holder of `doc_id` has had the token.
    pub fn held_for(&self, doc_id: &str) -> Option<Duration> {
        self.held
            .lock()
            .get(&lock_key(doc_id))
            .map(|since| since.elapsed())
    }

    fn release(&self, key: &str) -> Result<()> {
        match self.held.lock().remove(key) {
            Some(_) => Ok(()),
            None => Err(AnnotateError::LockReleaseFailure(format!(
                "{} was not held",
                key
            ))),
        }
    }
}

/// Scoped ownership of a lock token. Dropping the guard releases the token.
#[derive(Debug)]
pub struct LockGuard {
    registry: LockRegistry,
    key: String,
    released: bool,
}

impl LockGuard {
    /// Release explicitly, reporting a token that disappeared underneath us.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.registry.release(&self.key)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.registry.release(&self.key) {
            error!("{}", e);
        }
    }
}

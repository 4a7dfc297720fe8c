//! Debounced search input.

use std::time::Duration;

use tokio::time::Instant;

/// Holds the latest value until no new value has arrived for `quiet`.
pub struct Debouncer<T> {
    quiet: Duration,
    pending: Option<T>,
    deadline: Option<Instant>,
}

impl<T> Debouncer<T> {
    pub fn new(quiet: Duration) -> Self {
        Self { quiet, pending: None, deadline: None }
    }

    /// Replace the pending value and restart the quiet interval.
    pub fn push(&mut self, value: T) {
        self.pending = Some(value);
        self.deadline = Some(Instant::now() + self.quiet);
    }

    pub fn is_pending(&self) -> bool { self.pending.is_some() }

    /// Resolves with the pending value once its deadline passes; never resolves while idle.
    ///
    /// Cancel safe: dropping the future before it resolves keeps the value pending.
    pub async fn settled(&mut self) -> T {
        let Some(deadline) = self.deadline else {
            return std::future::pending().await;
        };
        tokio::time::sleep_until(deadline).await;
        self.deadline = None;
        match self.pending.take() {
            Some(v) => v,
            None => std::future::pending().await,
        }
    }
}

/// Raw text shown while typing plus the committed term that drives fetches.
pub struct SearchInput {
    raw: String,
    committed: String,
    debouncer: Debouncer<String>,
}

impl SearchInput {
    pub fn new(quiet: Duration) -> Self {
        Self { raw: String::new(), committed: String::new(), debouncer: Debouncer::new(quiet) }
    }

    pub fn raw(&self) -> &str { &self.raw }
    pub fn committed(&self) -> &str { &self.committed }

    pub fn type_text(&mut self, text: String) {
        self.raw = text.clone();
        self.debouncer.push(text);
    }

    /// Waits for the next committed term that differs from the current one.
    pub async fn next_commit(&mut self) -> String {
        loop {
            let term = self.debouncer.settled().await;
            if term != self.committed {
                self.committed = term.clone();
                return term;
            }
        }
    }
}

use std::collections::HashSet;

use crate::error::{FailureKind, LlmError};

/// One failed provider attempt, kept for diagnostics and the final summary.
#[derive(Debug, Clone)]
pub struct FallbackAttempt {
    pub provider: String,
    pub error: String,
    pub kind: FailureKind,
}

/// Walks an ordered provider chain, one provider at a time. The cursor only
/// moves forward; `reset` rewinds it for the next request.
#[derive(Debug)]
pub struct FallbackHandler {
    chain: Vec<String>,
    current: usize,
    failed: HashSet<String>,
    attempts: Vec<FallbackAttempt>,
}

impl FallbackHandler {
    #[must_use]
    pub fn new(chain: Vec<String>) -> Self {
        Self {
            chain,
            current: 0,
            failed: HashSet::new(),
            attempts: Vec::new(),
        }
    }

    /// Provider that should handle the next attempt, or `None` once the chain
    /// is exhausted.
    #[must_use]
    pub fn next_provider(&self) -> Option<&str> {
        self.chain.get(self.current).map(String::as_str)
    }

    /// Whether this error is worth trying on the next provider. Auth and
    /// request-shape failures would fail identically everywhere.
    #[must_use]
    pub fn should_fallback(&self, error: &LlmError) -> bool {
        error.failure_kind().is_retriable()
    }

    /// Record a failure for the current provider and advance the cursor.
    /// Returns the next provider's name, or `None` when the chain is
    /// exhausted.
    pub fn mark_failed(&mut self, error: &LlmError) -> Option<&str> {
        if let Some(name) = self.chain.get(self.current) {
            self.failed.insert(name.clone());
            self.attempts.push(FallbackAttempt {
                provider: name.clone(),
                error: error.to_string(),
                kind: error.failure_kind(),
            });
        }
        self.current += 1;
        self.next_provider()
    }

    /// Record that the current provider answered. The cursor rewinds so the
    /// next request starts at the head of the chain again.
    pub fn mark_success(&mut self) {
        self.reset();
    }

    #[must_use]
    pub fn has_failed(&self, provider: &str) -> bool {
        self.failed.contains(provider)
    }

    #[must_use]
    pub fn has_more_providers(&self) -> bool {
        self.current < self.chain.len()
    }

    #[must_use]
    pub fn total_attempts(&self) -> usize {
        self.attempts.len()
    }

    #[must_use]
    pub fn attempts(&self) -> &[FallbackAttempt] {
        &self.attempts
    }

    /// One-line description of every failure so far, for the terminal error.
    #[must_use]
    pub fn attempt_summary(&self) -> String {
        if self.attempts.is_empty() {
            return "no attempts made".into();
        }
        self.attempts
            .iter()
            .map(|a| format!("{} ({}): {}", a.provider, a.kind.as_str(), a.error))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Rewind for a fresh request. Failure history from the previous request
    /// is dropped.
    pub fn reset(&mut self) {
        self.current = 0;
        self.failed.clear();
        self.attempts.clear();
    }
}

use quill_llm::Message;

pub const DEFAULT_CONTEXT_WINDOW: usize = 8192;

/// Known context windows, matched exactly first and then by prefix, so a
/// dated model id like `claude-sonnet-4-20250514` still resolves.
const MODEL_CONTEXT_WINDOWS: &[(&str, usize)] = &[
    ("claude-opus-4", 200_000),
    ("claude-sonnet-4", 200_000),
    ("claude-haiku-4", 200_000),
    ("claude-3-5-sonnet", 200_000),
    ("claude-3-5-haiku", 200_000),
    ("gpt-4o", 128_000),
    ("gpt-4o-mini", 128_000),
    ("gpt-4-turbo", 128_000),
    ("qwen-2.5", 32_768),
    ("llama-3.1", 128_000),
];

/// Cheap token estimate: roughly four characters per token, floor division.
/// Good enough for threshold checks; exact counts come from provider usage.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

#[must_use]
pub fn context_window_for(model: &str) -> usize {
    if let Some((_, window)) = MODEL_CONTEXT_WINDOWS.iter().find(|(m, _)| *m == model) {
        return *window;
    }
    MODEL_CONTEXT_WINDOWS
        .iter()
        .find(|(m, _)| model.starts_with(m))
        .map_or(DEFAULT_CONTEXT_WINDOW, |(_, window)| *window)
}

/// Snapshot of how full the context is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextUsage {
    pub current_tokens: usize,
    pub max_tokens: usize,
    pub compact_threshold: f64,
    pub handoff_threshold: f64,
}

impl ContextUsage {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percent_used(&self) -> f64 {
        if self.max_tokens == 0 {
            return 0.0;
        }
        self.current_tokens as f64 / self.max_tokens as f64
    }

    #[must_use]
    pub fn needs_compaction(&self) -> bool {
        self.percent_used() >= self.compact_threshold
    }

    #[must_use]
    pub fn needs_handoff(&self) -> bool {
        self.percent_used() >= self.handoff_threshold
    }
}

/// Running token estimate for the conversation, used to warn before the
/// window overflows. Counts shrink only when compaction drops turns.
#[derive(Debug, Clone)]
pub struct ContextTracker {
    max_tokens: usize,
    system_tokens: usize,
    history_tokens: usize,
    compact_threshold: f64,
    handoff_threshold: f64,
}

impl ContextTracker {
    #[must_use]
    pub fn new(model: &str) -> Self {
        Self {
            max_tokens: context_window_for(model),
            system_tokens: 0,
            history_tokens: 0,
            compact_threshold: 0.70,
            handoff_threshold: 0.85,
        }
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    #[must_use]
    pub fn with_thresholds(mut self, compact: f64, handoff: f64) -> Self {
        self.compact_threshold = compact;
        self.handoff_threshold = handoff;
        self
    }

    /// Swap the model mid-session. The window changes, the accumulated
    /// counts do not.
    pub fn set_model(&mut self, model: &str) {
        self.max_tokens = context_window_for(model);
    }

    pub fn set_system_prompt(&mut self, prompt: &str) {
        self.system_tokens = estimate_tokens(prompt);
    }

    pub fn add_turn(&mut self, message: &Message) {
        self.history_tokens += message.estimated_chars() / 4;
    }

    pub fn add_tokens(&mut self, tokens: usize) {
        self.history_tokens += tokens;
    }

    /// Undo the accounting for a turn dropped during compaction.
    pub fn remove_turn(&mut self, message: &Message) {
        self.history_tokens = self
            .history_tokens
            .saturating_sub(message.estimated_chars() / 4);
    }

    #[must_use]
    pub fn current_tokens(&self) -> usize {
        self.system_tokens + self.history_tokens
    }

    #[must_use]
    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    #[must_use]
    pub fn usage(&self) -> ContextUsage {
        ContextUsage {
            current_tokens: self.current_tokens(),
            max_tokens: self.max_tokens,
            compact_threshold: self.compact_threshold,
            handoff_threshold: self.handoff_threshold,
        }
    }

    /// Whether adding this text would still keep usage under the handoff
    /// threshold.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn can_fit(&self, text: &str) -> bool {
        let projected = self.current_tokens() + estimate_tokens(text);
        projected < (self.max_tokens as f64 * self.handoff_threshold) as usize
    }

    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn tokens_until_compact(&self) -> usize {
        let limit = (self.max_tokens as f64 * self.compact_threshold) as usize;
        limit.saturating_sub(self.current_tokens())
    }

    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn tokens_until_handoff(&self) -> usize {
        let limit = (self.max_tokens as f64 * self.handoff_threshold) as usize;
        limit.saturating_sub(self.current_tokens())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn estimate_tokens_basic() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("test"), 1);
        assert_eq!(estimate_tokens("Hello world"), 2);
    }

    #[test]
    fn window_exact_then_prefix_then_default() {
        assert_eq!(context_window_for("gpt-4o"), 128_000);
        assert_eq!(context_window_for("claude-sonnet-4-20250514"), 200_000);
        assert_eq!(context_window_for("mystery-model"), 8192);
    }

    #[test]
    fn usage_counts_system_and_history() {
        let mut tracker = ContextTracker::new("test").with_max_tokens(1000);
        tracker.set_system_prompt(&"x".repeat(400)); // 100 tokens
        tracker.add_tokens(50);
        assert_eq!(tracker.current_tokens(), 150);
        assert!((tracker.usage().percent_used() - 0.15).abs() < 1e-9);
    }

    #[test]
    fn system_prompt_replaces_not_accumulates() {
        let mut tracker = ContextTracker::new("test").with_max_tokens(1000);
        tracker.set_system_prompt(&"x".repeat(400));
        tracker.set_system_prompt(&"x".repeat(200));
        assert_eq!(tracker.current_tokens(), 50);
    }

    #[test]
    fn compaction_boundary_is_inclusive() {
        let mut tracker = ContextTracker::new("test").with_max_tokens(1000);
        tracker.add_tokens(750);
        let usage = tracker.usage();
        assert!(usage.needs_compaction());
        assert!(!usage.needs_handoff());
        assert_eq!(tracker.tokens_until_compact(), 0);
        assert_eq!(tracker.tokens_until_handoff(), 100);
    }

    #[test]
    fn handoff_at_85_percent() {
        let mut tracker = ContextTracker::new("test").with_max_tokens(1000);
        tracker.add_tokens(850);
        assert!(tracker.usage().needs_handoff());
        assert_eq!(tracker.tokens_until_handoff(), 0);
    }

    #[test]
    fn can_fit_respects_handoff_threshold() {
        let mut tracker = ContextTracker::new("test").with_max_tokens(1000);
        tracker.add_tokens(800);
        assert!(tracker.can_fit(&"x".repeat(100))); // 825 < 850
        assert!(!tracker.can_fit(&"x".repeat(400))); // 900 >= 850
    }

    #[test]
    fn model_switch_keeps_counts() {
        let mut tracker = ContextTracker::new("gpt-4o");
        tracker.add_tokens(500);
        tracker.set_model("claude-sonnet-4");
        assert_eq!(tracker.current_tokens(), 500);
        assert_eq!(tracker.max_tokens(), 200_000);
    }

    #[test]
    fn turn_accounting_uses_part_sizes() {
        let mut tracker = ContextTracker::new("test").with_max_tokens(1000);
        tracker.add_turn(&Message::user("x".repeat(80)));
        assert_eq!(tracker.current_tokens(), 20);
    }

    #[test]
    fn removing_a_turn_releases_its_tokens() {
        let mut tracker = ContextTracker::new("test").with_max_tokens(1000);
        let turn = Message::user("x".repeat(80));
        tracker.add_turn(&turn);
        tracker.remove_turn(&turn);
        assert_eq!(tracker.current_tokens(), 0);
        // Removing more than was added saturates at zero.
        tracker.remove_turn(&turn);
        assert_eq!(tracker.current_tokens(), 0);
    }

    #[test]
    fn zero_window_never_fits() {
        let tracker = ContextTracker::new("test").with_max_tokens(0);
        assert!(!tracker.can_fit("anything"));
        assert!((tracker.usage().percent_used() - 0.0).abs() < f64::EPSILON);
    }

    proptest! {
        #[test]
        fn remaining_counts_never_underflow(tokens in 0usize..2_000_000) {
            let mut tracker = ContextTracker::new("test").with_max_tokens(10_000);
            tracker.add_tokens(tokens);
            prop_assert!(tracker.tokens_until_compact() <= 7_000);
            prop_assert!(tracker.tokens_until_handoff() <= 8_500);
            if tracker.usage().needs_compaction() {
                prop_assert_eq!(tracker.tokens_until_compact(), 0);
            }
        }
    }
}

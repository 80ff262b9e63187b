use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use quill_llm::TokenUsage;

#[derive(Debug, Error)]
#[error("daily budget exhausted: spent {spent_cents:.2} / {budget_cents:.2} cents")]
pub struct BudgetExhausted {
    pub spent_cents: f64,
    pub budget_cents: f64,
}

#[derive(Debug, Clone)]
pub struct ModelPricing {
    pub prompt_cents_per_1k: f64,
    pub completion_cents_per_1k: f64,
}

struct CostState {
    spent_cents: f64,
    day: u32,
}

/// Tracks API spend per UTC day against a configurable ceiling. Models
/// without a pricing entry (local endpoints) cost nothing.
pub struct CostTracker {
    pricing: HashMap<String, ModelPricing>,
    state: Arc<Mutex<CostState>>,
    max_daily_cents: f64,
    enabled: bool,
}

fn current_day() -> u32 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    // UTC day number (days since epoch)
    u32::try_from(secs / 86_400).unwrap_or(0)
}

fn default_pricing() -> HashMap<String, ModelPricing> {
    let mut m = HashMap::new();
    m.insert(
        "claude-sonnet-4".into(),
        ModelPricing {
            prompt_cents_per_1k: 0.3,
            completion_cents_per_1k: 1.5,
        },
    );
    m.insert(
        "claude-opus-4".into(),
        ModelPricing {
            prompt_cents_per_1k: 1.5,
            completion_cents_per_1k: 7.5,
        },
    );
    m.insert(
        "claude-haiku-4".into(),
        ModelPricing {
            prompt_cents_per_1k: 0.08,
            completion_cents_per_1k: 0.4,
        },
    );
    m.insert(
        "gpt-4o".into(),
        ModelPricing {
            prompt_cents_per_1k: 0.25,
            completion_cents_per_1k: 1.0,
        },
    );
    m
}

impl CostTracker {
    #[must_use]
    pub fn new(enabled: bool, max_daily_cents: f64) -> Self {
        Self {
            pricing: default_pricing(),
            state: Arc::new(Mutex::new(CostState {
                spent_cents: 0.0,
                day: current_day(),
            })),
            max_daily_cents,
            enabled,
        }
    }

    #[must_use]
    pub fn with_pricing(mut self, model: &str, pricing: ModelPricing) -> Self {
        self.pricing.insert(model.to_owned(), pricing);
        self
    }

    pub fn record_usage(&self, model: &str, usage: TokenUsage) {
        if !self.enabled {
            return;
        }
        let pricing = self
            .pricing
            .iter()
            .find(|(m, _)| model == *m || model.starts_with(m.as_str()))
            .map_or(
                ModelPricing {
                    prompt_cents_per_1k: 0.0,
                    completion_cents_per_1k: 0.0,
                },
                |(_, p)| p.clone(),
            );
        #[allow(clippy::cast_precision_loss)]
        let cost = pricing.prompt_cents_per_1k * (usage.input_tokens as f64) / 1000.0
            + pricing.completion_cents_per_1k * (usage.output_tokens as f64) / 1000.0;

        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let today = current_day();
        if state.day != today {
            state.spent_cents = 0.0;
            state.day = today;
        }
        state.spent_cents += cost;
    }

    /// # Errors
    ///
    /// Returns `BudgetExhausted` when daily spend exceeds the configured limit.
    pub fn check_budget(&self) -> Result<(), BudgetExhausted> {
        if !self.enabled {
            return Ok(());
        }
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let today = current_day();
        if state.day != today {
            state.spent_cents = 0.0;
            state.day = today;
        }
        if state.spent_cents >= self.max_daily_cents {
            return Err(BudgetExhausted {
                spent_cents: state.spent_cents,
                budget_cents: self.max_daily_cents,
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn current_spend(&self) -> f64 {
        let state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state.spent_cents
    }
}

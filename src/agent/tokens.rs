//! Token estimation and context budgeting.
//!
//! Uses a simple heuristic: ~4 characters per token. Model context windows are
//! guessed from the model name, which is good enough to decide when history
//! needs compressing.

use tracing::debug;

/// Characters per token estimate.
const CHARS_PER_TOKEN: usize = 4;

/// Smallest prompt budget ever handed out.
pub const MIN_BUDGET: usize = 256;

/// Safety margin used when none (or zero) is configured.
pub const DEFAULT_MARGIN: usize = 100;

/// Estimate token count for a string: `ceil(len / 4)`.
#[inline]
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(CHARS_PER_TOKEN)
}

/// Keep the trailing `max_tokens * 4` bytes of `text`, moved forward to a
/// char boundary.
pub fn tail_within_budget(text: &str, max_tokens: usize) -> &str {
    let max_chars = max_tokens.saturating_mul(CHARS_PER_TOKEN);
    if text.len() <= max_chars {
        return text;
    }

    let mut start = text.len() - max_chars;
    while start < text.len() && !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// Context window size class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextWindow {
    Small,
    Medium,
    Large,
}

impl ContextWindow {
    /// Approximate window in tokens.
    pub fn tokens(self) -> usize {
        match self {
            ContextWindow::Small => 4096,
            ContextWindow::Medium => 8192,
            ContextWindow::Large => 32768,
        }
    }
}

/// Maps model names to context window classes.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry;

impl ModelRegistry {
    pub fn new() -> Self {
        Self
    }

    /// Best-fit window class for a model name. Unknown names are medium.
    pub fn lookup(&self, model: &str) -> ContextWindow {
        let m = model.to_lowercase();
        if m.contains("gemma") || m.contains("llama") {
            ContextWindow::Medium
        } else if m.contains("gpt") || m.contains("claude") {
            ContextWindow::Large
        } else if m.contains("small") {
            ContextWindow::Small
        } else {
            ContextWindow::Medium
        }
    }
}

/// Computes how many prompt tokens remain once the completion and a safety
/// margin are reserved.
#[derive(Debug, Clone)]
pub struct BudgetManager {
    registry: ModelRegistry,
    margin: usize,
}

impl BudgetManager {
    /// A zero margin falls back to [`DEFAULT_MARGIN`].
    pub fn new(margin: usize) -> Self {
        Self::with_registry(ModelRegistry::new(), margin)
    }

    pub fn with_registry(registry: ModelRegistry, margin: usize) -> Self {
        let margin = if margin == 0 { DEFAULT_MARGIN } else { margin };
        Self { registry, margin }
    }

    pub fn margin(&self) -> usize {
        self.margin
    }

    /// Prompt budget for `model`, never below [`MIN_BUDGET`].
    pub fn compute_budget(&self, model: &str, max_completion: usize) -> usize {
        let window = self.registry.lookup(model);
        let budget = window
            .tokens()
            .saturating_sub(max_completion)
            .saturating_sub(self.margin)
            .max(MIN_BUDGET);

        debug!(model, ?window, budget, "computed context budget");
        budget
    }
}

impl Default for BudgetManager {
    fn default() -> Self {
        Self::new(DEFAULT_MARGIN)
    }
}

//! Process-wide cumulative token budget.
//!
//! Every model call charges the counter; once the budget is exceeded the
//! current compile or repair aborts with [`Error::BudgetExhausted`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use crate::error::{Error, Result};

/// Default budget applied until settings override it.
pub const DEFAULT_MAX_TOKEN_BUDGET: u64 = 50_000;

/// Cumulative token counter with a hard ceiling.
#[derive(Debug)]
pub struct TokenBudget {
    max: AtomicU64,
    used: AtomicU64,
}

impl TokenBudget {
    /// Create a budget with the given ceiling.
    pub fn new(max: u64) -> Self {
        Self {
            max: AtomicU64::new(max),
            used: AtomicU64::new(0),
        }
    }

    /// Override the ceiling (called from settings at startup).
    pub fn set_max(&self, max: u64) {
        self.max.store(max, Ordering::Relaxed);
    }

    /// Tokens consumed so far.
    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }

    /// The current ceiling.
    pub fn max(&self) -> u64 {
        self.max.load(Ordering::Relaxed)
    }

    /// Error if the budget is already exhausted. Checked before each call.
    pub fn check(&self) -> Result<()> {
        let used = self.used();
        let max = self.max();
        if used >= max {
            return Err(Error::budget_exhausted(used, max));
        }
        Ok(())
    }

    /// Record tokens consumed by a completed call.
    pub fn charge(&self, tokens: u64) {
        self.used.fetch_add(tokens, Ordering::Relaxed);
    }

    /// Reset the counter (between runs and in tests).
    pub fn reset(&self) {
        self.used.store(0, Ordering::Relaxed);
    }
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TOKEN_BUDGET)
    }
}

static GLOBAL_BUDGET: LazyLock<Arc<TokenBudget>> =
    LazyLock::new(|| Arc::new(TokenBudget::default()));

/// The process-wide budget shared by every agent in production wiring.
pub fn global_budget() -> Arc<TokenBudget> {
    Arc::clone(&GLOBAL_BUDGET)
}

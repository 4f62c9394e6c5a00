//! Budget enforcement.
//!
//! Usage accrues in the state blob as nodes run; the worker checks the
//! totals after every attempt and halts the execution the moment a
//! limit is crossed. Epic limits aggregate the persisted usage of every
//! execution in the epic plus the live usage of the current one.

use conflux_state::TokenUsage;
use conflux_store::BudgetLimits;

/// Check per-execution limits. Returns the halt reason when a limit is
/// exceeded.
#[must_use]
pub fn execution_overrun(limits: &BudgetLimits, usage: &TokenUsage) -> Option<String> {
    if let Some(max) = limits.max_total_tokens {
        if usage.total_tokens > max {
            return Some(format!(
                "budget exceeded: {} tokens used, limit {max}",
                usage.total_tokens
            ));
        }
    }
    if let Some(max) = limits.max_cost_usd {
        if usage.cost_usd > max {
            return Some(format!(
                "budget exceeded: ${:.4} spent, limit ${max:.4}",
                usage.cost_usd
            ));
        }
    }
    if let Some(max) = limits.max_llm_calls {
        if usage.llm_calls > max {
            return Some(format!(
                "budget exceeded: {} model calls, limit {max}",
                usage.llm_calls
            ));
        }
    }
    None
}

/// Check the epic-level cost cap against the aggregated usage.
#[must_use]
pub fn epic_overrun(limits: &BudgetLimits, epic_usage: &TokenUsage) -> Option<String> {
    let max = limits.epic_max_cost_usd?;
    if epic_usage.cost_usd > max {
        return Some(format!(
            "epic budget exceeded: ${:.4} spent across epic, limit ${max:.4}",
            epic_usage.cost_usd
        ));
    }
    None
}

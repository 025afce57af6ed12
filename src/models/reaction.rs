//! Reaction configuration: automated remediation on status transitions.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::event::EventPriority;

/// What a reaction does when it fires.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ReactionAction {
    /// Deliver the configured message to the agent.
    SendToAgent,
    /// Merge the session's pull request.
    AutoMerge,
    /// Notify humans at the configured priority.
    Notify,
}

/// Escalation threshold: an attempt count or a duration string (`30m`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum EscalateAfter {
    /// Escalate once attempts exceed this count.
    Attempts(u32),
    /// Escalate once this much time has passed since the first trigger.
    Duration(String),
}

/// Reaction settings for one reaction key.
///
/// Every field is optional so a project-level entry can override a global
/// entry field by field (see [`ReactionConfig::merged_over`]).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct ReactionConfig {
    /// Gate for automatic execution; defaults to enabled.
    pub auto: Option<bool>,
    /// Action to run.
    pub action: Option<ReactionAction>,
    /// Message delivered by `send-to-agent`.
    pub message: Option<String>,
    /// Attempts allowed before escalating.
    pub retries: Option<u32>,
    /// Additional escalation threshold.
    pub escalate_after: Option<EscalateAfter>,
    /// Priority used by `notify` actions.
    pub priority: Option<EventPriority>,
}

impl ReactionConfig {
    /// Overlay `self` on top of `base`: fields set here win.
    #[must_use]
    pub fn merged_over(&self, base: &Self) -> Self {
        Self {
            auto: self.auto.or(base.auto),
            action: self.action.or(base.action),
            message: self.message.clone().or_else(|| base.message.clone()),
            retries: self.retries.or(base.retries),
            escalate_after: self
                .escalate_after
                .clone()
                .or_else(|| base.escalate_after.clone()),
            priority: self.priority.or(base.priority),
        }
    }

    /// Whether the reaction runs automatically.
    #[must_use]
    pub fn is_auto(&self) -> bool {
        self.auto.unwrap_or(true)
    }
}

#[allow(clippy::expect_used)]
static DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)(s|m|h)$").expect("static duration regex is valid")
});

/// Parse a duration string such as `90s`, `10m`, or `2h`.
///
/// Anything else parses to zero, which disables time-based escalation for
/// the reaction that carries it.
#[must_use]
pub fn parse_duration(raw: &str) -> Duration {
    let Some(caps) = DURATION.captures(raw.trim()) else {
        return Duration::ZERO;
    };
    let Ok(amount) = caps[1].parse::<u64>() else {
        return Duration::ZERO;
    };
    let seconds = match &caps[2] {
        "s" => Some(amount),
        "m" => amount.checked_mul(60),
        "h" => amount.checked_mul(3600),
        _ => None,
    };
    seconds.map_or(Duration::ZERO, Duration::from_secs)
}

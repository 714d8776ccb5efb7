use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a session retries after a transport failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ReconnectStrategy {
    /// Give up on the first failure
    Never,

    /// Constant pause between attempts
    Fixed {
        delay_ms: u64,
        #[serde(default)]
        max_attempts: Option<usize>,
    },

    /// Doubling pause capped at `max_ms`; unlimited when `max_attempts` is `None`
    Exponential {
        base_ms: u64,
        max_ms: u64,
        #[serde(default)]
        max_attempts: Option<usize>,
    },
}

impl Default for ReconnectStrategy {
    fn default() -> Self {
        ReconnectStrategy::Exponential {
            base_ms: 1_000,
            max_ms: 30_000,
            max_attempts: None,
        }
    }
}

impl ReconnectStrategy {
    /// Pause before retry number `attempt` (1-based), or `None` to give up
    pub fn delay_for(&self, attempt: usize) -> Option<Duration> {
        match self {
            ReconnectStrategy::Never => None,
            ReconnectStrategy::Fixed {
                delay_ms,
                max_attempts,
            } => {
                if max_attempts.is_some_and(|max| attempt > max) {
                    return None;
                }
                Some(Duration::from_millis(*delay_ms))
            }
            ReconnectStrategy::Exponential {
                base_ms,
                max_ms,
                max_attempts,
            } => {
                if max_attempts.is_some_and(|max| attempt > max) {
                    return None;
                }
                let exponent = attempt.saturating_sub(1).min(31) as u32;
                let delay = base_ms.saturating_mul(1u64 << exponent).min(*max_ms);
                Some(Duration::from_millis(delay))
            }
        }
    }
}

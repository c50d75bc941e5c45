use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::CoreError;

/// What a non-cascading delete does with the children of the removed node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrphanPolicy {
    /// Refuse the delete with `HasChildren`
    #[default]
    Reject,
    /// Move each child subtree under the removed node's parent
    Reparent,
}

/// Tunables of the hierarchy engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Extra attempts after a commit conflict
    #[serde(default = "default_max_commit_retries")]
    pub max_commit_retries: u32,

    /// Base backoff between attempts, multiplied by the attempt number
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Non-cascading delete behaviour
    #[serde(default)]
    pub orphan_policy: OrphanPolicy,

    /// Reject children that rank above their parent
    #[serde(default)]
    pub enforce_type_order: bool,

    /// Rewrite customization strings that name copied ids during duplication
    #[serde(default)]
    pub remap_customization_refs: bool,

    /// Capacity of the hierarchy event channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_max_commit_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    10
}

fn default_event_capacity() -> usize {
    256
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_commit_retries: default_max_commit_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            orphan_policy: OrphanPolicy::default(),
            enforce_type_order: false,
            remap_customization_refs: false,
            event_capacity: default_event_capacity(),
        }
    }
}

impl CoreConfig {
    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.event_capacity == 0 {
            return Err(CoreError::ConfigurationError(
                "event_capacity must be at least 1".to_string(),
            ));
        }
        if self.max_commit_retries > 100 {
            return Err(CoreError::ConfigurationError(format!(
                "max_commit_retries {} is unreasonably high",
                self.max_commit_retries
            )));
        }
        Ok(())
    }

    /// Sleep before attempt number `attempt` (1-based retry count)
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(attempt as u64))
    }
}

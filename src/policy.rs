//! Per-group policy, read at the moment of each decision so administrator
//! changes take effect without restart.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Automatic closure of idle conversations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoClosePolicy {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Close tickets idle for at least this many hours.
    #[serde(default = "default_inactive_hours")]
    pub inactive_hours: i64,
}

impl AutoClosePolicy {
    pub fn inactivity_threshold(&self) -> chrono::Duration {
        chrono::Duration::hours(self.inactive_hours)
    }
}

impl Default for AutoClosePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            inactive_hours: 72,
        }
    }
}

/// Policy attached to one managed group, consumed read-only by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPolicy {
    /// Role whose members may act on tickets. The core does not enforce
    /// platform authorization; the rendering layer consumes this.
    #[serde(default)]
    pub staff_role_id: Option<String>,
    /// Open-ticket cap per requester.
    #[serde(default = "default_max_open_tickets")]
    pub max_open_tickets: usize,
    /// Require an interactive confirmation before a manual close commits.
    #[serde(default = "default_true")]
    pub close_confirmation: bool,
    #[serde(default)]
    pub auto_close: AutoClosePolicy,
}

impl Default for GroupPolicy {
    fn default() -> Self {
        Self {
            staff_role_id: None,
            max_open_tickets: 3,
            close_confirmation: true,
            auto_close: AutoClosePolicy::default(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_inactive_hours() -> i64 {
    72
}
fn default_max_open_tickets() -> usize {
    3
}

/// Single configuration-access seam for every component. Implementations must
/// answer with current settings on every call; the core never caches a policy
/// beyond one operation.
#[async_trait]
pub trait PolicyProvider: Send + Sync {
    async fn policy(&self, group_id: &str) -> GroupPolicy;
}

/// In-memory provider with per-group overrides and an explicit fallback
/// default. Suitable for embedding and for tests; a deployment backed by a
/// config store implements [`PolicyProvider`] directly.
#[derive(Debug, Default)]
pub struct StaticPolicies {
    fallback: GroupPolicy,
    overrides: RwLock<HashMap<String, GroupPolicy>>,
}

impl StaticPolicies {
    pub fn new(fallback: GroupPolicy) -> Self {
        Self {
            fallback,
            overrides: RwLock::new(HashMap::new()),
        }
    }

    /// Set or replace the policy for one group. Takes effect on the next
    /// decision that reads it.
    pub fn set(&self, group_id: impl Into<String>, policy: GroupPolicy) {
        self.overrides.write().insert(group_id.into(), policy);
    }
}

#[async_trait]
impl PolicyProvider for StaticPolicies {
    async fn policy(&self, group_id: &str) -> GroupPolicy {
        self.overrides
            .read()
            .get(group_id)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use reposync_config::{Features, Permission};

/// Quota metadata the forge attaches to every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub remaining: u64,
    /// Epoch seconds at which the quota window resets.
    pub reset: u64,
}

/// Consumer of quota updates, implemented by the rate limiter.
pub trait QuotaObserver: Send + Sync {
    fn observe(&self, quota: Quota);
}

/// A repository as observed on the forge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub id: Option<u64>,
    pub owner: String,
    pub name: String,
    pub full_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub features: Features,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Observed protection settings for one branch pattern.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchProtection {
    pub pattern: String,
    #[serde(default)]
    pub required_status_checks: Vec<String>,
    #[serde(default)]
    pub require_up_to_date: bool,
    #[serde(default)]
    pub required_reviews: u32,
    #[serde(default)]
    pub dismiss_stale_reviews: bool,
    #[serde(default)]
    pub require_code_owner_review: bool,
    #[serde(default)]
    pub restrict_pushes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedCollaborator {
    pub username: String,
    pub permission: Permission,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedTeam {
    pub team_slug: String,
    pub permission: Permission,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedWebhook {
    pub id: u64,
    pub url: String,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub active: bool,
}

/// Map an API role string (case-insensitive) to a permission level.
/// Unknown roles degrade to read.
pub fn permission_from_role(role: &str) -> Permission {
    role.parse().unwrap_or(Permission::Read)
}

/// The role string the API expects for a permission level.
pub fn role_for_permission(permission: Permission) -> &'static str {
    match permission {
        Permission::Read => "pull",
        Permission::Write => "push",
        Permission::Admin => "admin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_fold_to_permissions() {
        assert_eq!(permission_from_role("PULL"), Permission::Read);
        assert_eq!(permission_from_role("triage"), Permission::Read);
        assert_eq!(permission_from_role("push"), Permission::Write);
        assert_eq!(permission_from_role("Maintain"), Permission::Write);
        assert_eq!(permission_from_role("admin"), Permission::Admin);
        assert_eq!(permission_from_role("weird"), Permission::Read);
    }

    #[test]
    fn permission_round_trips_to_role() {
        assert_eq!(role_for_permission(Permission::Read), "pull");
        assert_eq!(role_for_permission(Permission::Write), "push");
        assert_eq!(role_for_permission(Permission::Admin), "admin");
    }
}

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// Access level granted to a collaborator or team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
    Admin,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Permission::Read => write!(f, "read"),
            Permission::Write => write!(f, "write"),
            Permission::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for Permission {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "read" | "pull" | "triage" => Ok(Permission::Read),
            "write" | "push" | "maintain" => Ok(Permission::Write),
            "admin" => Ok(Permission::Admin),
            other => Err(format!("unknown permission: {other} (use read, write, or admin)")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Features {
    #[serde(default)]
    pub issues: bool,
    #[serde(default)]
    pub wiki: bool,
    #[serde(default)]
    pub projects: bool,
    #[serde(default)]
    pub discussions: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchProtectionRule {
    /// Branch name or glob this rule protects.
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
pub struct Collaborator {
    pub username: String,
    pub permission: Permission,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamAccess {
    #[serde(rename = "team")]
    pub team_slug: String,
    pub permission: Permission,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Webhook {
    /// Delivery URL; the natural key used for diffing.
    pub url: String,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub secret: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// Desired state of one repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub features: Features,
    #[serde(default)]
    pub branch_protection: Vec<BranchProtectionRule>,
    #[serde(default)]
    pub collaborators: Vec<Collaborator>,
    #[serde(default)]
    pub teams: Vec<TeamAccess>,
    #[serde(default)]
    pub webhooks: Vec<Webhook>,
}

/// Organization-wide defaults applied to every repository before planning.
///
/// Every field is optional; `private` must distinguish "unset" from "set to
/// false", hence `Option<bool>`. Collections count as provided iff non-empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryDefaults {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub private: Option<bool>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub features: Features,
    #[serde(default)]
    pub branch_protection: Vec<BranchProtectionRule>,
    #[serde(default)]
    pub collaborators: Vec<Collaborator>,
    #[serde(default)]
    pub teams: Vec<TeamAccess>,
    #[serde(default)]
    pub webhooks: Vec<Webhook>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiRepositoryConfig {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub defaults: Option<RepositoryDefaults>,
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
}

impl From<RepositoryConfig> for MultiRepositoryConfig {
    fn from(repo: RepositoryConfig) -> Self {
        Self {
            version: None,
            defaults: None,
            repositories: vec![repo],
        }
    }
}

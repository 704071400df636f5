use serde::Serialize;

use reposync_config::{BranchProtectionRule, Collaborator, RepositoryConfig, TeamAccess, Webhook};

/// One mutation against the forge.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Change<T> {
    Create { after: T },
    Update { before: T, after: T },
    Delete { before: T },
}

impl<T> Change<T> {
    pub fn verb(&self) -> &'static str {
        match self {
            Change::Create { .. } => "create",
            Change::Update { .. } => "update",
            Change::Delete { .. } => "delete",
        }
    }

    /// The desired value, for creates and updates.
    pub fn after(&self) -> Option<&T> {
        match self {
            Change::Create { after } | Change::Update { after, .. } => Some(after),
            Change::Delete { .. } => None,
        }
    }

    /// The observed value, for updates and deletes.
    pub fn before(&self) -> Option<&T> {
        match self {
            Change::Update { before, .. } | Change::Delete { before } => Some(before),
            Change::Create { .. } => None,
        }
    }
}

/// A webhook change with the server-assigned id carried through for
/// updates and deletes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookChange {
    pub id: Option<u64>,
    #[serde(flatten)]
    pub change: Change<Webhook>,
}

/// The ordered change set for one repository. Application order is:
/// repository change first, then branch rules, collaborators, teams,
/// webhooks; within each group upserts precede deletes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationPlan {
    pub owner: String,
    pub repo: String,
    pub repository: Option<Change<RepositoryConfig>>,
    pub branch_rules: Vec<Change<BranchProtectionRule>>,
    pub collaborators: Vec<Change<Collaborator>>,
    pub teams: Vec<Change<TeamAccess>>,
    pub webhooks: Vec<WebhookChange>,
}

impl ReconciliationPlan {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            repository: None,
            branch_rules: Vec::new(),
            collaborators: Vec::new(),
            teams: Vec::new(),
            webhooks: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.repository.is_none()
            && self.branch_rules.is_empty()
            && self.collaborators.is_empty()
            && self.teams.is_empty()
            && self.webhooks.is_empty()
    }

    pub fn change_count(&self) -> usize {
        usize::from(self.repository.is_some())
            + self.branch_rules.len()
            + self.collaborators.len()
            + self.teams.len()
            + self.webhooks.len()
    }
}

pub mod github;
pub mod types;

mod error;

pub use error::{ErrorKind, SyncError};
pub use github::GithubClient;
pub use types::*;

use async_trait::async_trait;

use reposync_config::{BranchProtectionRule, Permission, RepositoryConfig, Webhook};

/// The engine's only boundary to the remote forge. Every operation fails
/// with a classified [`SyncError`]; absence is the `NotFound` kind.
#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn get_repository(&self, owner: &str, name: &str) -> Result<Repository, SyncError>;
    async fn create_repository(
        &self,
        owner: &str,
        config: &RepositoryConfig,
    ) -> Result<Repository, SyncError>;
    async fn update_repository(
        &self,
        owner: &str,
        name: &str,
        config: &RepositoryConfig,
    ) -> Result<(), SyncError>;

    async fn get_branch_protection(
        &self,
        owner: &str,
        name: &str,
        pattern: &str,
    ) -> Result<BranchProtection, SyncError>;
    async fn create_branch_protection(
        &self,
        owner: &str,
        name: &str,
        rule: &BranchProtectionRule,
    ) -> Result<(), SyncError>;
    async fn update_branch_protection(
        &self,
        owner: &str,
        name: &str,
        rule: &BranchProtectionRule,
    ) -> Result<(), SyncError>;
    async fn delete_branch_protection(
        &self,
        owner: &str,
        name: &str,
        pattern: &str,
    ) -> Result<(), SyncError>;

    async fn list_collaborators(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<Vec<ObservedCollaborator>, SyncError>;
    /// Upsert: adding an existing collaborator updates their permission.
    async fn add_collaborator(
        &self,
        owner: &str,
        name: &str,
        username: &str,
        permission: Permission,
    ) -> Result<(), SyncError>;
    async fn remove_collaborator(
        &self,
        owner: &str,
        name: &str,
        username: &str,
    ) -> Result<(), SyncError>;

    async fn list_team_access(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<Vec<ObservedTeam>, SyncError>;
    async fn add_team_access(
        &self,
        owner: &str,
        name: &str,
        team_slug: &str,
        permission: Permission,
    ) -> Result<(), SyncError>;
    /// Upsert alias for [`ApiClient::add_team_access`]; callers must not rely
    /// on any distinction.
    async fn update_team_access(
        &self,
        owner: &str,
        name: &str,
        team_slug: &str,
        permission: Permission,
    ) -> Result<(), SyncError> {
        self.add_team_access(owner, name, team_slug, permission).await
    }
    async fn remove_team_access(
        &self,
        owner: &str,
        name: &str,
        team_slug: &str,
    ) -> Result<(), SyncError>;

    async fn list_webhooks(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<Vec<ObservedWebhook>, SyncError>;
    async fn create_webhook(
        &self,
        owner: &str,
        name: &str,
        hook: &Webhook,
    ) -> Result<ObservedWebhook, SyncError>;
    async fn update_webhook(
        &self,
        owner: &str,
        name: &str,
        id: u64,
        hook: &Webhook,
    ) -> Result<(), SyncError>;
    async fn delete_webhook(&self, owner: &str, name: &str, id: u64) -> Result<(), SyncError>;
}

use std::sync::Arc;

use reposync_client::{ApiClient, ErrorKind, SyncError};

use crate::plan::{Change, ReconciliationPlan, WebhookChange};

/// Executes a [`ReconciliationPlan`] in order. The repository change runs
/// first and is fatal on failure; child changes continue past individual
/// failures and are reported together.
pub struct Applier {
    client: Arc<dyn ApiClient>,
}

/// The child operations that failed while the rest of the plan proceeded.
#[derive(Debug)]
pub struct ChildFailures {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, SyncError)>,
}

impl std::fmt::Display for ChildFailures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed",
            self.succeeded.len(),
            self.failed.len()
        )?;
        for (label, err) in &self.failed {
            write!(f, "\n  {label}: {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ChildFailures {}

impl Applier {
    pub fn new(client: Arc<dyn ApiClient>) -> Self {
        Self { client }
    }

    pub async fn apply(&self, plan: &ReconciliationPlan) -> Result<(), SyncError> {
        let owner = plan.owner.as_str();
        let repo = plan.repo.as_str();

        // Root change first; without the repository the children are
        // meaningless, so any failure here aborts the whole plan.
        if let Some(change) = &plan.repository {
            match change {
                Change::Create { after } => {
                    self.client.create_repository(owner, after).await?;
                }
                Change::Update { after, .. } => {
                    self.client.update_repository(owner, repo, after).await?;
                }
                Change::Delete { .. } => {}
            }
        }

        let mut succeeded: Vec<String> = Vec::new();
        let mut failed: Vec<(String, SyncError)> = Vec::new();
        let mut record = |label: String, result: Result<(), SyncError>| match result {
            Ok(()) => succeeded.push(label),
            Err(err) => {
                tracing::warn!(repo, %label, kind = %err.kind(), "child operation failed");
                failed.push((label, err));
            }
        };

        for change in &plan.branch_rules {
            let pattern = match change {
                Change::Create { after } | Change::Update { after, .. } => &after.pattern,
                Change::Delete { before } => &before.pattern,
            };
            let label = format!("branch protection for {pattern}");
            let result = match change {
                Change::Create { after } => {
                    self.client.create_branch_protection(owner, repo, after).await
                }
                Change::Update { after, .. } => {
                    self.client.update_branch_protection(owner, repo, after).await
                }
                Change::Delete { before } => {
                    self.client
                        .delete_branch_protection(owner, repo, &before.pattern)
                        .await
                }
            };
            record(label, result);
        }

        for change in &plan.collaborators {
            let username = match change {
                Change::Create { after } | Change::Update { after, .. } => &after.username,
                Change::Delete { before } => &before.username,
            };
            let label = format!("collaborator {username}");
            let result = match change {
                // The forge's add is an upsert; updates go through it too.
                Change::Create { after } | Change::Update { after, .. } => {
                    self.client
                        .add_collaborator(owner, repo, &after.username, after.permission)
                        .await
                }
                Change::Delete { before } => {
                    self.client
                        .remove_collaborator(owner, repo, &before.username)
                        .await
                }
            };
            record(label, result);
        }

        for change in &plan.teams {
            let slug = match change {
                Change::Create { after } | Change::Update { after, .. } => &after.team_slug,
                Change::Delete { before } => &before.team_slug,
            };
            let label = format!("team {slug}");
            let result = match change {
                Change::Create { after } => {
                    self.client
                        .add_team_access(owner, repo, &after.team_slug, after.permission)
                        .await
                }
                Change::Update { after, .. } => {
                    self.client
                        .update_team_access(owner, repo, &after.team_slug, after.permission)
                        .await
                }
                Change::Delete { before } => {
                    self.client
                        .remove_team_access(owner, repo, &before.team_slug)
                        .await
                }
            };
            record(label, result);
        }

        for WebhookChange { id, change } in &plan.webhooks {
            let url = match change {
                Change::Create { after } | Change::Update { after, .. } => &after.url,
                Change::Delete { before } => &before.url,
            };
            let label = format!("webhook {url}");
            let result = self.apply_webhook(owner, repo, *id, change).await;
            record(label, result);
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(partial_failure(succeeded, failed))
        }
    }

    async fn apply_webhook(
        &self,
        owner: &str,
        repo: &str,
        id: Option<u64>,
        change: &Change<reposync_config::Webhook>,
    ) -> Result<(), SyncError> {
        match change {
            Change::Create { after } => {
                self.client.create_webhook(owner, repo, after).await.map(drop)
            }
            Change::Update { after, .. } => match id {
                Some(id) => self.client.update_webhook(owner, repo, id, after).await,
                None => Err(SyncError::new(
                    ErrorKind::Unknown,
                    format!("webhook update for {} is missing the server id", after.url),
                )),
            },
            Change::Delete { before } => match id {
                Some(id) => self.client.delete_webhook(owner, repo, id).await,
                None => Err(SyncError::new(
                    ErrorKind::Unknown,
                    format!("webhook delete for {} is missing the server id", before.url),
                )),
            },
        }
    }
}

fn partial_failure(succeeded: Vec<String>, failed: Vec<(String, SyncError)>) -> SyncError {
    let total = succeeded.len() + failed.len();
    let labels: Vec<&str> = failed.iter().map(|(label, _)| label.as_str()).collect();
    SyncError::new(
        ErrorKind::PartialFailure,
        format!(
            "{} of {total} child operations failed: {}",
            failed.len(),
            labels.join(", ")
        ),
    )
    .with_source(ChildFailures { succeeded, failed })
}

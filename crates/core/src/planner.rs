use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use reposync_client::{ApiClient, BranchProtection, ErrorKind, Repository, SyncError};
use reposync_config::{
    BranchProtectionRule, Collaborator, RepositoryConfig, TeamAccess, Webhook,
};

use crate::plan::{Change, ReconciliationPlan, WebhookChange};

/// Diffs desired configuration against observed forge state and produces an
/// ordered [`ReconciliationPlan`].
pub struct Planner {
    client: Arc<dyn ApiClient>,
    owner: String,
}

impl Planner {
    pub fn new(client: Arc<dyn ApiClient>, owner: impl Into<String>) -> Self {
        Self {
            client,
            owner: owner.into(),
        }
    }

    pub async fn plan(&self, desired: &RepositoryConfig) -> Result<ReconciliationPlan, SyncError> {
        let mut plan = ReconciliationPlan::new(&self.owner, &desired.name);

        let observed = match self.client.get_repository(&self.owner, &desired.name).await {
            Ok(repo) => repo,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                // Nothing exists yet: create the repository and every child.
                self.plan_from_scratch(&mut plan, desired);
                return Ok(plan);
            }
            Err(err) => return Err(err),
        };

        if root_differs(&observed, desired) {
            plan.repository = Some(Change::Update {
                before: observed_as_config(&observed),
                after: desired.clone(),
            });
        }

        self.plan_branch_rules(&mut plan, desired).await?;
        self.plan_collaborators(&mut plan, desired).await?;
        self.plan_teams(&mut plan, desired).await?;
        self.plan_webhooks(&mut plan, desired).await?;

        tracing::debug!(repo = %desired.name, changes = plan.change_count(), "planned repository");
        Ok(plan)
    }

    fn plan_from_scratch(&self, plan: &mut ReconciliationPlan, desired: &RepositoryConfig) {
        plan.repository = Some(Change::Create {
            after: desired.clone(),
        });
        for rule in &desired.branch_protection {
            plan.branch_rules.push(Change::Create { after: rule.clone() });
        }
        for collab in &desired.collaborators {
            plan.collaborators.push(Change::Create {
                after: collab.clone(),
            });
        }
        for team in &desired.teams {
            plan.teams.push(Change::Create { after: team.clone() });
        }
        for hook in &desired.webhooks {
            plan.webhooks.push(WebhookChange {
                id: None,
                change: Change::Create { after: hook.clone() },
            });
        }
    }

    async fn plan_branch_rules(
        &self,
        plan: &mut ReconciliationPlan,
        desired: &RepositoryConfig,
    ) -> Result<(), SyncError> {
        for rule in &desired.branch_protection {
            match self
                .client
                .get_branch_protection(&self.owner, &desired.name, &rule.pattern)
                .await
            {
                Ok(observed) => {
                    if rule_differs(&observed, rule) {
                        plan.branch_rules.push(Change::Update {
                            before: protection_as_rule(observed),
                            after: rule.clone(),
                        });
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    plan.branch_rules.push(Change::Create { after: rule.clone() });
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    async fn plan_collaborators(
        &self,
        plan: &mut ReconciliationPlan,
        desired: &RepositoryConfig,
    ) -> Result<(), SyncError> {
        let observed = self
            .client
            .list_collaborators(&self.owner, &desired.name)
            .await?;
        let by_name: BTreeMap<&str, _> = observed
            .iter()
            .map(|c| (c.username.as_str(), c.permission))
            .collect();
        let wanted: BTreeSet<&str> = desired
            .collaborators
            .iter()
            .map(|c| c.username.as_str())
            .collect();

        for collab in &desired.collaborators {
            match by_name.get(collab.username.as_str()) {
                None => plan.collaborators.push(Change::Create {
                    after: collab.clone(),
                }),
                Some(&permission) if permission != collab.permission => {
                    plan.collaborators.push(Change::Update {
                        before: Collaborator {
                            username: collab.username.clone(),
                            permission,
                        },
                        after: collab.clone(),
                    });
                }
                Some(_) => {}
            }
        }
        for observed in &observed {
            if !wanted.contains(observed.username.as_str()) {
                plan.collaborators.push(Change::Delete {
                    before: Collaborator {
                        username: observed.username.clone(),
                        permission: observed.permission,
                    },
                });
            }
        }
        Ok(())
    }

    async fn plan_teams(
        &self,
        plan: &mut ReconciliationPlan,
        desired: &RepositoryConfig,
    ) -> Result<(), SyncError> {
        let observed = self
            .client
            .list_team_access(&self.owner, &desired.name)
            .await?;
        let by_slug: BTreeMap<&str, _> = observed
            .iter()
            .map(|t| (t.team_slug.as_str(), t.permission))
            .collect();
        let wanted: BTreeSet<&str> = desired.teams.iter().map(|t| t.team_slug.as_str()).collect();

        for team in &desired.teams {
            match by_slug.get(team.team_slug.as_str()) {
                None => plan.teams.push(Change::Create { after: team.clone() }),
                Some(&permission) if permission != team.permission => {
                    plan.teams.push(Change::Update {
                        before: TeamAccess {
                            team_slug: team.team_slug.clone(),
                            permission,
                        },
                        after: team.clone(),
                    });
                }
                Some(_) => {}
            }
        }
        for observed in &observed {
            if !wanted.contains(observed.team_slug.as_str()) {
                plan.teams.push(Change::Delete {
                    before: TeamAccess {
                        team_slug: observed.team_slug.clone(),
                        permission: observed.permission,
                    },
                });
            }
        }
        Ok(())
    }

    async fn plan_webhooks(
        &self,
        plan: &mut ReconciliationPlan,
        desired: &RepositoryConfig,
    ) -> Result<(), SyncError> {
        let observed = self.client.list_webhooks(&self.owner, &desired.name).await?;
        let by_url: BTreeMap<&str, _> = observed.iter().map(|h| (h.url.as_str(), h)).collect();
        let wanted: BTreeSet<&str> = desired.webhooks.iter().map(|h| h.url.as_str()).collect();

        for hook in &desired.webhooks {
            match by_url.get(hook.url.as_str()) {
                None => plan.webhooks.push(WebhookChange {
                    id: None,
                    change: Change::Create { after: hook.clone() },
                }),
                Some(existing) if webhook_differs(existing, hook) => {
                    plan.webhooks.push(WebhookChange {
                        id: Some(existing.id),
                        change: Change::Update {
                            before: Webhook {
                                url: existing.url.clone(),
                                events: existing.events.clone(),
                                secret: existing.secret.clone(),
                                active: existing.active,
                            },
                            after: hook.clone(),
                        },
                    });
                }
                Some(_) => {}
            }
        }
        for existing in &observed {
            if !wanted.contains(existing.url.as_str()) {
                plan.webhooks.push(WebhookChange {
                    id: Some(existing.id),
                    change: Change::Delete {
                        before: Webhook {
                            url: existing.url.clone(),
                            events: existing.events.clone(),
                            secret: existing.secret.clone(),
                            active: existing.active,
                        },
                    },
                });
            }
        }
        Ok(())
    }
}

fn same_set(a: &[String], b: &[String]) -> bool {
    let a: BTreeSet<&str> = a.iter().map(String::as_str).collect();
    let b: BTreeSet<&str> = b.iter().map(String::as_str).collect();
    a == b
}

fn root_differs(observed: &Repository, desired: &RepositoryConfig) -> bool {
    observed.description != desired.description
        || observed.private != desired.private
        || observed.features != desired.features
        || !same_set(&observed.topics, &desired.topics)
}

/// Root-level view of an observed repository in config shape, for plan
/// rendering; child collections are not carried.
fn observed_as_config(observed: &Repository) -> RepositoryConfig {
    RepositoryConfig {
        name: observed.name.clone(),
        description: observed.description.clone(),
        private: observed.private,
        topics: observed.topics.clone(),
        features: observed.features,
        ..Default::default()
    }
}

fn protection_as_rule(observed: BranchProtection) -> BranchProtectionRule {
    BranchProtectionRule {
        pattern: observed.pattern,
        required_status_checks: observed.required_status_checks,
        require_up_to_date: observed.require_up_to_date,
        required_reviews: observed.required_reviews,
        dismiss_stale_reviews: observed.dismiss_stale_reviews,
        require_code_owner_review: observed.require_code_owner_review,
        restrict_pushes: observed.restrict_pushes,
    }
}

fn rule_differs(observed: &BranchProtection, desired: &BranchProtectionRule) -> bool {
    observed.pattern != desired.pattern
        || observed.require_up_to_date != desired.require_up_to_date
        || observed.required_reviews != desired.required_reviews
        || observed.dismiss_stale_reviews != desired.dismiss_stale_reviews
        || observed.require_code_owner_review != desired.require_code_owner_review
        || !same_set(&observed.required_status_checks, &desired.required_status_checks)
        || !same_set(&observed.restrict_pushes, &desired.restrict_pushes)
}

fn webhook_differs(observed: &reposync_client::ObservedWebhook, desired: &Webhook) -> bool {
    observed.url != desired.url
        || observed.active != desired.active
        || !same_set(&observed.events, &desired.events)
        // A blank desired secret means "don't manage the secret".
        || (!desired.secret.is_empty() && observed.secret != desired.secret)
}

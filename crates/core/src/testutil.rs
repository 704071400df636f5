//! In-memory [`ApiClient`] used across the engine's tests: stateful enough
//! that applying a plan changes what the next plan observes, with call
//! recording and per-operation failure injection.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use reposync_client::{
    ApiClient, BranchProtection, ErrorKind, ObservedCollaborator, ObservedTeam, ObservedWebhook,
    Repository, SyncError,
};
use reposync_config::{BranchProtectionRule, Permission, RepositoryConfig, Webhook};

#[derive(Default)]
struct MockState {
    repos: BTreeMap<String, Repository>,
    protections: BTreeMap<(String, String), BranchProtection>,
    collaborators: BTreeMap<String, Vec<ObservedCollaborator>>,
    teams: BTreeMap<String, Vec<ObservedTeam>>,
    webhooks: BTreeMap<String, Vec<ObservedWebhook>>,
    next_hook_id: u64,
}

pub struct MockClient {
    state: Mutex<MockState>,
    failures: Mutex<HashMap<String, ErrorKind>>,
    calls: Mutex<Vec<String>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_hook_id: 1,
                ..Default::default()
            }),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Make the keyed operation fail with the given kind.
    /// Keys look like `"create_repository:web"` or
    /// `"create_branch_protection:web:main"`.
    pub fn fail_with(&self, key: &str, kind: ErrorKind) {
        self.failures.lock().unwrap().insert(key.to_string(), kind);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Seed observed state from a desired config, children included, as if
    /// it had been fully reconciled already.
    pub fn seed_repository(&self, owner: &str, config: &RepositoryConfig) {
        let mut state = self.state.lock().unwrap();
        state.repos.insert(
            config.name.clone(),
            Repository {
                id: Some(1),
                owner: owner.to_string(),
                name: config.name.clone(),
                full_name: format!("{owner}/{}", config.name),
                description: config.description.clone(),
                private: config.private,
                topics: config.topics.clone(),
                features: config.features,
                created_at: None,
                updated_at: None,
            },
        );
        for rule in &config.branch_protection {
            state.protections.insert(
                (config.name.clone(), rule.pattern.clone()),
                rule_as_protection(rule),
            );
        }
        state.collaborators.insert(
            config.name.clone(),
            config
                .collaborators
                .iter()
                .map(|c| ObservedCollaborator {
                    username: c.username.clone(),
                    permission: c.permission,
                })
                .collect(),
        );
        state.teams.insert(
            config.name.clone(),
            config
                .teams
                .iter()
                .map(|t| ObservedTeam {
                    team_slug: t.team_slug.clone(),
                    permission: t.permission,
                })
                .collect(),
        );
        let hooks = config
            .webhooks
            .iter()
            .map(|h| {
                let id = state.next_hook_id;
                state.next_hook_id += 1;
                ObservedWebhook {
                    id,
                    url: h.url.clone(),
                    events: h.events.clone(),
                    secret: h.secret.clone(),
                    active: h.active,
                }
            })
            .collect();
        state.webhooks.insert(config.name.clone(), hooks);
    }

    fn check(&self, key: String) -> Result<(), SyncError> {
        self.calls.lock().unwrap().push(key.clone());
        if let Some(&kind) = self.failures.lock().unwrap().get(&key) {
            return Err(SyncError::new(kind, format!("injected failure for {key}")));
        }
        Ok(())
    }
}

fn rule_as_protection(rule: &BranchProtectionRule) -> BranchProtection {
    BranchProtection {
        pattern: rule.pattern.clone(),
        required_status_checks: rule.required_status_checks.clone(),
        require_up_to_date: rule.require_up_to_date,
        required_reviews: rule.required_reviews,
        dismiss_stale_reviews: rule.dismiss_stale_reviews,
        require_code_owner_review: rule.require_code_owner_review,
        restrict_pushes: rule.restrict_pushes.clone(),
    }
}

fn not_found(what: &str) -> SyncError {
    SyncError::new(ErrorKind::NotFound, format!("{what} not found"))
}

#[async_trait]
impl ApiClient for MockClient {
    async fn get_repository(&self, owner: &str, name: &str) -> Result<Repository, SyncError> {
        self.check(format!("get_repository:{name}"))?;
        let state = self.state.lock().unwrap();
        state
            .repos
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(&format!("{owner}/{name}")))
    }

    async fn create_repository(
        &self,
        owner: &str,
        config: &RepositoryConfig,
    ) -> Result<Repository, SyncError> {
        self.check(format!("create_repository:{}", config.name))?;
        let repo = Repository {
            id: Some(1),
            owner: owner.to_string(),
            name: config.name.clone(),
            full_name: format!("{owner}/{}", config.name),
            description: config.description.clone(),
            private: config.private,
            topics: config.topics.clone(),
            features: config.features,
            created_at: None,
            updated_at: None,
        };
        self.state
            .lock()
            .unwrap()
            .repos
            .insert(config.name.clone(), repo.clone());
        Ok(repo)
    }

    async fn update_repository(
        &self,
        owner: &str,
        name: &str,
        config: &RepositoryConfig,
    ) -> Result<(), SyncError> {
        self.check(format!("update_repository:{name}"))?;
        let mut state = self.state.lock().unwrap();
        let repo = state
            .repos
            .get_mut(name)
            .ok_or_else(|| not_found(&format!("{owner}/{name}")))?;
        repo.description = config.description.clone();
        repo.private = config.private;
        repo.topics = config.topics.clone();
        repo.features = config.features;
        Ok(())
    }

    async fn get_branch_protection(
        &self,
        _owner: &str,
        name: &str,
        pattern: &str,
    ) -> Result<BranchProtection, SyncError> {
        self.check(format!("get_branch_protection:{name}:{pattern}"))?;
        let state = self.state.lock().unwrap();
        state
            .protections
            .get(&(name.to_string(), pattern.to_string()))
            .cloned()
            .ok_or_else(|| not_found(&format!("protection for {pattern}")))
    }

    async fn create_branch_protection(
        &self,
        _owner: &str,
        name: &str,
        rule: &BranchProtectionRule,
    ) -> Result<(), SyncError> {
        self.check(format!("create_branch_protection:{name}:{}", rule.pattern))?;
        self.state
            .lock()
            .unwrap()
            .protections
            .insert((name.to_string(), rule.pattern.clone()), rule_as_protection(rule));
        Ok(())
    }

    async fn update_branch_protection(
        &self,
        _owner: &str,
        name: &str,
        rule: &BranchProtectionRule,
    ) -> Result<(), SyncError> {
        self.check(format!("update_branch_protection:{name}:{}", rule.pattern))?;
        self.state
            .lock()
            .unwrap()
            .protections
            .insert((name.to_string(), rule.pattern.clone()), rule_as_protection(rule));
        Ok(())
    }

    async fn delete_branch_protection(
        &self,
        _owner: &str,
        name: &str,
        pattern: &str,
    ) -> Result<(), SyncError> {
        self.check(format!("delete_branch_protection:{name}:{pattern}"))?;
        self.state
            .lock()
            .unwrap()
            .protections
            .remove(&(name.to_string(), pattern.to_string()));
        Ok(())
    }

    async fn list_collaborators(
        &self,
        _owner: &str,
        name: &str,
    ) -> Result<Vec<ObservedCollaborator>, SyncError> {
        self.check(format!("list_collaborators:{name}"))?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .collaborators
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_collaborator(
        &self,
        _owner: &str,
        name: &str,
        username: &str,
        permission: Permission,
    ) -> Result<(), SyncError> {
        self.check(format!("add_collaborator:{name}:{username}"))?;
        let mut state = self.state.lock().unwrap();
        let list = state.collaborators.entry(name.to_string()).or_default();
        match list.iter_mut().find(|c| c.username == username) {
            Some(existing) => existing.permission = permission,
            None => list.push(ObservedCollaborator {
                username: username.to_string(),
                permission,
            }),
        }
        Ok(())
    }

    async fn remove_collaborator(
        &self,
        _owner: &str,
        name: &str,
        username: &str,
    ) -> Result<(), SyncError> {
        self.check(format!("remove_collaborator:{name}:{username}"))?;
        let mut state = self.state.lock().unwrap();
        if let Some(list) = state.collaborators.get_mut(name) {
            list.retain(|c| c.username != username);
        }
        Ok(())
    }

    async fn list_team_access(
        &self,
        _owner: &str,
        name: &str,
    ) -> Result<Vec<ObservedTeam>, SyncError> {
        self.check(format!("list_team_access:{name}"))?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .teams
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_team_access(
        &self,
        _owner: &str,
        name: &str,
        team_slug: &str,
        permission: Permission,
    ) -> Result<(), SyncError> {
        self.check(format!("add_team_access:{name}:{team_slug}"))?;
        let mut state = self.state.lock().unwrap();
        let list = state.teams.entry(name.to_string()).or_default();
        match list.iter_mut().find(|t| t.team_slug == team_slug) {
            Some(existing) => existing.permission = permission,
            None => list.push(ObservedTeam {
                team_slug: team_slug.to_string(),
                permission,
            }),
        }
        Ok(())
    }

    async fn remove_team_access(
        &self,
        _owner: &str,
        name: &str,
        team_slug: &str,
    ) -> Result<(), SyncError> {
        self.check(format!("remove_team_access:{name}:{team_slug}"))?;
        let mut state = self.state.lock().unwrap();
        if let Some(list) = state.teams.get_mut(name) {
            list.retain(|t| t.team_slug != team_slug);
        }
        Ok(())
    }

    async fn list_webhooks(
        &self,
        _owner: &str,
        name: &str,
    ) -> Result<Vec<ObservedWebhook>, SyncError> {
        self.check(format!("list_webhooks:{name}"))?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .webhooks
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_webhook(
        &self,
        _owner: &str,
        name: &str,
        hook: &Webhook,
    ) -> Result<ObservedWebhook, SyncError> {
        self.check(format!("create_webhook:{name}:{}", hook.url))?;
        let mut state = self.state.lock().unwrap();
        let id = state.next_hook_id;
        state.next_hook_id += 1;
        let observed = ObservedWebhook {
            id,
            url: hook.url.clone(),
            events: hook.events.clone(),
            secret: hook.secret.clone(),
            active: hook.active,
        };
        state
            .webhooks
            .entry(name.to_string())
            .or_default()
            .push(observed.clone());
        Ok(observed)
    }

    async fn update_webhook(
        &self,
        _owner: &str,
        name: &str,
        id: u64,
        hook: &Webhook,
    ) -> Result<(), SyncError> {
        self.check(format!("update_webhook:{name}:{id}"))?;
        let mut state = self.state.lock().unwrap();
        let hooks = state
            .webhooks
            .get_mut(name)
            .ok_or_else(|| not_found("webhook"))?;
        let existing = hooks
            .iter_mut()
            .find(|h| h.id == id)
            .ok_or_else(|| not_found("webhook"))?;
        existing.url = hook.url.clone();
        existing.events = hook.events.clone();
        if !hook.secret.is_empty() {
            existing.secret = hook.secret.clone();
        }
        existing.active = hook.active;
        Ok(())
    }

    async fn delete_webhook(&self, _owner: &str, name: &str, id: u64) -> Result<(), SyncError> {
        self.check(format!("delete_webhook:{name}:{id}"))?;
        let mut state = self.state.lock().unwrap();
        if let Some(hooks) = state.webhooks.get_mut(name) {
            hooks.retain(|h| h.id != id);
        }
        Ok(())
    }
}

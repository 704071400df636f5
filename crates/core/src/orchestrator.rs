use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;

use reposync_client::{ApiClient, ErrorKind, SyncError};
use reposync_config::{
    merge_repository, validate_multi_structure, validate_repository, MergeOptions,
    MultiRepositoryConfig, RepositoryConfig,
};

use crate::applier::Applier;
use crate::guidance::{self, authentication_guidance, Guidance};
use crate::plan::ReconciliationPlan;
use crate::planner::Planner;
use crate::ratelimit::RateLimiter;
use crate::retry::{retry, RetryConfig};

/// Sentinel name for the authentication preflight: a `NotFound` answer
/// proves the token is valid, since an unauthenticated probe fails first.
const AUTH_PROBE_REPO: &str = "reposync-auth-probe";

const SLOT_TIMEOUT: Duration = Duration::from_secs(30);
const COLLECTION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResultSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total_changes: usize,
}

/// Outcome of an `apply_all` run. `succeeded` is ordered by completion
/// time, not input order.
#[derive(Debug, Default)]
pub struct MultiRepoResult {
    pub succeeded: Vec<String>,
    pub failed: BTreeMap<String, SyncError>,
    pub skipped: Vec<String>,
    pub summary: ResultSummary,
}

impl MultiRepoResult {
    /// Classify the overall outcome: `None` when everything succeeded, a
    /// `PartialFailure` or `CompleteFailure` error otherwise.
    pub fn classify(&self) -> Option<SyncError> {
        if self.failed.is_empty() {
            return None;
        }
        let (kind, label) = if self.succeeded.is_empty() {
            (ErrorKind::CompleteFailure, "all")
        } else {
            (ErrorKind::PartialFailure, "some")
        };
        let mut message = format!(
            "{label} repositories failed ({} of {})",
            self.failed.len(),
            self.summary.total
        );
        for g in self.guidance() {
            message.push_str(&format!("\n{g}"));
        }
        Some(SyncError::new(kind, message))
    }

    /// Actionable guidance synthesized from the failed repositories.
    pub fn guidance(&self) -> Vec<Guidance> {
        guidance::synthesize(&self.failed)
    }
}

/// Non-fatal configuration smell attached to a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepoValidation {
    pub errors: Vec<String>,
    pub warnings: Vec<Warning>,
    pub validated_at: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ValidationSummary {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    pub warnings: usize,
}

#[derive(Debug, Default)]
pub struct MultiRepoValidationResult {
    pub valid: Vec<String>,
    pub invalid: BTreeMap<String, SyncError>,
    pub details: BTreeMap<String, RepoValidation>,
    pub summary: ValidationSummary,
}

/// Plans for the selected repositories, alongside per-repository planning
/// failures.
#[derive(Debug, Default)]
pub struct PlanSet {
    pub plans: BTreeMap<String, ReconciliationPlan>,
    pub errors: BTreeMap<String, SyncError>,
}

impl PlanSet {
    /// A summarizing error when any repository failed to plan.
    pub fn error(&self) -> Option<SyncError> {
        if self.errors.is_empty() {
            return None;
        }
        let names: Vec<&str> = self.errors.keys().map(String::as_str).collect();
        Some(SyncError::new(
            ErrorKind::RepositoryFailure,
            format!("planning failed for: {}", names.join(", ")),
        ))
    }
}

/// Fans reconciliation across repositories: merges defaults, plans, applies
/// through a bounded worker pool, and aggregates partial failures.
pub struct Orchestrator {
    client: Arc<dyn ApiClient>,
    limiter: Arc<RateLimiter>,
    retry_config: RetryConfig,
    merge_options: MergeOptions,
    owner: String,
    config: MultiRepositoryConfig,
}

impl Orchestrator {
    pub fn new(
        client: Arc<dyn ApiClient>,
        owner: impl Into<String>,
        config: MultiRepositoryConfig,
    ) -> Self {
        Self {
            client,
            limiter: Arc::new(RateLimiter::new(Default::default())),
            retry_config: RetryConfig::default(),
            merge_options: MergeOptions::default(),
            owner: owner.into(),
            config,
        }
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    pub fn with_merge_options(mut self, merge_options: MergeOptions) -> Self {
        self.merge_options = merge_options;
        self
    }

    /// One probe call suffices: `NotFound` proves we are authenticated and
    /// the sentinel simply does not exist, which is the intended state.
    async fn preflight_auth(&self) -> Result<(), SyncError> {
        match self.client.get_repository(&self.owner, AUTH_PROBE_REPO).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) if matches!(err.kind(), ErrorKind::Authentication | ErrorKind::Permission) => {
                let guidance = match err.kind() {
                    ErrorKind::Authentication => authentication_guidance(),
                    _ => guidance::permission_guidance(),
                };
                Err(SyncError::new(
                    err.kind(),
                    format!("authentication preflight failed: {err}\n{guidance}"),
                )
                .with_source(err))
            }
            Err(err) => Err(err),
        }
    }

    /// Resolve the repository filter against the configuration; unknown
    /// names fail validation.
    fn selected(&self, filter: Option<&[String]>) -> Result<Vec<&RepositoryConfig>, SyncError> {
        let Some(names) = filter else {
            return Ok(self.config.repositories.iter().collect());
        };
        let mut selected = Vec::with_capacity(names.len());
        for name in names {
            match self.config.repositories.iter().find(|r| &r.name == name) {
                Some(repo) => selected.push(repo),
                None => {
                    return Err(SyncError::new(
                        ErrorKind::Validation,
                        format!("repository '{name}' is not present in the configuration"),
                    )
                    .with_field("repositories", "unknown_name"))
                }
            }
        }
        Ok(selected)
    }

    fn effective(&self, repo: &RepositoryConfig) -> RepositoryConfig {
        match &self.config.defaults {
            Some(defaults) => merge_repository(defaults, repo, &self.merge_options),
            None => repo.clone(),
        }
    }

    async fn plan_selected(&self, repos: &[&RepositoryConfig]) -> PlanSet {
        let planner = Planner::new(Arc::clone(&self.client), &self.owner);
        let mut set = PlanSet::default();
        for repo in repos {
            let effective = self.effective(repo);
            if let Err(errors) = validate_repository(&effective) {
                set.errors.insert(repo.name.clone(), errors.into());
                continue;
            }
            match planner.plan(&effective).await {
                Ok(plan) => {
                    set.plans.insert(repo.name.clone(), plan);
                }
                Err(err) => {
                    set.errors
                        .insert(repo.name.clone(), enhance_repo_error(&repo.name, err));
                }
            }
        }
        set
    }

    pub async fn plan_all(&self, filter: Option<&[String]>) -> Result<PlanSet, SyncError> {
        self.preflight_auth().await?;
        let repos = self.selected(filter)?;
        Ok(self.plan_selected(&repos).await)
    }

    pub async fn apply_all(&self, filter: Option<&[String]>) -> Result<MultiRepoResult, SyncError> {
        self.preflight_auth().await?;
        let repos = self.selected(filter)?;
        let plan_set = self.plan_selected(&repos).await;

        let mut result = MultiRepoResult {
            succeeded: Vec::with_capacity(plan_set.plans.len()),
            failed: plan_set.errors,
            ..Default::default()
        };
        result.summary.total = repos.len();

        let mut jobs: VecDeque<(String, ReconciliationPlan)> = VecDeque::new();
        for (name, plan) in plan_set.plans {
            if plan.is_empty() {
                tracing::debug!(repo = %name, "nothing to change, skipping");
                result.skipped.push(name);
            } else {
                result.summary.total_changes += plan.change_count();
                jobs.push_back((name, plan));
            }
        }

        let expected = jobs.len();
        if expected > 0 {
            let enqueued: Vec<String> = jobs.iter().map(|(name, _)| name.clone()).collect();
            let workers = worker_count(expected, self.limiter.current_limit());
            tracing::info!(jobs = expected, workers, "applying plans");

            let queue = Arc::new(Mutex::new(jobs));
            let (tx, mut rx) =
                tokio::sync::mpsc::channel::<(String, Result<(), SyncError>)>(expected);

            for _ in 0..workers {
                let queue = Arc::clone(&queue);
                let tx = tx.clone();
                let client = Arc::clone(&self.client);
                let limiter = Arc::clone(&self.limiter);
                let retry_config = self.retry_config.clone();
                tokio::spawn(async move {
                    let applier = Applier::new(client);
                    loop {
                        let job = queue.lock().unwrap().pop_front();
                        let Some((name, plan)) = job else { break };
                        let outcome =
                            apply_one(&applier, &limiter, &retry_config, &name, &plan).await;
                        if tx.send((name, outcome)).await.is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);

            let mut reported = Vec::with_capacity(expected);
            let _ = tokio::time::timeout(COLLECTION_TIMEOUT, async {
                while reported.len() < expected {
                    match rx.recv().await {
                        Some(outcome) => reported.push(outcome),
                        None => break,
                    }
                }
            })
            .await;

            for (name, outcome) in reported {
                match outcome {
                    Ok(()) => result.succeeded.push(name),
                    Err(err) => {
                        result.failed.insert(name, err);
                    }
                }
            }
            // Anything the collector never heard from counts as failed so
            // the aggregate stays complete.
            for name in enqueued {
                if !result.succeeded.contains(&name) && !result.failed.contains_key(&name) {
                    result.failed.insert(
                        name,
                        SyncError::new(
                            ErrorKind::Unknown,
                            "timed out waiting for the apply result",
                        ),
                    );
                }
            }
        }

        result.summary.succeeded = result.succeeded.len();
        result.summary.failed = result.failed.len();
        result.summary.skipped = result.skipped.len();
        tracing::info!(
            succeeded = result.summary.succeeded,
            failed = result.summary.failed,
            skipped = result.summary.skipped,
            "apply run finished"
        );
        Ok(result)
    }

    /// Validate structure, then each selected repository before and after
    /// the defaults merge. Network is not consulted beyond the preflight.
    pub async fn validate_all(
        &self,
        filter: Option<&[String]>,
    ) -> Result<MultiRepoValidationResult, SyncError> {
        self.preflight_auth().await?;
        validate_multi_structure(&self.config).map_err(SyncError::from)?;
        let repos = self.selected(filter)?;

        let mut result = MultiRepoValidationResult {
            summary: ValidationSummary {
                total: repos.len(),
                ..Default::default()
            },
            ..Default::default()
        };

        for repo in repos {
            let mut errors: Vec<String> = Vec::new();
            let mut merged_errors = reposync_config::ValidationErrors::new();
            if let Err(errs) = validate_repository(repo) {
                errors.extend(errs.errors().iter().map(ToString::to_string));
                merged_errors.extend(errs);
            }
            let effective = self.effective(repo);
            if let Err(errs) = validate_repository(&effective) {
                for err in errs.errors() {
                    let rendered = err.to_string();
                    if !errors.contains(&rendered) {
                        errors.push(rendered);
                    }
                }
                merged_errors.extend(errs);
            }
            let warnings = warnings_for(&effective);
            result.summary.warnings += warnings.len();

            if merged_errors.is_empty() {
                result.valid.push(repo.name.clone());
            } else {
                result
                    .invalid
                    .insert(repo.name.clone(), merged_errors.into());
            }
            result.details.insert(
                repo.name.clone(),
                RepoValidation {
                    errors,
                    warnings,
                    validated_at: chrono::Utc::now().to_rfc3339(),
                },
            );
        }

        result.summary.valid = result.valid.len();
        result.summary.invalid = result.invalid.len();
        Ok(result)
    }
}

async fn apply_one(
    applier: &Applier,
    limiter: &Arc<RateLimiter>,
    retry_config: &RetryConfig,
    name: &str,
    plan: &ReconciliationPlan,
) -> Result<(), SyncError> {
    let slot = match tokio::time::timeout(SLOT_TIMEOUT, limiter.acquire_slot()).await {
        Ok(slot) => slot,
        Err(_) => {
            return Err(enhance_repo_error(
                name,
                SyncError::new(
                    ErrorKind::RateLimit,
                    "timed out waiting for a concurrency slot",
                )
                .not_retryable(),
            ))
        }
    };
    let outcome = retry(|| applier.apply(plan), retry_config, Some(limiter)).await;
    drop(slot);
    outcome.map_err(|err| enhance_repo_error(name, err))
}

/// Rewrap a per-repository failure: `RepositoryFailure`, never retryable,
/// with the repository named in both the message and the resource label.
fn enhance_repo_error(name: &str, err: SyncError) -> SyncError {
    SyncError::new(ErrorKind::RepositoryFailure, format!("Repository {name}: {err}"))
        .with_resource(name)
        .with_source(err)
}

fn worker_count(jobs: usize, limiter_slots: usize) -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let mut workers = (cpus * 2).min(limiter_slots.max(1));
    if jobs <= 20 {
        workers = workers.min(3);
    } else if jobs <= 100 {
        workers = workers.min(cpus);
    }
    workers.clamp(1, jobs.max(1))
}

const SENSITIVE_PREFIXES: &[&str] = &["internal", "private", "secret", "confidential"];

/// Non-fatal smells surfaced by `validate_all`.
pub fn warnings_for(config: &RepositoryConfig) -> Vec<Warning> {
    let mut warnings = Vec::new();

    let lowered = config.name.to_lowercase();
    if !config.private && SENSITIVE_PREFIXES.iter().any(|p| lowered.starts_with(p)) {
        warnings.push(Warning {
            code: "sensitive_name_public_repo".to_string(),
            message: format!(
                "repository '{}' is public but its name suggests sensitive content",
                config.name
            ),
        });
    }

    let has_main_rule = config
        .branch_protection
        .iter()
        .any(|rule| rule.pattern == "main" || rule.pattern == "master");
    if !has_main_rule {
        warnings.push(Warning {
            code: "missing_main_branch_protection".to_string(),
            message: "no branch protection rule covers 'main' or 'master'".to_string(),
        });
    }

    if config.collaborators.is_empty() && config.teams.is_empty() {
        warnings.push(Warning {
            code: "no_access_control".to_string(),
            message: "no collaborators or teams are configured".to_string(),
        });
    }

    for hook in &config.webhooks {
        if hook.secret.is_empty() {
            warnings.push(Warning {
                code: "webhook_no_secret".to_string(),
                message: format!("webhook {} has no shared secret", hook.url),
            });
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockClient;
    use reposync_config::{BranchProtectionRule, RepositoryDefaults, Webhook};

    fn three_repo_config() -> MultiRepositoryConfig {
        MultiRepositoryConfig {
            version: Some("1".into()),
            defaults: None,
            repositories: vec![
                RepositoryConfig {
                    name: "repo1".into(),
                    description: "one".into(),
                    ..Default::default()
                },
                RepositoryConfig {
                    name: "repo2".into(),
                    description: "two".into(),
                    ..Default::default()
                },
                RepositoryConfig {
                    name: "repo3".into(),
                    description: "three".into(),
                    ..Default::default()
                },
            ],
        }
    }

    #[tokio::test]
    async fn apply_all_reports_partial_failure() {
        let client = Arc::new(MockClient::new());
        client.fail_with("create_repository:repo2", ErrorKind::NotFound);
        let orchestrator = Orchestrator::new(client, "acme", three_repo_config());

        let result = orchestrator.apply_all(None).await.unwrap();
        let mut succeeded = result.succeeded.clone();
        succeeded.sort();
        assert_eq!(succeeded, vec!["repo1", "repo3"]);
        assert_eq!(result.failed.len(), 1);
        let err = &result.failed["repo2"];
        assert_eq!(err.kind(), ErrorKind::RepositoryFailure);
        assert_eq!(err.root_kind(), ErrorKind::NotFound);
        assert!(err.message().starts_with("Repository repo2:"));

        let overall = result.classify().unwrap();
        assert_eq!(overall.kind(), ErrorKind::PartialFailure);
        assert_eq!(overall.kind().exit_code(), 3);
    }

    #[tokio::test]
    async fn apply_all_aggregation_is_complete() {
        let client = Arc::new(MockClient::new());
        // repo3 already matches its desired state and is skipped.
        let config = three_repo_config();
        client.seed_repository("acme", &config.repositories[2]);
        client.fail_with("create_repository:repo2", ErrorKind::Conflict);
        let orchestrator = Orchestrator::new(client, "acme", config);

        let result = orchestrator.apply_all(None).await.unwrap();
        assert_eq!(
            result.succeeded.len() + result.failed.len() + result.skipped.len(),
            3
        );
        assert_eq!(result.skipped, vec!["repo3"]);
        assert_eq!(result.summary.total, 3);
        assert_eq!(result.summary.skipped, 1);
    }

    #[tokio::test]
    async fn apply_all_complete_failure() {
        let client = Arc::new(MockClient::new());
        for name in ["repo1", "repo2", "repo3"] {
            client.fail_with(&format!("create_repository:{name}"), ErrorKind::Permission);
        }
        let orchestrator = Orchestrator::new(client, "acme", three_repo_config());
        let result = orchestrator.apply_all(None).await.unwrap();
        assert!(result.succeeded.is_empty());
        let overall = result.classify().unwrap();
        assert_eq!(overall.kind(), ErrorKind::CompleteFailure);
        // Permission failures surface scope guidance.
        assert!(overall.message().contains("scopes"));
    }

    #[tokio::test]
    async fn unknown_filter_name_fails_validation() {
        let client = Arc::new(MockClient::new());
        let orchestrator = Orchestrator::new(client, "acme", three_repo_config());
        let err = orchestrator
            .plan_all(Some(&["nope".to_string()]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn filter_selects_subset() {
        let client = Arc::new(MockClient::new());
        let orchestrator = Orchestrator::new(client, "acme", three_repo_config());
        let set = orchestrator
            .plan_all(Some(&["repo2".to_string()]))
            .await
            .unwrap();
        assert_eq!(set.plans.len(), 1);
        assert!(set.plans.contains_key("repo2"));
        assert!(set.error().is_none());
    }

    #[tokio::test]
    async fn preflight_auth_failure_fast_fails_with_guidance() {
        let client = Arc::new(MockClient::new());
        client.fail_with(
            &format!("get_repository:{AUTH_PROBE_REPO}"),
            ErrorKind::Authentication,
        );
        let orchestrator = Orchestrator::new(client.clone(), "acme", three_repo_config());
        let err = orchestrator.apply_all(None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert!(err.message().contains("GITHUB_TOKEN"));
        // Nothing beyond the probe was attempted.
        assert_eq!(client.calls().len(), 1);
    }

    #[tokio::test]
    async fn plan_all_merges_defaults() {
        let client = Arc::new(MockClient::new());
        let mut config = three_repo_config();
        config.defaults = Some(RepositoryDefaults {
            private: Some(true),
            topics: vec!["default".into()],
            ..Default::default()
        });
        let orchestrator = Orchestrator::new(client, "acme", config);
        let set = orchestrator.plan_all(None).await.unwrap();
        let plan = &set.plans["repo1"];
        let created = plan.repository.as_ref().unwrap().after().unwrap();
        assert!(created.private);
        assert_eq!(created.topics, vec!["default".to_string()]);
    }

    #[tokio::test]
    async fn plan_all_collects_per_repo_errors() {
        let client = Arc::new(MockClient::new());
        client.fail_with("get_repository:repo2", ErrorKind::Network);
        let orchestrator = Orchestrator::new(client, "acme", three_repo_config());
        let set = orchestrator.plan_all(None).await.unwrap();
        assert_eq!(set.plans.len(), 2);
        assert_eq!(set.errors.len(), 1);
        assert!(set.error().unwrap().message().contains("repo2"));
    }

    #[tokio::test]
    async fn validate_all_reports_warnings_and_details() {
        let client = Arc::new(MockClient::new());
        let config = MultiRepositoryConfig {
            version: None,
            defaults: None,
            repositories: vec![
                RepositoryConfig {
                    name: "internal-tools".into(),
                    private: false,
                    webhooks: vec![Webhook {
                        url: "https://ci.example.com/h".into(),
                        events: vec!["push".into()],
                        secret: String::new(),
                        active: true,
                    }],
                    ..Default::default()
                },
                RepositoryConfig {
                    name: "api".into(),
                    private: true,
                    topics: vec!["BAD-TOPIC".into()],
                    branch_protection: vec![BranchProtectionRule {
                        pattern: "main".into(),
                        required_reviews: 2,
                        ..Default::default()
                    }],
                    ..Default::default()
                },
            ],
        };
        let orchestrator = Orchestrator::new(client, "acme", config);
        let result = orchestrator.validate_all(None).await.unwrap();

        assert_eq!(result.valid, vec!["internal-tools"]);
        assert!(result.invalid.contains_key("api"));
        assert_eq!(result.summary.total, 2);
        assert_eq!(result.summary.invalid, 1);

        let detail = &result.details["internal-tools"];
        let codes: Vec<&str> = detail.warnings.iter().map(|w| w.code.as_str()).collect();
        assert!(codes.contains(&"sensitive_name_public_repo"));
        assert!(codes.contains(&"missing_main_branch_protection"));
        assert!(codes.contains(&"no_access_control"));
        assert!(codes.contains(&"webhook_no_secret"));
        assert!(detail.errors.is_empty());
        assert!(!detail.validated_at.is_empty());

        let api_detail = &result.details["api"];
        assert!(!api_detail.errors.is_empty());
        let api_codes: Vec<&str> = api_detail.warnings.iter().map(|w| w.code.as_str()).collect();
        assert!(!api_codes.contains(&"missing_main_branch_protection"));
    }

    #[tokio::test]
    async fn validate_all_rejects_duplicate_names() {
        let client = Arc::new(MockClient::new());
        let mut config = three_repo_config();
        config.repositories[2].name = "repo1".into();
        let orchestrator = Orchestrator::new(client, "acme", config);
        let err = orchestrator.validate_all(None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn worker_count_caps() {
        // Small batches stay narrow regardless of hardware.
        assert!(worker_count(3, 20) <= 3);
        assert!(worker_count(3, 20) >= 1);
        // The limiter bounds the pool.
        assert_eq!(worker_count(500, 1), 1);
        // Never more workers than jobs.
        assert_eq!(worker_count(1, 20), 1);
    }

    #[test]
    fn warnings_only_when_applicable() {
        let config = RepositoryConfig {
            name: "web".into(),
            private: true,
            branch_protection: vec![BranchProtectionRule {
                pattern: "main".into(),
                ..Default::default()
            }],
            collaborators: vec![reposync_config::Collaborator {
                username: "alice".into(),
                permission: reposync_config::Permission::Admin,
            }],
            webhooks: vec![Webhook {
                url: "https://ci.example.com/h".into(),
                events: vec!["push".into()],
                secret: "s".into(),
                active: true,
            }],
            ..Default::default()
        };
        assert!(warnings_for(&config).is_empty());
    }
}

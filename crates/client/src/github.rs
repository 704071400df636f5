use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;

use reposync_config::{BranchProtectionRule, Permission, RepositoryConfig, Webhook};

use crate::error::{ErrorKind, SyncError};
use crate::types::{
    permission_from_role, role_for_permission, BranchProtection, ObservedCollaborator,
    ObservedTeam, ObservedWebhook, Quota, QuotaObserver, Repository,
};
use crate::ApiClient;

const DEFAULT_BASE_URL: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";
const ACCEPT: &str = "application/vnd.github+json";

/// GitHub REST implementation of the [`ApiClient`] port.
pub struct GithubClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    quota_observer: Option<Arc<dyn QuotaObserver>>,
}

impl GithubClient {
    pub fn new(token: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            token,
            quota_observer: None,
        }
    }

    /// Resolve the token through the usual chain (explicit value, env vars,
    /// stored token file).
    pub fn from_token_chain(explicit: Option<&str>, base_url: Option<String>) -> Result<Self, SyncError> {
        let token = reposync_auth::resolve_token(explicit)?;
        Ok(Self::new(token, base_url))
    }

    /// Forward quota metadata from every response to the given observer.
    pub fn with_quota_observer(mut self, observer: Arc<dyn QuotaObserver>) -> Self {
        self.quota_observer = Some(observer);
        self
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .header("accept", ACCEPT)
            .header("x-github-api-version", API_VERSION)
            .header("user-agent", concat!("reposync/", env!("CARGO_PKG_VERSION")))
    }

    /// Send a request, forward quota headers, and classify any failure.
    async fn execute(
        &self,
        builder: reqwest::RequestBuilder,
        resource: &str,
    ) -> Result<reqwest::Response, SyncError> {
        let resp = builder.send().await.map_err(SyncError::from)?;
        let quota = parse_quota(resp.headers());
        if let (Some(observer), Some(quota)) = (&self.quota_observer, quota) {
            observer.observe(quota);
        }

        let status = resp.status();
        if status.is_success() {
            tracing::debug!(%status, resource, "api call succeeded");
            return Ok(resp);
        }

        let retry_after = retry_after_hint(resp.headers());
        let body = resp.text().await.unwrap_or_default();
        let mut err = SyncError::from_status(status.as_u16(), &body).with_resource(resource);
        if err.kind() == ErrorKind::RateLimit {
            if let Some(retry_after) = retry_after {
                err = err.with_retry_after(retry_after);
            }
        }
        tracing::warn!(%status, resource, kind = %err.kind(), "api call failed");
        Err(err)
    }

    async fn json<T: for<'de> Deserialize<'de>>(
        &self,
        builder: reqwest::RequestBuilder,
        resource: &str,
    ) -> Result<T, SyncError> {
        let resp = self.execute(builder, resource).await?;
        resp.json().await.map_err(|e| {
            SyncError::new(ErrorKind::Unknown, format!("malformed API response: {e}"))
                .with_resource(resource)
                .with_source(e)
        })
    }

    async fn put_topics(&self, owner: &str, name: &str, topics: &[String]) -> Result<(), SyncError> {
        let path = format!("/repos/{owner}/{name}/topics");
        self.execute(
            self.request(Method::PUT, &path).json(&json!({ "names": topics })),
            &format!("{owner}/{name} topics"),
        )
        .await
        .map(drop)
    }
}

fn parse_quota(headers: &reqwest::header::HeaderMap) -> Option<Quota> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
    };
    Some(Quota {
        remaining: header("x-ratelimit-remaining")?,
        reset: header("x-ratelimit-reset")?,
    })
}

fn retry_after_hint(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    if let Some(secs) = headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
    {
        return Some(Duration::from_secs(secs));
    }
    let reset = headers
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())?;
    let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs();
    Some(Duration::from_secs(reset.saturating_sub(now)))
}

#[derive(Debug, Deserialize)]
struct RepoPayload {
    id: u64,
    name: String,
    full_name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    private: bool,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    has_issues: bool,
    #[serde(default)]
    has_wiki: bool,
    #[serde(default)]
    has_projects: bool,
    #[serde(default)]
    has_discussions: bool,
    owner: OwnerPayload,
    created_at: Option<chrono::DateTime<chrono::Utc>>,
    updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Deserialize)]
struct OwnerPayload {
    login: String,
}

impl From<RepoPayload> for Repository {
    fn from(payload: RepoPayload) -> Self {
        Repository {
            id: Some(payload.id),
            owner: payload.owner.login,
            name: payload.name,
            full_name: payload.full_name,
            description: payload.description.unwrap_or_default(),
            private: payload.private,
            topics: payload.topics,
            features: reposync_config::Features {
                issues: payload.has_issues,
                wiki: payload.has_wiki,
                projects: payload.has_projects,
                discussions: payload.has_discussions,
            },
            created_at: payload.created_at,
            updated_at: payload.updated_at,
        }
    }
}

fn repo_settings_body(config: &RepositoryConfig) -> serde_json::Value {
    json!({
        "name": config.name,
        "description": config.description,
        "private": config.private,
        "has_issues": config.features.issues,
        "has_wiki": config.features.wiki,
        "has_projects": config.features.projects,
        "has_discussions": config.features.discussions,
    })
}

#[derive(Debug, Deserialize)]
struct ProtectionPayload {
    #[serde(default)]
    required_status_checks: Option<StatusChecksPayload>,
    #[serde(default)]
    required_pull_request_reviews: Option<ReviewsPayload>,
    #[serde(default)]
    restrictions: Option<RestrictionsPayload>,
}

#[derive(Debug, Deserialize)]
struct StatusChecksPayload {
    #[serde(default)]
    strict: bool,
    #[serde(default)]
    contexts: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ReviewsPayload {
    #[serde(default)]
    dismiss_stale_reviews: bool,
    #[serde(default)]
    require_code_owner_reviews: bool,
    #[serde(default)]
    required_approving_review_count: u32,
}

#[derive(Debug, Deserialize)]
struct RestrictionsPayload {
    #[serde(default)]
    users: Vec<LoginPayload>,
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
    login: String,
}

fn protection_body(rule: &BranchProtectionRule) -> serde_json::Value {
    let status_checks = if rule.required_status_checks.is_empty() && !rule.require_up_to_date {
        serde_json::Value::Null
    } else {
        json!({
            "strict": rule.require_up_to_date,
            "contexts": rule.required_status_checks,
        })
    };
    let reviews = if rule.required_reviews == 0
        && !rule.dismiss_stale_reviews
        && !rule.require_code_owner_review
    {
        serde_json::Value::Null
    } else {
        json!({
            "dismiss_stale_reviews": rule.dismiss_stale_reviews,
            "require_code_owner_reviews": rule.require_code_owner_review,
            "required_approving_review_count": rule.required_reviews,
        })
    };
    let restrictions = if rule.restrict_pushes.is_empty() {
        serde_json::Value::Null
    } else {
        json!({ "users": rule.restrict_pushes, "teams": [] })
    };
    json!({
        "required_status_checks": status_checks,
        "enforce_admins": serde_json::Value::Null,
        "required_pull_request_reviews": reviews,
        "restrictions": restrictions,
    })
}

#[derive(Debug, Deserialize)]
struct CollaboratorPayload {
    login: String,
    #[serde(default)]
    role_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TeamPayload {
    slug: String,
    #[serde(default)]
    permission: String,
}

#[derive(Debug, Deserialize)]
struct HookPayload {
    id: u64,
    #[serde(default)]
    events: Vec<String>,
    #[serde(default)]
    active: bool,
    config: HookConfigPayload,
}

#[derive(Debug, Deserialize)]
struct HookConfigPayload {
    #[serde(default)]
    url: String,
    #[serde(default)]
    secret: Option<String>,
}

impl From<HookPayload> for ObservedWebhook {
    fn from(payload: HookPayload) -> Self {
        ObservedWebhook {
            id: payload.id,
            url: payload.config.url,
            events: payload.events,
            secret: payload.config.secret.unwrap_or_default(),
            active: payload.active,
        }
    }
}

fn hook_body(hook: &Webhook) -> serde_json::Value {
    let mut config = json!({
        "url": hook.url,
        "content_type": "json",
    });
    if !hook.secret.is_empty() {
        config["secret"] = json!(hook.secret);
    }
    json!({
        "name": "web",
        "config": config,
        "events": hook.events,
        "active": hook.active,
    })
}

#[async_trait]
impl ApiClient for GithubClient {
    async fn get_repository(&self, owner: &str, name: &str) -> Result<Repository, SyncError> {
        let path = format!("/repos/{owner}/{name}");
        let payload: RepoPayload = self
            .json(self.request(Method::GET, &path), &format!("{owner}/{name}"))
            .await?;
        Ok(payload.into())
    }

    async fn create_repository(
        &self,
        owner: &str,
        config: &RepositoryConfig,
    ) -> Result<Repository, SyncError> {
        let body = repo_settings_body(config);
        // Org endpoint first; a 404 means the owner is a user account.
        let org_attempt: Result<RepoPayload, SyncError> = self
            .json(
                self.request(Method::POST, &format!("/orgs/{owner}/repos")).json(&body),
                &format!("{owner}/{}", config.name),
            )
            .await;
        let payload = match org_attempt {
            Ok(payload) => payload,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                self.json(
                    self.request(Method::POST, "/user/repos").json(&body),
                    &format!("{owner}/{}", config.name),
                )
                .await?
            }
            Err(err) => return Err(err),
        };
        if !config.topics.is_empty() {
            self.put_topics(owner, &config.name, &config.topics).await?;
        }
        tracing::info!(repo = %config.name, "created repository");
        Ok(payload.into())
    }

    async fn update_repository(
        &self,
        owner: &str,
        name: &str,
        config: &RepositoryConfig,
    ) -> Result<(), SyncError> {
        let path = format!("/repos/{owner}/{name}");
        self.execute(
            self.request(Method::PATCH, &path).json(&repo_settings_body(config)),
            &format!("{owner}/{name}"),
        )
        .await?;
        self.put_topics(owner, name, &config.topics).await?;
        tracing::info!(repo = %name, "updated repository settings");
        Ok(())
    }

    async fn get_branch_protection(
        &self,
        owner: &str,
        name: &str,
        pattern: &str,
    ) -> Result<BranchProtection, SyncError> {
        let path = format!("/repos/{owner}/{name}/branches/{pattern}/protection");
        let payload: ProtectionPayload = self
            .json(
                self.request(Method::GET, &path),
                &format!("branch protection for {pattern}"),
            )
            .await?;
        let checks = payload.required_status_checks.unwrap_or(StatusChecksPayload {
            strict: false,
            contexts: Vec::new(),
        });
        let reviews = payload.required_pull_request_reviews.unwrap_or(ReviewsPayload {
            dismiss_stale_reviews: false,
            require_code_owner_reviews: false,
            required_approving_review_count: 0,
        });
        Ok(BranchProtection {
            pattern: pattern.to_string(),
            required_status_checks: checks.contexts,
            require_up_to_date: checks.strict,
            required_reviews: reviews.required_approving_review_count,
            dismiss_stale_reviews: reviews.dismiss_stale_reviews,
            require_code_owner_review: reviews.require_code_owner_reviews,
            restrict_pushes: payload
                .restrictions
                .map(|r| r.users.into_iter().map(|u| u.login).collect())
                .unwrap_or_default(),
        })
    }

    async fn create_branch_protection(
        &self,
        owner: &str,
        name: &str,
        rule: &BranchProtectionRule,
    ) -> Result<(), SyncError> {
        let path = format!("/repos/{owner}/{name}/branches/{}/protection", rule.pattern);
        self.execute(
            self.request(Method::PUT, &path).json(&protection_body(rule)),
            &format!("branch protection for {}", rule.pattern),
        )
        .await?;
        tracing::info!(repo = %name, pattern = %rule.pattern, "set branch protection");
        Ok(())
    }

    async fn update_branch_protection(
        &self,
        owner: &str,
        name: &str,
        rule: &BranchProtectionRule,
    ) -> Result<(), SyncError> {
        // PUT replaces the whole protection object; create and update share it.
        self.create_branch_protection(owner, name, rule).await
    }

    async fn delete_branch_protection(
        &self,
        owner: &str,
        name: &str,
        pattern: &str,
    ) -> Result<(), SyncError> {
        let path = format!("/repos/{owner}/{name}/branches/{pattern}/protection");
        self.execute(
            self.request(Method::DELETE, &path),
            &format!("branch protection for {pattern}"),
        )
        .await?;
        tracing::info!(repo = %name, pattern = %pattern, "removed branch protection");
        Ok(())
    }

    async fn list_collaborators(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<Vec<ObservedCollaborator>, SyncError> {
        let path = format!("/repos/{owner}/{name}/collaborators?affiliation=direct&per_page=100");
        let payload: Vec<CollaboratorPayload> = self
            .json(self.request(Method::GET, &path), "collaborators")
            .await?;
        Ok(payload
            .into_iter()
            .map(|c| ObservedCollaborator {
                permission: permission_from_role(c.role_name.as_deref().unwrap_or("pull")),
                username: c.login,
            })
            .collect())
    }

    async fn add_collaborator(
        &self,
        owner: &str,
        name: &str,
        username: &str,
        permission: Permission,
    ) -> Result<(), SyncError> {
        let path = format!("/repos/{owner}/{name}/collaborators/{username}");
        self.execute(
            self.request(Method::PUT, &path)
                .json(&json!({ "permission": role_for_permission(permission) })),
            &format!("collaborator {username}"),
        )
        .await?;
        tracing::info!(repo = %name, user = %username, %permission, "upserted collaborator");
        Ok(())
    }

    async fn remove_collaborator(
        &self,
        owner: &str,
        name: &str,
        username: &str,
    ) -> Result<(), SyncError> {
        let path = format!("/repos/{owner}/{name}/collaborators/{username}");
        self.execute(
            self.request(Method::DELETE, &path),
            &format!("collaborator {username}"),
        )
        .await?;
        tracing::info!(repo = %name, user = %username, "removed collaborator");
        Ok(())
    }

    async fn list_team_access(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<Vec<ObservedTeam>, SyncError> {
        let path = format!("/repos/{owner}/{name}/teams?per_page=100");
        let payload: Vec<TeamPayload> = self.json(self.request(Method::GET, &path), "teams").await?;
        Ok(payload
            .into_iter()
            .map(|t| ObservedTeam {
                permission: permission_from_role(&t.permission),
                team_slug: t.slug,
            })
            .collect())
    }

    async fn add_team_access(
        &self,
        owner: &str,
        name: &str,
        team_slug: &str,
        permission: Permission,
    ) -> Result<(), SyncError> {
        let path = format!("/orgs/{owner}/teams/{team_slug}/repos/{owner}/{name}");
        self.execute(
            self.request(Method::PUT, &path)
                .json(&json!({ "permission": role_for_permission(permission) })),
            &format!("team {team_slug}"),
        )
        .await?;
        tracing::info!(repo = %name, team = %team_slug, %permission, "upserted team access");
        Ok(())
    }

    async fn remove_team_access(
        &self,
        owner: &str,
        name: &str,
        team_slug: &str,
    ) -> Result<(), SyncError> {
        let path = format!("/orgs/{owner}/teams/{team_slug}/repos/{owner}/{name}");
        self.execute(self.request(Method::DELETE, &path), &format!("team {team_slug}"))
            .await?;
        tracing::info!(repo = %name, team = %team_slug, "removed team access");
        Ok(())
    }

    async fn list_webhooks(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<Vec<ObservedWebhook>, SyncError> {
        let path = format!("/repos/{owner}/{name}/hooks?per_page=100");
        let payload: Vec<HookPayload> = self.json(self.request(Method::GET, &path), "webhooks").await?;
        Ok(payload.into_iter().map(ObservedWebhook::from).collect())
    }

    async fn create_webhook(
        &self,
        owner: &str,
        name: &str,
        hook: &Webhook,
    ) -> Result<ObservedWebhook, SyncError> {
        let path = format!("/repos/{owner}/{name}/hooks");
        let payload: HookPayload = self
            .json(
                self.request(Method::POST, &path).json(&hook_body(hook)),
                &format!("webhook {}", hook.url),
            )
            .await?;
        tracing::info!(repo = %name, url = %hook.url, "created webhook");
        Ok(payload.into())
    }

    async fn update_webhook(
        &self,
        owner: &str,
        name: &str,
        id: u64,
        hook: &Webhook,
    ) -> Result<(), SyncError> {
        let path = format!("/repos/{owner}/{name}/hooks/{id}");
        self.execute(
            self.request(Method::PATCH, &path).json(&hook_body(hook)),
            &format!("webhook {}", hook.url),
        )
        .await?;
        tracing::info!(repo = %name, url = %hook.url, "updated webhook");
        Ok(())
    }

    async fn delete_webhook(&self, owner: &str, name: &str, id: u64) -> Result<(), SyncError> {
        let path = format!("/repos/{owner}/{name}/hooks/{id}");
        self.execute(self.request(Method::DELETE, &path), &format!("webhook #{id}"))
            .await?;
        tracing::info!(repo = %name, hook = id, "deleted webhook");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_parsed_from_headers() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("x-ratelimit-remaining", "42".parse().unwrap());
        headers.insert("x-ratelimit-reset", "1700000000".parse().unwrap());
        let quota = parse_quota(&headers).unwrap();
        assert_eq!(quota.remaining, 42);
        assert_eq!(quota.reset, 1_700_000_000);

        headers.remove("x-ratelimit-reset");
        assert!(parse_quota(&headers).is_none());
    }

    #[test]
    fn retry_after_header_preferred() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("retry-after", "30".parse().unwrap());
        headers.insert("x-ratelimit-reset", "0".parse().unwrap());
        assert_eq!(retry_after_hint(&headers), Some(Duration::from_secs(30)));
    }

    #[test]
    fn protection_body_elides_empty_sections() {
        let rule = BranchProtectionRule {
            pattern: "main".into(),
            ..Default::default()
        };
        let body = protection_body(&rule);
        assert!(body["required_status_checks"].is_null());
        assert!(body["required_pull_request_reviews"].is_null());
        assert!(body["restrictions"].is_null());

        let rule = BranchProtectionRule {
            pattern: "main".into(),
            required_reviews: 2,
            required_status_checks: vec!["build".into()],
            restrict_pushes: vec!["alice".into()],
            ..Default::default()
        };
        let body = protection_body(&rule);
        assert_eq!(body["required_status_checks"]["contexts"][0], "build");
        assert_eq!(
            body["required_pull_request_reviews"]["required_approving_review_count"],
            2
        );
        assert_eq!(body["restrictions"]["users"][0], "alice");
    }

    #[test]
    fn hook_body_omits_blank_secret() {
        let hook = Webhook {
            url: "https://example.com/h".into(),
            events: vec!["push".into()],
            secret: String::new(),
            active: true,
        };
        let body = hook_body(&hook);
        assert!(body["config"].get("secret").is_none());

        let hook = Webhook {
            secret: "shh".into(),
            ..hook
        };
        assert_eq!(hook_body(&hook)["config"]["secret"], "shh");
    }
}

use std::collections::HashMap;

use crate::model::{
    BranchProtectionRule, Collaborator, MultiRepositoryConfig, RepositoryConfig,
    RepositoryDefaults, TeamAccess, Webhook,
};

const MAX_NAME_LEN: usize = 100;
const MAX_TOPICS: usize = 20;
const MAX_TOPIC_LEN: usize = 50;
const MAX_DESCRIPTION_BYTES: usize = 350;
const MAX_USERNAME_LEN: usize = 39;
const MAX_TEAM_SLUG_LEN: usize = 100;
const MAX_REQUIRED_REVIEWS: u32 = 6;

/// Webhook events the forge accepts. Case-sensitive.
pub const WEBHOOK_EVENTS: &[&str] = &[
    "push",
    "pull_request",
    "issues",
    "issue_comment",
    "pull_request_review",
    "pull_request_review_comment",
    "commit_comment",
    "create",
    "delete",
    "deployment",
    "deployment_status",
    "fork",
    "gollum",
    "member",
    "membership",
    "milestone",
    "organization",
    "page_build",
    "project",
    "project_card",
    "project_column",
    "public",
    "release",
    "repository",
    "status",
    "team",
    "team_add",
    "watch",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub code: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Every violation found in one pass; validation never stops at the first
/// problem.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: Vec<ValidationError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: impl Into<String>, code: &str, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            code: code.to_string(),
            message: message.into(),
        });
    }

    pub fn extend(&mut self, other: ValidationErrors) {
        self.errors.extend(other.errors);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} validation error(s)", self.errors.len())?;
        for err in &self.errors {
            write!(f, "\n  {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Validate one repository configuration against every invariant,
/// accumulating all violations.
pub fn validate_repository(config: &RepositoryConfig) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    check_repository(config, "", &mut errors);
    errors.into_result()
}

/// Validate shared defaults. Defaults have no name, everything else follows
/// the per-repository rules.
pub fn validate_defaults(defaults: &RepositoryDefaults) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    check_defaults(defaults, "defaults.", &mut errors);
    errors.into_result()
}

/// Validate a multi-repository configuration: structural invariants plus
/// every repository.
pub fn validate_multi(config: &MultiRepositoryConfig) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    check_multi_structure(config, &mut errors);
    for (i, repo) in config.repositories.iter().enumerate() {
        check_repository(repo, &format!("repositories[{i}]."), &mut errors);
    }
    errors.into_result()
}

/// Only the structural invariants of a multi-repository configuration:
/// non-empty repository list, unique names, valid defaults.
pub fn validate_multi_structure(config: &MultiRepositoryConfig) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    check_multi_structure(config, &mut errors);
    errors.into_result()
}

fn check_multi_structure(config: &MultiRepositoryConfig, errors: &mut ValidationErrors) {
    if config.repositories.is_empty() {
        errors.push(
            "repositories",
            "required",
            "at least one repository must be configured",
        );
    }
    if let Some(defaults) = &config.defaults {
        check_defaults(defaults, "defaults.", errors);
    }

    let mut seen: HashMap<&str, usize> = HashMap::new();
    for (i, repo) in config.repositories.iter().enumerate() {
        if let Some(&first) = seen.get(repo.name.as_str()) {
            errors.push(
                format!("repositories[{i}].name"),
                "duplicate",
                format!(
                    "repository name '{}' already used at repositories[{first}]",
                    repo.name
                ),
            );
        } else {
            seen.insert(repo.name.as_str(), i);
        }
    }
}

fn check_repository(config: &RepositoryConfig, prefix: &str, errors: &mut ValidationErrors) {
    check_repo_name(&config.name, &format!("{prefix}name"), errors);
    check_description(&config.description, prefix, errors);
    check_topics(&config.topics, prefix, errors);
    for (i, rule) in config.branch_protection.iter().enumerate() {
        check_branch_rule(rule, &format!("{prefix}branch_protection[{i}]"), errors);
    }
    for (i, collab) in config.collaborators.iter().enumerate() {
        check_collaborator(collab, &format!("{prefix}collaborators[{i}]"), errors);
    }
    for (i, team) in config.teams.iter().enumerate() {
        check_team(team, &format!("{prefix}teams[{i}]"), errors);
    }
    for (i, hook) in config.webhooks.iter().enumerate() {
        check_webhook(hook, &format!("{prefix}webhooks[{i}]"), errors);
    }
}

fn check_defaults(defaults: &RepositoryDefaults, prefix: &str, errors: &mut ValidationErrors) {
    if let Some(desc) = &defaults.description {
        check_description(desc, prefix, errors);
    }
    check_topics(&defaults.topics, prefix, errors);
    for (i, rule) in defaults.branch_protection.iter().enumerate() {
        check_branch_rule(rule, &format!("{prefix}branch_protection[{i}]"), errors);
    }
    for (i, collab) in defaults.collaborators.iter().enumerate() {
        check_collaborator(collab, &format!("{prefix}collaborators[{i}]"), errors);
    }
    for (i, team) in defaults.teams.iter().enumerate() {
        check_team(team, &format!("{prefix}teams[{i}]"), errors);
    }
    for (i, hook) in defaults.webhooks.iter().enumerate() {
        check_webhook(hook, &format!("{prefix}webhooks[{i}]"), errors);
    }
}

fn check_repo_name(name: &str, field: &str, errors: &mut ValidationErrors) {
    if name.is_empty() {
        errors.push(field, "required", "repository name must not be empty");
        return;
    }
    if name.len() > MAX_NAME_LEN {
        errors.push(
            field,
            "too_long",
            format!("repository name exceeds {MAX_NAME_LEN} characters"),
        );
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        errors.push(
            field,
            "invalid_chars",
            format!("repository name '{name}' may only contain letters, digits, '.', '_' and '-'"),
        );
    }
    if name.starts_with('.') || name.ends_with('.') {
        errors.push(
            field,
            "invalid_format",
            format!("repository name '{name}' may not begin or end with '.'"),
        );
    }
}

fn check_description(description: &str, prefix: &str, errors: &mut ValidationErrors) {
    if description.len() > MAX_DESCRIPTION_BYTES {
        errors.push(
            format!("{prefix}description"),
            "too_long",
            format!("description exceeds {MAX_DESCRIPTION_BYTES} bytes"),
        );
    }
}

fn check_topics(topics: &[String], prefix: &str, errors: &mut ValidationErrors) {
    if topics.len() > MAX_TOPICS {
        errors.push(
            format!("{prefix}topics"),
            "too_many",
            format!("at most {MAX_TOPICS} topics are allowed, got {}", topics.len()),
        );
    }
    for (i, topic) in topics.iter().enumerate() {
        let field = format!("{prefix}topics[{i}]");
        if topic.is_empty() {
            errors.push(field, "required", "topic must not be empty");
            continue;
        }
        if topic.len() > MAX_TOPIC_LEN {
            errors.push(
                field.clone(),
                "too_long",
                format!("topic '{topic}' exceeds {MAX_TOPIC_LEN} characters"),
            );
        }
        if !topic
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            errors.push(
                field.clone(),
                "invalid_chars",
                format!("topic '{topic}' may only contain lowercase letters, digits and '-'"),
            );
        }
        if topic.starts_with('-') || topic.ends_with('-') {
            errors.push(
                field.clone(),
                "invalid_format",
                format!("topic '{topic}' may not begin or end with '-'"),
            );
        }
    }
}

fn check_branch_rule(rule: &BranchProtectionRule, field: &str, errors: &mut ValidationErrors) {
    if rule.pattern.is_empty() {
        errors.push(
            format!("{field}.pattern"),
            "required",
            "branch protection pattern must not be empty",
        );
    }
    if rule.required_reviews > MAX_REQUIRED_REVIEWS {
        errors.push(
            format!("{field}.required_reviews"),
            "out_of_range",
            format!(
                "required_reviews must be between 0 and {MAX_REQUIRED_REVIEWS}, got {}",
                rule.required_reviews
            ),
        );
    }
}

fn check_collaborator(collab: &Collaborator, field: &str, errors: &mut ValidationErrors) {
    let name = &collab.username;
    let field = format!("{field}.username");
    if name.is_empty() {
        errors.push(field, "required", "username must not be empty");
        return;
    }
    if name.len() > MAX_USERNAME_LEN {
        errors.push(
            field.clone(),
            "too_long",
            format!("username '{name}' exceeds {MAX_USERNAME_LEN} characters"),
        );
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        errors.push(
            field.clone(),
            "invalid_chars",
            format!("username '{name}' may only contain letters, digits and '-'"),
        );
    }
    if name.starts_with('-') || name.ends_with('-') {
        errors.push(
            field.clone(),
            "invalid_format",
            format!("username '{name}' may not begin or end with '-'"),
        );
    }
    if name.contains("--") {
        errors.push(
            field.clone(),
            "invalid_format",
            format!("username '{name}' may not contain consecutive hyphens"),
        );
    }
}

fn check_team(team: &TeamAccess, field: &str, errors: &mut ValidationErrors) {
    let slug = &team.team_slug;
    let field = format!("{field}.team");
    if slug.is_empty() {
        errors.push(field, "required", "team slug must not be empty");
        return;
    }
    if slug.len() > MAX_TEAM_SLUG_LEN {
        errors.push(
            field.clone(),
            "too_long",
            format!("team slug '{slug}' exceeds {MAX_TEAM_SLUG_LEN} characters"),
        );
    }
    if !slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-'))
    {
        errors.push(
            field.clone(),
            "invalid_chars",
            format!("team slug '{slug}' may only contain lowercase letters, digits, '_' and '-'"),
        );
    }
    if !slug
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    {
        errors.push(
            field.clone(),
            "invalid_format",
            format!("team slug '{slug}' must begin with a lowercase letter or digit"),
        );
    }
}

fn check_webhook(hook: &Webhook, field: &str, errors: &mut ValidationErrors) {
    match url::Url::parse(&hook.url) {
        Ok(parsed) => {
            if !matches!(parsed.scheme(), "http" | "https") {
                errors.push(
                    format!("{field}.url"),
                    "invalid_scheme",
                    format!("webhook URL '{}' must use http or https", hook.url),
                );
            }
            if parsed.host_str().map_or(true, str::is_empty) {
                errors.push(
                    format!("{field}.url"),
                    "invalid_host",
                    format!("webhook URL '{}' must have a host", hook.url),
                );
            }
        }
        Err(e) => {
            errors.push(
                format!("{field}.url"),
                "invalid_url",
                format!("webhook URL '{}' is not valid: {e}", hook.url),
            );
        }
    }

    if hook.events.is_empty() {
        errors.push(
            format!("{field}.events"),
            "required",
            "webhook must subscribe to at least one event",
        );
    }
    for (i, event) in hook.events.iter().enumerate() {
        if !WEBHOOK_EVENTS.contains(&event.as_str()) {
            errors.push(
                format!("{field}.events[{i}]"),
                "unknown_event",
                format!("'{event}' is not a recognized webhook event"),
            );
        }
    }
}

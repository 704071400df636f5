use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::model::{
    BranchProtectionRule, Collaborator, RepositoryConfig, RepositoryDefaults, TeamAccess, Webhook,
};

/// How a defaulted collection combines with the repository's own value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Repository value wins when provided (collections count as provided
    /// iff non-empty); otherwise the default applies.
    #[default]
    Override,
    /// Union on the element's natural key; repository elements win on
    /// collision.
    Append,
    /// Like Append, but on key collision the repository's scalars are kept
    /// and multi-valued sub-fields are unioned with the default's.
    DeepMerge,
}

/// Per-collection merge strategies. Scalars (description, private, features)
/// always follow the fixed field-level rules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOptions {
    #[serde(default)]
    pub topics: MergeStrategy,
    #[serde(default)]
    pub branch_protection: MergeStrategy,
    #[serde(default)]
    pub collaborators: MergeStrategy,
    #[serde(default)]
    pub teams: MergeStrategy,
    #[serde(default)]
    pub webhooks: MergeStrategy,
}

/// Produce the effective configuration for one repository by combining the
/// shared defaults with the repository's explicit values. The result owns
/// all of its data; mutating it never touches either input.
pub fn merge_repository(
    defaults: &RepositoryDefaults,
    repo: &RepositoryConfig,
    options: &MergeOptions,
) -> RepositoryConfig {
    let mut merged = repo.clone();

    if merged.description.is_empty() {
        if let Some(desc) = &defaults.description {
            merged.description = desc.clone();
        }
    }

    // An explicit repo-level `private: true` always sticks; otherwise only
    // an explicit default `true` can flip it.
    if !merged.private && defaults.private == Some(true) {
        merged.private = true;
    }

    merged.features.issues |= defaults.features.issues;
    merged.features.wiki |= defaults.features.wiki;
    merged.features.projects |= defaults.features.projects;
    merged.features.discussions |= defaults.features.discussions;

    merged.topics = merge_topics(&defaults.topics, &repo.topics, options.topics);
    merged.branch_protection = merge_keyed(
        &defaults.branch_protection,
        &repo.branch_protection,
        options.branch_protection,
        |rule| rule.pattern.clone(),
        deep_merge_rule,
    );
    merged.collaborators = merge_keyed(
        &defaults.collaborators,
        &repo.collaborators,
        options.collaborators,
        |c| c.username.clone(),
        // Collaborators have no multi-valued sub-fields; DeepMerge keeps the
        // repository's entry as-is.
        |repo_side, _| repo_side.clone(),
    );
    merged.teams = merge_keyed(
        &defaults.teams,
        &repo.teams,
        options.teams,
        |t| t.team_slug.clone(),
        |repo_side, _| repo_side.clone(),
    );
    merged.webhooks = merge_keyed(
        &defaults.webhooks,
        &repo.webhooks,
        options.webhooks,
        |w| w.url.clone(),
        deep_merge_webhook,
    );

    merged
}

fn merge_topics(defaults: &[String], repo: &[String], strategy: MergeStrategy) -> Vec<String> {
    match strategy {
        MergeStrategy::Override => {
            if repo.is_empty() {
                defaults.to_vec()
            } else {
                repo.to_vec()
            }
        }
        MergeStrategy::Append | MergeStrategy::DeepMerge => {
            let mut merged = repo.to_vec();
            let seen: BTreeSet<&str> = repo.iter().map(String::as_str).collect();
            merged.extend(
                defaults
                    .iter()
                    .filter(|t| !seen.contains(t.as_str()))
                    .cloned(),
            );
            merged
        }
    }
}

/// Union two collections on a natural key. Repository elements keep their
/// order and win on collision; default-only elements follow.
fn merge_keyed<T: Clone>(
    defaults: &[T],
    repo: &[T],
    strategy: MergeStrategy,
    key: impl Fn(&T) -> String,
    deep: impl Fn(&T, &T) -> T,
) -> Vec<T> {
    match strategy {
        MergeStrategy::Override => {
            if repo.is_empty() {
                defaults.to_vec()
            } else {
                repo.to_vec()
            }
        }
        MergeStrategy::Append => {
            let seen: BTreeSet<String> = repo.iter().map(&key).collect();
            let mut merged = repo.to_vec();
            merged.extend(
                defaults
                    .iter()
                    .filter(|d| !seen.contains(&key(d)))
                    .cloned(),
            );
            merged
        }
        MergeStrategy::DeepMerge => {
            let mut merged: Vec<T> = repo
                .iter()
                .map(|r| {
                    match defaults.iter().find(|d| key(d) == key(r)) {
                        Some(d) => deep(r, d),
                        None => r.clone(),
                    }
                })
                .collect();
            let seen: BTreeSet<String> = repo.iter().map(&key).collect();
            merged.extend(
                defaults
                    .iter()
                    .filter(|d| !seen.contains(&key(d)))
                    .cloned(),
            );
            merged
        }
    }
}

fn deep_merge_rule(repo: &BranchProtectionRule, default: &BranchProtectionRule) -> BranchProtectionRule {
    let mut merged = repo.clone();
    merged.required_status_checks =
        union_preserving_order(&repo.required_status_checks, &default.required_status_checks);
    merged.restrict_pushes = union_preserving_order(&repo.restrict_pushes, &default.restrict_pushes);
    merged
}

fn deep_merge_webhook(repo: &Webhook, default: &Webhook) -> Webhook {
    let mut merged = repo.clone();
    merged.events = union_preserving_order(&repo.events, &default.events);
    merged
}

fn union_preserving_order(primary: &[String], secondary: &[String]) -> Vec<String> {
    let seen: BTreeSet<&str> = primary.iter().map(String::as_str).collect();
    let mut merged = primary.to_vec();
    merged.extend(
        secondary
            .iter()
            .filter(|s| !seen.contains(s.as_str()))
            .cloned(),
    );
    merged
}

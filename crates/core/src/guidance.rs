use std::collections::BTreeMap;
use std::collections::BTreeSet;

use reposync_client::{ErrorKind, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
        }
    }
}

/// One actionable suggestion, with concrete commands where they exist.
#[derive(Debug, Clone)]
pub struct Guidance {
    pub issue: String,
    pub suggestion: String,
    pub severity: Severity,
    pub commands: Vec<String>,
}

impl std::fmt::Display for Guidance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.issue, self.suggestion)?;
        for cmd in &self.commands {
            write!(f, "\n    $ {cmd}")?;
        }
        Ok(())
    }
}

pub fn authentication_guidance() -> Guidance {
    Guidance {
        issue: "the forge rejected the token".to_string(),
        suggestion: "provide a valid token via GITHUB_TOKEN or log in again".to_string(),
        severity: Severity::Error,
        commands: vec![
            "export GITHUB_TOKEN=<your-token>".to_string(),
            "gh auth login".to_string(),
        ],
    }
}

pub fn permission_guidance() -> Guidance {
    Guidance {
        issue: "the token lacks the required scopes".to_string(),
        suggestion: "grant the token the repo and admin:org scopes".to_string(),
        severity: Severity::Error,
        commands: vec!["gh auth refresh -s repo,admin:org".to_string()],
    }
}

/// Synthesize guidance from the classified kinds of the failed repositories.
pub fn synthesize(failed: &BTreeMap<String, SyncError>) -> Vec<Guidance> {
    let kinds: BTreeSet<_> = failed
        .values()
        .map(|err| format!("{}", err.root_kind()))
        .collect();

    let mut guidance = Vec::new();
    for kind in failed.values().map(SyncError::root_kind).collect::<BTreeSet<_>>() {
        match kind {
            ErrorKind::Authentication => guidance.push(authentication_guidance()),
            ErrorKind::Permission => guidance.push(permission_guidance()),
            ErrorKind::RateLimit => guidance.push(Guidance {
                issue: "API quota was exhausted during the run".to_string(),
                suggestion: "wait for the quota window to reset or lower the concurrency limit"
                    .to_string(),
                severity: Severity::Warning,
                commands: vec![],
            }),
            ErrorKind::Network => guidance.push(Guidance {
                issue: "the forge API was unreachable".to_string(),
                suggestion: "check connectivity and retry; transient failures are retried \
                             automatically"
                    .to_string(),
                severity: Severity::Warning,
                commands: vec![],
            }),
            ErrorKind::Validation => guidance.push(Guidance {
                issue: "the forge rejected part of the configuration".to_string(),
                suggestion: "run `reposync validate` against the configuration and fix the \
                             reported fields"
                    .to_string(),
                severity: Severity::Error,
                commands: vec!["reposync validate <config>".to_string()],
            }),
            _ => {}
        }
    }
    if guidance.is_empty() && !failed.is_empty() {
        guidance.push(Guidance {
            issue: format!("repositories failed with: {}", kinds.into_iter().collect::<Vec<_>>().join(", ")),
            suggestion: "inspect the per-repository errors above".to_string(),
            severity: Severity::Info,
            commands: vec![],
        });
    }
    guidance
}

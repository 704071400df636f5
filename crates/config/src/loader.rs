use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::model::{MultiRepositoryConfig, RepositoryConfig};

/// Documents larger than this are parsed from a buffered reader instead of
/// being slurped into a string first.
const STREAMING_THRESHOLD: u64 = 10 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("unrecognized configuration shape: {0}")]
    UnrecognizedShape(String),
}

/// A parsed configuration document, either shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigDocument {
    Single(RepositoryConfig),
    Multi(MultiRepositoryConfig),
}

impl ConfigDocument {
    /// Normalize to the multi-repo shape; a single-repo document becomes a
    /// one-element repository list with no defaults.
    pub fn into_multi(self) -> MultiRepositoryConfig {
        match self {
            ConfigDocument::Single(repo) => repo.into(),
            ConfigDocument::Multi(multi) => multi,
        }
    }
}

pub fn load_document(path: &Path) -> Result<ConfigDocument, ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    };
    let size = std::fs::metadata(path).map_err(io_err)?.len();
    let value: serde_yaml::Value = if size > STREAMING_THRESHOLD {
        let file = File::open(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_reader(BufReader::new(file))?
    } else {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&text)?
    };
    detect_shape(value)
}

pub fn parse_document(text: &str) -> Result<ConfigDocument, ConfigError> {
    let value: serde_yaml::Value = serde_yaml::from_str(text)?;
    detect_shape(value)
}

/// Shape detection: a top-level `repositories` or `defaults` key with no
/// top-level `name` means multi-repo; a top-level `name` means single-repo.
fn detect_shape(value: serde_yaml::Value) -> Result<ConfigDocument, ConfigError> {
    let mapping = match &value {
        serde_yaml::Value::Mapping(m) => m,
        _ => {
            return Err(ConfigError::UnrecognizedShape(
                "document root must be a mapping".to_string(),
            ))
        }
    };

    let has_key = |key: &str| mapping.contains_key(&serde_yaml::Value::from(key));

    if has_key("name") {
        let repo: RepositoryConfig = serde_yaml::from_value(value)?;
        tracing::debug!(repo = %repo.name, "loaded single-repository config");
        return Ok(ConfigDocument::Single(repo));
    }
    if has_key("repositories") || has_key("defaults") {
        let multi: MultiRepositoryConfig = serde_yaml::from_value(value)?;
        tracing::debug!(repos = multi.repositories.len(), "loaded multi-repository config");
        return Ok(ConfigDocument::Multi(multi));
    }
    Err(ConfigError::UnrecognizedShape(
        "expected a top-level 'name' (single repository) or 'repositories' list".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_single_repo_shape() {
        let doc = parse_document("name: web\ndescription: frontend\n").unwrap();
        match doc {
            ConfigDocument::Single(repo) => {
                assert_eq!(repo.name, "web");
                assert_eq!(repo.description, "frontend");
            }
            other => panic!("expected single shape, got {other:?}"),
        }
    }

    #[test]
    fn detects_multi_repo_shape() {
        let doc = parse_document(
            "version: '1'\nrepositories:\n  - name: web\n  - name: api\n",
        )
        .unwrap();
        match doc {
            ConfigDocument::Multi(multi) => {
                assert_eq!(multi.version.as_deref(), Some("1"));
                assert_eq!(multi.repositories.len(), 2);
            }
            other => panic!("expected multi shape, got {other:?}"),
        }
    }

    #[test]
    fn defaults_without_name_is_multi() {
        let doc = parse_document("defaults:\n  private: true\nrepositories: []\n").unwrap();
        match doc {
            ConfigDocument::Multi(multi) => {
                assert_eq!(multi.defaults.unwrap().private, Some(true));
            }
            other => panic!("expected multi shape, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unrecognized_shape() {
        let err = parse_document("version: '1'\n").unwrap_err();
        assert!(matches!(err, ConfigError::UnrecognizedShape(_)));
    }

    #[test]
    fn rejects_non_mapping_root() {
        let err = parse_document("- a\n- b\n").unwrap_err();
        assert!(matches!(err, ConfigError::UnrecognizedShape(_)));
    }

    #[test]
    fn single_shape_parses_children() {
        let doc = parse_document(
            r#"
name: web
private: true
topics: [api, rust]
features:
  issues: true
branch_protection:
  - pattern: main
    required_reviews: 2
collaborators:
  - username: alice
    permission: admin
teams:
  - team: platform
    permission: write
webhooks:
  - url: https://ci.example.com/hook
    events: [push]
    secret: shh
"#,
        )
        .unwrap();
        let ConfigDocument::Single(repo) = doc else {
            panic!("expected single shape");
        };
        assert!(repo.private);
        assert_eq!(repo.branch_protection[0].required_reviews, 2);
        assert_eq!(repo.collaborators[0].permission, crate::model::Permission::Admin);
        assert_eq!(repo.teams[0].team_slug, "platform");
        assert!(repo.webhooks[0].active);
    }
}

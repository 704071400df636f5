mod error;

pub use error::AuthError;

use std::path::PathBuf;

const ENV_VARS: &[&str] = &["GITHUB_TOKEN", "GH_TOKEN"];

/// Where a stored token lives: `~/.config/reposync/token`.
pub fn token_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("reposync")
        .join("token")
}

/// Resolve the bearer token for the forge API.
///
/// Precedence: an explicit value (CLI flag or config), then `GITHUB_TOKEN`,
/// then `GH_TOKEN`, then the stored token file. Whitespace is trimmed;
/// empty values are treated as absent.
pub fn resolve_token(explicit: Option<&str>) -> Result<String, AuthError> {
    if let Some(token) = explicit {
        let token = token.trim();
        if !token.is_empty() {
            return Ok(token.to_string());
        }
    }

    for var in ENV_VARS {
        if let Ok(token) = std::env::var(var) {
            let token = token.trim();
            if !token.is_empty() {
                tracing::debug!(source = var, "resolved forge token");
                return Ok(token.to_string());
            }
        }
    }

    let path = token_file_path();
    if path.exists() {
        let token = std::fs::read_to_string(&path).map_err(|source| AuthError::TokenFileUnreadable {
            path: path.display().to_string(),
            source,
        })?;
        let token = token.trim();
        if !token.is_empty() {
            tracing::debug!(path = %path.display(), "resolved forge token from file");
            return Ok(token.to_string());
        }
    }

    Err(AuthError::NoToken {
        token_path: path.display().to_string(),
    })
}

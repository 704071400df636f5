#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("No forge token found. Set GITHUB_TOKEN (or GH_TOKEN), or store one in {token_path}")]
    NoToken { token_path: String },

    #[error("Token file {path} is unreadable: {source}")]
    TokenFileUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

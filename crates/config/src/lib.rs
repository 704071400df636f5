pub mod loader;
pub mod merge;
pub mod model;
pub mod validate;

pub use loader::{load_document, parse_document, ConfigDocument, ConfigError};
pub use merge::{merge_repository, MergeOptions, MergeStrategy};
pub use model::{
    BranchProtectionRule, Collaborator, Features, MultiRepositoryConfig, Permission,
    RepositoryConfig, RepositoryDefaults, TeamAccess, Webhook,
};
pub use validate::{
    validate_defaults, validate_multi, validate_multi_structure, validate_repository,
    ValidationError, ValidationErrors,
};

pub mod applier;
pub mod guidance;
pub mod orchestrator;
pub mod plan;
pub mod planner;
pub mod ratelimit;
pub mod retry;

#[cfg(test)]
pub(crate) mod testutil;

pub use applier::{Applier, ChildFailures};
pub use guidance::{Guidance, Severity};
pub use orchestrator::{
    warnings_for, MultiRepoResult, MultiRepoValidationResult, Orchestrator, PlanSet,
    RepoValidation, ResultSummary, ValidationSummary, Warning,
};
pub use plan::{Change, ReconciliationPlan, WebhookChange};
pub use planner::Planner;
pub use ratelimit::{RateLimiter, RateLimiterConfig, RateLimiterStats, Slot};
pub use retry::{retry, RetryConfig};

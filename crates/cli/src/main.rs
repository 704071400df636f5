use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use reposync_client::{GithubClient, SyncError};
use reposync_core::{
    Change, MultiRepoResult, MultiRepoValidationResult, Orchestrator, PlanSet, RateLimiter,
    ReconciliationPlan,
};

#[derive(Parser)]
#[command(name = "reposync", about = "Declarative GitHub repository administration", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase log verbosity (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the changes required to reach the desired state
    Plan {
        /// Path to the configuration document
        config: PathBuf,
        /// Repository owner (user or organization)
        #[arg(short, long)]
        owner: String,
        /// Limit the run to these repositories (repeatable)
        #[arg(short, long = "repo")]
        repos: Vec<String>,
        /// Forge token (default: GITHUB_TOKEN / GH_TOKEN / stored token)
        #[arg(long)]
        token: Option<String>,
        /// Emit the plans as JSON
        #[arg(long)]
        json: bool,
    },
    /// Apply the desired state to the forge
    Apply {
        /// Path to the configuration document
        config: PathBuf,
        /// Repository owner (user or organization)
        #[arg(short, long)]
        owner: String,
        /// Limit the run to these repositories (repeatable)
        #[arg(short, long = "repo")]
        repos: Vec<String>,
        /// Forge token (default: GITHUB_TOKEN / GH_TOKEN / stored token)
        #[arg(long)]
        token: Option<String>,
    },
    /// Validate a configuration document and report warnings
    Validate {
        /// Path to the configuration document
        config: PathBuf,
        /// Repository owner (user or organization)
        #[arg(short, long)]
        owner: String,
        /// Limit the run to these repositories (repeatable)
        #[arg(short, long = "repo")]
        repos: Vec<String>,
        /// Forge token (default: GITHUB_TOKEN / GH_TOKEN / stored token)
        #[arg(long)]
        token: Option<String>,
    },
}

fn exit_with(err: &SyncError) -> ! {
    eprintln!("error: {err}");
    std::process::exit(err.kind().exit_code());
}

fn load_config(path: &PathBuf) -> reposync_config::MultiRepositoryConfig {
    match reposync_config::load_document(path) {
        Ok(doc) => doc.into_multi(),
        Err(err) => exit_with(&SyncError::from(err)),
    }
}

fn build_orchestrator(
    owner: &str,
    token: Option<&str>,
    config: reposync_config::MultiRepositoryConfig,
) -> Orchestrator {
    let limiter = Arc::new(RateLimiter::new(Default::default()));
    let client = match GithubClient::from_token_chain(token, None) {
        Ok(client) => client.with_quota_observer(limiter.clone()),
        Err(err) => exit_with(&err),
    };
    Orchestrator::new(Arc::new(client), owner, config).with_rate_limiter(limiter)
}

fn filter(repos: &[String]) -> Option<&[String]> {
    if repos.is_empty() {
        None
    } else {
        Some(repos)
    }
}

fn change_sigil(verb: &str) -> char {
    match verb {
        "create" => '+',
        "delete" => '-',
        _ => '~',
    }
}

fn render_plan(name: &str, plan: &ReconciliationPlan) {
    if plan.is_empty() {
        println!("{name}: up to date");
        return;
    }
    println!("{name}:");
    if let Some(change) = &plan.repository {
        println!("  {} repository settings", change_sigil(change.verb()));
    }
    for change in &plan.branch_rules {
        let pattern = change
            .after()
            .or_else(|| change.before())
            .map(|r| r.pattern.as_str())
            .unwrap_or_default();
        println!("  {} branch protection {pattern}", change_sigil(change.verb()));
    }
    for change in &plan.collaborators {
        let collab = change.after().or_else(|| change.before());
        let username = collab.map(|c| c.username.as_str()).unwrap_or_default();
        match change {
            Change::Delete { .. } => println!("  - collaborator {username}"),
            _ => {
                let permission = collab.map(|c| c.permission.to_string()).unwrap_or_default();
                println!(
                    "  {} collaborator {username} ({permission})",
                    change_sigil(change.verb())
                );
            }
        }
    }
    for change in &plan.teams {
        let team = change.after().or_else(|| change.before());
        let slug = team.map(|t| t.team_slug.as_str()).unwrap_or_default();
        match change {
            Change::Delete { .. } => println!("  - team {slug}"),
            _ => {
                let permission = team.map(|t| t.permission.to_string()).unwrap_or_default();
                println!("  {} team {slug} ({permission})", change_sigil(change.verb()));
            }
        }
    }
    for hook in &plan.webhooks {
        let url = hook
            .change
            .after()
            .or_else(|| hook.change.before())
            .map(|h| h.url.as_str())
            .unwrap_or_default();
        println!("  {} webhook {url}", change_sigil(hook.change.verb()));
    }
}

fn render_plan_set(set: &PlanSet, json: bool) {
    if json {
        match serde_json::to_string_pretty(&set.plans) {
            Ok(rendered) => println!("{rendered}"),
            Err(err) => eprintln!("failed to render plans: {err}"),
        }
    } else {
        for (name, plan) in &set.plans {
            render_plan(name, plan);
        }
    }
    for (name, err) in &set.errors {
        eprintln!("{name}: planning failed: {err}");
    }
}

fn render_apply_result(result: &MultiRepoResult) {
    for name in &result.succeeded {
        println!("{name}: applied");
    }
    for name in &result.skipped {
        println!("{name}: up to date");
    }
    for (name, err) in &result.failed {
        eprintln!("{name}: failed: {err}");
    }
    let s = &result.summary;
    println!(
        "{} repositories: {} applied, {} failed, {} up to date ({} changes)",
        s.total, s.succeeded, s.failed, s.skipped, s.total_changes
    );
}

fn render_validation(result: &MultiRepoValidationResult) {
    for name in &result.valid {
        let warnings = result
            .details
            .get(name)
            .map(|d| d.warnings.as_slice())
            .unwrap_or_default();
        if warnings.is_empty() {
            println!("{name}: ok");
        } else {
            println!("{name}: ok ({} warning(s))", warnings.len());
            for warning in warnings {
                println!("  warning[{}]: {}", warning.code, warning.message);
            }
        }
    }
    for (name, err) in &result.invalid {
        println!("{name}: invalid");
        eprintln!("  {err}");
    }
    let s = &result.summary;
    println!(
        "{} repositories: {} valid, {} invalid, {} warning(s)",
        s.total, s.valid, s.invalid, s.warnings
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let mut env_filter = tracing_subscriber::EnvFilter::from_default_env();
    for target in [
        "reposync",
        "reposync_core",
        "reposync_client",
        "reposync_config",
        "reposync_auth",
    ] {
        env_filter = env_filter.add_directive(format!("{target}={level}").parse()?);
    }
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Plan {
            config,
            owner,
            repos,
            token,
            json,
        } => {
            let document = load_config(&config);
            let orchestrator = build_orchestrator(&owner, token.as_deref(), document);
            match orchestrator.plan_all(filter(&repos)).await {
                Ok(set) => {
                    render_plan_set(&set, json);
                    if let Some(err) = set.error() {
                        exit_with(&err);
                    }
                }
                Err(err) => exit_with(&err),
            }
        }
        Commands::Apply {
            config,
            owner,
            repos,
            token,
        } => {
            let document = load_config(&config);
            let orchestrator = build_orchestrator(&owner, token.as_deref(), document);
            match orchestrator.apply_all(filter(&repos)).await {
                Ok(result) => {
                    render_apply_result(&result);
                    if let Some(err) = result.classify() {
                        for guidance in result.guidance() {
                            eprintln!("{guidance}");
                        }
                        std::process::exit(err.kind().exit_code());
                    }
                }
                Err(err) => exit_with(&err),
            }
        }
        Commands::Validate {
            config,
            owner,
            repos,
            token,
        } => {
            let document = load_config(&config);
            let orchestrator = build_orchestrator(&owner, token.as_deref(), document);
            match orchestrator.validate_all(filter(&repos)).await {
                Ok(result) => {
                    render_validation(&result);
                    if !result.invalid.is_empty() {
                        std::process::exit(reposync_client::ErrorKind::Validation.exit_code());
                    }
                }
                Err(err) => exit_with(&err),
            }
        }
    }

    Ok(())
}

//! Reward Key CLI
//!
//! Entry point for the merge-event workflow: resolves the environment, wires
//! the real service clients into the pipeline and turns the outcome into the
//! process exit code.

mod style;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use reward_key::{
    AbortReason, Config, DnsMailDomainCheck, EmailLocator, Environment, GitHubClient,
    MailDomainCheck, NoEmailPolicy, Pipeline, ProvisioningClient, RawEnvironment, RunOutcome,
    SendGridClient, SkipMailDomainCheck, EXIT_FAILURE,
};
use style::*;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "reward-key")]
#[command(author = "CortexLM")]
#[command(version)]
#[command(about = "Issue an API key to the author of a merged pull request", long_about = None)]
struct Cli {
    /// GitHub token with pull request read and comment access
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    /// Repository in owner/name form
    #[arg(long, env = "GITHUB_REPOSITORY")]
    repository: Option<String>,

    /// Pull request number (takes precedence over the commit)
    #[arg(long, env = "PR_NUMBER")]
    pr_number: Option<String>,

    /// Merge commit used to find the pull request
    #[arg(long, env = "GITHUB_SHA")]
    commit_sha: Option<String>,

    /// Provisioning service management key
    #[arg(long, env = "PROVISIONING_API_KEY", hide_env_values = true)]
    provisioning_api_key: Option<String>,

    /// Email provider API key
    #[arg(long, env = "EMAIL_API_KEY", hide_env_values = true)]
    email_api_key: Option<String>,

    /// Path to a config.toml replacing the embedded defaults
    #[arg(short, long, env = "REWARD_KEY_CONFIG")]
    config: Option<PathBuf>,

    /// Exit 0 instead of 1 when no email is found
    #[arg(long)]
    no_email_ok: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn raw_environment(&mut self) -> RawEnvironment {
        RawEnvironment {
            github_token: self.github_token.take(),
            repository: self.repository.take(),
            pr_number: self.pr_number.take(),
            commit_sha: self.commit_sha.take(),
            provisioning_api_key: self.provisioning_api_key.take(),
            email_api_key: self.email_api_key.take(),
        }
    }

    fn no_email_policy(&self) -> NoEmailPolicy {
        if self.no_email_ok {
            NoEmailPolicy::Succeed
        } else {
            NoEmailPolicy::Fail
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            print_error(&format!("{:#}", e));
            EXIT_FAILURE
        }
    };
    std::process::exit(code);
}

async fn run(mut cli: Cli) -> anyhow::Result<i32> {
    let policy = cli.no_email_policy();
    let config = match &cli.config {
        Some(path) => {
            Config::load_from(path).with_context(|| format!("loading {}", path.display()))?
        }
        None => Config::embedded().context("loading embedded configuration")?,
    };
    let env = Environment::resolve(cli.raw_environment())?;

    info!("Processing PR {} in {}", env.target, env.repository);

    let http = config.http.build_client()?;
    let domains: Arc<dyn MailDomainCheck> = if config.validation.check_deliverability {
        Arc::new(DnsMailDomainCheck::from_system_conf().context("initializing DNS resolver")?)
    } else {
        warn!("Mail-domain deliverability check is disabled");
        Arc::new(SkipMailDomainCheck)
    };
    let platform = Arc::new(GitHubClient::new(
        http.clone(),
        &config.github,
        env.github_token,
    ));
    let provisioner = Arc::new(ProvisioningClient::new(
        http.clone(),
        &config.provisioning,
        env.provisioning_api_key,
    ));
    let sender = Arc::new(SendGridClient::new(http, &config.email, env.email_api_key));

    let pipeline = Pipeline::new(
        platform,
        provisioner,
        sender,
        EmailLocator::new(domains),
        &config,
    );
    let report = pipeline.run(&env.repository, &env.target).await;
    debug!("Run finished at {}", report.final_stage());

    match &report.outcome {
        RunOutcome::Completed {
            email,
            pull_request,
        } => print_success(&format!(
            "API key sent to {} for PR #{}",
            email, pull_request
        )),
        RunOutcome::Aborted {
            reason: AbortReason::NoEmail,
            detail,
            ..
        } => print_warning(detail),
        RunOutcome::Aborted {
            stage,
            reason,
            detail,
        } => print_error(&format!("{} during {}: {}", reason, stage, detail)),
    }
    println!("  {}", style_dim(&format_stages(&report.stages)));

    Ok(report.outcome.exit_code(policy))
}

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::{generate, Shell};
use std::io::{self, Write};
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use shellpilot::cache::DiagnosticCache;
use shellpilot::cli::Cli;
use shellpilot::config::Config;
use shellpilot::credentials::{
    self, CredentialResolver, CredentialStore, ResolvePolicy, TerminalPrompter,
};
use shellpilot::output;
use shellpilot::pipeline::Pipeline;
use shellpilot::providers::OpenAIProvider;
use shellpilot::runner::{self, CommandRunner};

/// Log to stderr so the wrapped command's stdout stays untouched.
fn init_tracing() {
    let filter = EnvFilter::try_from_env("SHELLPILOT_LOG")
        .unwrap_or_else(|_| EnvFilter::new("shellpilot=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "shellpilot", &mut io::stdout());
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let config = Config::load();

    if cli.clear_cache {
        let cache = DiagnosticCache::new(config.cache_dir());
        let removed = cache
            .clear()
            .with_context(|| format!("Failed to clear cache at {}", cache.dir().display()))?;
        output::print_cache_cleared(removed);
        return Ok(());
    }

    if let Some(shell) = cli.completions {
        print_completions(shell);
        return Ok(());
    }

    let Some((program, args)) = cli.command.split_first() else {
        Cli::command().print_help()?;
        return Ok(());
    };
    let command_line = runner::command_line(program, args);

    let provider = Arc::new(
        OpenAIProvider::new(&config.diagnosis).context("Failed to set up the AI client")?,
    );
    tracing::debug!(model = provider.model_name(), "diagnostic service configured");

    let policy = if config.credentials.persist_prompted {
        ResolvePolicy::Persist
    } else {
        ResolvePolicy::SessionOnly
    };
    let resolver = CredentialResolver::new(
        credentials::key_from_env(),
        config.store_path().map(CredentialStore::new),
        policy,
    );

    let mut pipeline = Pipeline::new(
        CommandRunner::new(),
        resolver,
        Box::new(TerminalPrompter::new()),
        provider.clone(),
        provider,
    );
    if config.cache.enabled {
        pipeline =
            pipeline.with_cache(DiagnosticCache::new(config.cache_dir()), config.cache_ttl());
    }

    let code = match pipeline.run(&command_line).await {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            eprintln!("{}", output::format_error(&e.to_string(), e.tip()));
            e.exit_code()
        }
    };

    io::stdout().flush()?;
    process::exit(code);
}

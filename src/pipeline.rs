//! Run a command and, if it fails, diagnose its output.
//!
//! Flow: prune cache → run → (failure) fingerprint → cache lookup →
//! (miss) resolve credential → diagnose → cache store → print.
//!
//! This module is the one place that turns component errors into
//! user-visible messages and process exit codes.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::cache::{cache_key, DiagnosticCache};
use crate::credentials::{CredentialError, CredentialResolver, KeyPrompter, SessionContext};
use crate::output;
use crate::providers::{DiagnosisError, DiagnosticClient, KeyValidator};
use crate::runner::{CapturedFailure, CommandRunner, ExecutionResult, RunError};

/// Wrapped command failed and reported no usable exit code
pub const EXIT_COMMAND_FAILED: i32 = 1;
/// No credential could be resolved, so no diagnosis was attempted
pub const EXIT_CREDENTIALS_UNRESOLVED: i32 = 3;
/// A diagnosis was attempted and the service call failed
pub const EXIT_DIAGNOSIS_FAILED: i32 = 4;
/// The shell itself could not be started
pub const EXIT_SPAWN_FAILED: i32 = 126;
/// The key prompt was interrupted
pub const EXIT_INTERRUPTED: i32 = 130;

/// How a pipeline run ended when nothing went wrong on our side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Succeeded,
    /// The command failed without any output to diagnose
    NoOutput { exit_code: Option<i32> },
    Diagnosed {
        exit_code: Option<i32>,
        diagnosis: String,
        cached: bool,
    },
}

impl PipelineOutcome {
    /// Process exit code: the wrapped command's status is preserved.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineOutcome::Succeeded => 0,
            PipelineOutcome::NoOutput { exit_code }
            | PipelineOutcome::Diagnosed { exit_code, .. } => failed_exit_code(*exit_code),
        }
    }
}

fn failed_exit_code(code: Option<i32>) -> i32 {
    code.filter(|c| *c != 0).unwrap_or(EXIT_COMMAND_FAILED)
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Spawn(#[from] RunError),

    #[error("could not resolve an API key: {0}")]
    CredentialUnresolved(#[source] CredentialError),

    #[error("AI failed to respond: {0}")]
    Diagnosis(#[source] DiagnosisError),
}

impl PipelineError {
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Spawn(_) => EXIT_SPAWN_FAILED,
            PipelineError::CredentialUnresolved(CredentialError::Cancelled) => EXIT_INTERRUPTED,
            PipelineError::CredentialUnresolved(_) => EXIT_CREDENTIALS_UNRESOLVED,
            PipelineError::Diagnosis(_) => EXIT_DIAGNOSIS_FAILED,
        }
    }

    /// Hint shown under the error message
    pub fn tip(&self) -> Option<&'static str> {
        match self {
            PipelineError::Spawn(_) => None,
            PipelineError::CredentialUnresolved(CredentialError::Cancelled) => None,
            PipelineError::CredentialUnresolved(_) => {
                Some("set SHELLPILOT_OPENAI_KEY or run again and paste a valid key")
            }
            PipelineError::Diagnosis(_) => Some("Check your API key or connection."),
        }
    }
}

/// Orchestrates one invocation
pub struct Pipeline {
    runner: CommandRunner,
    cache: Option<DiagnosticCache>,
    ttl: Duration,
    resolver: CredentialResolver,
    session: SessionContext,
    prompter: Box<dyn KeyPrompter>,
    validator: Arc<dyn KeyValidator>,
    client: Arc<dyn DiagnosticClient>,
}

impl Pipeline {
    pub fn new(
        runner: CommandRunner,
        resolver: CredentialResolver,
        prompter: Box<dyn KeyPrompter>,
        validator: Arc<dyn KeyValidator>,
        client: Arc<dyn DiagnosticClient>,
    ) -> Self {
        Self {
            runner,
            cache: None,
            ttl: crate::cache::DEFAULT_TTL,
            resolver,
            session: SessionContext::new(),
            prompter,
            validator,
            client,
        }
    }

    /// Enable the diagnosis cache with the given retention window
    pub fn with_cache(mut self, cache: DiagnosticCache, ttl: Duration) -> Self {
        self.cache = Some(cache);
        self.ttl = ttl;
        self
    }

    pub async fn run(&mut self, command_line: &str) -> Result<PipelineOutcome, PipelineError> {
        if let Some(cache) = &self.cache {
            cache.prune(SystemTime::now(), self.ttl);
        }

        output::print_running(command_line);

        let (exit_code, stdout, stderr) = match self.runner.run(command_line).await? {
            ExecutionResult::Success => {
                output::print_success();
                return Ok(PipelineOutcome::Succeeded);
            }
            ExecutionResult::Failure {
                exit_code,
                stdout,
                stderr,
            } => (exit_code, stdout, stderr),
        };

        output::print_failure(exit_code);

        let Some(failure) = CapturedFailure::from_streams(command_line, &stdout, &stderr) else {
            output::print_no_output();
            return Ok(PipelineOutcome::NoOutput { exit_code });
        };

        let key = cache_key(failure.command(), failure.output());

        if let Some(diagnosis) = self.cache.as_ref().and_then(|c| c.lookup(&key)) {
            output::print_cached_header();
            output::print_diagnosis(&diagnosis);
            return Ok(PipelineOutcome::Diagnosed {
                exit_code,
                diagnosis,
                cached: true,
            });
        }

        let credential = self
            .resolver
            .resolve(
                &mut self.session,
                self.prompter.as_mut(),
                self.validator.as_ref(),
            )
            .await
            .map_err(PipelineError::CredentialUnresolved)?;
        tracing::debug!(origin = ?credential.origin(), "credential resolved");

        output::print_consulting();
        let diagnosis = self
            .client
            .diagnose(&credential, failure.command(), failure.output())
            .await
            .map_err(PipelineError::Diagnosis)?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.store(&key, &diagnosis) {
                tracing::warn!(error = %e, dir = %cache.dir().display(), "could not cache diagnosis");
            }
        }

        output::print_analysis_complete();
        output::print_diagnosis(&diagnosis);

        Ok(PipelineOutcome::Diagnosed {
            exit_code,
            diagnosis,
            cached: false,
        })
    }
}

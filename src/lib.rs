//! shellpilot - run a command, and when it fails, explain why with AI
//!
//! This library provides the failure-capture-and-diagnosis pipeline behind
//! the `shellpilot` CLI: subprocess capture, the diagnosis cache, credential
//! resolution and the diagnostic service client.

pub mod cache;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod output;
pub mod pipeline;
pub mod providers;
pub mod runner;

// Re-export commonly used types
pub use cache::{cache_key, CacheKey, DiagnosticCache};
pub use cli::Cli;
pub use config::Config;
pub use credentials::{Credential, CredentialOrigin, CredentialResolver, CredentialStore};
pub use pipeline::{Pipeline, PipelineError, PipelineOutcome};
pub use providers::{DiagnosisError, DiagnosticClient, KeyValidator};
pub use runner::{CapturedFailure, CommandRunner, ExecutionResult};

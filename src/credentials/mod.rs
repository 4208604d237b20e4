//! API key handling for the diagnostic service.

pub mod prompt;
pub mod resolver;
pub mod store;

use std::fmt;

pub use prompt::{KeyPrompter, PromptError, TerminalPrompter};
pub use resolver::{CredentialError, CredentialResolver, ResolvePolicy};
pub use store::CredentialStore;

/// Environment variable carrying an operator-supplied key
pub const API_KEY_ENV_VAR: &str = "SHELLPILOT_OPENAI_KEY";

/// Where the active credential came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialOrigin {
    Environment,
    Store,
    Session,
    Prompt,
}

/// An API key. Debug output never shows the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    secret: String,
    origin: CredentialOrigin,
}

impl Credential {
    pub fn new(secret: impl Into<String>, origin: CredentialOrigin) -> Self {
        Self {
            secret: secret.into(),
            origin,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn origin(&self) -> CredentialOrigin {
        self.origin
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("secret", &"<redacted>")
            .field("origin", &self.origin)
            .finish()
    }
}

/// Read the key from the environment, ignoring empty values.
pub fn key_from_env() -> Option<String> {
    std::env::var(API_KEY_ENV_VAR)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// In-memory state that lives for one process: a key entered at the prompt
/// when it is not persisted.
#[derive(Debug, Default)]
pub struct SessionContext {
    key: Option<String>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn remember(&mut self, key: &str) {
        self.key = Some(key.to_string());
    }

    pub fn forget(&mut self) {
        self.key = None;
    }
}

//! Credential resolution.
//!
//! Order: environment, session, store, interactive prompt. Environment keys are
//! trusted as-is; every other candidate is validated remotely. A rejected key
//! earns exactly one re-prompt, so a resolution performs at most
//! [`MAX_VALIDATIONS`] validations and never loops.

use std::io;
use std::path::PathBuf;

use super::prompt::{KeyPrompter, PromptError};
use super::store::CredentialStore;
use super::{Credential, CredentialOrigin, SessionContext, API_KEY_ENV_VAR};
use crate::providers::{DiagnosisError, KeyCheck, KeyValidator};

/// Initial validation plus one retry
pub const MAX_VALIDATIONS: u32 = 2;

const PASTE_PROMPT: &str = "Paste your OpenAI API key (input hidden):";

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("no credential provided")]
    NotProvided,

    #[error("API key rejected after {attempts} attempts")]
    Rejected { attempts: u32 },

    #[error("API key entry cancelled")]
    Cancelled,

    #[error("could not validate API key: {0}")]
    Validation(#[source] DiagnosisError),

    #[error("failed to read API key: {0}")]
    Prompt(#[source] io::Error),
}

/// What happens to a key entered at the prompt once it validates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvePolicy {
    /// Write it to the credential store
    Persist,
    /// Keep it in the session context only
    SessionOnly,
}

#[derive(Debug)]
enum State {
    Start,
    EnvPresent(String),
    StoredPresent(String),
    PromptRequired,
    Validating(Credential),
    RetryPrompt(CredentialOrigin),
    Resolved(Credential),
    Failed(CredentialError),
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Start => "start",
            State::EnvPresent(_) => "env-present",
            State::StoredPresent(_) => "stored-present",
            State::PromptRequired => "prompt-required",
            State::Validating(_) => "validating",
            State::RetryPrompt(_) => "retry-prompt",
            State::Resolved(_) => "resolved",
            State::Failed(_) => "failed",
        }
    }
}

/// Produces the single active credential for a pipeline run
#[derive(Debug, Clone)]
pub struct CredentialResolver {
    env_key: Option<String>,
    store: Option<CredentialStore>,
    policy: ResolvePolicy,
}

impl CredentialResolver {
    pub fn new(
        env_key: Option<String>,
        store: Option<CredentialStore>,
        policy: ResolvePolicy,
    ) -> Self {
        Self {
            env_key,
            store,
            policy,
        }
    }

    fn store_path(&self) -> Option<PathBuf> {
        self.store.as_ref().map(|s| s.path().to_path_buf())
    }

    fn first_prompt(&self) -> String {
        let retention = match (self.policy, self.store_path()) {
            (ResolvePolicy::Persist, Some(path)) => {
                format!("The key will be saved to {} once it is verified.", path.display())
            }
            _ => "The key will be used for this session only and will not be saved.".to_string(),
        };
        format!(
            "{API_KEY_ENV_VAR} not found\n\n\
             shellpilot needs an OpenAI API key to run.\n\
             {retention}\n\n\
             {PASTE_PROMPT}"
        )
    }

    fn retry_prompt(&self, rejected: CredentialOrigin) -> String {
        let reason = match (rejected, self.store_path()) {
            (CredentialOrigin::Store, Some(path)) => format!(
                "The API key saved in {} was rejected by OpenAI.\n\
                 Enter a new key to replace it.",
                path.display()
            ),
            (CredentialOrigin::Session, _) => {
                "The API key entered earlier in this session was rejected by OpenAI.".to_string()
            }
            _ => "Invalid OpenAI API key. Please try again.".to_string(),
        };
        format!("{reason}\n\n{PASTE_PROMPT}")
    }

    /// Run the resolution state machine to completion.
    pub async fn resolve(
        &self,
        session: &mut SessionContext,
        prompter: &mut dyn KeyPrompter,
        validator: &dyn KeyValidator,
    ) -> Result<Credential, CredentialError> {
        let mut validations = 0u32;
        let mut last_rejected: Option<String> = None;
        let mut state = State::Start;

        loop {
            tracing::debug!(state = state.name(), validations, "credential resolution");

            state = match state {
                State::Start => {
                    if let Some(key) = &self.env_key {
                        State::EnvPresent(key.clone())
                    } else if let Some(key) = session.key() {
                        State::Validating(Credential::new(key, CredentialOrigin::Session))
                    } else if let Some(key) = self.store.as_ref().and_then(|s| s.load()) {
                        State::StoredPresent(key)
                    } else {
                        State::PromptRequired
                    }
                }

                State::EnvPresent(key) => {
                    State::Resolved(Credential::new(key, CredentialOrigin::Environment))
                }

                State::StoredPresent(key) => {
                    State::Validating(Credential::new(key, CredentialOrigin::Store))
                }

                State::PromptRequired => ask(prompter, &self.first_prompt()),

                State::RetryPrompt(rejected) => ask(prompter, &self.retry_prompt(rejected)),

                State::Validating(candidate) => {
                    validations += 1;

                    // The key that was just refused is rejected again without a remote call.
                    let check = if last_rejected.as_deref() == Some(candidate.secret()) {
                        Ok(KeyCheck::Rejected)
                    } else {
                        validator.validate_key(candidate.secret()).await
                    };

                    match check {
                        Ok(KeyCheck::Accepted) => {
                            self.adopt(&candidate, session);
                            State::Resolved(candidate)
                        }
                        Ok(KeyCheck::Rejected) => {
                            if candidate.origin() == CredentialOrigin::Session {
                                session.forget();
                            }
                            if validations < MAX_VALIDATIONS {
                                last_rejected = Some(candidate.secret().to_string());
                                State::RetryPrompt(candidate.origin())
                            } else {
                                State::Failed(CredentialError::Rejected {
                                    attempts: validations,
                                })
                            }
                        }
                        Err(e) => State::Failed(CredentialError::Validation(e)),
                    }
                }

                State::Resolved(credential) => return Ok(credential),

                State::Failed(error) => return Err(error),
            };
        }
    }

    /// Keep a freshly validated prompted key according to the policy.
    fn adopt(&self, credential: &Credential, session: &mut SessionContext) {
        if credential.origin() != CredentialOrigin::Prompt {
            return;
        }

        if let (ResolvePolicy::Persist, Some(store)) = (self.policy, &self.store) {
            match store.save(credential.secret()) {
                Ok(()) => {
                    tracing::debug!(path = %store.path().display(), "saved API key");
                    return;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "could not save API key; keeping it for this session")
                }
            }
        }
        session.remember(credential.secret());
    }
}

fn ask(prompter: &mut dyn KeyPrompter, message: &str) -> State {
    match prompter.prompt_key(message) {
        Ok(key) if key.is_empty() => State::Failed(CredentialError::NotProvided),
        Ok(key) => State::Validating(Credential::new(key, CredentialOrigin::Prompt)),
        Err(PromptError::Interrupted) => State::Failed(CredentialError::Cancelled),
        Err(PromptError::Io(e)) => State::Failed(CredentialError::Prompt(e)),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Replays scripted answers and records how often it was asked
    pub(crate) struct ScriptedPrompter {
        answers: VecDeque<Result<String, PromptError>>,
        pub prompts: Vec<String>,
    }

    impl ScriptedPrompter {
        pub(crate) fn new(answers: &[&str]) -> Self {
            Self {
                answers: answers.iter().map(|a| Ok(a.to_string())).collect(),
                prompts: Vec::new(),
            }
        }

        fn interrupted() -> Self {
            Self {
                answers: VecDeque::from([Err(PromptError::Interrupted)]),
                prompts: Vec::new(),
            }
        }
    }

    impl KeyPrompter for ScriptedPrompter {
        fn prompt_key(&mut self, message: &str) -> Result<String, PromptError> {
            self.prompts.push(message.to_string());
            self.answers
                .pop_front()
                .unwrap_or_else(|| panic!("unexpected prompt #{}", self.prompts.len()))
        }
    }

    /// Accepts a fixed set of keys and records every key it was asked about
    pub(crate) struct FakeValidator {
        valid: Vec<String>,
        unavailable: bool,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeValidator {
        pub(crate) fn accepting(valid: &[&str]) -> Self {
            Self {
                valid: valid.iter().map(|k| k.to_string()).collect(),
                unavailable: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn unavailable() -> Self {
            Self {
                unavailable: true,
                ..Self::accepting(&[])
            }
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl KeyValidator for FakeValidator {
        async fn validate_key(&self, key: &str) -> Result<KeyCheck, DiagnosisError> {
            self.calls.lock().unwrap().push(key.to_string());
            if self.unavailable {
                return Err(DiagnosisError::Network("connection refused".to_string()));
            }
            if self.valid.iter().any(|k| k == key) {
                Ok(KeyCheck::Accepted)
            } else {
                Ok(KeyCheck::Rejected)
            }
        }
    }

    fn store() -> (TempDir, CredentialStore) {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path().join("config.json"));
        (dir, store)
    }

    fn resolver(
        env: Option<&str>,
        store: &CredentialStore,
        policy: ResolvePolicy,
    ) -> CredentialResolver {
        CredentialResolver::new(env.map(str::to_string), Some(store.clone()), policy)
    }

    #[tokio::test]
    async fn test_env_key_skips_prompt_and_validation() {
        let (_dir, store) = store();
        store.save("sk-stored").unwrap();
        let mut prompter = ScriptedPrompter::new(&[]);
        let validator = FakeValidator::accepting(&[]);

        let cred = resolver(Some("sk-env"), &store, ResolvePolicy::Persist)
            .resolve(&mut SessionContext::new(), &mut prompter, &validator)
            .await
            .unwrap();

        assert_eq!(cred.secret(), "sk-env");
        assert_eq!(cred.origin(), CredentialOrigin::Environment);
        assert!(prompter.prompts.is_empty());
        assert!(validator.calls().is_empty());
        assert_eq!(store.load().as_deref(), Some("sk-stored"));
    }

    #[tokio::test]
    async fn test_stored_key_validated_once() {
        let (_dir, store) = store();
        store.save("sk-stored").unwrap();
        let mut prompter = ScriptedPrompter::new(&[]);
        let validator = FakeValidator::accepting(&["sk-stored"]);

        let cred = resolver(None, &store, ResolvePolicy::Persist)
            .resolve(&mut SessionContext::new(), &mut prompter, &validator)
            .await
            .unwrap();

        assert_eq!(cred.origin(), CredentialOrigin::Store);
        assert_eq!(validator.calls(), vec!["sk-stored"]);
        assert!(prompter.prompts.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_stored_key_then_valid_prompt() {
        let (_dir, store) = store();
        store.save("sk-expired").unwrap();
        let mut prompter = ScriptedPrompter::new(&["sk-new"]);
        let validator = FakeValidator::accepting(&["sk-new"]);

        let cred = resolver(None, &store, ResolvePolicy::Persist)
            .resolve(&mut SessionContext::new(), &mut prompter, &validator)
            .await
            .unwrap();

        assert_eq!(cred.secret(), "sk-new");
        assert_eq!(validator.calls(), vec!["sk-expired", "sk-new"]);
        assert_eq!(prompter.prompts.len(), 1);
        let expected = format!("The API key saved in {} was rejected", store.path().display());
        assert!(prompter.prompts[0].starts_with(&expected));
        assert!(!prompter.prompts[0].contains("Please try again"));
        assert_eq!(store.load().as_deref(), Some("sk-new"));
    }

    #[tokio::test]
    async fn test_rejected_session_key_is_forgotten_and_reprompted() {
        let (_dir, store) = store();
        let mut session = SessionContext::new();
        session.remember("sk-revoked");
        let mut prompter = ScriptedPrompter::new(&["sk-new"]);
        let validator = FakeValidator::accepting(&["sk-new"]);

        let cred = resolver(None, &store, ResolvePolicy::SessionOnly)
            .resolve(&mut session, &mut prompter, &validator)
            .await
            .unwrap();

        assert_eq!(cred.secret(), "sk-new");
        assert!(prompter.prompts[0].contains("earlier in this session was rejected"));
        assert_eq!(session.key(), Some("sk-new"));
    }

    #[tokio::test]
    async fn test_invalid_then_valid_prompt_persists_valid_key() {
        let (_dir, store) = store();
        let mut prompter = ScriptedPrompter::new(&["sk-bad", "sk-good"]);
        let validator = FakeValidator::accepting(&["sk-good"]);

        let cred = resolver(None, &store, ResolvePolicy::Persist)
            .resolve(&mut SessionContext::new(), &mut prompter, &validator)
            .await
            .unwrap();

        assert_eq!(cred.secret(), "sk-good");
        assert_eq!(cred.origin(), CredentialOrigin::Prompt);
        assert_eq!(validator.calls(), vec!["sk-bad", "sk-good"]);
        assert_eq!(prompter.prompts.len(), 2);
        assert!(prompter.prompts[0].contains(API_KEY_ENV_VAR));
        assert!(prompter.prompts[1].starts_with("Invalid OpenAI API key. Please try again."));
        assert_eq!(store.load().as_deref(), Some("sk-good"));
    }

    #[tokio::test]
    async fn test_two_invalid_keys_stop_after_two_prompts() {
        let (_dir, store) = store();
        let mut prompter = ScriptedPrompter::new(&["sk-bad-1", "sk-bad-2", "sk-never-asked"]);
        let validator = FakeValidator::accepting(&["sk-never-asked"]);

        let err = resolver(None, &store, ResolvePolicy::Persist)
            .resolve(&mut SessionContext::new(), &mut prompter, &validator)
            .await
            .unwrap_err();

        assert!(matches!(err, CredentialError::Rejected { attempts: 2 }));
        assert_eq!(prompter.prompts.len(), 2);
        assert_eq!(validator.calls(), vec!["sk-bad-1", "sk-bad-2"]);
        assert!(store.load().is_none());
    }

    #[tokio::test]
    async fn test_stored_and_retry_both_rejected() {
        let (_dir, store) = store();
        store.save("sk-expired").unwrap();
        let mut prompter = ScriptedPrompter::new(&["sk-bad"]);
        let validator = FakeValidator::accepting(&[]);

        let err = resolver(None, &store, ResolvePolicy::Persist)
            .resolve(&mut SessionContext::new(), &mut prompter, &validator)
            .await
            .unwrap_err();

        assert!(matches!(err, CredentialError::Rejected { attempts: 2 }));
        assert_eq!(prompter.prompts.len(), 1);
        assert_eq!(validator.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_reentered_rejected_key_is_not_revalidated() {
        let (_dir, store) = store();
        let mut prompter = ScriptedPrompter::new(&["sk-bad", "sk-bad"]);
        let validator = FakeValidator::accepting(&[]);

        let err = resolver(None, &store, ResolvePolicy::Persist)
            .resolve(&mut SessionContext::new(), &mut prompter, &validator)
            .await
            .unwrap_err();

        assert!(matches!(err, CredentialError::Rejected { attempts: 2 }));
        assert_eq!(validator.calls(), vec!["sk-bad"]);
    }

    #[tokio::test]
    async fn test_empty_input_fails_without_validation() {
        let (_dir, store) = store();
        let mut prompter = ScriptedPrompter::new(&[""]);
        let validator = FakeValidator::accepting(&[]);

        let err = resolver(None, &store, ResolvePolicy::Persist)
            .resolve(&mut SessionContext::new(), &mut prompter, &validator)
            .await
            .unwrap_err();

        assert!(matches!(err, CredentialError::NotProvided));
        assert_eq!(err.to_string(), "no credential provided");
        assert!(validator.calls().is_empty());
    }

    #[tokio::test]
    async fn test_interrupted_prompt_persists_nothing() {
        let (_dir, store) = store();
        let mut prompter = ScriptedPrompter::interrupted();
        let validator = FakeValidator::accepting(&[]);
        let mut session = SessionContext::new();

        let err = resolver(None, &store, ResolvePolicy::Persist)
            .resolve(&mut session, &mut prompter, &validator)
            .await
            .unwrap_err();

        assert!(matches!(err, CredentialError::Cancelled));
        assert!(store.load().is_none());
        assert!(!store.path().exists());
        assert!(session.key().is_none());
    }

    #[tokio::test]
    async fn test_validation_outage_is_terminal() {
        let (_dir, store) = store();
        let mut prompter = ScriptedPrompter::new(&["sk-maybe"]);
        let validator = FakeValidator::unavailable();

        let err = resolver(None, &store, ResolvePolicy::Persist)
            .resolve(&mut SessionContext::new(), &mut prompter, &validator)
            .await
            .unwrap_err();

        assert!(matches!(err, CredentialError::Validation(_)));
        assert_eq!(prompter.prompts.len(), 1);
        assert!(store.load().is_none());
    }

    #[tokio::test]
    async fn test_session_only_policy_keeps_key_in_memory() {
        let (_dir, store) = store();
        let validator = FakeValidator::accepting(&["sk-session"]);
        let resolver = resolver(None, &store, ResolvePolicy::SessionOnly);
        let mut session = SessionContext::new();

        let mut first = ScriptedPrompter::new(&["sk-session"]);
        resolver
            .resolve(&mut session, &mut first, &validator)
            .await
            .unwrap();
        assert!(first.prompts[0].contains("session only"));
        assert!(store.load().is_none());
        assert_eq!(session.key(), Some("sk-session"));

        let mut second = ScriptedPrompter::new(&[]);
        let cred = resolver
            .resolve(&mut session, &mut second, &validator)
            .await
            .unwrap();
        assert_eq!(cred.origin(), CredentialOrigin::Session);
        assert!(second.prompts.is_empty());
    }

    #[tokio::test]
    async fn test_unsaveable_store_falls_back_to_session() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let store = CredentialStore::new(blocker.join("config.json"));

        let mut prompter = ScriptedPrompter::new(&["sk-good"]);
        let validator = FakeValidator::accepting(&["sk-good"]);
        let mut session = SessionContext::new();

        let cred = resolver(None, &store, ResolvePolicy::Persist)
            .resolve(&mut session, &mut prompter, &validator)
            .await
            .unwrap();

        assert_eq!(cred.secret(), "sk-good");
        assert_eq!(session.key(), Some("sk-good"));
    }

    #[tokio::test]
    async fn test_without_store_prompts_directly() {
        let resolver = CredentialResolver::new(None, None, ResolvePolicy::Persist);
        let mut prompter = ScriptedPrompter::new(&["sk-good"]);
        let validator = FakeValidator::accepting(&["sk-good"]);
        let mut session = SessionContext::new();

        let cred = resolver
            .resolve(&mut session, &mut prompter, &validator)
            .await
            .unwrap();

        assert_eq!(cred.secret(), "sk-good");
        assert!(prompter.prompts[0].contains("session only"));
        assert_eq!(session.key(), Some("sk-good"));
    }
}

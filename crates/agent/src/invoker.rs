use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ventix_core::clock::Clock;
use ventix_core::config::ProviderConfig;

use crate::llm::{ProviderError, RemoteClassifier};
use crate::pool::{Cursor, ProviderPool};

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ExhaustedError {
    #[error("no provider credentials or models are configured")]
    NoCredentials,
    #[error("every provider credential is cooling down")]
    AllCredentialsCooldown,
    #[error("all credential/model combinations failed after {attempts} attempts")]
    AllCombinationsExhausted { attempts: usize },
    #[error("provider deadline of {deadline:?} exceeded")]
    DeadlineExceeded { deadline: Duration },
    #[error("provider invocation was cancelled")]
    Cancelled,
}

impl ExhaustedError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoCredentials => "no_credentials",
            Self::AllCredentialsCooldown => "all_credentials_cooldown",
            Self::AllCombinationsExhausted { .. } => "all_combinations_exhausted",
            Self::DeadlineExceeded { .. } => "deadline_exceeded",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InvokerSettings {
    pub call_timeout: Duration,
    pub invoke_deadline: Duration,
}

impl InvokerSettings {
    pub fn from_config(config: &ProviderConfig) -> Self {
        Self {
            call_timeout: Duration::from_secs(config.call_timeout_secs),
            invoke_deadline: Duration::from_secs(config.invoke_deadline_secs),
        }
    }

    /// The configured deadline, stretched so one full credential rotation fits.
    pub fn effective_deadline(&self, credentials: usize) -> Duration {
        let rotation = self.call_timeout.saturating_mul(u32::try_from(credentials).unwrap_or(u32::MAX));
        self.invoke_deadline.max(rotation)
    }
}

/// Drives one request through the credential × model cascade.
///
/// Attempts are strictly sequential and bounded by the number of pool
/// combinations; no pair is tried twice within one invocation.
pub struct ResilientInvoker {
    pool: Arc<ProviderPool>,
    classifier: Arc<dyn RemoteClassifier>,
    clock: Arc<dyn Clock>,
    settings: InvokerSettings,
}

impl ResilientInvoker {
    pub fn new(
        pool: Arc<ProviderPool>,
        classifier: Arc<dyn RemoteClassifier>,
        clock: Arc<dyn Clock>,
        settings: InvokerSettings,
    ) -> Self {
        Self { pool, classifier, clock, settings }
    }

    pub fn pool(&self) -> &Arc<ProviderPool> {
        &self.pool
    }

    pub async fn invoke(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ExhaustedError> {
        if self.pool.is_empty() {
            return Err(ExhaustedError::NoCredentials);
        }
        let deadline = self.settings.effective_deadline(self.pool.shape().credentials);

        // Pool state only changes synchronously after a call has returned, so
        // dropping the cascade at an await point leaves it consistent.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(event_name = "agent.invoker.cancelled", "provider invocation cancelled");
                Err(ExhaustedError::Cancelled)
            }
            outcome = tokio::time::timeout(deadline, self.cascade(prompt)) => {
                outcome.unwrap_or_else(|_| {
                    warn!(
                        event_name = "agent.invoker.deadline",
                        deadline_ms = deadline.as_millis() as u64,
                        "provider deadline exceeded"
                    );
                    Err(ExhaustedError::DeadlineExceeded { deadline })
                })
            }
        }
    }

    async fn cascade(&self, prompt: &str) -> Result<String, ExhaustedError> {
        let origin = self.pool.cursor();
        let budget = self.pool.shape().combinations();
        let mut attempted: HashSet<Cursor> = HashSet::with_capacity(budget);

        while attempted.len() < budget {
            let cursor = self
                .pool
                .select(self.clock.now())
                .map_err(|_| ExhaustedError::AllCredentialsCooldown)?
                .cursor;
            if !attempted.insert(cursor) {
                break;
            }

            let (Some(credential), Some(model)) =
                (self.pool.credential(cursor.credential), self.pool.model(cursor.model))
            else {
                break;
            };

            debug!(
                event_name = "agent.invoker.attempt",
                credential_index = cursor.credential,
                model,
                attempt = attempted.len(),
                "calling remote classifier"
            );

            let outcome = match tokio::time::timeout(
                self.settings.call_timeout,
                self.classifier.call(prompt, model, credential),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(ProviderError::Transient(format!(
                    "call timed out after {}ms",
                    self.settings.call_timeout.as_millis()
                ))),
            };

            match outcome {
                Ok(text) => {
                    info!(
                        event_name = "agent.invoker.success",
                        credential_index = cursor.credential,
                        model,
                        attempts = attempted.len(),
                        "remote classifier answered"
                    );
                    return Ok(text);
                }
                Err(error) => {
                    let transition =
                        self.pool.record_failure(cursor, error.kind(), self.clock.now());
                    warn!(
                        event_name = "agent.invoker.failure",
                        credential_index = cursor.credential,
                        model,
                        error_kind = error.kind().as_str(),
                        next_credential_index = transition.next.credential,
                        next_model_index = transition.next.model,
                        cooldown = ?transition.cooldown.map(|(_, class)| class),
                        error = %error,
                        "remote classifier call failed"
                    );
                    if transition.next == origin {
                        break;
                    }
                }
            }
        }

        Err(ExhaustedError::AllCombinationsExhausted { attempts: attempted.len() })
    }
}

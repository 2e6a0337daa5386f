use super::client::{ClassifierService, ModelConfig};
use super::parser::parse_reply;
use super::retry::{RetryPolicy, Sleeper, ThreadSleeper};
use super::ClassificationError;
use crate::pipeline::cancel::CancellationToken;
use crate::pipeline::prompt::PromptBuilder;
use crate::pipeline::types::{ClassificationResult, ErrorResult, PairingUnit};

/// Single entry point for classifying one unit.
///
/// Owns the service, the retry budget and the clock. Safe to share across
/// worker threads.
pub struct ClassifierGateway {
    service: Box<dyn ClassifierService>,
    model: ModelConfig,
    policy: RetryPolicy,
    sleeper: Box<dyn Sleeper>,
}

impl ClassifierGateway {
    pub fn new(service: Box<dyn ClassifierService>, model: ModelConfig, policy: RetryPolicy) -> Self {
        Self {
            service,
            model,
            policy,
            sleeper: Box::new(ThreadSleeper),
        }
    }

    /// Replace the real clock (tests use [`super::RecordingSleeper`]).
    pub fn with_sleeper(mut self, sleeper: Box<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn model(&self) -> &ModelConfig {
        &self.model
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Classify `unit`. Always returns a result; failures become an
    /// error sentinel carrying the last failure reason.
    pub fn classify(
        &self,
        unit: &PairingUnit<'_>,
        prompts: &dyn PromptBuilder,
        cancel: &CancellationToken,
    ) -> ClassificationResult {
        let key = unit.key();
        match self.attempt(unit, prompts, cancel) {
            Ok(result) => {
                tracing::info!(
                    key = %key,
                    pair_index = unit.pair_index,
                    kind = unit.kind().as_str(),
                    "✓ Classified"
                );
                result
            }
            Err(err) => {
                tracing::warn!(
                    key = %key,
                    pair_index = unit.pair_index,
                    kind = unit.kind().as_str(),
                    error = %err,
                    "✗ Classification failed, recording error sentinel"
                );
                ClassificationResult::Error(ErrorResult::new(
                    unit.kind(),
                    &err.to_string(),
                    unit.combined_text(),
                ))
            }
        }
    }

    fn attempt(
        &self,
        unit: &PairingUnit<'_>,
        prompts: &dyn PromptBuilder,
        cancel: &CancellationToken,
    ) -> Result<ClassificationResult, ClassificationError> {
        let prompt = prompts.build(unit);
        let mut last_error = ClassificationError::NoAttempts;

        for attempt in 1..=self.policy.max_attempts {
            if cancel.is_cancelled() {
                return Err(ClassificationError::Cancelled);
            }

            let outcome = self
                .service
                .query(&self.model, &prompt)
                .and_then(|reply| parse_reply(unit, &reply.response));

            match outcome {
                Ok(result) => {
                    if !self.policy.success_delay.is_zero() {
                        // The result is already in hand; a cancel here only
                        // cuts the rate-limit pause short.
                        let _ = self.sleeper.sleep(self.policy.success_delay, cancel);
                    }
                    return Ok(result);
                }
                Err(err) => {
                    tracing::debug!(
                        key = %unit.key(),
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        error = %err,
                        "Classifier attempt failed"
                    );
                    last_error = err;
                    if attempt < self.policy.max_attempts {
                        self.sleeper
                            .sleep(self.policy.failure_delay_for(attempt), cancel)?;
                    }
                }
            }
        }

        Err(last_error)
    }
}

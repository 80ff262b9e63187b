use crate::any::AnyProvider;
use crate::error::LlmError;
use crate::fallback::{FallbackAttempt, FallbackHandler};
use crate::provider::{Completion, LlmProvider, Message, ToolDefinition};

/// A completion together with the provider that produced it and the failures
/// that preceded it.
#[derive(Debug)]
pub struct ManagedCompletion {
    pub completion: Completion,
    pub provider: String,
    pub model: String,
    pub fallback_attempts: Vec<FallbackAttempt>,
}

/// Owns the provider chain and drives the fallback walk for each request.
#[derive(Debug)]
pub struct ProviderManager {
    providers: Vec<AnyProvider>,
    handler: FallbackHandler,
}

impl ProviderManager {
    #[must_use]
    pub fn new(providers: Vec<AnyProvider>) -> Self {
        let names = providers.iter().map(|p| p.name().to_owned()).collect();
        Self {
            providers,
            handler: FallbackHandler::new(names),
        }
    }

    #[must_use]
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(LlmProvider::name).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Context window of the first provider in the chain, which is the one
    /// requests normally land on.
    #[must_use]
    pub fn primary_context_window(&self) -> Option<usize> {
        self.providers.first().and_then(AnyProvider::context_window)
    }

    /// Try each provider in order until one answers.
    ///
    /// Failure history is cleared at the start of every call, so one request's
    /// failures never penalize the next.
    ///
    /// # Errors
    ///
    /// Returns the original error unchanged when it is not worth retrying
    /// elsewhere (authentication, malformed request), and
    /// `LlmError::AllProvidersFailed` when the whole chain is exhausted.
    pub async fn complete(
        &mut self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ManagedCompletion, LlmError> {
        self.handler.reset();

        for provider in &self.providers {
            let name = provider.name().to_owned();
            match provider.chat_with_tools(messages, tools).await {
                Ok(completion) => {
                    let fallback_attempts = self.handler.attempts().to_vec();
                    if !fallback_attempts.is_empty() {
                        tracing::info!(
                            provider = %name,
                            failed = fallback_attempts.len(),
                            "request completed after fallback"
                        );
                    }
                    self.handler.mark_success();
                    return Ok(ManagedCompletion {
                        completion,
                        provider: name,
                        model: provider.model().to_owned(),
                        fallback_attempts,
                    });
                }
                Err(e) if self.handler.should_fallback(&e) => {
                    tracing::warn!(
                        provider = %name,
                        kind = e.failure_kind().as_str(),
                        error = %e,
                        "provider failed, trying next in chain"
                    );
                    self.handler.mark_failed(&e);
                }
                Err(e) => {
                    tracing::error!(provider = %name, error = %e, "non-retriable provider error");
                    return Err(e);
                }
            }
        }

        Err(LlmError::AllProvidersFailed {
            summary: self.handler.attempt_summary(),
        })
    }
}

use crate::claude::ClaudeProvider;
use crate::compatible::CompatibleProvider;
use crate::error::LlmError;
#[cfg(feature = "mock")]
use crate::mock::MockProvider;
use crate::provider::{Completion, LlmProvider, Message, ToolDefinition};

/// Generates a match over all `AnyProvider` variants, binding the inner provider
/// and evaluating the given closure for each arm.
macro_rules! delegate_provider {
    ($self:expr, |$p:ident| $expr:expr) => {
        match $self {
            AnyProvider::Claude($p) => $expr,
            AnyProvider::Compatible($p) => $expr,
            #[cfg(feature = "mock")]
            AnyProvider::Mock($p) => $expr,
        }
    };
}

#[derive(Debug, Clone)]
pub enum AnyProvider {
    Claude(ClaudeProvider),
    Compatible(CompatibleProvider),
    #[cfg(feature = "mock")]
    Mock(MockProvider),
}

impl LlmProvider for AnyProvider {
    fn name(&self) -> &str {
        delegate_provider!(self, |p| p.name())
    }

    fn model(&self) -> &str {
        delegate_provider!(self, |p| p.model())
    }

    fn context_window(&self) -> Option<usize> {
        delegate_provider!(self, |p| p.context_window())
    }

    async fn chat_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<Completion, LlmError> {
        delegate_provider!(self, |p| p.chat_with_tools(messages, tools).await)
    }
}

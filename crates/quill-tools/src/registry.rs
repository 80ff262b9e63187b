use std::collections::BTreeMap;

use crate::tool::{Tool, ToolSpec};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("tool '{0}' is already registered")]
    DuplicateName(String),
}

/// Capability table mapping tool name to tool instance.
///
/// Mutated only during startup registration; the agent loop treats it as
/// read-only afterwards.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its name.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::DuplicateName` when a tool with the same name
    /// is already registered.
    pub fn register(&mut self, tool: Box<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_owned();
        if self.tools.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        tracing::info!(tool = %name, dangerous = tool.is_dangerous(), "registered tool");
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(AsRef::as_ref)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &dyn Tool> {
        self.tools.values().map(AsRef::as_ref)
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Specs of all registered tools, for the provider layer.
    #[must_use]
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|t| ToolSpec::of(t.as_ref())).collect()
    }

    #[must_use]
    pub fn safe_tools(&self) -> Vec<&dyn Tool> {
        self.list().filter(|t| !t.is_dangerous()).collect()
    }

    #[must_use]
    pub fn dangerous_tools(&self) -> Vec<&dyn Tool> {
        self.list().filter(|t| t.is_dangerous()).collect()
    }

    pub fn clear(&mut self) {
        self.tools.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

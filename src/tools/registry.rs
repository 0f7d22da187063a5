//! Process-wide tool catalog.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{Tool, ToolDescriptor, ToolSharing};
use crate::error::{RegistryError, ToolResult};

struct RegisteredTool {
    descriptor: ToolDescriptor,
    tool: Arc<dyn Tool>,
}

/// Registry mapping tool names to implementations.
///
/// Reads take a shared lock; registration is a short exclusive section that
/// normally only happens at startup.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, RegisteredTool>>,
    default_sharing: ToolSharing,
}

impl ToolRegistry {
    /// Create an empty registry with the given default sharing policy.
    pub fn new(default_sharing: ToolSharing) -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            default_sharing,
        }
    }

    /// Register a tool under `owner`.
    ///
    /// # Errors
    /// Returns [`RegistryError::DuplicateTool`] if the name is taken; the
    /// existing registration is left untouched.
    pub fn register(&self, tool: Arc<dyn Tool>, owner: &str) -> Result<(), RegistryError> {
        let mut descriptor = tool.descriptor();
        descriptor.owner = owner.to_string();

        let mut tools = self.tools.write();
        if let Some(existing) = tools.get(&descriptor.name) {
            warn!(
                tool = %descriptor.name,
                owner = %owner,
                existing_owner = %existing.descriptor.owner,
                "Rejected duplicate tool registration"
            );
            return Err(RegistryError::DuplicateTool {
                name: descriptor.name,
                owner: existing.descriptor.owner.clone(),
            });
        }

        info!(tool = %descriptor.name, owner = %owner, "Registered tool");
        tools.insert(descriptor.name.clone(), RegisteredTool { descriptor, tool });
        Ok(())
    }

    /// Look up a tool descriptor by name.
    pub fn lookup(&self, name: &str) -> Result<ToolDescriptor, RegistryError> {
        self.tools
            .read()
            .get(name)
            .map(|t| t.descriptor.clone())
            .ok_or_else(|| RegistryError::ToolNotFound {
                name: name.to_string(),
            })
    }

    /// Whether a tool with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    /// Tools visible to `handler`: its own plus those shared with it, sorted by name.
    pub fn list_for(&self, handler: &str) -> Vec<ToolDescriptor> {
        let mut visible: Vec<_> = self
            .tools
            .read()
            .values()
            .filter(|t| self.permits(&t.descriptor, handler))
            .map(|t| t.descriptor.clone())
            .collect();
        visible.sort_by(|a, b| a.name.cmp(&b.name));
        visible
    }

    /// Every registered tool, sorted by name.
    pub fn list_all(&self) -> Vec<ToolDescriptor> {
        let mut all: Vec<_> = self
            .tools
            .read()
            .values()
            .map(|t| t.descriptor.clone())
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Get the number of registered tools.
    pub fn count(&self) -> usize {
        self.tools.read().len()
    }

    /// Validate and run a tool on behalf of `caller`.
    pub async fn invoke(&self, name: &str, caller: &str, input: Value) -> ToolResult<Value> {
        // Clone out of the lock; a tool call must never hold it across an await.
        let (descriptor, tool) = {
            let tools = self.tools.read();
            let entry = tools.get(name).ok_or_else(|| RegistryError::ToolNotFound {
                name: name.to_string(),
            })?;
            (entry.descriptor.clone(), Arc::clone(&entry.tool))
        };

        if !self.permits(&descriptor, caller) {
            return Err(RegistryError::AccessDenied {
                tool: name.to_string(),
                handler: caller.to_string(),
            }
            .into());
        }

        let input = descriptor.prepare_input(input)?;
        debug!(tool = %name, caller = %caller, "Invoking tool");

        tool.invoke(input).await
    }

    fn permits(&self, descriptor: &ToolDescriptor, caller: &str) -> bool {
        descriptor
            .sharing
            .as_ref()
            .unwrap_or(&self.default_sharing)
            .permits(&descriptor.owner, caller)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(ToolSharing::Open)
    }
}

//! Runtime-populated registry of the child's declared tools.
//!
//! Populated from `tools/list` at startup and replaced wholesale after every
//! child restart; HTTP routes are resolved against it instead of being
//! hard-coded.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// One callable operation as declared by the child at discovery time.
///
/// Immutable for the lifetime of the child incarnation that declared it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "inputSchema", default = "default_input_schema")]
    pub input_schema: Value,

    #[serde(
        rename = "outputSchema",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub output_schema: Option<Value>,
}

fn default_input_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

/// Tool registry: tool name → descriptor.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, ToolDescriptor>>,
}

impl ToolRegistry {
    /// Swap in a freshly discovered tool set.
    pub fn replace(&self, tools: Vec<ToolDescriptor>) {
        let mut registry = HashMap::with_capacity(tools.len());
        for tool in tools {
            if registry.contains_key(&tool.name) {
                tracing::warn!(tool = %tool.name, "duplicate tool name; skipping");
                continue;
            }
            registry.insert(tool.name.clone(), tool);
        }
        *self.tools.write() = registry;
    }

    pub fn get(&self, name: &str) -> Option<ToolDescriptor> {
        self.tools.read().get(name).cloned()
    }

    /// All descriptors, sorted by name for a stable catalog.
    pub fn list(&self) -> Vec<ToolDescriptor> {
        let mut tools: Vec<ToolDescriptor> = self.tools.read().values().cloned().collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }
}

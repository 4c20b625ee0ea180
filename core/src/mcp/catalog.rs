use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::provider::ToolProvider;
use super::types::McpTool;
use crate::{RelayError, Result};

/// A tool as advertised by the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl From<McpTool> for ToolDescriptor {
    fn from(tool: McpTool) -> Self {
        Self {
            description: tool.description.unwrap_or_default(),
            name: tool.name,
            input_schema: tool.input_schema,
        }
    }
}

/// Cached tool list shared by every session.
///
/// Readers get an `Arc` snapshot and never block; `refresh` swaps in a whole
/// new list so a reader sees either the old set or the new one.
pub struct ToolCatalog {
    tools: ArcSwap<Vec<ToolDescriptor>>,
}

impl Default for ToolCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self {
            tools: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Catalog pre-populated with descriptors (tests, static setups)
    pub fn with_tools(tools: Vec<ToolDescriptor>) -> Self {
        Self {
            tools: ArcSwap::from_pointee(tools),
        }
    }

    /// Fetch the provider's tool list and replace the cached set
    pub async fn refresh(&self, provider: &dyn ToolProvider) -> Result<Arc<Vec<ToolDescriptor>>> {
        let fetched = provider.list_tools().await.map_err(RelayError::from)?;

        let mut seen = HashSet::new();
        for tool in &fetched {
            if tool.name.trim().is_empty() {
                return Err(RelayError::Protocol(format!(
                    "Provider {} listed a tool without a name",
                    provider.name()
                )));
            }
            if !seen.insert(tool.name.clone()) {
                return Err(RelayError::Protocol(format!(
                    "Provider {} listed tool {} twice",
                    provider.name(),
                    tool.name
                )));
            }
        }

        let tools: Arc<Vec<ToolDescriptor>> =
            Arc::new(fetched.into_iter().map(ToolDescriptor::from).collect());
        self.tools.store(Arc::clone(&tools));

        for tool in tools.iter() {
            debug!(target: "tool_catalog", tool = %tool.name, "Registered tool");
        }
        info!(
            target: "tool_catalog",
            provider = %provider.name(),
            count = tools.len(),
            "Tool catalog refreshed"
        );
        Ok(tools)
    }

    /// Current snapshot
    pub fn list(&self) -> Arc<Vec<ToolDescriptor>> {
        self.tools.load_full()
    }

    pub fn get(&self, name: &str) -> Option<ToolDescriptor> {
        self.tools.load().iter().find(|t| t.name == name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.load().is_empty()
    }
}

//! `ToolRegistry` — holds every registered [`Tool`] and exposes the LLM
//! schema set plus a by-name dispatcher, generalizing the teacher's
//! `build_tool_definitions` + `dispatch_tool` match-on-name pair into a
//! registered-object pattern.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use ao_domain::tool::ToolDefinition;
use serde_json::Value;

use crate::builtin::{
    ExecTool, FileAppendTool, FileDeleteTool, FileListTool, FileMoveTool, FileReadTool,
    FileWriteTool, ProcessTool,
};
use crate::manager::ProcessManager;
use crate::stubs::{BrowserTool, ComputerUseTool, SnapshotQueryTool, VcsTool, WebSearchTool};
use crate::tool::Tool;

pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Build the default registry: exec/process, workspace-sandboxed file
    /// ops, and the scoped-out stub tools (browser/computer-use, VCS, web
    /// search, snapshot query).
    pub fn with_defaults(process_manager: Arc<ProcessManager>, workspace_root: PathBuf) -> Self {
        let mut registry = Self {
            tools: HashMap::new(),
        };

        registry.register(Arc::new(ExecTool {
            manager: process_manager.clone(),
        }));
        registry.register(Arc::new(ProcessTool {
            manager: process_manager,
        }));
        registry.register(Arc::new(FileReadTool {
            workspace_root: workspace_root.clone(),
        }));
        registry.register(Arc::new(FileWriteTool {
            workspace_root: workspace_root.clone(),
        }));
        registry.register(Arc::new(FileAppendTool {
            workspace_root: workspace_root.clone(),
        }));
        registry.register(Arc::new(FileMoveTool {
            workspace_root: workspace_root.clone(),
        }));
        registry.register(Arc::new(FileDeleteTool {
            workspace_root: workspace_root.clone(),
        }));
        registry.register(Arc::new(FileListTool { workspace_root }));
        registry.register(Arc::new(BrowserTool));
        registry.register(Arc::new(ComputerUseTool));
        registry.register(Arc::new(VcsTool));
        registry.register(Arc::new(WebSearchTool));
        registry.register(Arc::new(SnapshotQueryTool));

        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn requires_confirmation(&self, name: &str) -> bool {
        self.tools
            .get(name)
            .map(|t| t.requires_confirmation())
            .unwrap_or(false)
    }

    /// The full set of `ToolDefinition`s to advertise to the LLM, sorted by
    /// name for deterministic schema hashing (the cache manager keys on a
    /// stable `tool_schema_key`).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Dispatch a tool call by name. Returns `Err` with an unknown-tool
    /// message if no tool is registered under `name`.
    pub async fn dispatch(&self, name: &str, args: Value) -> Result<Value, String> {
        match self.tools.get(name) {
            Some(tool) => tool.execute(args).await,
            None => Err(format!("unknown tool: '{name}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ao_domain::config::ExecConfig;

    fn test_registry() -> ToolRegistry {
        let manager = Arc::new(ProcessManager::new(ExecConfig::default()));
        let dir = tempfile::tempdir().unwrap();
        ToolRegistry::with_defaults(manager, dir.path().to_path_buf())
    }

    #[test]
    fn definitions_are_sorted_and_non_empty() {
        let registry = test_registry();
        let defs = registry.definitions();
        assert!(!defs.is_empty());
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[tokio::test]
    async fn dispatch_unknown_tool_errors() {
        let registry = test_registry();
        let result = registry.dispatch("does.not.exist", serde_json::json!({})).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn dispatch_file_list_roundtrips() {
        let registry = test_registry();
        let result = registry
            .dispatch("file.list", serde_json::json!({"path": "."}))
            .await
            .unwrap();
        assert_eq!(result["count"].as_u64().unwrap(), 0);
    }

    #[test]
    fn file_write_requires_confirmation() {
        let registry = test_registry();
        assert!(registry.requires_confirmation("file.write"));
        assert!(!registry.requires_confirmation("file.read"));
    }

    #[tokio::test]
    async fn stub_tool_dispatch_surfaces_error() {
        let registry = test_registry();
        let result = registry
            .dispatch("web.search", serde_json::json!({"query": "rust"}))
            .await;
        assert!(result.is_err());
    }
}

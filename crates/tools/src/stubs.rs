//! Stub tool definitions for capabilities that remain external collaborators
//! per the spec's scope: browser/computer-use, VCS, web search, and snapshot
//! query. Grounded in the teacher's "stub tools (common aliases that aren't
//! wired yet)" pattern (`web.search`/`http.request` in
//! `gateway/runtime/tools.rs`) — only the `ToolDefinition` schema and a
//! `not_implemented` executor are in scope; nothing here reaches out to a
//! real browser, VCS, or search backend.

use serde_json::Value;

use crate::tool::Tool;

fn not_implemented(name: &str, suggestion: &str) -> Result<Value, String> {
    Err(serde_json::json!({
        "error": format!("tool '{name}' is not implemented"),
        "suggestion": suggestion,
    })
    .to_string())
}

pub struct BrowserTool;

#[async_trait::async_trait]
impl Tool for BrowserTool {
    fn name(&self) -> &str {
        "browser.act"
    }

    fn description(&self) -> &str {
        "Drive a browser (navigate, click, type, screenshot). Not wired up in this deployment."
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ["navigate", "click", "type", "screenshot", "eval"] },
                "target": { "type": "string" },
                "value": { "type": "string" }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, _args: Value) -> Result<Value, String> {
        not_implemented(
            self.name(),
            "use exec with a headless-browser CLI as a workaround",
        )
    }
}

pub struct ComputerUseTool;

#[async_trait::async_trait]
impl Tool for ComputerUseTool {
    fn name(&self) -> &str {
        "computer.act"
    }

    fn description(&self) -> &str {
        "Control the desktop (move mouse, click, type, screenshot). Not wired up in this deployment."
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ["move", "click", "type", "screenshot", "key"] },
                "x": { "type": "integer" },
                "y": { "type": "integer" },
                "text": { "type": "string" }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, _args: Value) -> Result<Value, String> {
        not_implemented(self.name(), "not available in this deployment")
    }
}

pub struct VcsTool;

#[async_trait::async_trait]
impl Tool for VcsTool {
    fn name(&self) -> &str {
        "vcs.act"
    }

    fn description(&self) -> &str {
        "Version control primitives (diff, commit, branch). Not wired up in this deployment."
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ["status", "diff", "commit", "branch", "log"] },
                "message": { "type": "string" }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, _args: Value) -> Result<Value, String> {
        not_implemented(self.name(), "use exec with the git CLI as a workaround")
    }
}

pub struct WebSearchTool;

#[async_trait::async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web.search"
    }

    fn description(&self) -> &str {
        "Search the web. Not wired up in this deployment — returns an error with alternatives."
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, _args: Value) -> Result<Value, String> {
        not_implemented(
            self.name(),
            "use exec with curl or a search CLI tool as a workaround",
        )
    }
}

pub struct SnapshotQueryTool;

#[async_trait::async_trait]
impl Tool for SnapshotQueryTool {
    fn name(&self) -> &str {
        "snapshot.query"
    }

    fn description(&self) -> &str {
        "Query a previously captured environment snapshot. Not wired up in this deployment."
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "snapshot_id": { "type": "string" },
                "query": { "type": "string" }
            },
            "required": ["snapshot_id", "query"]
        })
    }

    async fn execute(&self, _args: Value) -> Result<Value, String> {
        not_implemented(self.name(), "not available in this deployment")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_tools_return_not_implemented_errors() {
        let tools: Vec<Box<dyn Tool>> = vec![
            Box::new(BrowserTool),
            Box::new(ComputerUseTool),
            Box::new(VcsTool),
            Box::new(WebSearchTool),
            Box::new(SnapshotQueryTool),
        ];
        for tool in tools {
            let result = tool.execute(serde_json::json!({})).await;
            assert!(result.is_err());
        }
    }
}

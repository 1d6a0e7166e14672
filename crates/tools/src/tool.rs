//! The `Tool` trait — the common interface every built-in and stub tool
//! implements, generalizing the teacher's `build_tool_definitions` +
//! `dispatch_tool` match-on-name pair (`gateway/runtime/tools.rs`) into a
//! registered-object pattern.

use ao_domain::tool::ToolDefinition;
use serde_json::Value;

/// A callable tool exposed to the LLM.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// The tool's name as referenced in `ToolCall::tool_name` (e.g. `"exec"`,
    /// `"file.read"`).
    fn name(&self) -> &str;

    /// Human-readable description surfaced to the LLM in its tool schema.
    fn description(&self) -> &str;

    /// Whether invoking this tool requires a HITL confirmation step before
    /// execution. Defaults to `false`.
    fn requires_confirmation(&self) -> bool {
        false
    }

    /// JSON Schema for the tool's arguments.
    fn schema(&self) -> Value;

    /// Execute the tool with the given (already-repaired) arguments.
    async fn execute(&self, args: Value) -> Result<Value, String>;

    /// The `ToolDefinition` sent to the LLM — derived from `name`/`description`/`schema`.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.schema(),
        }
    }
}

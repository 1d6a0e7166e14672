//! `Tool` wrappers around the exec/process/file_ops handlers, generalizing
//! the teacher's name-matched `dispatch_tool` (`gateway/runtime/tools.rs`)
//! into registered objects.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use crate::exec::{self, ExecRequest};
use crate::file_ops::{
    self, FileAppendRequest, FileDeleteRequest, FileListRequest, FileMoveRequest,
    FileReadRequest, FileWriteRequest,
};
use crate::manager::ProcessManager;
use crate::process::{self, ProcessRequest};
use crate::tool::Tool;

fn bad_args(tool: &str, e: impl std::fmt::Display) -> String {
    format!("invalid arguments for '{tool}': {e}")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// exec
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ExecTool {
    pub manager: Arc<ProcessManager>,
}

#[async_trait::async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Run a shell command. Returns output or a background session ID."
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Shell command to execute" },
                "background": { "type": "boolean", "description": "Run in background" },
                "workdir": { "type": "string", "description": "Working directory" },
                "timeout_sec": { "type": "integer", "description": "Hard timeout in seconds" }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let req: ExecRequest = serde_json::from_value(args).map_err(|e| bad_args("exec", e))?;
        let resp = exec::exec(&self.manager, req).await;
        serde_json::to_value(resp).map_err(|e| e.to_string())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// process
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ProcessTool {
    pub manager: Arc<ProcessManager>,
}

#[async_trait::async_trait]
impl Tool for ProcessTool {
    fn name(&self) -> &str {
        "process"
    }

    fn description(&self) -> &str {
        "Manage background processes: list, poll, log, write, kill, clear, remove."
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["list", "poll", "log", "write", "kill", "clear", "remove"],
                    "description": "Action to perform"
                },
                "session_id": { "type": "string", "description": "Process session ID" },
                "data": { "type": "string", "description": "Data to write to stdin" }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let req: ProcessRequest =
            serde_json::from_value(args).map_err(|e| bad_args("process", e))?;
        let resp = process::handle_process(&self.manager, req).await;
        serde_json::to_value(resp).map_err(|e| e.to_string())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// file ops
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct FileReadTool {
    pub workspace_root: PathBuf,
}

#[async_trait::async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file.read"
    }

    fn description(&self) -> &str {
        "Read a file's contents, optionally by line offset/limit, sandboxed to the workspace root."
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path relative to the workspace root" },
                "offset": { "type": "integer", "description": "Line number to start from (0-indexed)" },
                "limit": { "type": "integer", "description": "Maximum number of lines to return" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let req: FileReadRequest =
            serde_json::from_value(args).map_err(|e| bad_args("file.read", e))?;
        file_ops::file_read(&self.workspace_root, req).await
    }
}

pub struct FileWriteTool {
    pub workspace_root: PathBuf,
}

#[async_trait::async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file.write"
    }

    fn description(&self) -> &str {
        "Write (create or overwrite) a file, sandboxed to the workspace root."
    }

    fn requires_confirmation(&self) -> bool {
        true
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path relative to the workspace root" },
                "content": { "type": "string", "description": "File content" }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let req: FileWriteRequest =
            serde_json::from_value(args).map_err(|e| bad_args("file.write", e))?;
        file_ops::file_write(&self.workspace_root, req).await
    }
}

pub struct FileAppendTool {
    pub workspace_root: PathBuf,
}

#[async_trait::async_trait]
impl Tool for FileAppendTool {
    fn name(&self) -> &str {
        "file.append"
    }

    fn description(&self) -> &str {
        "Append content to a file, sandboxed to the workspace root."
    }

    fn requires_confirmation(&self) -> bool {
        true
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path relative to the workspace root" },
                "content": { "type": "string", "description": "Content to append" }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let req: FileAppendRequest =
            serde_json::from_value(args).map_err(|e| bad_args("file.append", e))?;
        file_ops::file_append(&self.workspace_root, req).await
    }
}

pub struct FileMoveTool {
    pub workspace_root: PathBuf,
}

#[async_trait::async_trait]
impl Tool for FileMoveTool {
    fn name(&self) -> &str {
        "file.move"
    }

    fn description(&self) -> &str {
        "Move/rename a file or directory, sandboxed to the workspace root."
    }

    fn requires_confirmation(&self) -> bool {
        true
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "source": { "type": "string" },
                "destination": { "type": "string" }
            },
            "required": ["source", "destination"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let req: FileMoveRequest =
            serde_json::from_value(args).map_err(|e| bad_args("file.move", e))?;
        file_ops::file_move(&self.workspace_root, req).await
    }
}

pub struct FileDeleteTool {
    pub workspace_root: PathBuf,
}

#[async_trait::async_trait]
impl Tool for FileDeleteTool {
    fn name(&self) -> &str {
        "file.delete"
    }

    fn description(&self) -> &str {
        "Delete a file or empty directory, sandboxed to the workspace root."
    }

    fn requires_confirmation(&self) -> bool {
        true
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let req: FileDeleteRequest =
            serde_json::from_value(args).map_err(|e| bad_args("file.delete", e))?;
        file_ops::file_delete(&self.workspace_root, req).await
    }
}

pub struct FileListTool {
    pub workspace_root: PathBuf,
}

#[async_trait::async_trait]
impl Tool for FileListTool {
    fn name(&self) -> &str {
        "file.list"
    }

    fn description(&self) -> &str {
        "List directory contents with metadata, sandboxed to the workspace root."
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory path relative to the workspace root (default '.')" }
            }
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let req: FileListRequest =
            serde_json::from_value(args).map_err(|e| bad_args("file.list", e))?;
        file_ops::file_list(&self.workspace_root, req).await
    }
}

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool-result externalization + checkpoint persistence
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Configuration for the `Externalizer` + `ToolResultStore`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Observations at or under this many chars are kept inline, never
    /// written to disk.
    #[serde(default = "d_inline_limit")]
    pub inline_limit: usize,
    /// When an observation is externalized, this many chars of its head
    /// are still kept inline as a preview.
    #[serde(default = "d_preview_limit")]
    pub preview_limit: usize,
    /// Root directory for content-addressed tool-result blobs, relative to
    /// the workspace state path unless absolute.
    #[serde(default = "d_tool_result_root")]
    pub tool_result_root_dir: PathBuf,
    /// Tool names whose output is always externalized regardless of size.
    #[serde(default)]
    pub always_externalize_tools: HashSet<String>,
    /// Max chars a filesystem `read` tool may return before truncation.
    #[serde(default = "d_fs_read_max_chars")]
    pub fs_read_max_chars: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            inline_limit: d_inline_limit(),
            preview_limit: d_preview_limit(),
            tool_result_root_dir: d_tool_result_root(),
            always_externalize_tools: HashSet::new(),
            fs_read_max_chars: d_fs_read_max_chars(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_inline_limit() -> usize {
    500
}
fn d_preview_limit() -> usize {
    500
}
fn d_tool_result_root() -> PathBuf {
    PathBuf::from("tool_results")
}
fn d_fs_read_max_chars() -> usize {
    8_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_keep_preview_at_or_under_inline() {
        let cfg = StoreConfig::default();
        assert!(cfg.preview_limit <= cfg.inline_limit || cfg.preview_limit == cfg.inline_limit);
    }

    #[test]
    fn always_externalize_tools_deserializes() {
        let json = r#"{ "always_externalize_tools": ["fs.read", "exec.run"] }"#;
        let cfg: StoreConfig = serde_json::from_str(json).unwrap();
        assert!(cfg.always_externalize_tools.contains("fs.read"));
        assert!(cfg.always_externalize_tools.contains("exec.run"));
    }
}

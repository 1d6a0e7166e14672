//! `ToolResultStore` (C2) — normalizes arbitrary tool output into
//! bytes/text/mime and persists it to sandboxed, content-addressed ref
//! paths. Path sandboxing is grounded directly in the teacher's
//! `sa-tools::file_ops::validate_path`, generalized from "workspace root"
//! to the `tool_result_root` scoped under it.

use std::path::{Component, Path, PathBuf};

use ao_domain::error::{Error, Result};
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Output of normalizing a raw tool result before it is either kept
/// inline or persisted as a ref.
#[derive(Debug, Clone)]
pub struct NormalizedResult {
    pub text: String,
    pub bytes: Vec<u8>,
    pub mime: String,
    pub is_binary: bool,
}

/// Turn an arbitrary `serde_json::Value` tool result into bytes+text+mime.
/// Strings pass through as UTF-8 text; anything else is serialized to
/// canonical JSON. There is no tool in this registry that returns raw
/// binary today, but the shape stays ready for one that does (e.g. a
/// future image-returning tool) via `from_binary`.
pub fn normalize(raw: &serde_json::Value) -> NormalizedResult {
    match raw {
        serde_json::Value::String(s) => NormalizedResult {
            text: s.clone(),
            bytes: s.clone().into_bytes(),
            mime: mime_for_string(s).to_string(),
            is_binary: false,
        },
        other => {
            let text = serde_json::to_string(other).unwrap_or_default();
            NormalizedResult {
                bytes: text.clone().into_bytes(),
                text,
                mime: "application/json".to_string(),
                is_binary: false,
            }
        }
    }
}

/// Sniff a leading `{`/`[` and confirm it parses, so a tool that happens to
/// return a JSON document as a plain string (rather than a structured
/// `Value`) still gets tagged `application/json` per the mime-detection
/// requirement.
fn mime_for_string(s: &str) -> &'static str {
    let trimmed = s.trim_start();
    if matches!(trimmed.chars().next(), Some('{') | Some('[')) && serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
        "application/json"
    } else {
        "text/plain"
    }
}

pub fn from_binary(bytes: Vec<u8>, mime: impl Into<String>) -> NormalizedResult {
    let text = String::from_utf8_lossy(&bytes).into_owned();
    NormalizedResult {
        bytes,
        text,
        mime: mime.into(),
        is_binary: true,
    }
}

/// A persisted ref descriptor, matching the wire shape
/// `{id, path, mime, bytes, sha256, created_at}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefDescriptor {
    pub id: String,
    pub path: String,
    pub mime: String,
    pub bytes: usize,
    pub sha256: String,
    pub created_at: chrono::DateTime<Utc>,
}

/// Replace any component character outside `[A-Za-z0-9._-]` with `_`, so a
/// tool name like `chrome-devtools:take_snapshot` can't inject path
/// separators into the ref path.
fn sanitize_component(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect()
}

fn random_suffix() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..12)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

fn ext_for_mime(mime: &str) -> &'static str {
    match mime {
        "application/json" => "json",
        "text/plain" => "txt",
        _ => "bin",
    }
}

pub struct ToolResultStore {
    workspace_root: PathBuf,
    /// Resolved, canonicalized `<workspace_root>/<tool_result_root_dir>`.
    root: PathBuf,
}

impl ToolResultStore {
    /// `tool_result_root_dir` is relative to `workspace_root`. Both must
    /// already exist (or be creatable); `tool_result_root_dir` containing
    /// `..` or being absolute is rejected up front, matching the "path
    /// traversal check must reject `..` or absolute paths" requirement.
    pub fn new(workspace_root: impl Into<PathBuf>, tool_result_root_dir: impl AsRef<Path>) -> Result<Self> {
        let workspace_root = workspace_root.into();
        let rel = tool_result_root_dir.as_ref();
        if rel.is_absolute() {
            return Err(Error::Config(format!(
                "tool_result_root_dir must be relative, got absolute path '{}'",
                rel.display()
            )));
        }
        for component in rel.components() {
            if matches!(component, Component::ParentDir) {
                return Err(Error::Config(
                    "tool_result_root_dir must not contain '..' components".to_string(),
                ));
            }
        }

        std::fs::create_dir_all(&workspace_root).map_err(Error::Io)?;
        let canonical_workspace_root = workspace_root.canonicalize().map_err(Error::Io)?;
        let root = canonical_workspace_root.join(rel);
        std::fs::create_dir_all(&root).map_err(Error::Io)?;
        let root = root.canonicalize().map_err(Error::Io)?;

        if !root.starts_with(&canonical_workspace_root) {
            return Err(Error::PathOutsideWorkspace {
                root: canonical_workspace_root.display().to_string(),
                requested: rel.display().to_string(),
            });
        }

        Ok(Self {
            workspace_root: canonical_workspace_root,
            root,
        })
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Persist a normalized tool result under
    /// `<tool_result_root>/<trace_id>/<turn_id>/<step_id>/<tool_call_id>_<rand12>.<ext>`
    /// and return its ref descriptor.
    pub fn persist(
        &self,
        trace_id: Uuid,
        turn_id: Uuid,
        step_id: Uuid,
        tool_call_id: &str,
        result: &NormalizedResult,
    ) -> Result<RefDescriptor> {
        let dir = self
            .root
            .join(trace_id.to_string())
            .join(turn_id.to_string())
            .join(step_id.to_string());
        std::fs::create_dir_all(&dir).map_err(Error::Io)?;

        let mut hasher = Sha256::new();
        hasher.update(&result.bytes);
        let sha256 = hex::encode(hasher.finalize());

        let file_name = format!(
            "{}_{}.{}",
            sanitize_component(tool_call_id),
            random_suffix(),
            ext_for_mime(&result.mime)
        );
        let path = dir.join(&file_name);

        let tmp = path.with_extension(format!("{}.tmp", ext_for_mime(&result.mime)));
        std::fs::write(&tmp, &result.bytes).map_err(Error::Io)?;
        std::fs::rename(&tmp, &path).map_err(Error::Io)?;

        let rel_path = path
            .strip_prefix(&self.workspace_root)
            .unwrap_or(&path)
            .display()
            .to_string();

        Ok(RefDescriptor {
            id: format!("ref_{}", &sha256[..16]),
            path: rel_path,
            mime: result.mime.clone(),
            bytes: result.bytes.len(),
            sha256,
            created_at: Utc::now(),
        })
    }

    /// Load a previously-persisted ref's raw bytes back, for tools that
    /// need to re-read their own externalized output (e.g. a follow-up
    /// `fs.read` against a truncated-previews artifact).
    pub fn load(&self, ref_path: &str) -> Result<Vec<u8>> {
        let path = self.workspace_root.join(ref_path);
        let canonical = path
            .canonicalize()
            .map_err(|_| Error::ToolResultNotFound(ref_path.to_string()))?;
        if !canonical.starts_with(&self.workspace_root) {
            return Err(Error::PathOutsideWorkspace {
                root: self.workspace_root.display().to_string(),
                requested: ref_path.to_string(),
            });
        }
        std::fs::read(canonical).map_err(Error::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ToolResultStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ToolResultStore::new(dir.path(), "tool_results").unwrap();
        (dir, store)
    }

    #[test]
    fn normalize_string_is_text_plain() {
        let n = normalize(&serde_json::Value::String("hello".into()));
        assert_eq!(n.mime, "text/plain");
        assert!(!n.is_binary);
        assert_eq!(n.text, "hello");
    }

    #[test]
    fn normalize_object_is_json() {
        let n = normalize(&serde_json::json!({"ok": true}));
        assert_eq!(n.mime, "application/json");
        assert!(n.text.contains("\"ok\":true") || n.text.contains("\"ok\": true"));
    }

    #[test]
    fn normalize_json_looking_string_is_detected() {
        let n = normalize(&serde_json::Value::String("  {\"a\": 1}".to_string()));
        assert_eq!(n.mime, "application/json");
        assert!(!n.is_binary);
    }

    #[test]
    fn normalize_json_array_string_is_detected() {
        let n = normalize(&serde_json::Value::String("[1,2,3]".to_string()));
        assert_eq!(n.mime, "application/json");
    }

    #[test]
    fn normalize_string_starting_with_brace_but_not_json_stays_text_plain() {
        let n = normalize(&serde_json::Value::String("{not actually json".to_string()));
        assert_eq!(n.mime, "text/plain");
    }

    #[test]
    fn from_binary_sets_is_binary_and_octet_stream_mime() {
        let n = from_binary(vec![0xff, 0xd8, 0xff, 0x00], "application/octet-stream");
        assert!(n.is_binary);
        assert_eq!(n.mime, "application/octet-stream");
        assert_eq!(n.bytes, vec![0xff, 0xd8, 0xff, 0x00]);
    }

    #[test]
    fn persist_round_trips_binary_result() {
        let (_dir, store) = store();
        let result = from_binary(vec![0x00, 0x01, 0xfe, 0xff], "application/octet-stream");
        let ref_desc = store
            .persist(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), "call_bin", &result)
            .unwrap();
        assert_eq!(ref_desc.mime, "application/octet-stream");
        assert!(ref_desc.path.ends_with(".bin"));

        let bytes = store.load(&ref_desc.path).unwrap();
        assert_eq!(bytes, result.bytes);
    }

    #[test]
    fn persist_writes_file_and_matching_sha256() {
        let (_dir, store) = store();
        let result = normalize(&serde_json::Value::String("x".repeat(10_000)));
        let ref_desc = store
            .persist(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), "call_1", &result)
            .unwrap();

        let bytes = store.load(&ref_desc.path).unwrap();
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        assert_eq!(hex::encode(hasher.finalize()), ref_desc.sha256);
        assert_eq!(ref_desc.bytes, result.bytes.len());
    }

    #[test]
    fn tool_call_id_is_sanitized_in_file_name() {
        let (_dir, store) = store();
        let result = normalize(&serde_json::Value::String("y".into()));
        let ref_desc = store
            .persist(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), "chrome-devtools:take_snapshot/../etc", &result)
            .unwrap();
        assert!(!ref_desc.path.contains(".."));
    }

    #[test]
    fn rejects_absolute_tool_result_root() {
        let dir = tempfile::tempdir().unwrap();
        let result = ToolResultStore::new(dir.path(), "/etc/tool_results");
        assert!(result.is_err());
    }

    #[test]
    fn rejects_parent_dir_tool_result_root() {
        let dir = tempfile::tempdir().unwrap();
        let result = ToolResultStore::new(dir.path(), "../tool_results");
        assert!(result.is_err());
    }

    #[test]
    fn load_rejects_path_outside_workspace() {
        let (_dir, store) = store();
        let result = store.load("../../etc/passwd");
        assert!(matches!(result, Err(Error::PathOutsideWorkspace { .. }) | Err(Error::ToolResultNotFound(_))));
    }
}

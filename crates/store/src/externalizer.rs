//! `Externalizer` (C3) — policy layer over [`ToolResultStore`]: decide
//! inline vs ref based on size and per-tool rules, clip previews, and emit
//! the `ObservationExternalized` trace event. Preview clipping is UTF-8-safe,
//! grounded in the teacher's `truncate_str` (`gateway/runtime/mod.rs`).

use ao_domain::config::StoreConfig;
use ao_domain::error::Result;
use ao_domain::telemetry::TraceEvent;
use uuid::Uuid;

use crate::tool_result::{normalize, NormalizedResult, RefDescriptor, ToolResultStore};

#[derive(Debug, Clone)]
pub struct ContentStats {
    pub chars: usize,
    pub bytes: usize,
    pub lines: usize,
}

/// The externalized shape of one Observation's content, matching the wire
/// contract `{kind:"inline", content, preview, stats}` or
/// `{kind:"ref", ref, preview, stats}`.
#[derive(Debug, Clone)]
pub enum ExternalizedContent {
    Inline {
        content: String,
        preview: String,
        truncated: bool,
        stats: ContentStats,
    },
    Ref {
        ref_desc: RefDescriptor,
        preview: String,
        truncated: bool,
        stats: ContentStats,
    },
}

impl ExternalizedContent {
    pub fn preview(&self) -> &str {
        match self {
            ExternalizedContent::Inline { preview, .. } => preview,
            ExternalizedContent::Ref { preview, .. } => preview,
        }
    }

    pub fn is_ref(&self) -> bool {
        matches!(self, ExternalizedContent::Ref { .. })
    }
}

/// Clip `s` to at most `max_chars` Unicode scalar values without splitting
/// a multi-byte character, returning the clipped string and whether
/// clipping actually happened.
fn clip_chars(s: &str, max_chars: usize) -> (String, bool) {
    if s.chars().count() <= max_chars {
        return (s.to_string(), false);
    }
    (s.chars().take(max_chars).collect(), true)
}

fn stats_for(s: &str, byte_len: usize) -> ContentStats {
    ContentStats {
        chars: s.chars().count(),
        bytes: byte_len,
        lines: s.lines().count(),
    }
}

pub struct Externalizer<'a> {
    config: &'a StoreConfig,
    store: &'a ToolResultStore,
}

impl<'a> Externalizer<'a> {
    pub fn new(config: &'a StoreConfig, store: &'a ToolResultStore) -> Self {
        Self { config, store }
    }

    /// `externalize(tool_name, raw_result, trace_id, turn_id, step_id, tool_call_id) -> observation-content`.
    #[allow(clippy::too_many_arguments)]
    pub fn externalize(
        &self,
        tool_name: &str,
        raw_result: &serde_json::Value,
        trace_id: Uuid,
        turn_id: Uuid,
        step_id: Uuid,
        tool_call_id: &str,
    ) -> Result<ExternalizedContent> {
        let normalized: NormalizedResult = normalize(raw_result);
        let force_ref = self.config.always_externalize_tools.contains(tool_name);
        let char_len = normalized.text.chars().count();
        let use_ref = normalized.is_binary || force_ref || char_len > self.config.inline_limit;

        let (preview, truncated) = clip_chars(&normalized.text, self.config.preview_limit);
        let stats = stats_for(&normalized.text, normalized.bytes.len());

        let content = if use_ref {
            let ref_desc = self.store.persist(trace_id, turn_id, step_id, tool_call_id, &normalized)?;
            ExternalizedContent::Ref {
                ref_desc,
                preview,
                truncated,
                stats,
            }
        } else {
            ExternalizedContent::Inline {
                content: normalized.text.clone(),
                preview,
                truncated,
                stats,
            }
        };

        let ref_id = match &content {
            ExternalizedContent::Ref { ref_desc, .. } => ref_desc.id.clone(),
            ExternalizedContent::Inline { .. } => String::new(),
        };

        TraceEvent::ObservationExternalized {
            trace_id: trace_id.to_string(),
            tool_name: tool_name.to_string(),
            ref_id,
            original_chars: char_len,
            preview_chars: content.preview().chars().count(),
        }
        .emit();

        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, StoreConfig, ToolResultStore) {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            inline_limit: 20,
            preview_limit: 10,
            ..StoreConfig::default()
        };
        let store = ToolResultStore::new(dir.path(), &config.tool_result_root_dir).unwrap();
        (dir, config, store)
    }

    #[test]
    fn short_result_stays_inline() {
        let (_dir, config, store) = setup();
        let ext = Externalizer::new(&config, &store);
        let content = ext
            .externalize(
                "fs.list",
                &serde_json::Value::String("short".into()),
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                "call_1",
            )
            .unwrap();
        assert!(!content.is_ref());
        assert!(matches!(content, ExternalizedContent::Inline { truncated: false, .. }));
    }

    #[test]
    fn long_result_is_externalized_with_clipped_preview() {
        let (_dir, config, store) = setup();
        let ext = Externalizer::new(&config, &store);
        let long = "a".repeat(1000);
        let content = ext
            .externalize(
                "fs.read",
                &serde_json::Value::String(long),
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                "call_1",
            )
            .unwrap();
        assert!(content.is_ref());
        assert_eq!(content.preview().chars().count(), config.preview_limit);
        match content {
            ExternalizedContent::Ref { stats, .. } => assert_eq!(stats.chars, 1000),
            _ => panic!("expected ref"),
        }
    }

    #[test]
    fn always_externalize_tools_forces_ref_regardless_of_size() {
        let (_dir, mut config, store) = setup();
        config.always_externalize_tools.insert("chrome-devtools_take_snapshot".to_string());
        let ext = Externalizer::new(&config, &store);
        let content = ext
            .externalize(
                "chrome-devtools_take_snapshot",
                &serde_json::Value::String("tiny".into()),
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                "call_1",
            )
            .unwrap();
        assert!(content.is_ref());
    }

    #[test]
    fn preview_clipping_is_utf8_safe() {
        let (_dir, config, store) = setup();
        let ext = Externalizer::new(&config, &store);
        let text = "héllo wörld — emoji 🎉🎉🎉 more text to exceed inline limit padding padding";
        let content = ext
            .externalize(
                "fs.read",
                &serde_json::Value::String(text.to_string()),
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                "call_1",
            )
            .unwrap();
        // Must not panic slicing mid-codepoint, and preview length is measured in chars.
        assert_eq!(content.preview().chars().count(), config.preview_limit);
    }

    #[test]
    fn ref_descriptor_sha256_matches_persisted_bytes() {
        let (_dir, config, store) = setup();
        let ext = Externalizer::new(&config, &store);
        let long = "z".repeat(500);
        let content = ext
            .externalize(
                "fs.read",
                &serde_json::Value::String(long.clone()),
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                "call_1",
            )
            .unwrap();
        match content {
            ExternalizedContent::Ref { ref_desc, .. } => {
                let bytes = store.load(&ref_desc.path).unwrap();
                assert_eq!(bytes, long.into_bytes());
            }
            _ => panic!("expected ref"),
        }
    }
}

//! Coerces a raw LLM response into either tool-call actions or a single
//! typed content action (finish / request_input / request_confirm).
//!
//! Grounded in the teacher's `tc_bufs` tool-call assembly and
//! empty-object JSON repair (`gateway/runtime/turn.rs`), generalized to
//! the three-tier argument-repair policy and the content-action coercion
//! table this spec requires but the teacher never needed (the teacher
//! always treats a non-tool-call reply as plain final text).

use crate::traits::ChatResponse;
use ao_domain::tool::ToolCall;
use serde_json::Value;

/// One parsed tool call with its arguments repaired to a JSON object.
#[derive(Debug, Clone)]
pub struct RepairedToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
    /// Set when the raw arguments string needed repair (not valid JSON
    /// as-is, or not an object).
    pub repaired: bool,
}

/// The result of coercing a model turn into an orchestrator action.
#[derive(Debug, Clone)]
pub enum CoercedOutput {
    /// One or more tool calls to dispatch as TOOL Actions.
    ToolCalls(Vec<RepairedToolCall>),
    /// No tool calls; a single typed content action.
    Content(ContentAction),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentActionKind {
    Finish,
    RequestInput,
    RequestConfirm,
}

#[derive(Debug, Clone)]
pub struct ContentAction {
    pub kind: ContentActionKind,
    pub message: String,
    /// The raw parsed JSON object (or a synthesized one for plain text),
    /// stored verbatim as the Action's `full_ref`.
    pub full_ref: Value,
}

/// Extract a `<think>...</think>` block from raw model output, returning
/// the reasoning text (if any) and the content with the block (and any
/// surrounding whitespace it leaves behind) removed.
///
/// Only the first block is honored; a model that emits more than one is
/// treated as a formatting error and the remainder is left in `content`
/// for the coercion table to deal with.
pub fn extract_reasoning(content: &str) -> (Option<String>, String) {
    const OPEN: &str = "<think>";
    const CLOSE: &str = "</think>";

    let Some(start) = content.find(OPEN) else {
        return (None, content.to_string());
    };
    let Some(close_rel) = content[start + OPEN.len()..].find(CLOSE) else {
        return (None, content.to_string());
    };
    let close = start + OPEN.len() + close_rel;

    let reasoning = content[start + OPEN.len()..close].trim().to_string();
    let mut stripped = String::with_capacity(content.len());
    stripped.push_str(&content[..start]);
    stripped.push_str(&content[close + CLOSE.len()..]);

    (Some(reasoning), stripped.trim().to_string())
}

/// Entry point: given a provider's [`ChatResponse`], produce either tool
/// call actions (if the response carried any) or a single content action.
pub fn coerce_model_output(response: &ChatResponse) -> CoercedOutput {
    if !response.tool_calls.is_empty() {
        let repaired = response
            .tool_calls
            .iter()
            .map(repair_tool_call)
            .collect();
        return CoercedOutput::ToolCalls(repaired);
    }

    CoercedOutput::Content(coerce_content_action(&response.content))
}

/// Repair a single tool call's arguments.
///
/// Three-tier policy:
/// 1. Parse as-is.
/// 2. Extract the first balanced `{...}` object and parse that.
/// 3. Fall back to an empty object.
fn repair_tool_call(raw: &ToolCall) -> RepairedToolCall {
    let raw_str = raw.arguments.to_string();
    match &raw.arguments {
        Value::Object(_) => RepairedToolCall {
            call_id: raw.call_id.clone(),
            tool_name: raw.tool_name.clone(),
            arguments: raw.arguments.clone(),
            repaired: false,
        },
        Value::String(s) => {
            let (arguments, repaired) = repair_arguments_str(s);
            RepairedToolCall {
                call_id: raw.call_id.clone(),
                tool_name: raw.tool_name.clone(),
                arguments,
                repaired,
            }
        }
        _ => {
            tracing::warn!(
                call_id = %raw.call_id,
                tool = %raw.tool_name,
                raw = %raw_str,
                "tool call arguments are not an object or string; defaulting to empty object"
            );
            RepairedToolCall {
                call_id: raw.call_id.clone(),
                tool_name: raw.tool_name.clone(),
                arguments: Value::Object(Default::default()),
                repaired: true,
            }
        }
    }
}

/// Repair a raw tool-call-arguments string into a JSON object, returning
/// whether repair was needed.
pub fn repair_arguments_str(s: &str) -> (Value, bool) {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return (Value::Object(Default::default()), true);
    }

    if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return (v, false);
    }

    if let Some(extracted) = extract_first_balanced_object(trimmed) {
        if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(&extracted) {
            return (v, true);
        }
    }

    tracing::warn!(raw = %trimmed, "tool call arguments could not be repaired; defaulting to empty object");
    (Value::Object(Default::default()), true)
}

/// Extract the first balanced `{...}` substring by bracket depth, ignoring
/// braces inside string literals.
fn extract_first_balanced_object(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let start = s.find('{')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        let c = b as char;
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(s[start..=i].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Coerce a plain-text/JSON content reply into a typed content action
/// per the spec's coercion table.
fn coerce_content_action(content: &str) -> ContentAction {
    let trimmed = content.trim();

    let parsed: Option<Value> = serde_json::from_str(trimmed).ok();

    if let Some(Value::Object(ref map)) = parsed {
        let type_field = map.get("type").and_then(Value::as_str);
        if let Some(type_str) = type_field {
            let normalized = type_str.to_ascii_lowercase();
            let kind = match normalized.as_str() {
                "finish" | "done" | "final" | "completed" | "complete" => {
                    Some(ContentActionKind::Finish)
                }
                "request_input" => Some(ContentActionKind::RequestInput),
                "request_confirm" | "confirm" => Some(ContentActionKind::RequestConfirm),
                _ => None,
            };

            if let Some(kind) = kind {
                let message = map
                    .get("message")
                    .and_then(Value::as_str)
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| parsed.as_ref().unwrap().to_string());
                return ContentAction {
                    kind,
                    message,
                    full_ref: parsed.unwrap(),
                };
            }
        }
    }

    // Unknown / absent / non-object: FINISH with message = the raw text.
    let full_ref = parsed.unwrap_or_else(|| Value::String(trimmed.to_string()));
    ContentAction {
        kind: ContentActionKind::Finish,
        message: trimmed.to_string(),
        full_ref,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ChatResponse;
    use ao_domain::tool::ToolCall;

    fn response_with_content(content: &str) -> ChatResponse {
        ChatResponse {
            content: content.to_string(),
            tool_calls: vec![],
            usage: None,
            model: "test-model".into(),
            finish_reason: Some("stop".into()),
        }
    }

    #[test]
    fn finish_type_maps_to_finish_action() {
        let out = coerce_model_output(&response_with_content(r#"{"type":"finish","message":"hi"}"#));
        match out {
            CoercedOutput::Content(action) => {
                assert_eq!(action.kind, ContentActionKind::Finish);
                assert_eq!(action.message, "hi");
            }
            _ => panic!("expected content action"),
        }
    }

    #[test]
    fn alias_types_normalize_to_finish() {
        for alias in ["done", "final", "completed", "complete", "DONE"] {
            let body = format!(r#"{{"type":"{alias}","message":"m"}}"#);
            let out = coerce_model_output(&response_with_content(&body));
            match out {
                CoercedOutput::Content(action) => assert_eq!(action.kind, ContentActionKind::Finish),
                _ => panic!("expected content action"),
            }
        }
    }

    #[test]
    fn confirm_alias_maps_to_request_confirm() {
        let out = coerce_model_output(&response_with_content(r#"{"type":"confirm","message":"sure?"}"#));
        match out {
            CoercedOutput::Content(action) => {
                assert_eq!(action.kind, ContentActionKind::RequestConfirm);
                assert_eq!(action.message, "sure?");
            }
            _ => panic!("expected content action"),
        }
    }

    #[test]
    fn request_input_type_maps_correctly() {
        let out = coerce_model_output(&response_with_content(
            r#"{"type":"request_input","message":"give city"}"#,
        ));
        match out {
            CoercedOutput::Content(action) => {
                assert_eq!(action.kind, ContentActionKind::RequestInput);
                assert_eq!(action.message, "give city");
            }
            _ => panic!("expected content action"),
        }
    }

    #[test]
    fn unknown_type_falls_back_to_finish_with_raw_text() {
        let out = coerce_model_output(&response_with_content(r#"{"type":"mystery","message":"x"}"#));
        match out {
            CoercedOutput::Content(action) => {
                assert_eq!(action.kind, ContentActionKind::Finish);
                assert!(action.message.contains("mystery"));
            }
            _ => panic!("expected content action"),
        }
    }

    #[test]
    fn plain_text_falls_back_to_finish() {
        let out = coerce_model_output(&response_with_content("just a plain reply"));
        match out {
            CoercedOutput::Content(action) => {
                assert_eq!(action.kind, ContentActionKind::Finish);
                assert_eq!(action.message, "just a plain reply");
            }
            _ => panic!("expected content action"),
        }
    }

    #[test]
    fn tool_calls_take_precedence_over_content() {
        let mut response = response_with_content(r#"{"type":"finish"}"#);
        response.tool_calls = vec![ToolCall {
            call_id: "c1".into(),
            tool_name: "exec".into(),
            arguments: serde_json::json!({"cmd": "ls"}),
        }];
        let out = coerce_model_output(&response);
        match out {
            CoercedOutput::ToolCalls(calls) => {
                assert_eq!(calls.len(), 1);
                assert!(!calls[0].repaired);
            }
            _ => panic!("expected tool calls"),
        }
    }

    #[test]
    fn malformed_json_args_repair_to_empty_object() {
        let raw = ToolCall {
            call_id: "c1".into(),
            tool_name: "exec".into(),
            arguments: Value::String("{not valid json".into()),
        };
        let repaired = repair_tool_call(&raw);
        assert!(repaired.repaired);
        assert_eq!(repaired.arguments, Value::Object(Default::default()));
    }

    #[test]
    fn empty_args_string_repairs_to_empty_object() {
        let (v, repaired) = repair_arguments_str("");
        assert!(repaired);
        assert_eq!(v, Value::Object(Default::default()));
    }

    #[test]
    fn first_balanced_object_extracted_from_noisy_string() {
        let (v, repaired) = repair_arguments_str(r#"sure, here: {"cmd": "ls"} trailing junk"#);
        assert!(repaired);
        assert_eq!(v, serde_json::json!({"cmd": "ls"}));
    }

    #[test]
    fn braces_inside_string_values_do_not_break_balance() {
        let (v, repaired) = repair_arguments_str(r#"{"cmd": "echo {not a brace}"}"#);
        assert!(!repaired);
        assert_eq!(v, serde_json::json!({"cmd": "echo {not a brace}"}));
    }

    #[test]
    fn extract_reasoning_strips_think_block() {
        let (reasoning, rest) =
            extract_reasoning("<think>the user wants a list</think>{\"type\":\"finish\"}");
        assert_eq!(reasoning.as_deref(), Some("the user wants a list"));
        assert_eq!(rest, r#"{"type":"finish"}"#);
    }

    #[test]
    fn extract_reasoning_absent_block_is_noop() {
        let (reasoning, rest) = extract_reasoning("just a plain reply");
        assert_eq!(reasoning, None);
        assert_eq!(rest, "just a plain reply");
    }

    #[test]
    fn extract_reasoning_unclosed_tag_is_left_untouched() {
        let (reasoning, rest) = extract_reasoning("<think>dangling");
        assert_eq!(reasoning, None);
        assert_eq!(rest, "<think>dangling");
    }

    #[test]
    fn extract_reasoning_trims_surrounding_whitespace() {
        let (reasoning, rest) = extract_reasoning("  <think>\n  hmm\n  </think>\n\n  done  ");
        assert_eq!(reasoning.as_deref(), Some("hmm"));
        assert_eq!(rest, "done");
    }
}

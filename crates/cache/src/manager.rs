//! `CacheManager` — incremental context assembly over `ao_domain::aggregate::RuntimeContext`.
//!
//! Operates on the domain crate's existing `RuntimeContext` rather than
//! redefining it: the aggregate already owns every field this component
//! needs (`messages`, `step_span_map`, idempotency sets, calibration,
//! `summary_versions`), so `ao-cache` is purely the logic that mutates it.

use std::collections::HashMap;

use ao_domain::aggregate::{ActionKind, MessageSpan, PromptMessage, RuntimeContext, Step, Trace};
use ao_domain::config::CacheManagerConfig;
use ao_domain::error::{Error, Result};
use ao_domain::tool::{ContentPart, Message, MessageContent};
use parking_lot::RwLock;
use sha1::{Digest, Sha1};
use uuid::Uuid;

use crate::stable_json::to_stable_json;
use crate::token_estimator::{calibrated, estimate_message, estimate_schema, update_calibration};

/// `messages[0]`'s `system_prompt_hash` is specified as `sha1(content)` (§8),
/// distinct from `stable_hash`'s sha256 used for schema cache keys.
fn hash_system_prompt(prompt: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(prompt.as_bytes());
    hex::encode(hasher.finalize())
}

fn push_message(ctx: &mut RuntimeContext, msg: Message, step_tokens: &mut u32, config: &CacheManagerConfig) {
    let tokens_raw = estimate_message(&msg, config);
    *step_tokens += tokens_raw;
    ctx.msg_tokens_raw_sum += tokens_raw as u64;
    ctx.messages.push(PromptMessage { message: msg, tokens_raw });
}

pub struct CacheManager {
    contexts: RwLock<HashMap<Uuid, RuntimeContext>>,
    config: CacheManagerConfig,
}

impl CacheManager {
    pub fn new(config: CacheManagerConfig) -> Self {
        Self {
            contexts: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &CacheManagerConfig {
        &self.config
    }

    /// `build_messages(trace, tool_schemas, response_schema, toolset_version?, response_schema_version?)`.
    /// Idempotent for unchanged traces; incremental for newly-appended Turns/Steps.
    #[allow(clippy::too_many_arguments)]
    pub fn build_messages(
        &self,
        trace: &Trace,
        system_prompt: &str,
        tool_schemas: &serde_json::Value,
        response_schema: Option<&serde_json::Value>,
        toolset_version: Option<&str>,
        response_schema_version: Option<&str>,
    ) -> Result<Vec<Message>> {
        let mut contexts = self.contexts.write();
        let system_hash = hash_system_prompt(system_prompt);

        let needs_reset = match contexts.get(&trace.trace_id) {
            Some(ctx) => ctx.system_prompt_hash != system_hash,
            None => true,
        };

        if needs_reset {
            let calibration_multiplier = contexts
                .get(&trace.trace_id)
                .map(|ctx| ctx.calibration_multiplier)
                .unwrap_or(1.0);

            let mut ctx = RuntimeContext::new(trace.trace_id, system_hash.clone());
            ctx.calibration_multiplier = calibration_multiplier;
            let system_msg = Message::system(system_prompt);
            let tokens_raw = estimate_message(&system_msg, &self.config);
            ctx.msg_tokens_raw_sum += tokens_raw as u64;
            ctx.messages.push(PromptMessage {
                message: system_msg,
                tokens_raw,
            });
            contexts.insert(trace.trace_id, ctx);
        }

        let ctx = contexts.get_mut(&trace.trace_id).expect("just inserted or already present");
        self.append_incremental(ctx, trace)?;
        self.refresh_schema_caches(ctx, tool_schemas, response_schema, toolset_version, response_schema_version);

        Ok(ctx.messages.iter().map(|pm| pm.message.clone()).collect())
    }

    fn append_incremental(&self, ctx: &mut RuntimeContext, trace: &Trace) -> Result<()> {
        for turn in &trace.turns {
            if !ctx.seen_turn_ids.contains(&turn.turn_id) {
                let msg = Message::user(turn.user_input.clone());
                let tokens_raw = estimate_message(&msg, &self.config);
                ctx.messages.push(PromptMessage { message: msg, tokens_raw });
                ctx.msg_tokens_raw_sum += tokens_raw as u64;
                ctx.seen_turn_ids.insert(turn.turn_id);
            }

            for step in &turn.steps {
                if ctx.seen_step_ids.contains(&step.step_id) {
                    continue;
                }
                self.append_step(ctx, step)?;
                ctx.seen_step_ids.insert(step.step_id);
                ctx.step_order.push(step.step_id);
            }
        }
        Ok(())
    }

    fn append_step(&self, ctx: &mut RuntimeContext, step: &Step) -> Result<()> {
        let start = ctx.messages.len();
        let mut step_tokens: u32 = 0;

        if !step.tool_calls.is_empty() {
            let tool_use_parts: Vec<ContentPart> = step
                .tool_calls
                .iter()
                .map(|call| ContentPart::ToolUse {
                    id: call.call_id.clone(),
                    name: call.tool_name.clone(),
                    input: call.arguments.clone(),
                })
                .collect();
            let assistant_msg = Message {
                role: ao_domain::tool::Role::Assistant,
                content: MessageContent::Parts(tool_use_parts),
            };
            push_message(ctx, assistant_msg, &mut step_tokens, &self.config);

            let tool_actions: Vec<_> = step.actions.iter().filter(|a| matches!(a.kind, ActionKind::Tool)).collect();
            if tool_actions.len() != step.tool_calls.len() {
                return Err(Error::InvariantViolation(format!(
                    "step {} has {} tool_calls but {} TOOL actions",
                    step.step_id,
                    step.tool_calls.len(),
                    tool_actions.len()
                )));
            }

            for (call, action) in step.tool_calls.iter().zip(tool_actions.iter()) {
                let observation = step.observation_for(action.action_id).ok_or_else(|| {
                    Error::InvariantViolation(format!("tool_call {} has no matching observation", call.call_id))
                })?;
                let tool_msg = Message::tool_result(call.call_id.clone(), observation.content.clone());
                push_message(ctx, tool_msg, &mut step_tokens, &self.config);
            }
        } else {
            for action in &step.actions {
                if let Some(full_ref) = &action.full_ref {
                    let assistant_msg = Message::assistant(to_stable_json(full_ref));
                    push_message(ctx, assistant_msg, &mut step_tokens, &self.config);
                }
                if let Some(request_input) = &action.request_input {
                    let user_msg = Message::user(request_input.clone());
                    push_message(ctx, user_msg, &mut step_tokens, &self.config);
                }
            }
        }

        let end = ctx.messages.len();
        if end > start {
            ctx.step_span_map.insert(step.step_id, MessageSpan { start, end });
        }
        ctx.step_tokens_raw.insert(step.step_id, step_tokens);
        Ok(())
    }

    fn refresh_schema_caches(
        &self,
        ctx: &mut RuntimeContext,
        tool_schemas: &serde_json::Value,
        response_schema: Option<&serde_json::Value>,
        toolset_version: Option<&str>,
        response_schema_version: Option<&str>,
    ) {
        let tool_key = toolset_version.map(str::to_string).unwrap_or_else(|| crate::stable_json::stable_hash(tool_schemas));
        if ctx.tool_schema_key.as_deref() != Some(tool_key.as_str()) {
            ctx.tool_schema_tokens_raw = estimate_schema(tool_schemas, &self.config);
            ctx.tool_schema_key = Some(tool_key);
        }

        match response_schema {
            Some(schema) => {
                let response_key = response_schema_version
                    .map(str::to_string)
                    .unwrap_or_else(|| crate::stable_json::stable_hash(schema));
                if ctx.response_schema_key.as_deref() != Some(response_key.as_str()) {
                    ctx.response_schema_tokens_raw = estimate_schema(schema, &self.config);
                    ctx.response_schema_key = Some(response_key);
                }
            }
            None => {
                ctx.response_schema_key = None;
                ctx.response_schema_tokens_raw = 0;
            }
        }
    }

    /// Raw (uncalibrated) total estimated prompt tokens: message sum + schema estimates.
    pub fn raw_estimated_tokens(&self, trace_id: Uuid) -> Option<u32> {
        let contexts = self.contexts.read();
        let ctx = contexts.get(&trace_id)?;
        Some(ctx.msg_tokens_raw_sum as u32 + ctx.tool_schema_tokens_raw + ctx.response_schema_tokens_raw)
    }

    /// Calibrated total estimated prompt tokens.
    pub fn calibrated_estimated_tokens(&self, trace_id: Uuid) -> Option<u32> {
        let contexts = self.contexts.read();
        let ctx = contexts.get(&trace_id)?;
        let raw = ctx.msg_tokens_raw_sum as u32 + ctx.tool_schema_tokens_raw + ctx.response_schema_tokens_raw;
        Some(calibrated(raw, ctx.calibration_multiplier))
    }

    /// After an LLM call reports `actual_prompt_tokens`, update the EMA
    /// calibration multiplier for this trace's RuntimeContext.
    pub fn update_calibration(&self, trace_id: Uuid, actual_prompt_tokens: u32) -> Result<()> {
        let mut contexts = self.contexts.write();
        let ctx = contexts
            .get_mut(&trace_id)
            .ok_or_else(|| Error::InvariantViolation(format!("no RuntimeContext for trace {trace_id}")))?;
        let raw = ctx.msg_tokens_raw_sum as u32 + ctx.tool_schema_tokens_raw + ctx.response_schema_tokens_raw;
        ctx.calibration_multiplier = update_calibration(ctx.calibration_multiplier, raw, actual_prompt_tokens, &self.config);
        Ok(())
    }

    /// Read-only snapshot of a trace's RuntimeContext, for the compaction
    /// pass and checkpoint/debug surfaces.
    pub fn context_snapshot(&self, trace_id: Uuid) -> Option<RuntimeContext> {
        self.contexts.read().get(&trace_id).cloned()
    }

    /// Replace a trace's RuntimeContext wholesale — used by the compaction
    /// pass to install the post-compaction context.
    pub fn replace_context(&self, ctx: RuntimeContext) {
        self.contexts.write().insert(ctx.trace_id, ctx);
    }

    pub fn remove_context(&self, trace_id: Uuid) {
        self.contexts.write().remove(&trace_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ao_domain::aggregate::{Action, Observation, ObservationKind};
    use ao_domain::tool::ToolCall;
    use chrono::Utc;

    fn manager() -> CacheManager {
        CacheManager::new(CacheManagerConfig::default())
    }

    #[test]
    fn first_build_inserts_system_message() {
        let mgr = manager();
        let trace = Trace::new("client-1", 100, Utc::now());
        let messages = mgr.build_messages(&trace, "you are a helpful agent", &serde_json::json!([]), None, None, None).unwrap();
        assert_eq!(messages.len(), 1);
        assert!(matches!(messages[0].role, ao_domain::tool::Role::System));
    }

    #[test]
    fn build_is_idempotent_for_unchanged_trace() {
        let mgr = manager();
        let mut trace = Trace::new("client-1", 100, Utc::now());
        trace.push_turn("hello", Utc::now());
        let first = mgr.build_messages(&trace, "sys", &serde_json::json!([]), None, None, None).unwrap();
        let second = mgr.build_messages(&trace, "sys", &serde_json::json!([]), None, None, None).unwrap();
        assert_eq!(first.len(), second.len());
    }

    #[test]
    fn system_prompt_change_resets_context_but_keeps_calibration() {
        let mgr = manager();
        let trace = Trace::new("client-1", 100, Utc::now());
        mgr.build_messages(&trace, "sys v1", &serde_json::json!([]), None, None, None).unwrap();
        mgr.update_calibration(trace.trace_id, 999).unwrap();
        let calibration_before = mgr.context_snapshot(trace.trace_id).unwrap().calibration_multiplier;

        mgr.build_messages(&trace, "sys v2", &serde_json::json!([]), None, None, None).unwrap();
        let ctx = mgr.context_snapshot(trace.trace_id).unwrap();
        assert_eq!(ctx.messages.len(), 1);
        assert_eq!(ctx.calibration_multiplier, calibration_before);
    }

    #[test]
    fn turn_with_tool_call_step_produces_assistant_and_tool_messages() {
        let mgr = manager();
        let mut trace = Trace::new("client-1", 100, Utc::now());
        trace.push_turn("list files", Utc::now());
        let turn = trace.current_turn_mut().unwrap();
        let step_id = turn.push_step();
        let step = turn.steps.last_mut().unwrap();
        let action = Action::new_tool("file.list", serde_json::json!({"path": "."}), false);
        let action_id = action.action_id;
        step.tool_calls.push(ToolCall {
            call_id: "call_1".into(),
            tool_name: "file.list".into(),
            arguments: serde_json::json!({"path": "."}),
        });
        step.actions.push(action);
        step.observations.push(Observation {
            observation_id: uuid::Uuid::new_v4(),
            action_id,
            kind: ObservationKind::ToolResult,
            ok: true,
            content: "{\"count\":0}".into(),
            full_ref: None,
        });
        let _ = step_id;

        let messages = mgr.build_messages(&trace, "sys", &serde_json::json!([]), None, None, None).unwrap();
        // system, user("list files"), assistant(tool_calls), tool(result)
        assert_eq!(messages.len(), 4);
        assert!(matches!(messages[2].role, ao_domain::tool::Role::Assistant));
        assert!(matches!(messages[3].role, ao_domain::tool::Role::Tool));
    }

    #[test]
    fn missing_observation_for_tool_call_is_fatal() {
        let mgr = manager();
        let mut trace = Trace::new("client-1", 100, Utc::now());
        trace.push_turn("list files", Utc::now());
        let turn = trace.current_turn_mut().unwrap();
        turn.push_step();
        let step = turn.steps.last_mut().unwrap();
        step.tool_calls.push(ToolCall {
            call_id: "call_1".into(),
            tool_name: "file.list".into(),
            arguments: serde_json::json!({}),
        });
        step.actions.push(Action::new_tool("file.list", serde_json::json!({}), false));
        // No observation pushed.

        let result = mgr.build_messages(&trace, "sys", &serde_json::json!([]), None, None, None);
        assert!(result.is_err());
    }

    #[test]
    fn token_sum_invariant_holds_after_build() {
        let mgr = manager();
        let mut trace = Trace::new("client-1", 100, Utc::now());
        trace.push_turn("hello", Utc::now());
        mgr.build_messages(&trace, "sys", &serde_json::json!([]), None, None, None).unwrap();
        let ctx = mgr.context_snapshot(trace.trace_id).unwrap();
        assert!(ctx.tokens_sum_is_consistent());
        assert!(ctx.spans_are_valid());
    }

    #[test]
    fn schema_tokens_recompute_only_when_key_changes() {
        let mgr = manager();
        let trace = Trace::new("client-1", 100, Utc::now());
        let schema_a = serde_json::json!([{"name": "fs.read"}]);
        mgr.build_messages(&trace, "sys", &schema_a, None, None, None).unwrap();
        let before = mgr.context_snapshot(trace.trace_id).unwrap().tool_schema_tokens_raw;

        mgr.build_messages(&trace, "sys", &schema_a, None, None, None).unwrap();
        let after_same = mgr.context_snapshot(trace.trace_id).unwrap().tool_schema_tokens_raw;
        assert_eq!(before, after_same);

        let schema_b = serde_json::json!([{"name": "fs.read"}, {"name": "fs.write"}]);
        mgr.build_messages(&trace, "sys", &schema_b, None, None, None).unwrap();
        let after_change = mgr.context_snapshot(trace.trace_id).unwrap().tool_schema_tokens_raw;
        assert!(after_change > before);
    }
}

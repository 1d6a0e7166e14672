//! Two-tier compaction: deterministic local folding, then (if still over
//! target) LLM-assisted summarization, plus turn result-card folding.
//! Grounded in the teacher's `gateway/runtime/compact.rs` (turn-count
//! trigger, fixed summarizer prompt, head/tail split), adapted from a
//! single append-only transcript marker to rebuilding the in-memory
//! `RuntimeContext`'s message list and `step_span_map`.

use std::collections::HashMap;
use std::sync::Arc;

use ao_domain::aggregate::{MessageSpan, PromptMessage, RuntimeContext, SummaryVersion};
use ao_domain::config::CacheManagerConfig;
use ao_domain::error::{Error, Result};
use ao_domain::tool::{Message, Role};
use ao_providers::traits::{ChatRequest, LlmProvider};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::stable_json::to_stable_json;
use crate::token_estimator::estimate_message;

pub const CONTEXT_SUMMARY_PREFIX: &str = "CONTEXT_SUMMARY_JSON:";
pub const TURN_RESULT_CARD_PREFIX: &str = "TURN_RESULT_CARD_JSON:";

const SUMMARIZER_PROMPT: &str = "Summarize the conversation so far for an autonomous agent that must continue the task. \
Preserve: the user's goal, decisions already made, open questions, key facts (ids, paths, snapshot identifiers), \
and the current state of any tools/background processes. Be concise but do not drop operationally relevant detail.";

fn is_summary_text(text: &str) -> bool {
    text.starts_with(CONTEXT_SUMMARY_PREFIX) || text.starts_with(TURN_RESULT_CARD_PREFIX)
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let clipped: String = s.chars().take(max_chars).collect();
    format!("{clipped}...")
}

/// Render a slice of messages as plain text for the LLM-assisted summarizer,
/// clipping each message's text to keep the prompt itself bounded.
fn build_conversation_text(messages: &[PromptMessage]) -> String {
    messages
        .iter()
        .map(|pm| {
            let role = match pm.message.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            let text = pm.message.content.extract_all_text();
            format!("[{role}] {}", truncate_chars(&text, 1000))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Whether the estimated token count (or the hard turn ceiling) calls for a
/// compaction pass.
pub fn should_compact(ctx: &RuntimeContext, config: &CacheManagerConfig) -> bool {
    let raw = ctx.msg_tokens_raw_sum as u32 + ctx.tool_schema_tokens_raw + ctx.response_schema_tokens_raw;
    let over_threshold = config.threshold_tokens.map(|t| raw > t).unwrap_or(false);
    let over_turn_ceiling = ctx.seen_turn_ids.len() as u32 > config.max_turns;
    over_threshold || over_turn_ceiling
}

/// Find the message index where the kept tail begins: the step boundary
/// closest to covering `keep_tail_ratio` of total step tokens, counting
/// backward from the end.
fn tail_start_message_index(ctx: &RuntimeContext, keep_tail_ratio: f32) -> usize {
    if ctx.step_order.is_empty() {
        return 1;
    }
    let total: u32 = ctx.step_order.iter().filter_map(|id| ctx.step_tokens_raw.get(id)).sum();
    if total == 0 {
        return 1;
    }
    let target_tail_tokens = (total as f32 * keep_tail_ratio).ceil() as u32;

    let mut acc = 0u32;
    let mut cut_step_idx = 0usize;
    for (i, step_id) in ctx.step_order.iter().enumerate().rev() {
        acc += ctx.step_tokens_raw.get(step_id).copied().unwrap_or(0);
        cut_step_idx = i;
        if acc >= target_tail_tokens {
            break;
        }
    }

    ctx.step_order
        .get(cut_step_idx)
        .and_then(|id| ctx.step_span_map.get(id))
        .map(|span| span.start)
        .unwrap_or(1)
        .max(1)
}

/// Splice `[system, summary, tail...]` into `ctx`, rebuilding
/// `step_span_map`/`step_order`/`step_tokens_raw` via a linear offset and
/// dropping bookkeeping for any step fully folded into the summary.
fn splice_summary(ctx: &mut RuntimeContext, cut: usize, summary_message: PromptMessage) {
    let mut new_messages = Vec::with_capacity(2 + ctx.messages.len() - cut);
    new_messages.push(ctx.messages[0].clone());
    new_messages.push(summary_message);
    new_messages.extend(ctx.messages[cut..].iter().cloned());

    // Two messages ([system, summary]) now stand in for `cut` old messages.
    let offset = cut as isize - 2;

    let mut new_span_map = HashMap::new();
    let mut new_step_order = Vec::new();
    let mut new_step_tokens = HashMap::new();
    for step_id in &ctx.step_order {
        if let Some(span) = ctx.step_span_map.get(step_id) {
            if span.end <= cut {
                continue;
            }
            let new_start = (span.start as isize - offset).max(2) as usize;
            let new_end = (span.end as isize - offset) as usize;
            new_span_map.insert(*step_id, MessageSpan { start: new_start, end: new_end });
            new_step_order.push(*step_id);
            if let Some(tokens) = ctx.step_tokens_raw.get(step_id) {
                new_step_tokens.insert(*step_id, *tokens);
            }
        }
    }

    ctx.msg_tokens_raw_sum = new_messages.iter().map(|m| m.tokens_raw as u64).sum();
    ctx.messages = new_messages;
    ctx.step_span_map = new_span_map;
    ctx.step_order = new_step_order;
    ctx.step_tokens_raw = new_step_tokens;
}

/// Deterministic local compaction: fold everything before the kept tail
/// into a single `CONTEXT_SUMMARY_JSON:` message. Returns `true` if a fold
/// happened.
pub fn local_compact(ctx: &mut RuntimeContext, config: &CacheManagerConfig, now: DateTime<Utc>) -> bool {
    let cut = tail_start_message_index(ctx, config.keep_tail_ratio).min(ctx.messages.len());
    if cut <= 1 {
        return false;
    }

    let head = &ctx.messages[1..cut];
    let tokens_before: u32 = head.iter().map(|m| m.tokens_raw).sum();
    if tokens_before == 0 {
        return false;
    }

    let user_goals: Vec<String> = head
        .iter()
        .filter(|pm| matches!(pm.message.role, Role::User))
        .map(|pm| truncate_chars(&pm.message.content.extract_all_text(), 200))
        .collect();

    let prior_summaries: Vec<String> = head
        .iter()
        .map(|pm| pm.message.content.extract_all_text())
        .filter(|text| is_summary_text(text))
        .collect();

    let tool_progress: Vec<String> = head
        .iter()
        .filter(|pm| matches!(pm.message.role, Role::Tool))
        .map(|pm| truncate_chars(&pm.message.content.extract_all_text(), 200))
        .collect();

    let folded_step_ids: Vec<Uuid> = ctx
        .step_order
        .iter()
        .filter(|id| ctx.step_span_map.get(id).map(|s| s.end <= cut).unwrap_or(false))
        .copied()
        .collect();

    let summary_obj = serde_json::json!({
        "user_goals": user_goals,
        "tool_result_progress": tool_progress,
        "prior_summaries": prior_summaries,
        "steps_folded": folded_step_ids.len(),
    });
    let summary_text = format!("{CONTEXT_SUMMARY_PREFIX}{}", to_stable_json(&summary_obj));
    let summary_message = Message::system(summary_text);
    let tokens_raw = estimate_message(&summary_message, config);

    splice_summary(
        ctx,
        cut,
        PromptMessage {
            message: summary_message,
            tokens_raw,
        },
    );

    let tokens_after: u32 = ctx.messages.iter().map(|m| m.tokens_raw).sum();
    ctx.summary_versions.push(SummaryVersion {
        version: ctx.summary_versions.len() as u32 + 1,
        strategy: "local_deterministic".to_string(),
        steps_folded: folded_step_ids,
        tokens_before,
        tokens_after,
        created_at: now,
    });
    true
}

/// LLM-assisted summarization: only runs if the estimate is still above
/// `target_after_tokens` after local compaction. Calls `provider` with the
/// fixed summarizer prompt over the current head (everything before the
/// kept tail) and replaces it with a single summary message.
pub async fn llm_assisted_compact(
    ctx: &mut RuntimeContext,
    config: &CacheManagerConfig,
    provider: &Arc<dyn LlmProvider>,
    now: DateTime<Utc>,
) -> Result<bool> {
    if !config.llm_assisted {
        return Ok(false);
    }
    let raw = ctx.msg_tokens_raw_sum as u32 + ctx.tool_schema_tokens_raw + ctx.response_schema_tokens_raw;
    if raw <= config.target_after_tokens {
        return Ok(false);
    }

    let cut = tail_start_message_index(ctx, config.keep_tail_ratio).min(ctx.messages.len());
    if cut <= 1 {
        return Ok(false);
    }

    let tokens_before: u32 = ctx.messages[1..cut].iter().map(|m| m.tokens_raw).sum();
    if tokens_before == 0 {
        return Ok(false);
    }

    let conversation_text = build_conversation_text(&ctx.messages[1..cut]);
    let request = ChatRequest {
        messages: vec![Message::system(SUMMARIZER_PROMPT), Message::user(conversation_text)],
        temperature: Some(0.1),
        max_tokens: Some(2000),
        ..Default::default()
    };

    let response = provider.chat(request).await.map_err(|e| Error::Provider {
        provider: provider.provider_id().to_string(),
        message: e.to_string(),
    })?;

    let summary_obj = serde_json::json!({ "summary": response.content });
    let summary_text = format!("{CONTEXT_SUMMARY_PREFIX}{}", to_stable_json(&summary_obj));
    let summary_message = Message::system(summary_text);
    let tokens_raw = estimate_message(&summary_message, config);

    let folded_step_ids: Vec<Uuid> = ctx
        .step_order
        .iter()
        .filter(|id| ctx.step_span_map.get(id).map(|s| s.end <= cut).unwrap_or(false))
        .copied()
        .collect();

    splice_summary(
        ctx,
        cut,
        PromptMessage {
            message: summary_message,
            tokens_raw,
        },
    );

    let tokens_after: u32 = ctx.messages.iter().map(|m| m.tokens_raw).sum();
    ctx.summary_versions.push(SummaryVersion {
        version: ctx.summary_versions.len() as u32 + 1,
        strategy: "llm_assisted".to_string(),
        steps_folded: folded_step_ids,
        tokens_before,
        tokens_after,
        created_at: now,
    });
    Ok(true)
}

/// `finalize_turn_to_result_card` — locate the turn's contiguous message
/// span (start = its user message, end = end of its last step) and replace
/// it with a single `TURN_RESULT_CARD_JSON:` card. Clears step bookkeeping
/// for that turn.
pub fn finalize_turn_to_result_card(
    ctx: &mut RuntimeContext,
    config: &CacheManagerConfig,
    user_input: &str,
    final_answer: &str,
    tool_state: &serde_json::Value,
    step_ids: &[Uuid],
    now: DateTime<Utc>,
) -> Result<bool> {
    let start = ctx
        .messages
        .iter()
        .position(|pm| matches!(pm.message.role, Role::User) && pm.message.content.extract_all_text() == user_input)
        .ok_or_else(|| Error::InvariantViolation(format!("no user message found matching turn input '{user_input}'")))?;

    let end = step_ids
        .iter()
        .filter_map(|id| ctx.step_span_map.get(id))
        .map(|span| span.end)
        .max()
        .unwrap_or(start + 1)
        .max(start + 1)
        .min(ctx.messages.len());

    let tokens_before: u32 = ctx.messages[start..end].iter().map(|m| m.tokens_raw).sum();

    let card_obj = serde_json::json!({
        "user_input": truncate_chars(user_input, config.max_result_card_chars),
        "final_answer": truncate_chars(final_answer, config.max_result_card_chars),
        "tool_state": tool_state,
    });
    let card_text = format!("{TURN_RESULT_CARD_PREFIX}{}", to_stable_json(&card_obj));
    let card_message = Message::system(card_text);
    let tokens_raw = estimate_message(&card_message, config);

    let mut new_messages = Vec::with_capacity(ctx.messages.len() - (end - start) + 1);
    new_messages.extend(ctx.messages[..start].iter().cloned());
    new_messages.push(PromptMessage {
        message: card_message,
        tokens_raw,
    });
    new_messages.extend(ctx.messages[end..].iter().cloned());

    let offset = (end - start) as isize - 1;
    let mut new_span_map = HashMap::new();
    let mut new_step_order = Vec::new();
    let mut new_step_tokens = HashMap::new();
    let folded: std::collections::HashSet<Uuid> = step_ids.iter().copied().collect();
    for step_id in &ctx.step_order {
        if folded.contains(step_id) {
            continue;
        }
        if let Some(span) = ctx.step_span_map.get(step_id) {
            if span.start >= end {
                let new_start = (span.start as isize - offset) as usize;
                let new_end = (span.end as isize - offset) as usize;
                new_span_map.insert(*step_id, MessageSpan { start: new_start, end: new_end });
            } else {
                new_span_map.insert(*step_id, *span);
            }
            new_step_order.push(*step_id);
            if let Some(tokens) = ctx.step_tokens_raw.get(step_id) {
                new_step_tokens.insert(*step_id, *tokens);
            }
        }
    }

    ctx.msg_tokens_raw_sum = new_messages.iter().map(|m| m.tokens_raw as u64).sum();
    ctx.messages = new_messages;
    ctx.step_span_map = new_span_map;
    ctx.step_order = new_step_order;
    ctx.step_tokens_raw = new_step_tokens;

    let tokens_after: u32 = ctx.messages.iter().map(|m| m.tokens_raw).sum();
    ctx.summary_versions.push(SummaryVersion {
        version: ctx.summary_versions.len() as u32 + 1,
        strategy: "turn_result_card".to_string(),
        steps_folded: step_ids.to_vec(),
        tokens_before,
        tokens_after,
        created_at: now,
    });
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ao_domain::tool::Message;

    fn ctx_with_messages(n_turns: usize) -> RuntimeContext {
        let mut ctx = RuntimeContext::new(Uuid::new_v4(), "hash");
        let config = CacheManagerConfig::default();
        let system_msg = Message::system("sys");
        let tokens_raw = estimate_message(&system_msg, &config);
        ctx.msg_tokens_raw_sum += tokens_raw as u64;
        ctx.messages.push(PromptMessage { message: system_msg, tokens_raw });

        for i in 0..n_turns {
            let turn_id = Uuid::new_v4();
            let user_msg = Message::user(format!("turn {i}"));
            let tokens_raw = estimate_message(&user_msg, &config);
            ctx.msg_tokens_raw_sum += tokens_raw as u64;
            ctx.messages.push(PromptMessage { message: user_msg, tokens_raw });
            ctx.seen_turn_ids.insert(turn_id);

            let step_id = Uuid::new_v4();
            let start = ctx.messages.len();
            let assistant_msg = Message::assistant(format!("answer {i}"));
            let tokens_raw = estimate_message(&assistant_msg, &config);
            ctx.msg_tokens_raw_sum += tokens_raw as u64;
            ctx.messages.push(PromptMessage { message: assistant_msg, tokens_raw });
            let end = ctx.messages.len();

            ctx.step_order.push(step_id);
            ctx.step_span_map.insert(step_id, MessageSpan { start, end });
            ctx.step_tokens_raw.insert(step_id, tokens_raw);
            ctx.seen_step_ids.insert(step_id);
        }
        ctx
    }

    #[test]
    fn should_compact_respects_token_threshold() {
        let mut ctx = ctx_with_messages(3);
        let mut config = CacheManagerConfig::default();
        config.threshold_tokens = Some(1);
        assert!(should_compact(&ctx, &config));
        config.threshold_tokens = Some(1_000_000);
        config.max_turns = 1_000;
        assert!(!should_compact(&ctx, &config));
        ctx.seen_turn_ids.clear();
    }

    #[test]
    fn should_compact_respects_turn_ceiling() {
        let ctx = ctx_with_messages(5);
        let mut config = CacheManagerConfig::default();
        config.threshold_tokens = None;
        config.max_turns = 2;
        assert!(should_compact(&ctx, &config));
    }

    #[test]
    fn local_compact_folds_head_and_keeps_tail() {
        let mut ctx = ctx_with_messages(10);
        let config = CacheManagerConfig {
            keep_tail_ratio: 0.2,
            ..CacheManagerConfig::default()
        };
        let before_len = ctx.messages.len();
        let changed = local_compact(&mut ctx, &config, Utc::now());
        assert!(changed);
        assert!(ctx.messages.len() < before_len);
        assert!(ctx.messages[1].message.content.extract_all_text().starts_with(CONTEXT_SUMMARY_PREFIX));
        assert_eq!(ctx.summary_versions.len(), 1);
        assert!(ctx.spans_are_valid());
        assert!(ctx.tokens_sum_is_consistent());
    }

    #[test]
    fn local_compact_is_noop_on_small_context() {
        let mut ctx = ctx_with_messages(1);
        let config = CacheManagerConfig::default();
        let changed = local_compact(&mut ctx, &config, Utc::now());
        assert!(!changed);
    }

    #[test]
    fn local_compact_preserves_prior_summary_text() {
        let mut ctx = ctx_with_messages(10);
        let config = CacheManagerConfig {
            keep_tail_ratio: 0.5,
            ..CacheManagerConfig::default()
        };
        local_compact(&mut ctx, &config, Utc::now());
        let second = local_compact(&mut ctx, &config, Utc::now());
        // Whether or not a second fold finds anything new to fold, spans stay valid.
        assert!(ctx.spans_are_valid());
        let _ = second;
    }

    #[test]
    fn finalize_turn_to_result_card_replaces_span_with_card() {
        let mut ctx = ctx_with_messages(3);
        let config = CacheManagerConfig::default();
        let turn0_step_id = ctx.step_order[0];
        let ok = finalize_turn_to_result_card(
            &mut ctx,
            &config,
            "turn 0",
            "final answer for turn 0",
            &serde_json::json!({"bg_procs": []}),
            &[turn0_step_id],
            Utc::now(),
        )
        .unwrap();
        assert!(ok);
        assert!(!ctx.step_order.contains(&turn0_step_id));
        assert!(ctx.spans_are_valid());
        assert!(ctx.tokens_sum_is_consistent());
        let has_card = ctx
            .messages
            .iter()
            .any(|pm| pm.message.content.extract_all_text().starts_with(TURN_RESULT_CARD_PREFIX));
        assert!(has_card);
    }
}

//! Token estimation (C1) and EMA-based calibration.
//!
//! Each message's character count is split into a "text" share (role +
//! content + tool-call ids, divided by `chars_per_token_text`) and a
//! "struct" share (stable-JSON of any tool-call payload, divided by
//! `chars_per_token_struct`). Tool/response schemas are estimated once per
//! cache key and added on top of the per-message sum.

use ao_domain::config::CacheManagerConfig;
use ao_domain::tool::{ContentPart, Message, MessageContent, Role};

use crate::stable_json::to_stable_json;

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn chars_to_tokens(chars: usize, chars_per_token: f32) -> u32 {
    if chars == 0 {
        return 0;
    }
    (chars as f32 / chars_per_token).ceil() as u32
}

/// Estimate one message's raw token count (uncalibrated).
pub fn estimate_message(msg: &Message, config: &CacheManagerConfig) -> u32 {
    let mut text_chars = role_str(msg.role).len();
    let mut struct_chars = 0usize;

    match &msg.content {
        MessageContent::Text(text) => text_chars += text.chars().count(),
        MessageContent::Parts(parts) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => text_chars += text.chars().count(),
                    ContentPart::ToolUse { id, name, input } => {
                        text_chars += id.chars().count();
                        let payload = serde_json::json!({ "name": name, "input": input });
                        struct_chars += to_stable_json(&payload).chars().count();
                    }
                    ContentPart::ToolResult { tool_use_id, content, .. } => {
                        text_chars += tool_use_id.chars().count() + content.chars().count();
                    }
                    ContentPart::Image { url, media_type } => {
                        text_chars += url.chars().count() + media_type.as_deref().unwrap_or("").chars().count();
                    }
                }
            }
        }
    }

    chars_to_tokens(text_chars, config.chars_per_token_text) + chars_to_tokens(struct_chars, config.chars_per_token_struct)
}

/// Estimate a tool/response schema's raw token count from its stable-JSON
/// serialization, treated entirely as "struct" content.
pub fn estimate_schema(schema: &serde_json::Value, config: &CacheManagerConfig) -> u32 {
    let chars = to_stable_json(schema).chars().count();
    chars_to_tokens(chars, config.chars_per_token_struct)
}

/// Apply the message's calibration multiplier to a raw estimate.
pub fn calibrated(raw: u32, multiplier: f32) -> u32 {
    (raw as f32 * multiplier).round() as u32
}

/// `ratio = actual / raw_estimate`, clamped to `[calibration_min,
/// calibration_max]`; then EMA-blend into `old_multiplier` with
/// `calibration_alpha`. The blended multiplier is clamped separately to
/// `[calibration_mult_min, calibration_mult_max]` — a wider range than the
/// ratio clamp, since the multiplier is allowed to drift further than any
/// single observation's ratio.
pub fn update_calibration(old_multiplier: f32, raw_estimate: u32, actual_tokens: u32, config: &CacheManagerConfig) -> f32 {
    if raw_estimate == 0 {
        return old_multiplier;
    }
    let ratio = (actual_tokens as f32 / raw_estimate as f32).clamp(config.calibration_min, config.calibration_max);
    let blended = (1.0 - config.calibration_alpha) * old_multiplier + config.calibration_alpha * ratio;
    blended.clamp(config.calibration_mult_min, config.calibration_mult_max)
}

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context cache / compaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Configuration for `CacheManager`'s incremental context assembly and
/// two-tier (local + LLM-assisted) compaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheManagerConfig {
    /// Run compaction when the estimated prompt token count exceeds this.
    /// `None` disables token-threshold compaction entirely.
    #[serde(default = "d_threshold_tokens")]
    pub threshold_tokens: Option<u32>,
    /// Fraction (0.0-1.0) of the most recent steps that are never folded,
    /// regardless of how compaction proceeds.
    #[serde(default = "d_keep_tail_ratio")]
    pub keep_tail_ratio: f32,
    /// Target token count compaction aims to leave the window at.
    #[serde(default = "d_target_after_tokens")]
    pub target_after_tokens: u32,
    /// Hard ceiling on number of turns kept before compaction is forced
    /// regardless of token estimate (mirrors the corpus's turn-count trigger).
    #[serde(default = "d_max_turns")]
    pub max_turns: u32,
    /// Characters-per-token ratio used to estimate plain text.
    #[serde(default = "d_chars_per_token_text")]
    pub chars_per_token_text: f32,
    /// Characters-per-token ratio used to estimate structured (JSON) content.
    #[serde(default = "d_chars_per_token_struct")]
    pub chars_per_token_struct: f32,
    /// EMA smoothing factor applied when calibrating the estimate against
    /// provider-reported usage.
    #[serde(default = "d_calibration_alpha")]
    pub calibration_alpha: f32,
    /// The per-observation `actual/estimate` ratio is clamped to this range
    /// before it feeds the EMA blend.
    #[serde(default = "d_calibration_min")]
    pub calibration_min: f32,
    #[serde(default = "d_calibration_max")]
    pub calibration_max: f32,
    /// The blended calibration multiplier itself is clamped to this
    /// (wider) range to avoid runaway drift — distinct from the ratio
    /// clamp above.
    #[serde(default = "d_calibration_mult_min")]
    pub calibration_mult_min: f32,
    #[serde(default = "d_calibration_mult_max")]
    pub calibration_mult_max: f32,
    /// Maximum characters a folded turn "result card" may occupy.
    #[serde(default = "d_max_result_card_chars")]
    pub max_result_card_chars: usize,
    /// Whether LLM-assisted summarization is attempted before falling back
    /// to deterministic local folding.
    #[serde(default = "d_true")]
    pub llm_assisted: bool,
}

impl Default for CacheManagerConfig {
    fn default() -> Self {
        Self {
            threshold_tokens: d_threshold_tokens(),
            keep_tail_ratio: d_keep_tail_ratio(),
            target_after_tokens: d_target_after_tokens(),
            max_turns: d_max_turns(),
            chars_per_token_text: d_chars_per_token_text(),
            chars_per_token_struct: d_chars_per_token_struct(),
            calibration_alpha: d_calibration_alpha(),
            calibration_min: d_calibration_min(),
            calibration_max: d_calibration_max(),
            calibration_mult_min: d_calibration_mult_min(),
            calibration_mult_max: d_calibration_mult_max(),
            max_result_card_chars: d_max_result_card_chars(),
            llm_assisted: true,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_threshold_tokens() -> Option<u32> {
    Some(20_000)
}
fn d_keep_tail_ratio() -> f32 {
    0.30
}
fn d_target_after_tokens() -> u32 {
    12_000
}
fn d_max_turns() -> u32 {
    200
}
fn d_chars_per_token_text() -> f32 {
    4.0
}
fn d_chars_per_token_struct() -> f32 {
    3.0
}
fn d_calibration_alpha() -> f32 {
    0.15
}
fn d_calibration_min() -> f32 {
    0.5
}
fn d_calibration_max() -> f32 {
    2.0
}
fn d_calibration_mult_min() -> f32 {
    0.6
}
fn d_calibration_mult_max() -> f32 {
    2.5
}
fn d_max_result_card_chars() -> usize {
    4_000
}
fn d_true() -> bool {
    true
}

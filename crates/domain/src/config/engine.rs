use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Executor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Top-level limits for the THINK/DECIDE/EXECUTE/HITL/OBSERVE state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// A Trace is force-failed once it reaches this many turns.
    #[serde(default = "d_max_turns")]
    pub max_turns: u32,
    /// Steps allowed within a single Turn before it is force-failed, derived
    /// from `max_turns` unless overridden.
    #[serde(default)]
    pub per_turn_step_limit: Option<u32>,
    /// The system message every THINK cycle builds its message window on
    /// top of. Hashed into `RuntimeContext::system_prompt_hash`.
    #[serde(default = "d_system_prompt")]
    pub system_prompt: String,
    /// When `true`, THINK asks the model for a `<think>...</think>` preamble
    /// and extracts it into the Step's `thought` instead of leaving it in
    /// the text the content-action coercion table parses.
    #[serde(default = "d_thinking")]
    pub thinking: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_turns: d_max_turns(),
            per_turn_step_limit: None,
            system_prompt: d_system_prompt(),
            thinking: d_thinking(),
        }
    }
}

impl ExecutorConfig {
    /// The effective per-turn step ceiling: the override if set, else a
    /// fraction of `max_turns` with a sensible floor.
    pub fn effective_per_turn_step_limit(&self) -> u32 {
        self.per_turn_step_limit
            .unwrap_or_else(|| (self.max_turns / 4).max(10))
    }
}

fn d_max_turns() -> u32 {
    100
}

fn d_thinking() -> bool {
    true
}

fn d_system_prompt() -> String {
    "You are an autonomous agent. Use the available tools to accomplish the \
     user's goal, then respond with a finish action summarizing the result."
        .to_string()
}

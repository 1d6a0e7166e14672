use serde::Serialize;

/// Structured lifecycle events emitted across the engine, in addition to
/// ordinary `tracing` spans. These are the facts worth keeping as discrete,
/// machine-readable records rather than free-text log lines.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    TraceStarted {
        trace_id: String,
    },
    TurnStarted {
        trace_id: String,
        turn_id: String,
        turn_index: u32,
    },
    StepTransition {
        trace_id: String,
        turn_id: String,
        step_id: String,
        from: String,
        to: String,
    },
    ActionDispatched {
        trace_id: String,
        step_id: String,
        tool_name: String,
        requires_confirmation: bool,
    },
    HitlSuspended {
        trace_id: String,
        pending_action_id: String,
    },
    HitlResumed {
        trace_id: String,
        pending_action_id: String,
        approved: bool,
    },
    ObservationExternalized {
        trace_id: String,
        tool_name: String,
        ref_id: String,
        original_chars: usize,
        preview_chars: usize,
    },
    CompactionRan {
        trace_id: String,
        strategy: String,
        steps_folded: usize,
        tokens_before: u32,
        tokens_after: u32,
    },
    TokenCalibrationUpdated {
        trace_id: String,
        estimated: u32,
        actual: u32,
        new_multiplier: f32,
    },
    CheckpointSaved {
        trace_id: String,
        turn_count: u32,
    },
    LlmRequest {
        provider: String,
        model: String,
        role: String,
        streaming: bool,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    TraceEnded {
        trace_id: String,
        status: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "ao_event");
    }
}

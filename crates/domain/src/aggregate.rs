//! The Trace/Turn/Step/Action/Observation data model: the aggregate the
//! Executor drives and the CheckpointStore persists as a whole.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trace
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Idle,
    Running,
    Waiting,
    Paused,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Think,
    Decide,
    Execute,
    Hitl,
    Observe,
    End,
}

/// Aggregated token accounting for a Trace, refreshed by the CacheManager.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenInfo {
    pub prompt_tokens_estimated: u32,
    pub prompt_tokens_actual: Option<u32>,
    pub completion_tokens_total: u32,
    pub calibration_multiplier: f32,
}

impl TokenInfo {
    pub fn new() -> Self {
        Self {
            calibration_multiplier: 1.0,
            ..Default::default()
        }
    }
}

/// The aggregate root. Owned exclusively by the CheckpointStore; every
/// mutation happens through the Executor and is followed by a checkpoint
/// save before the next state transition is attempted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub trace_id: Uuid,
    pub client_id: String,
    pub status: TraceStatus,
    pub node: Node,
    pub current_turn_id: Option<Uuid>,
    pub current_step_id: Option<Uuid>,
    pub pending_action_id: Option<Uuid>,
    pub turns: Vec<Turn>,
    pub max_turns: u32,
    pub token_info: TokenInfo,
    pub error_count: u32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Trace {
    pub fn new(client_id: impl Into<String>, max_turns: u32, now: DateTime<Utc>) -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            client_id: client_id.into(),
            status: TraceStatus::Idle,
            node: Node::Think,
            current_turn_id: None,
            current_step_id: None,
            pending_action_id: None,
            turns: Vec::new(),
            max_turns,
            token_info: TokenInfo::new(),
            error_count: 0,
            error_message: None,
            created_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn current_turn(&self) -> Option<&Turn> {
        let id = self.current_turn_id?;
        self.turns.iter().find(|t| t.turn_id == id)
    }

    pub fn current_turn_mut(&mut self) -> Option<&mut Turn> {
        let id = self.current_turn_id?;
        self.turns.iter_mut().find(|t| t.turn_id == id)
    }

    pub fn current_step(&self) -> Option<&Step> {
        let turn = self.current_turn()?;
        let id = self.current_step_id?;
        turn.steps.iter().find(|s| s.step_id == id)
    }

    pub fn current_step_mut(&mut self) -> Option<&mut Step> {
        let id = self.current_step_id?;
        let turn = self.current_turn_mut()?;
        turn.steps.iter_mut().find(|s| s.step_id == id)
    }

    /// Starts a new Turn on top of whatever Turns already exist and makes it
    /// current. `index` is 1-based within the Trace.
    pub fn push_turn(&mut self, user_input: impl Into<String>, now: DateTime<Utc>) -> Uuid {
        let index = self.turns.len() as u32 + 1;
        let turn = Turn::new(index, user_input, now);
        let id = turn.turn_id;
        self.turns.push(turn);
        self.current_turn_id = Some(id);
        self.current_step_id = None;
        id
    }

    /// Whether advancing to one more Step would exceed `max_turns`-derived
    /// limits at the Trace level (the hard turn ceiling, distinct from the
    /// per-turn step ceiling checked by the Executor at OBSERVE).
    pub fn reached_max_turns(&self) -> bool {
        self.turns.len() as u32 >= self.max_turns
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub turn_id: Uuid,
    pub index: u32,
    pub user_input: String,
    pub status: TurnStatus,
    pub steps: Vec<Step>,
}

impl Turn {
    pub fn new(index: u32, user_input: impl Into<String>, _now: DateTime<Utc>) -> Self {
        Self {
            turn_id: Uuid::new_v4(),
            index,
            user_input: user_input.into(),
            status: TurnStatus::Running,
            steps: Vec::new(),
        }
    }

    pub fn push_step(&mut self) -> Uuid {
        let index = self.steps.len() as u32 + 1;
        let step = Step::new(index);
        let id = step.step_id;
        self.steps.push(step);
        id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Step
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Running,
    WaitingInput,
    WaitingConfirm,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub step_id: Uuid,
    pub index: u32,
    /// Monotonic counter within the owning Trace, for observability parity
    /// across THINK/EXECUTE cycles independent of Turn/Step nesting.
    pub node_seq: u32,
    pub status: StepStatus,
    pub thought: Option<String>,
    pub tool_calls: Vec<crate::tool::ToolCall>,
    pub actions: Vec<Action>,
    pub observations: Vec<Observation>,
}

impl Step {
    pub fn new(index: u32) -> Self {
        Self {
            step_id: Uuid::new_v4(),
            index,
            node_seq: 0,
            status: StepStatus::Running,
            thought: None,
            tool_calls: Vec::new(),
            actions: Vec::new(),
            observations: Vec::new(),
        }
    }

    pub fn next_unresolved_action(&self) -> Option<&Action> {
        self.actions
            .iter()
            .find(|a| !matches!(a.status, ActionStatus::Done | ActionStatus::Skipped))
    }

    pub fn next_unresolved_action_mut(&mut self) -> Option<&mut Action> {
        self.actions
            .iter_mut()
            .find(|a| !matches!(a.status, ActionStatus::Done | ActionStatus::Skipped))
    }

    pub fn observation_for(&self, action_id: Uuid) -> Option<&Observation> {
        self.observations.iter().find(|o| o.action_id == action_id)
    }

    /// Invariant check: every TOOL Action has a matching Observation before
    /// the Step may be marked DONE.
    pub fn all_tool_actions_observed(&self) -> bool {
        self.actions
            .iter()
            .filter(|a| matches!(a.kind, ActionKind::Tool))
            .all(|a| self.observation_for(a.action_id).is_some())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Action
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Tool,
    RequestInput,
    RequestConfirm,
    Finish,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Planned,
    WaitingConfirm,
    WaitingInput,
    Approved,
    Denied,
    Running,
    Done,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmStatus {
    Pending,
    Approved,
    Denied,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub action_id: Uuid,
    pub kind: ActionKind,
    pub status: ActionStatus,

    // TOOL fields.
    pub tool_name: Option<String>,
    pub args: Option<serde_json::Value>,
    pub requires_confirm: bool,
    pub confirm_status: Option<ConfirmStatus>,

    // Non-TOOL fields.
    pub message: Option<String>,
    pub request_input: Option<String>,

    /// The LLM's raw JSON for this content action (FINISH / REQUEST_INPUT /
    /// REQUEST_CONFIRM), kept for audit and re-parsing if needed.
    pub full_ref: Option<serde_json::Value>,
}

impl Action {
    pub fn new_tool(tool_name: impl Into<String>, args: serde_json::Value, requires_confirm: bool) -> Self {
        Self {
            action_id: Uuid::new_v4(),
            kind: ActionKind::Tool,
            status: ActionStatus::Planned,
            tool_name: Some(tool_name.into()),
            args: Some(args),
            requires_confirm,
            confirm_status: if requires_confirm {
                Some(ConfirmStatus::Pending)
            } else {
                None
            },
            message: None,
            request_input: None,
            full_ref: None,
        }
    }

    pub fn new_content(kind: ActionKind, message: impl Into<String>, full_ref: serde_json::Value) -> Self {
        debug_assert!(!matches!(kind, ActionKind::Tool));
        Self {
            action_id: Uuid::new_v4(),
            kind,
            status: ActionStatus::Planned,
            tool_name: None,
            args: None,
            requires_confirm: false,
            confirm_status: None,
            message: Some(message.into()),
            request_input: None,
            full_ref: Some(full_ref),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Observation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationKind {
    ToolResult,
    ToolError,
    HitlDenied,
    Info,
}

/// A ref descriptor pointing at a persisted blob in the ToolResultStore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationRef {
    pub ref_id: String,
    pub mime: String,
    pub byte_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub observation_id: Uuid,
    pub action_id: Uuid,
    pub kind: ObservationKind,
    pub ok: bool,
    /// Inline preview text (bounded; the full content lives behind `full_ref`
    /// when externalized).
    pub content: String,
    pub full_ref: Option<ObservationRef>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RuntimeContext (owned by CacheManager, keyed by trace_id)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One entry in the assembled prompt message window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptMessage {
    pub message: crate::tool::Message,
    pub tokens_raw: u32,
}

/// A half-open `[start, end)` span into `RuntimeContext::messages` owned by
/// one Step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MessageSpan {
    pub start: usize,
    pub end: usize,
}

impl MessageSpan {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Audit record of a single compaction pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryVersion {
    pub version: u32,
    pub strategy: String,
    pub steps_folded: Vec<Uuid>,
    pub tokens_before: u32,
    pub tokens_after: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeContext {
    pub trace_id: Uuid,
    pub system_prompt_hash: String,
    pub calibration_multiplier: f32,
    pub messages: Vec<PromptMessage>,
    pub msg_tokens_raw_sum: u64,
    pub tool_schema_key: Option<String>,
    pub tool_schema_tokens_raw: u32,
    pub response_schema_key: Option<String>,
    pub response_schema_tokens_raw: u32,
    pub step_order: Vec<Uuid>,
    pub step_span_map: HashMap<Uuid, MessageSpan>,
    pub step_tokens_raw: HashMap<Uuid, u32>,
    pub seen_turn_ids: std::collections::HashSet<Uuid>,
    pub seen_step_ids: std::collections::HashSet<Uuid>,
    pub summary_versions: Vec<SummaryVersion>,
}

impl RuntimeContext {
    pub fn new(trace_id: Uuid, system_prompt_hash: impl Into<String>) -> Self {
        Self {
            trace_id,
            system_prompt_hash: system_prompt_hash.into(),
            calibration_multiplier: 1.0,
            messages: Vec::new(),
            msg_tokens_raw_sum: 0,
            tool_schema_key: None,
            tool_schema_tokens_raw: 0,
            response_schema_key: None,
            response_schema_tokens_raw: 0,
            step_order: Vec::new(),
            step_span_map: HashMap::new(),
            step_tokens_raw: HashMap::new(),
            seen_turn_ids: std::collections::HashSet::new(),
            seen_step_ids: std::collections::HashSet::new(),
            summary_versions: Vec::new(),
        }
    }

    /// Invariant check, used by tests: `msg_tokens_raw_sum` must equal the
    /// sum of every message's recorded token estimate.
    pub fn tokens_sum_is_consistent(&self) -> bool {
        let actual: u64 = self.messages.iter().map(|m| m.tokens_raw as u64).sum();
        actual == self.msg_tokens_raw_sum
    }

    /// Invariant check: every span in `step_span_map` is contiguous,
    /// non-empty, and within bounds.
    pub fn spans_are_valid(&self) -> bool {
        self.step_order.iter().all(|step_id| {
            self.step_span_map
                .get(step_id)
                .map(|span| !span.is_empty() && span.end <= self.messages.len() && span.start < span.end)
                .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn trace_new_starts_idle_at_think() {
        let t = Trace::new("client-1", 100, Utc::now());
        assert_eq!(t.status, TraceStatus::Idle);
        assert_eq!(t.node, Node::Think);
        assert!(t.turns.is_empty());
    }

    #[test]
    fn push_turn_sets_current_and_resets_step() {
        let mut t = Trace::new("client-1", 100, Utc::now());
        t.current_step_id = Some(Uuid::new_v4());
        let id = t.push_turn("hello", Utc::now());
        assert_eq!(t.current_turn_id, Some(id));
        assert!(t.current_step_id.is_none());
        assert_eq!(t.turns[0].index, 1);
    }

    #[test]
    fn reached_max_turns() {
        let mut t = Trace::new("client-1", 1, Utc::now());
        assert!(!t.reached_max_turns());
        t.push_turn("hello", Utc::now());
        assert!(t.reached_max_turns());
    }

    #[test]
    fn step_all_tool_actions_observed_false_until_matched() {
        let mut step = Step::new(1);
        let action = Action::new_tool("exec.run", serde_json::json!({}), false);
        let action_id = action.action_id;
        step.actions.push(action);
        assert!(!step.all_tool_actions_observed());

        step.observations.push(Observation {
            observation_id: Uuid::new_v4(),
            action_id,
            kind: ObservationKind::ToolResult,
            ok: true,
            content: "ok".into(),
            full_ref: None,
        });
        assert!(step.all_tool_actions_observed());
    }

    #[test]
    fn runtime_context_token_sum_invariant() {
        let mut ctx = RuntimeContext::new(Uuid::new_v4(), "hash123");
        assert!(ctx.tokens_sum_is_consistent());
        ctx.messages.push(PromptMessage {
            message: crate::tool::Message::system("sys"),
            tokens_raw: 10,
        });
        ctx.msg_tokens_raw_sum = 10;
        assert!(ctx.tokens_sum_is_consistent());
        ctx.msg_tokens_raw_sum = 11;
        assert!(!ctx.tokens_sum_is_consistent());
    }

    #[test]
    fn runtime_context_span_validity() {
        let mut ctx = RuntimeContext::new(Uuid::new_v4(), "hash123");
        let step_id = Uuid::new_v4();
        ctx.messages.push(PromptMessage {
            message: crate::tool::Message::system("sys"),
            tokens_raw: 5,
        });
        ctx.step_order.push(step_id);
        ctx.step_span_map.insert(step_id, MessageSpan { start: 0, end: 1 });
        assert!(ctx.spans_are_valid());

        ctx.step_span_map.insert(step_id, MessageSpan { start: 0, end: 0 });
        assert!(!ctx.spans_are_valid());
    }
}

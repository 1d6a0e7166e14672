//! `TaskService` (C10) — the public facade: start a Trace, add a Turn to
//! an existing one, inject a HITL response, and project the current
//! state. Grounded in the teacher's `runtime/tasks.rs` `TaskStore` facade
//! (load-mutate-save around a shared aggregate), adapted from its
//! queue/worker shape to a direct load-checkpoint -> mutate -> run the
//! Executor -> save-checkpoint cycle, since this engine's HITL suspension
//! already makes the Executor itself resumable.

use std::sync::Arc;

use ao_domain::aggregate::{ActionKind, ActionStatus, ConfirmStatus, Node, Observation, ObservationKind, Trace, TraceStatus};
use ao_domain::error::{Error, Result};
use ao_domain::telemetry::TraceEvent;
use chrono::Utc;
use uuid::Uuid;

use crate::events::EventBus;
use crate::executor::Executor;
use ao_store::checkpoint::CheckpointStore;

/// Case-insensitive truthy parse for HITL confirm replies, per the
/// `{yes, y, confirm, ok, true, 1}` table.
fn parse_truthy(input: &str) -> bool {
    matches!(
        input.trim().to_ascii_lowercase().as_str(),
        "yes" | "y" | "confirm" | "ok" | "true" | "1"
    )
}

/// Outcome of `submit_hitl`: `ok` is `false` when `request_id` no longer
/// matches the Trace's current pending Action (it already advanced, or a
/// duplicate submission arrived).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitHitlOutcome {
    pub ok: bool,
}

pub struct TaskService {
    executor: Arc<Executor>,
    checkpoint_store: Arc<dyn CheckpointStore>,
    events: Arc<EventBus>,
    max_turns: u32,
}

impl TaskService {
    pub fn new(executor: Arc<Executor>, checkpoint_store: Arc<dyn CheckpointStore>, events: Arc<EventBus>, max_turns: u32) -> Self {
        Self {
            executor,
            checkpoint_store,
            events,
            max_turns,
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Create a new Trace with one initial Turn and drive it forward until
    /// it suspends at HITL or reaches END.
    pub async fn start(&self, client_id: impl Into<String>, goal: impl Into<String>) -> Result<Uuid> {
        let now = Utc::now();
        let mut trace = Trace::new(client_id, self.max_turns, now);
        trace.started_at = Some(now);
        let trace_id = trace.trace_id;
        let turn_id = trace.push_turn(goal, now);
        trace.status = TraceStatus::Running;

        TraceEvent::TraceStarted {
            trace_id: trace_id.to_string(),
        }
        .emit();
        TraceEvent::TurnStarted {
            trace_id: trace_id.to_string(),
            turn_id: turn_id.to_string(),
            turn_index: 1,
        }
        .emit();

        self.checkpoint_store.save(&trace).await?;
        self.executor.run(&mut trace).await?;
        self.checkpoint_store.save(&trace).await?;
        Ok(trace_id)
    }

    /// Append a new Turn to an existing Trace and resume the Executor from
    /// THINK. Errors if the Trace has no checkpoint.
    pub async fn add_turn(&self, trace_id: Uuid, goal: impl Into<String>) -> Result<()> {
        let mut trace = self.checkpoint_store.load(trace_id).await?;
        if trace.node == Node::Hitl || trace.status == TraceStatus::Waiting {
            return Err(Error::InvariantViolation(format!(
                "trace {trace_id} has a pending HITL request; submit_hitl before adding a turn"
            )));
        }

        let now = Utc::now();
        let turn_index = trace.turns.len() as u32 + 1;
        let turn_id = trace.push_turn(goal, now);
        trace.node = Node::Think;
        trace.status = TraceStatus::Running;
        trace.error_message = None;

        TraceEvent::TurnStarted {
            trace_id: trace_id.to_string(),
            turn_id: turn_id.to_string(),
            turn_index,
        }
        .emit();

        self.checkpoint_store.save(&trace).await?;
        self.executor.run(&mut trace).await?;
        self.checkpoint_store.save(&trace).await?;
        Ok(())
    }

    /// Inject a HITL response and resume the suspended Executor.
    ///
    /// `request_id` must equal the Trace's current `pending_action_id`;
    /// otherwise this is a stale or duplicate submission and returns
    /// `{ok: false}` without mutating anything.
    pub async fn submit_hitl(&self, trace_id: Uuid, request_id: Uuid, input_text: &str) -> Result<SubmitHitlOutcome> {
        let mut trace = self.checkpoint_store.load(trace_id).await?;
        let pending = trace
            .pending_action_id
            .ok_or_else(|| Error::NoPendingHitl(trace_id.to_string()))?;

        if pending != request_id {
            return Ok(SubmitHitlOutcome { ok: false });
        }

        let kind = {
            let step = trace
                .current_step()
                .ok_or_else(|| Error::InvariantViolation("submit_hitl with no current step".to_string()))?;
            step.actions
                .iter()
                .find(|a| a.action_id == pending)
                .map(|a| a.kind)
                .ok_or_else(|| Error::InvariantViolation(format!("pending action {pending} not found in current step")))?
        };

        let approved = match kind {
            ActionKind::Tool => self.resolve_tool_confirm(&mut trace, pending, input_text)?,
            ActionKind::RequestConfirm => self.resolve_content_confirm(&mut trace, pending, input_text)?,
            ActionKind::RequestInput => self.resolve_request_input(&mut trace, pending, input_text)?,
            ActionKind::Finish | ActionKind::Error => {
                return Err(Error::InvariantViolation(format!(
                    "action {pending} of kind {kind:?} cannot receive a HITL response"
                )));
            }
        };

        if let Some(step) = trace.current_step_mut() {
            step.status = ao_domain::aggregate::StepStatus::Running;
        }
        trace.pending_action_id = None;
        trace.status = TraceStatus::Running;
        trace.node = Node::Decide;

        TraceEvent::HitlResumed {
            trace_id: trace_id.to_string(),
            pending_action_id: pending.to_string(),
            approved,
        }
        .emit();

        self.checkpoint_store.save(&trace).await?;
        self.executor.run(&mut trace).await?;
        self.checkpoint_store.save(&trace).await?;
        Ok(SubmitHitlOutcome { ok: true })
    }

    /// TOOL pre-execution confirm: truthy approves (the next DECIDE pass
    /// routes straight to EXECUTE); falsy denies and synthesizes a
    /// `HITL_DENIED` observation so the Action is resolved without running.
    fn resolve_tool_confirm(&self, trace: &mut Trace, action_id: Uuid, input_text: &str) -> Result<bool> {
        let approved = parse_truthy(input_text);
        let step = trace.current_step_mut().expect("caller holds a current step");
        let action = step
            .actions
            .iter_mut()
            .find(|a| a.action_id == action_id)
            .expect("caller already located this action");

        if approved {
            action.status = ActionStatus::Approved;
            action.confirm_status = Some(ConfirmStatus::Approved);
        } else {
            action.status = ActionStatus::Skipped;
            action.confirm_status = Some(ConfirmStatus::Denied);
            step.observations.push(Observation {
                observation_id: Uuid::new_v4(),
                action_id,
                kind: ObservationKind::HitlDenied,
                ok: false,
                content: "user_rejected".to_string(),
                full_ref: None,
            });
        }
        Ok(approved)
    }

    /// REQUEST_CONFIRM is a content action, not a tool call: truthy marks it
    /// DONE with the raw reply back-filled as `request_input` (so the next
    /// THINK sees it as the user's answer); falsy marks it SKIPPED and
    /// synthesizes the same `HITL_DENIED` observation as a tool denial.
    fn resolve_content_confirm(&self, trace: &mut Trace, action_id: Uuid, input_text: &str) -> Result<bool> {
        let approved = parse_truthy(input_text);
        let step = trace.current_step_mut().expect("caller holds a current step");
        let action = step
            .actions
            .iter_mut()
            .find(|a| a.action_id == action_id)
            .expect("caller already located this action");

        if approved {
            action.status = ActionStatus::Done;
            action.confirm_status = Some(ConfirmStatus::Approved);
            action.request_input = Some(input_text.to_string());
        } else {
            action.status = ActionStatus::Skipped;
            action.confirm_status = Some(ConfirmStatus::Denied);
            step.observations.push(Observation {
                observation_id: Uuid::new_v4(),
                action_id,
                kind: ObservationKind::HitlDenied,
                ok: false,
                content: "user_rejected".to_string(),
                full_ref: None,
            });
        }
        Ok(approved)
    }

    /// REQUEST_INPUT back-fills the raw reply as `request_input` and marks
    /// the Action DONE; the CacheManager appends it as a user message the
    /// next time THINK builds messages.
    fn resolve_request_input(&self, trace: &mut Trace, action_id: Uuid, input_text: &str) -> Result<bool> {
        let step = trace.current_step_mut().expect("caller holds a current step");
        let action = step
            .actions
            .iter_mut()
            .find(|a| a.action_id == action_id)
            .expect("caller already located this action");
        action.request_input = Some(input_text.to_string());
        action.status = ActionStatus::Done;
        Ok(true)
    }

    /// A read-only projection of the current Trace state.
    pub async fn get_trace(&self, trace_id: Uuid) -> Result<Trace> {
        self.checkpoint_store.load(trace_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ao_cache::CacheManager;
    use ao_domain::config::{CacheManagerConfig, ExecConfig, ExecutorConfig, StoreConfig};
    use ao_domain::stream::{BoxStream, StreamEvent};
    use ao_domain::tool::ToolCall;
    use ao_providers::registry::ProviderRegistry;
    use ao_providers::traits::{ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse, LlmProvider};
    use ao_domain::capability::LlmCapabilities;
    use ao_store::checkpoint::InMemoryCheckpointStore;
    use ao_store::tool_result::ToolResultStore;
    use ao_tools::{ProcessManager, ToolRegistry};
    use parking_lot::Mutex as PlMutex;
    use std::collections::HashMap;

    /// A scripted `LlmProvider` test double: returns one `ChatResponse` per
    /// call, in order, cycling on the last entry once exhausted.
    struct ScriptedProvider {
        responses: PlMutex<Vec<ChatResponse>>,
        capabilities: LlmCapabilities,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<ChatResponse>) -> Self {
            Self {
                responses: PlMutex::new(responses),
                capabilities: LlmCapabilities::default(),
            }
        }
    }

    #[async_trait::async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn chat(&self, _req: ChatRequest) -> Result<ChatResponse> {
            let mut responses = self.responses.lock();
            if responses.len() > 1 {
                Ok(responses.remove(0))
            } else {
                Ok(responses.first().expect("scripted provider needs at least one response").clone())
            }
        }

        async fn chat_stream(&self, _req: ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
            Err(Error::Other("streaming not scripted in tests".to_string()))
        }

        async fn embeddings(&self, _req: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
            Err(Error::Other("embeddings not scripted in tests".to_string()))
        }

        fn capabilities(&self) -> &LlmCapabilities {
            &self.capabilities
        }

        fn provider_id(&self) -> &str {
            "scripted"
        }
    }

    fn finish_response(message: &str) -> ChatResponse {
        ChatResponse {
            content: format!(r#"{{"type":"finish","message":"{message}"}}"#),
            tool_calls: vec![],
            usage: None,
            model: "test-model".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }

    fn request_input_response(prompt: &str) -> ChatResponse {
        ChatResponse {
            content: format!(r#"{{"type":"request_input","message":"{prompt}"}}"#),
            tool_calls: vec![],
            usage: None,
            model: "test-model".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }

    fn tool_call_response(tool_name: &str, args: serde_json::Value) -> ChatResponse {
        ChatResponse {
            content: String::new(),
            tool_calls: vec![ToolCall {
                call_id: "call_1".to_string(),
                tool_name: tool_name.to_string(),
                arguments: args,
            }],
            usage: None,
            model: "test-model".to_string(),
            finish_reason: Some("tool_calls".to_string()),
        }
    }

    fn service_with_provider(responses: Vec<ChatResponse>) -> (TaskService, tempfile::TempDir) {
        let workspace = tempfile::tempdir().unwrap();
        let tool_result_store = Arc::new(ToolResultStore::new(workspace.path(), "tool_results").unwrap());
        let store_config = StoreConfig::default();
        let checkpoint_store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
        let events = Arc::new(EventBus::new());
        let locks = Arc::new(crate::lock::TraceLockMap::new());
        let cache = Arc::new(CacheManager::new(CacheManagerConfig {
            llm_assisted: false,
            ..CacheManagerConfig::default()
        }));
        let process_manager = Arc::new(ProcessManager::new(ExecConfig::default()));
        let tools = Arc::new(ToolRegistry::with_defaults(process_manager, workspace.path().to_path_buf()));

        let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
        providers.insert("scripted".to_string(), Arc::new(ScriptedProvider::new(responses)));
        let mut roles = HashMap::new();
        roles.insert("executor".to_string(), "scripted/test-model".to_string());
        let registry = Arc::new(ProviderRegistry::from_parts(providers, roles));

        let executor_config = ExecutorConfig::default();
        let executor = Arc::new(Executor::new(
            cache,
            tools,
            tool_result_store,
            store_config,
            checkpoint_store.clone(),
            events.clone(),
            locks,
            registry,
            executor_config.clone(),
            "you are a test agent",
        ));

        (TaskService::new(executor, checkpoint_store, events, executor_config.max_turns), workspace)
    }

    #[tokio::test]
    async fn start_with_immediate_finish_ends_done() {
        let (service, _workspace) = service_with_provider(vec![finish_response("all done")]);
        let trace_id = service.start("client-1", "say hi").await.unwrap();
        let trace = service.get_trace(trace_id).await.unwrap();
        assert_eq!(trace.status, TraceStatus::Done);
        assert_eq!(trace.node, Node::End);
    }

    #[tokio::test]
    async fn start_with_tool_call_runs_tool_then_finishes() {
        let (service, _workspace) = service_with_provider(vec![
            tool_call_response("exec.run", serde_json::json!({"cmd": "echo hi"})),
            finish_response("ran it"),
        ]);
        let trace_id = service.start("client-1", "run echo").await.unwrap();
        let trace = service.get_trace(trace_id).await.unwrap();
        assert_eq!(trace.status, TraceStatus::Done);
        let turn = &trace.turns[0];
        assert!(turn.steps[0].actions.iter().any(|a| matches!(a.kind, ActionKind::Tool)));
    }

    #[tokio::test]
    async fn start_suspends_at_request_input_then_resumes_on_submit_hitl() {
        let (service, _workspace) = service_with_provider(vec![request_input_response("which city?"), finish_response("Beijing it is")]);
        let trace_id = service.start("client-1", "tell me the weather").await.unwrap();

        let trace = service.get_trace(trace_id).await.unwrap();
        assert_eq!(trace.status, TraceStatus::Waiting);
        assert_eq!(trace.node, Node::Hitl);
        let request_id = trace.pending_action_id.unwrap();

        let outcome = service.submit_hitl(trace_id, request_id, "Beijing").await.unwrap();
        assert!(outcome.ok);

        let trace = service.get_trace(trace_id).await.unwrap();
        assert_eq!(trace.status, TraceStatus::Done);
    }

    #[tokio::test]
    async fn stale_submit_hitl_request_id_is_rejected() {
        let (service, _workspace) = service_with_provider(vec![request_input_response("which city?"), finish_response("Beijing it is")]);
        let trace_id = service.start("client-1", "tell me the weather").await.unwrap();
        let trace = service.get_trace(trace_id).await.unwrap();
        let real_id = trace.pending_action_id.unwrap();

        let outcome = service.submit_hitl(trace_id, real_id, "Beijing").await.unwrap();
        assert!(outcome.ok);

        // pending_action_id has advanced (or the trace is done); resubmitting
        // the same id must be rejected rather than silently reapplied.
        let outcome2 = service.submit_hitl(trace_id, real_id, "Beijing").await;
        assert!(matches!(outcome2, Ok(SubmitHitlOutcome { ok: false }) | Err(Error::NoPendingHitl(_))));
    }

    #[tokio::test]
    async fn tool_confirm_denial_records_hitl_denied_and_continues() {
        let (service, _workspace) = service_with_provider(vec![
            tool_call_response("file.write", serde_json::json!({"path": "out.txt", "content": "hi"})),
            finish_response("skipped that"),
        ]);
        let trace_id = service.start("client-1", "write a file").await.unwrap();

        let trace = service.get_trace(trace_id).await.unwrap();
        assert_eq!(trace.node, Node::Hitl);
        let request_id = trace.pending_action_id.unwrap();

        let outcome = service.submit_hitl(trace_id, request_id, "no").await.unwrap();
        assert!(outcome.ok);

        let trace = service.get_trace(trace_id).await.unwrap();
        assert_eq!(trace.status, TraceStatus::Done);
        let action = trace.turns[0].steps[0]
            .actions
            .iter()
            .find(|a| a.action_id == request_id)
            .unwrap();
        assert_eq!(action.status, ActionStatus::Skipped);
        let observation = trace.turns[0].steps[0].observation_for(request_id).unwrap();
        assert_eq!(observation.kind, ObservationKind::HitlDenied);
        assert!(!observation.ok);
    }

    #[tokio::test]
    async fn tool_confirm_approval_executes_the_tool() {
        let (service, _workspace) = service_with_provider(vec![
            tool_call_response("file.write", serde_json::json!({"path": "out.txt", "content": "hi"})),
            finish_response("wrote it"),
        ]);
        let trace_id = service.start("client-1", "write a file").await.unwrap();
        let trace = service.get_trace(trace_id).await.unwrap();
        let request_id = trace.pending_action_id.unwrap();

        let outcome = service.submit_hitl(trace_id, request_id, "yes").await.unwrap();
        assert!(outcome.ok);

        let trace = service.get_trace(trace_id).await.unwrap();
        assert_eq!(trace.status, TraceStatus::Done);
        let observation = trace.turns[0].steps[0].observation_for(request_id).unwrap();
        assert_eq!(observation.kind, ObservationKind::ToolResult);
        assert!(observation.ok);
    }

    #[tokio::test]
    async fn get_trace_unknown_id_errors() {
        let (service, _workspace) = service_with_provider(vec![finish_response("x")]);
        let result = service.get_trace(Uuid::new_v4()).await;
        assert!(matches!(result, Err(Error::TraceNotFound(_))));
    }

    #[tokio::test]
    async fn add_turn_on_finished_trace_starts_a_fresh_turn() {
        let (service, _workspace) = service_with_provider(vec![finish_response("first"), finish_response("second")]);
        let trace_id = service.start("client-1", "first goal").await.unwrap();
        service.add_turn(trace_id, "second goal").await.unwrap();

        let trace = service.get_trace(trace_id).await.unwrap();
        assert_eq!(trace.turns.len(), 2);
        assert_eq!(trace.status, TraceStatus::Done);
    }
}

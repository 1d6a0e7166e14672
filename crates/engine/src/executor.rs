//! `Executor` — the THINK/DECIDE/EXECUTE/HITL/OBSERVE/END state machine
//! that drives one `Trace` forward, checkpointing after every transition so
//! a HITL suspension is a true return-to-caller rather than a blocked task.
//! Grounded in the teacher's `gateway/runtime/turn.rs` turn loop, generalized
//! from its single think-then-act cycle into the five-node machine this
//! engine's Trace/Action/Observation model requires.

use std::sync::Arc;

use ao_cache::CacheManager;
use ao_domain::aggregate::{Action, ActionKind, ActionStatus, ConfirmStatus, Node, Step, StepStatus, Trace, TraceStatus, TurnStatus};
use ao_domain::config::{CacheManagerConfig, ExecutorConfig, StoreConfig};
use ao_domain::error::{Error, Result};
use ao_domain::telemetry::TraceEvent;
use ao_domain::tool::ToolCall;
use ao_providers::content_action::{coerce_model_output, extract_reasoning, ContentActionKind, CoercedOutput};
use ao_providers::registry::ProviderRegistry;
use ao_providers::traits::ChatRequest;
use ao_store::checkpoint::CheckpointStore;
use ao_store::externalizer::{ExternalizedContent, Externalizer};
use ao_store::tool_result::ToolResultStore;
use ao_tools::ToolRegistry;
use chrono::Utc;
use uuid::Uuid;

use crate::events::{Event, EventBus};
use crate::lock::TraceLockMap;

pub struct Executor {
    cache: Arc<CacheManager>,
    tools: Arc<ToolRegistry>,
    tool_result_store: Arc<ToolResultStore>,
    store_config: StoreConfig,
    checkpoint_store: Arc<dyn CheckpointStore>,
    events: Arc<EventBus>,
    locks: Arc<TraceLockMap>,
    providers: Arc<ProviderRegistry>,
    executor_config: ExecutorConfig,
    system_prompt: String,
}

impl Executor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cache: Arc<CacheManager>,
        tools: Arc<ToolRegistry>,
        tool_result_store: Arc<ToolResultStore>,
        store_config: StoreConfig,
        checkpoint_store: Arc<dyn CheckpointStore>,
        events: Arc<EventBus>,
        locks: Arc<TraceLockMap>,
        providers: Arc<ProviderRegistry>,
        executor_config: ExecutorConfig,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            tools,
            tool_result_store,
            store_config,
            checkpoint_store,
            events,
            locks,
            providers,
            executor_config,
            system_prompt: system_prompt.into(),
        }
    }

    fn cache_config(&self) -> &CacheManagerConfig {
        self.cache.config()
    }

    fn resolve_provider(&self, role: &str) -> Result<(Arc<dyn ao_providers::traits::LlmProvider>, Option<String>)> {
        let provider = self
            .providers
            .for_role(role)
            .or_else(|| self.providers.iter().next().map(|(_, p)| p.clone()))
            .ok_or_else(|| Error::Provider {
                provider: role.to_string(),
                message: "no LLM provider configured".to_string(),
            })?;
        let model = self.providers.model_for_role(role).map(str::to_string);
        Ok((provider, model))
    }

    /// Drive `trace` forward under its per-trace lock until it suspends at
    /// HITL or reaches END. Each node transition is checkpointed before the
    /// next one is attempted, so a crash mid-run resumes from the last
    /// committed node.
    pub async fn run(&self, trace: &mut Trace) -> Result<()> {
        let _permit = self.locks.acquire(trace.trace_id).await;

        loop {
            let from = trace.node;
            match from {
                Node::Think => self.think(trace).await?,
                Node::Decide => self.decide(trace)?,
                Node::Execute => self.execute(trace).await?,
                Node::Hitl => {
                    self.hitl(trace)?;
                    self.checkpoint_store.save(trace).await?;
                    TraceEvent::CheckpointSaved {
                        trace_id: trace.trace_id.to_string(),
                        turn_count: trace.turns.len() as u32,
                    }
                    .emit();
                    return Ok(());
                }
                Node::Observe => self.observe(trace)?,
                Node::End => {
                    self.end(trace)?;
                    self.checkpoint_store.save(trace).await?;
                    return Ok(());
                }
            }

            self.checkpoint_store.save(trace).await?;
            TraceEvent::StepTransition {
                trace_id: trace.trace_id.to_string(),
                turn_id: trace.current_turn_id.map(|id| id.to_string()).unwrap_or_default(),
                step_id: trace.current_step_id.map(|id| id.to_string()).unwrap_or_default(),
                from: format!("{from:?}"),
                to: format!("{:?}", trace.node),
            }
            .emit();
        }
    }

    // ── THINK ────────────────────────────────────────────────────────

    async fn think(&self, trace: &mut Trace) -> Result<()> {
        if trace.reached_max_turns() {
            trace.status = TraceStatus::Failed;
            trace.error_message = Some("max_turns_reached".to_string());
            trace.node = Node::End;
            return Ok(());
        }

        if trace.current_step_id.is_none() {
            let turn = trace
                .current_turn_mut()
                .ok_or_else(|| Error::InvariantViolation("THINK reached with no current turn".to_string()))?;
            let step_id = turn.push_step();
            trace.current_step_id = Some(step_id);
        }

        trace.status = TraceStatus::Running;

        let tool_defs = self.tools.definitions();
        let tool_schemas_json = serde_json::to_value(&tool_defs).unwrap_or(serde_json::Value::Null);

        self.cache
            .build_messages(trace, &self.system_prompt, &tool_schemas_json, None, None, None)?;
        self.maybe_compact(trace.trace_id).await?;

        let ctx = self
            .cache
            .context_snapshot(trace.trace_id)
            .ok_or_else(|| Error::InvariantViolation("no RuntimeContext after build_messages".to_string()))?;
        let messages = ctx.messages.iter().map(|pm| pm.message.clone()).collect();

        let (provider, model) = self.resolve_provider("executor")?;
        let request = ChatRequest {
            messages,
            tools: tool_defs,
            temperature: None,
            max_tokens: None,
            json_mode: false,
            model,
        };

        let started = std::time::Instant::now();
        let mut response = provider.chat(request).await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        let reasoning = if self.executor_config.thinking {
            let (reasoning, stripped) = extract_reasoning(&response.content);
            response.content = stripped;
            reasoning
        } else {
            None
        };

        TraceEvent::LlmRequest {
            provider: provider.provider_id().to_string(),
            model: response.model.clone(),
            role: "executor".to_string(),
            streaming: false,
            duration_ms,
            prompt_tokens: response.usage.as_ref().map(|u| u.prompt_tokens),
            completion_tokens: response.usage.as_ref().map(|u| u.completion_tokens),
        }
        .emit();

        if let Some(usage) = &response.usage {
            let before = self.cache.raw_estimated_tokens(trace.trace_id).unwrap_or(0);
            self.cache.update_calibration(trace.trace_id, usage.prompt_tokens)?;
            trace.token_info.prompt_tokens_actual = Some(usage.prompt_tokens);
            trace.token_info.completion_tokens_total += usage.completion_tokens;
            if let Some(ctx) = self.cache.context_snapshot(trace.trace_id) {
                trace.token_info.calibration_multiplier = ctx.calibration_multiplier;
            }
            TraceEvent::TokenCalibrationUpdated {
                trace_id: trace.trace_id.to_string(),
                estimated: before,
                actual: usage.prompt_tokens,
                new_multiplier: trace.token_info.calibration_multiplier,
            }
            .emit();
            self.events.send(
                &trace.client_id,
                trace.trace_id,
                Event::TokenInfo {
                    prompt: usage.prompt_tokens,
                    completion: usage.completion_tokens,
                    total: usage.total_tokens,
                    cached: None,
                },
            );
        }
        trace.token_info.prompt_tokens_estimated = self.cache.raw_estimated_tokens(trace.trace_id).unwrap_or(0);

        let turn_id = trace
            .current_turn()
            .ok_or_else(|| Error::InvariantViolation("THINK with no current turn after provider call".to_string()))?
            .turn_id;

        let step = trace
            .current_step_mut()
            .ok_or_else(|| Error::InvariantViolation("THINK with no current step after provider call".to_string()))?;
        let thought = reasoning.unwrap_or_else(|| response.content.clone());
        step.thought = Some(thought.clone());

        self.events.send(
            &trace.client_id,
            trace.trace_id,
            Event::Thought {
                content: thought,
                turn_id: turn_id.to_string(),
            },
        );

        match coerce_model_output(&response) {
            CoercedOutput::ToolCalls(calls) => {
                let step = trace.current_step_mut().expect("checked above");
                for call in &calls {
                    step.tool_calls.push(ToolCall {
                        call_id: call.call_id.clone(),
                        tool_name: call.tool_name.clone(),
                        arguments: call.arguments.clone(),
                    });
                    let requires_confirm = self.tools.requires_confirmation(&call.tool_name);
                    step.actions.push(Action::new_tool(call.tool_name.clone(), call.arguments.clone(), requires_confirm));
                    TraceEvent::ActionDispatched {
                        trace_id: trace.trace_id.to_string(),
                        step_id: step.step_id.to_string(),
                        tool_name: call.tool_name.clone(),
                        requires_confirmation: requires_confirm,
                    }
                    .emit();
                }
            }
            CoercedOutput::Content(action) => {
                let kind = match action.kind {
                    ContentActionKind::Finish => ActionKind::Finish,
                    ContentActionKind::RequestInput => ActionKind::RequestInput,
                    ContentActionKind::RequestConfirm => ActionKind::RequestConfirm,
                };
                let step = trace.current_step_mut().expect("checked above");
                step.actions.push(Action::new_content(kind, action.message, action.full_ref));
            }
        }

        trace.node = Node::Decide;
        Ok(())
    }

    async fn maybe_compact(&self, trace_id: Uuid) -> Result<()> {
        let Some(mut ctx) = self.cache.context_snapshot(trace_id) else {
            return Ok(());
        };
        if !ao_cache::should_compact(&ctx, self.cache_config()) {
            return Ok(());
        }

        let mut compacted = ao_cache::local_compact(&mut ctx, self.cache_config(), Utc::now());

        if self.cache_config().llm_assisted {
            if let Ok((provider, _)) = self.resolve_provider("summarizer") {
                if ao_cache::llm_assisted_compact(&mut ctx, self.cache_config(), &provider, Utc::now()).await? {
                    compacted = true;
                }
            }
        }

        if compacted {
            self.cache.replace_context(ctx);
        }
        Ok(())
    }

    // ── DECIDE ───────────────────────────────────────────────────────

    fn decide(&self, trace: &mut Trace) -> Result<()> {
        let step = trace
            .current_step_mut()
            .ok_or_else(|| Error::InvariantViolation("DECIDE with no current step".to_string()))?;
        let next = step
            .next_unresolved_action()
            .map(|a| (a.action_id, a.kind, a.requires_confirm, a.confirm_status, a.message.clone()));

        match next {
            None => trace.node = Node::Observe,
            Some((action_id, kind, requires_confirm, confirm_status, message)) => match kind {
                ActionKind::Finish => {
                    self.emit_content_action_event(trace, action_id, "finish", message);
                    trace.node = Node::End;
                }
                ActionKind::Tool if requires_confirm && confirm_status != Some(ConfirmStatus::Approved) => {
                    self.suspend_for_hitl(trace, action_id, StepStatus::WaitingConfirm, ActionStatus::WaitingConfirm)?;
                }
                ActionKind::RequestInput => {
                    self.emit_content_action_event(trace, action_id, "request_input", message);
                    self.suspend_for_hitl(trace, action_id, StepStatus::WaitingInput, ActionStatus::WaitingInput)?;
                }
                ActionKind::RequestConfirm => {
                    self.emit_content_action_event(trace, action_id, "request_confirm", message);
                    self.suspend_for_hitl(trace, action_id, StepStatus::WaitingConfirm, ActionStatus::WaitingConfirm)?;
                }
                ActionKind::Tool | ActionKind::Error => trace.node = Node::Execute,
            },
        }
        Ok(())
    }

    /// Emit the `action` event for a content Action (FINISH / REQUEST_INPUT /
    /// REQUEST_CONFIRM). TOOL actions get theirs from `execute()` instead,
    /// right before dispatch, since that's where `args` is resolved.
    fn emit_content_action_event(&self, trace: &Trace, action_id: Uuid, kind: &str, message: Option<String>) {
        self.events.send(
            &trace.client_id,
            trace.trace_id,
            Event::Action {
                action_id: action_id.to_string(),
                kind: kind.to_string(),
                tool_name: None,
                args: None,
                message,
            },
        );
    }

    fn suspend_for_hitl(&self, trace: &mut Trace, action_id: Uuid, step_status: StepStatus, action_status: ActionStatus) -> Result<()> {
        let step = trace.current_step_mut().expect("caller holds a current step");
        if let Some(action) = step.actions.iter_mut().find(|a| a.action_id == action_id) {
            action.status = action_status;
        }
        step.status = step_status;
        trace.pending_action_id = Some(action_id);
        trace.status = TraceStatus::Waiting;
        trace.node = Node::Hitl;
        Ok(())
    }

    // ── EXECUTE ──────────────────────────────────────────────────────

    async fn execute(&self, trace: &mut Trace) -> Result<()> {
        let trace_id = trace.trace_id;
        let turn_id = trace
            .current_turn()
            .ok_or_else(|| Error::InvariantViolation("EXECUTE with no current turn".to_string()))?
            .turn_id;
        let step_id = trace
            .current_step()
            .ok_or_else(|| Error::InvariantViolation("EXECUTE with no current step".to_string()))?
            .step_id;

        let pending = {
            let step = trace.current_step().expect("checked above");
            step.next_unresolved_action().map(|a| (a.action_id, a.tool_name.clone(), a.args.clone()))
        };
        let (action_id, tool_name, args) = match pending {
            Some((id, Some(name), args)) => (id, name, args.unwrap_or(serde_json::Value::Null)),
            _ => return Err(Error::InvariantViolation("EXECUTE reached without a pending TOOL action".to_string())),
        };

        {
            let step = trace.current_step_mut().expect("checked above");
            if let Some(action) = step.actions.iter_mut().find(|a| a.action_id == action_id) {
                action.status = ActionStatus::Running;
            }
        }

        self.events.send(
            &trace.client_id,
            trace_id,
            Event::Action {
                action_id: action_id.to_string(),
                kind: "tool".to_string(),
                tool_name: Some(tool_name.clone()),
                args: Some(args.clone()),
                message: None,
            },
        );

        let tool_call_id = {
            let step = trace.current_step().expect("checked above");
            step.tool_calls
                .iter()
                .find(|c| c.tool_name == tool_name && c.arguments == args)
                .map(|c| c.call_id.clone())
                .unwrap_or_else(|| action_id.to_string())
        };

        let dispatch_result = self.tools.dispatch(&tool_name, args.clone()).await;

        let externalizer = Externalizer::new(&self.store_config, &self.tool_result_store);
        let observation = match dispatch_result {
            Ok(raw_result) => {
                let content = externalizer.externalize(&tool_name, &raw_result, trace_id, turn_id, step_id, &tool_call_id)?;
                let (content_str, full_ref) = match content {
                    ExternalizedContent::Inline { content, .. } => (content, None),
                    ExternalizedContent::Ref { ref_desc, preview, .. } => (
                        preview,
                        Some(ao_domain::aggregate::ObservationRef {
                            ref_id: ref_desc.id,
                            mime: ref_desc.mime,
                            byte_len: ref_desc.bytes,
                        }),
                    ),
                };
                ao_domain::aggregate::Observation {
                    observation_id: Uuid::new_v4(),
                    action_id,
                    kind: ao_domain::aggregate::ObservationKind::ToolResult,
                    ok: true,
                    content: content_str,
                    full_ref,
                }
            }
            Err(err_msg) => ao_domain::aggregate::Observation {
                observation_id: Uuid::new_v4(),
                action_id,
                kind: ao_domain::aggregate::ObservationKind::ToolError,
                ok: false,
                content: err_msg,
                full_ref: None,
            },
        };

        self.events.send(
            &trace.client_id,
            trace_id,
            Event::Observation {
                action_id: action_id.to_string(),
                ok: observation.ok,
                content_preview: observation.content.clone(),
                reference: observation.full_ref.as_ref().map(|r| serde_json::json!({"ref_id": r.ref_id, "mime": r.mime, "bytes": r.byte_len})),
            },
        );

        let action_status = if observation.ok { ActionStatus::Done } else { ActionStatus::Failed };
        let step = trace.current_step_mut().expect("checked above");
        if let Some(action) = step.actions.iter_mut().find(|a| a.action_id == action_id) {
            action.status = action_status;
        }
        step.observations.push(observation);

        trace.node = if step.next_unresolved_action().is_some() { Node::Decide } else { Node::Observe };
        Ok(())
    }

    // ── HITL (suspension; no further work happens here) ────────────────

    fn hitl(&self, trace: &mut Trace) -> Result<()> {
        let action_id = trace
            .pending_action_id
            .ok_or_else(|| Error::InvariantViolation("HITL node reached with no pending_action_id".to_string()))?;
        let step = trace
            .current_step()
            .ok_or_else(|| Error::InvariantViolation("HITL node reached with no current step".to_string()))?;
        let action = step
            .actions
            .iter()
            .find(|a| a.action_id == action_id)
            .ok_or_else(|| Error::InvariantViolation(format!("pending action {action_id} not found in current step")))?;

        let event = match action.kind {
            ActionKind::Tool => Event::HitlConfirm {
                request_id: action_id.to_string(),
                prompt: format!("confirm tool call: {}", action.tool_name.clone().unwrap_or_default()),
                tool_name: action.tool_name.clone(),
                args: action.args.clone(),
            },
            ActionKind::RequestConfirm => Event::HitlConfirm {
                request_id: action_id.to_string(),
                prompt: action.message.clone().unwrap_or_default(),
                tool_name: None,
                args: None,
            },
            _ => Event::HitlRequest {
                request_id: action_id.to_string(),
                prompt: action.message.clone().unwrap_or_default(),
                tool_name: None,
                args: None,
            },
        };

        TraceEvent::HitlSuspended {
            trace_id: trace.trace_id.to_string(),
            pending_action_id: action_id.to_string(),
        }
        .emit();
        self.events.send(&trace.client_id, trace.trace_id, event);
        Ok(())
    }

    // ── OBSERVE ──────────────────────────────────────────────────────

    fn observe(&self, trace: &mut Trace) -> Result<()> {
        let per_turn_limit = self.executor_config.effective_per_turn_step_limit();

        let step = trace
            .current_step_mut()
            .ok_or_else(|| Error::InvariantViolation("OBSERVE with no current step".to_string()))?;
        if !step.all_tool_actions_observed() {
            return Err(Error::InvariantViolation("OBSERVE reached with unobserved TOOL actions".to_string()));
        }
        step.status = StepStatus::Done;
        let has_finish = step.actions.iter().any(|a| matches!(a.kind, ActionKind::Finish));

        if has_finish {
            trace.node = Node::End;
            return Ok(());
        }

        let turn = trace
            .current_turn_mut()
            .ok_or_else(|| Error::InvariantViolation("OBSERVE with no current turn".to_string()))?;
        if turn.steps.len() as u32 >= per_turn_limit {
            trace.status = TraceStatus::Failed;
            trace.error_message = Some("max_turns_reached".to_string());
            trace.node = Node::End;
            return Ok(());
        }

        let step_id = turn.push_step();
        trace.current_step_id = Some(step_id);
        trace.node = Node::Think;
        Ok(())
    }

    // ── END ──────────────────────────────────────────────────────────

    fn end(&self, trace: &mut Trace) -> Result<()> {
        let failed = trace.status == TraceStatus::Failed;

        let (user_input, final_answer, step_ids) = {
            let turn = trace
                .current_turn_mut()
                .ok_or_else(|| Error::InvariantViolation("END with no current turn".to_string()))?;
            turn.status = if failed { TurnStatus::Failed } else { TurnStatus::Done };
            let final_answer = turn
                .steps
                .last()
                .and_then(|s: &Step| s.actions.iter().find(|a| matches!(a.kind, ActionKind::Finish)))
                .and_then(|a| a.message.clone())
                .unwrap_or_default();
            (turn.user_input.clone(), final_answer, turn.steps.iter().map(|s| s.step_id).collect::<Vec<_>>())
        };

        if !failed {
            trace.status = TraceStatus::Done;
        }
        trace.finished_at = Some(Utc::now());

        if !failed {
            if let Some(mut ctx) = self.cache.context_snapshot(trace.trace_id) {
                let tool_state = serde_json::json!({});
                if ao_cache::finalize_turn_to_result_card(&mut ctx, self.cache_config(), &user_input, &final_answer, &tool_state, &step_ids, Utc::now())
                    .unwrap_or(false)
                {
                    self.cache.replace_context(ctx);
                }
            }
        }

        if failed {
            self.events.send(
                &trace.client_id,
                trace.trace_id,
                Event::Error {
                    content: trace.error_message.clone().unwrap_or_default(),
                },
            );
        } else {
            self.events.send(&trace.client_id, trace.trace_id, Event::Final { content: final_answer });
        }
        self.events.send(&trace.client_id, trace.trace_id, Event::End);

        TraceEvent::TraceEnded {
            trace_id: trace.trace_id.to_string(),
            status: format!("{:?}", trace.status),
        }
        .emit();
        Ok(())
    }
}

//! Tool execution pipeline for one model turn.
//!
//! Per call: pre-hooks may substitute a result; arguments are validated
//! against the declared schema; unmet credential/confirmation requirements
//! suspend the call behind a synthesized side-channel request and retry
//! once satisfied; faults go through the error hooks and otherwise become
//! structured error results. Independent calls run concurrently; tools
//! declaring serial execution run in call order. Results are paired to
//! calls by id, never by completion order — long-running tools may resolve
//! out of sequence.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use crate::agent::channel::EventSender;
use crate::agent::context::InvocationContext;
use crate::error::{tool_codes, EngineError};
use crate::event::EventContent;
use crate::flow::{FlowConfig, TurnContext};

use super::builtin::{EXECUTE_CODE, REQUEST_CONFIRMATION, REQUEST_CREDENTIAL};
use super::hooks::HookOutcome;
use super::registry::validate_args;
use super::{ToolCall, ToolContext, ToolResult};

/// How long to wait for an external answer to a side-channel request.
const INPUT_TIMEOUT: Duration = Duration::from_secs(300);

/// Execute a turn's tool calls. The returned vector is in call order; each
/// result is matched to its call by id.
pub async fn execute_calls(
    turn: &TurnContext,
    config: &FlowConfig,
    calls: &[ToolCall],
    out: &EventSender,
) -> Result<Vec<(ToolCall, ToolResult)>, EngineError> {
    let mut serial = Vec::new();
    let mut concurrent = Vec::new();
    for call in calls {
        let is_serial = config
            .tools
            .get(&call.name)
            .map(|t| t.serial())
            .unwrap_or(false);
        if is_serial {
            serial.push(call.clone());
        } else {
            concurrent.push(call.clone());
        }
    }

    let serial_chain = async {
        let mut results = Vec::new();
        for call in &serial {
            let result = run_one(turn, config, call, out).await?;
            results.push((call.id.clone(), result));
        }
        Ok::<_, EngineError>(results)
    };

    let concurrent_batch = futures::future::try_join_all(concurrent.iter().map(|call| async {
        let result = run_one(turn, config, call, out).await?;
        Ok::<_, EngineError>((call.id.clone(), result))
    }));

    let (serial_results, concurrent_results) =
        futures::future::try_join(serial_chain, concurrent_batch).await?;

    let mut by_id: HashMap<String, ToolResult> = serial_results
        .into_iter()
        .chain(concurrent_results)
        .collect();

    // Pair by id, in call order, regardless of completion order.
    Ok(calls
        .iter()
        .map(|call| {
            let result = by_id.remove(&call.id).unwrap_or_else(|| {
                ToolResult::error_with_code(tool_codes::TOOL_FAULT, "result lost")
            });
            (call.clone(), result)
        })
        .collect())
}

/// The per-call pipeline.
async fn run_one(
    turn: &TurnContext,
    config: &FlowConfig,
    call: &ToolCall,
    out: &EventSender,
) -> Result<ToolResult, EngineError> {
    // Reserved: code produced by the code-execution response stage.
    if call.name == EXECUTE_CODE {
        return Ok(run_code(config, call).await);
    }

    let Some(tool) = config.tools.get(&call.name) else {
        tracing::warn!(tool = %call.name, "Unknown tool");
        return Ok(ToolResult::error_with_code(
            tool_codes::UNKNOWN_TOOL,
            format!("unknown tool '{}'", call.name),
        ));
    };

    let ctx = ToolContext {
        invocation: turn.ctx.clone(),
        agent: turn.agent_name.clone(),
        branch: turn.branch.clone(),
        call_id: call.id.clone(),
    };

    // ── Pre-hooks: may substitute a result and skip everything else,
    //    including any pending credential/confirmation request ──────────
    for hook in config.tools.pre_hooks() {
        if let HookOutcome::Respond(result) = hook.before_call(&call.name, &call.args, &ctx).await {
            tracing::info!(tool = %call.name, "Pre-hook substituted result");
            return Ok(result);
        }
    }

    // ── Schema validation ──────────────────────────────────────────────
    if let Err(message) = validate_args(&tool.parameters_schema(), &call.args) {
        tracing::warn!(tool = %call.name, error = %message, "Argument validation failed");
        return Ok(ToolResult::validation_error(message));
    }

    // ── Declared preconditions (may suspend) ───────────────────────────
    let requirements = tool.requirements();

    if let Some(key) = &requirements.credential {
        if turn.ctx.credential(key).is_none() {
            if let Some(result) = request_credential(turn, call, key, out).await? {
                return Ok(result);
            }
        }
    }

    if requirements.confirmation {
        match confirm(turn, call, out).await? {
            Confirmation::Approved => {}
            Confirmation::Resolved(result) => return Ok(result),
        }
    }

    // ── Execution with fault containment ───────────────────────────────
    let start = Instant::now();
    let timeout = config.tools.timeout();
    let mut result = match tokio::time::timeout(timeout, tool.call(call.args.clone(), &ctx)).await
    {
        Ok(Ok(value)) => {
            if tool.escalates() {
                ToolResult::escalating(value)
            } else {
                ToolResult::ok(value)
            }
        }
        Ok(Err(error)) => {
            let mut recovered = None;
            for hook in config.tools.error_hooks() {
                if let Some(result) = hook.on_error(&call.name, &call.args, &error, &ctx).await {
                    recovered = Some(result);
                    break;
                }
            }
            recovered.unwrap_or_else(|| {
                tracing::warn!(tool = %call.name, error = %error, "Tool fault contained");
                ToolResult::fault(error)
            })
        }
        Err(_) => ToolResult::error_with_code(
            tool_codes::TIMEOUT,
            format!("tool '{}' timed out after {}s", call.name, timeout.as_secs()),
        ),
    };

    // ── Post-hooks transform successful results ────────────────────────
    if !result.is_error {
        let duration = start.elapsed();
        for hook in config.tools.post_hooks() {
            result = hook.after_call(&call.name, &call.args, result, duration).await;
        }
    }

    Ok(result)
}

async fn run_code(config: &FlowConfig, call: &ToolCall) -> ToolResult {
    let Some(executor) = &config.code_executor else {
        return ToolResult::error_with_code(tool_codes::UNKNOWN_TOOL, "no code executor configured");
    };
    let code = call
        .args
        .get("code")
        .and_then(Value::as_str)
        .unwrap_or_default();
    match executor.execute(code).await {
        Ok(output) => ToolResult::ok(json!({ "output": output })),
        Err(error) => {
            tracing::warn!(error = %error, "Code execution fault contained");
            ToolResult::fault(error)
        }
    }
}

/// Suspend for a credential grant. Emits the synthesized side-channel call,
/// waits for external input, records the grant response in the log, and
/// lets the original call proceed. Returns `Some(error result)` when no
/// grant arrives.
async fn request_credential(
    turn: &TurnContext,
    call: &ToolCall,
    key: &str,
    out: &EventSender,
) -> Result<Option<ToolResult>, EngineError> {
    let request = ToolCall::new(
        REQUEST_CREDENTIAL,
        json!({ "key": key, "tool": call.name, "call_id": call.id }),
    );
    tracing::info!(tool = %call.name, key = %key, "Requesting credential");
    out.emit(turn.event(EventContent::FunctionCall {
        call: request.clone(),
    }))
    .await?;

    let satisfied =
        await_input(&turn.ctx, |ctx| ctx.credential(key).is_some()).await?;

    if !satisfied {
        return Ok(Some(ToolResult::error_with_code(
            tool_codes::INPUT_TIMEOUT,
            format!("no credential received for '{key}'"),
        )));
    }

    // Record the grant so resumed invocations re-apply it (auth stage).
    let value = turn.ctx.credential(key).unwrap_or(Value::Null);
    out.emit(turn.event(EventContent::FunctionResponse {
        id: request.id,
        name: REQUEST_CREDENTIAL.to_string(),
        response: json!({ "key": key, "value": value }),
        is_error: false,
    }))
    .await?;
    Ok(None)
}

enum Confirmation {
    Approved,
    /// Denied or timed out; carries the result for the original call.
    Resolved(ToolResult),
}

/// Suspend for an external confirmation of this specific call.
async fn confirm(
    turn: &TurnContext,
    call: &ToolCall,
    out: &EventSender,
) -> Result<Confirmation, EngineError> {
    if let Some(approved) = turn.ctx.confirmation(&call.id) {
        return Ok(if approved {
            Confirmation::Approved
        } else {
            Confirmation::Resolved(denied(call))
        });
    }

    let request = ToolCall::new(
        REQUEST_CONFIRMATION,
        json!({ "call_id": call.id, "tool": call.name, "args": call.args }),
    );
    tracing::info!(tool = %call.name, call_id = %call.id, "Requesting confirmation");
    out.emit(turn.event(EventContent::FunctionCall {
        call: request.clone(),
    }))
    .await?;

    let satisfied =
        await_input(&turn.ctx, |ctx| ctx.confirmation(&call.id).is_some()).await?;

    if !satisfied {
        return Ok(Confirmation::Resolved(ToolResult::error_with_code(
            tool_codes::INPUT_TIMEOUT,
            format!("no confirmation received for '{}'", call.name),
        )));
    }

    let approved = turn.ctx.confirmation(&call.id).unwrap_or(false);
    out.emit(turn.event(EventContent::FunctionResponse {
        id: request.id,
        name: REQUEST_CONFIRMATION.to_string(),
        response: json!({ "call_id": call.id, "approved": approved }),
        is_error: false,
    }))
    .await?;

    Ok(if approved {
        Confirmation::Approved
    } else {
        Confirmation::Resolved(denied(call))
    })
}

fn denied(call: &ToolCall) -> ToolResult {
    ToolResult::error_with_code(
        tool_codes::CONFIRMATION_DENIED,
        format!("execution of '{}' was denied", call.name),
    )
}

/// Wait until `satisfied` holds, folding arriving external inputs into the
/// grant stores. Returns `false` on timeout or a closed input channel;
/// fails with `Ended` when the invocation is cancelled.
///
/// Concurrent waiters share one input receiver, so a waiter may consume an
/// input meant for another; the fold writes the grant store, which bumps
/// the grant-update channel every other waiter is subscribed to. The
/// subscription is taken before the first predicate check so no write can
/// slip between check and wait.
async fn await_input<F>(ctx: &InvocationContext, satisfied: F) -> Result<bool, EngineError>
where
    F: Fn(&InvocationContext) -> bool,
{
    let deadline = tokio::time::Instant::now() + INPUT_TIMEOUT;
    let mut updates = ctx.grant_updates();
    loop {
        if satisfied(ctx) {
            return Ok(true);
        }
        tokio::select! {
            _ = ctx.end_signal().cancelled() => return Err(EngineError::Ended),
            _ = tokio::time::sleep_until(deadline) => return Ok(satisfied(ctx)),
            _ = updates.changed() => {}
            input = ctx.next_input() => match input {
                Some(input) => ctx.apply_input(input),
                None => return Ok(satisfied(ctx)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::agent::channel::event_channel;
    use crate::agent::context::ExternalInput;
    use crate::agent::tree::AgentTree;
    use crate::event::Branch;
    use crate::model::GenerationConfig;
    use crate::test_support::{drain, FaultyTool, NullAgent, ScriptedBackend, SleepTool};
    use crate::tools::{Tool, ToolRegistry, ToolRequirements};

    struct GuardedTool;

    #[async_trait]
    impl Tool for GuardedTool {
        fn name(&self) -> &str {
            "guarded"
        }

        fn description(&self) -> &str {
            "needs confirmation"
        }

        fn parameters_schema(&self) -> Value {
            json!({ "type": "object", "properties": {} })
        }

        fn requirements(&self) -> ToolRequirements {
            ToolRequirements {
                credential: None,
                confirmation: true,
            }
        }

        async fn call(&self, _args: Value, _ctx: &ToolContext) -> anyhow::Result<Value> {
            Ok(json!({"ran": true}))
        }
    }

    struct StrictTool;

    #[async_trait]
    impl Tool for StrictTool {
        fn name(&self) -> &str {
            "strict"
        }

        fn description(&self) -> &str {
            "requires a query"
        }

        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"],
                "additionalProperties": false
            })
        }

        async fn call(&self, args: Value, _ctx: &ToolContext) -> anyhow::Result<Value> {
            Ok(json!({"echo": args["query"]}))
        }
    }

    fn config_with(registry: ToolRegistry) -> FlowConfig {
        FlowConfig {
            model: "test-model".into(),
            generation: GenerationConfig::default(),
            backend: Arc::new(ScriptedBackend::new(Vec::new())),
            instructions: None,
            planner: None,
            code_executor: None,
            output_schema: None,
            output_key: None,
            tools: Arc::new(registry),
            transfer_enabled: false,
        }
    }

    fn fixture(
        registry: ToolRegistry,
    ) -> (
        TurnContext,
        FlowConfig,
        EventSender,
        crate::agent::channel::EventStream,
        tokio::sync::mpsc::UnboundedSender<ExternalInput>,
    ) {
        let tree = Arc::new(AgentTree::solo(Arc::new(NullAgent::new("root"))));
        let (ctx, inputs) = InvocationContext::new(tree, None);
        let (out, stream) = event_channel(ctx.log().clone());
        let turn = TurnContext {
            ctx,
            branch: Branch::root(),
            agent_name: "root".into(),
            agent_description: String::new(),
        };
        (turn, config_with(registry), out, stream, inputs)
    }

    #[tokio::test]
    async fn results_pair_by_id_regardless_of_completion_order() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SleepTool::new(
            "slow",
            Duration::from_millis(40),
            json!("slow done"),
        )));
        registry.register(Arc::new(SleepTool::new(
            "fast",
            Duration::from_millis(1),
            json!("fast done"),
        )));
        let (turn, config, out, _stream, _inputs) = fixture(registry);

        let calls = vec![
            ToolCall::with_id("t1", "slow", json!({})),
            ToolCall::with_id("t2", "fast", json!({})),
        ];
        let outcomes = execute_calls(&turn, &config, &calls, &out).await.unwrap();

        // t2 finished first; the pairing is still t1-then-t2.
        assert_eq!(outcomes[0].0.id, "t1");
        assert_eq!(outcomes[0].1.value, json!("slow done"));
        assert_eq!(outcomes[1].0.id, "t2");
        assert_eq!(outcomes[1].1.value, json!("fast done"));
    }

    #[tokio::test]
    async fn unknown_tool_becomes_structured_error() {
        let (turn, config, out, _stream, _inputs) = fixture(ToolRegistry::new());
        let calls = vec![ToolCall::with_id("t1", "nope", json!({}))];

        let outcomes = execute_calls(&turn, &config, &calls, &out).await.unwrap();
        assert!(outcomes[0].1.is_error);
        assert_eq!(outcomes[0].1.error_code(), Some(tool_codes::UNKNOWN_TOOL));
    }

    #[tokio::test]
    async fn tool_fault_is_contained() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FaultyTool));
        let (turn, config, out, _stream, _inputs) = fixture(registry);

        let calls = vec![ToolCall::with_id("t1", "faulty", json!({}))];
        let outcomes = execute_calls(&turn, &config, &calls, &out).await.unwrap();

        assert_eq!(outcomes[0].1.error_code(), Some(tool_codes::TOOL_FAULT));
        assert!(outcomes[0]
            .1
            .value["error"]["message"]
            .as_str()
            .unwrap()
            .contains("blew up"));
    }

    #[tokio::test]
    async fn schema_mismatch_becomes_validation_error() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(StrictTool));
        let (turn, config, out, _stream, _inputs) = fixture(registry);

        let calls = vec![ToolCall::with_id("t1", "strict", json!({"query": 7}))];
        let outcomes = execute_calls(&turn, &config, &calls, &out).await.unwrap();
        assert_eq!(
            outcomes[0].1.error_code(),
            Some(tool_codes::VALIDATION_ERROR)
        );
    }

    #[tokio::test]
    async fn confirmation_suspends_then_runs_on_approval() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(GuardedTool));
        let (turn, config, out, stream, inputs) = fixture(registry);

        let answerer = tokio::spawn(async move {
            let events = drain(stream).await;
            events
        });
        inputs
            .send(ExternalInput::Confirmation {
                call_id: "t1".into(),
                approved: true,
            })
            .unwrap();

        let calls = vec![ToolCall::with_id("t1", "guarded", json!({}))];
        let outcomes = execute_calls(&turn, &config, &calls, &out).await.unwrap();
        drop(out);

        assert!(!outcomes[0].1.is_error);
        assert_eq!(outcomes[0].1.value, json!({"ran": true}));

        // The side-channel request and its resolution were both recorded.
        let events = answerer.await.unwrap();
        let names: Vec<_> = events
            .iter()
            .filter_map(|e| match &e.content {
                EventContent::FunctionCall { call } => Some(call.name.clone()),
                EventContent::FunctionResponse { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec![REQUEST_CONFIRMATION, REQUEST_CONFIRMATION]);
    }

    #[tokio::test]
    async fn concurrent_confirmations_settle_without_extra_input() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(GuardedTool));
        let (turn, config, out, mut stream, inputs) = fixture(registry);

        let exec = tokio::spawn(async move {
            let calls = vec![
                ToolCall::with_id("t1", "guarded", json!({})),
                ToolCall::with_id("t2", "guarded", json!({})),
            ];
            let outcomes = execute_calls(&turn, &config, &calls, &out).await;
            drop(out);
            outcomes
        });

        // Whichever waiter holds the input receiver consumes both approvals;
        // the other must still wake and observe its own grant.
        let outcomes = tokio::time::timeout(Duration::from_secs(5), async {
            use tokio_stream::StreamExt;
            let mut requests = 0;
            while let Some(event) = stream.next().await {
                if matches!(&event.content, EventContent::FunctionCall { .. }) {
                    requests += 1;
                    if requests == 2 {
                        inputs
                            .send(ExternalInput::Confirmation {
                                call_id: "t2".into(),
                                approved: true,
                            })
                            .unwrap();
                        inputs
                            .send(ExternalInput::Confirmation {
                                call_id: "t1".into(),
                                approved: true,
                            })
                            .unwrap();
                    }
                }
            }
            exec.await.unwrap().unwrap()
        })
        .await
        .unwrap_or_else(|_| panic!("both approvals delivered; calls must settle"));

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|(_, result)| !result.is_error));
    }

    #[tokio::test]
    async fn pre_hook_substitution_skips_confirmation_request() {
        struct CacheHit;

        #[async_trait]
        impl crate::tools::PreToolHook for CacheHit {
            async fn before_call(
                &self,
                _name: &str,
                _args: &Value,
                _ctx: &ToolContext,
            ) -> HookOutcome {
                HookOutcome::Respond(ToolResult::ok(json!({"cached": true})))
            }
        }

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(GuardedTool));
        registry.add_pre_hook(Arc::new(CacheHit));
        let (turn, config, out, stream, _inputs) = fixture(registry);

        // No approval is ever sent; the substituted result must come back
        // without a side-channel request.
        let calls = vec![ToolCall::with_id("t1", "guarded", json!({}))];
        let outcomes = execute_calls(&turn, &config, &calls, &out).await.unwrap();
        drop(out);

        assert_eq!(outcomes[0].1.value, json!({"cached": true}));
        let events = drain(stream).await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn denied_confirmation_becomes_tool_error() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(GuardedTool));
        let (turn, config, out, stream, inputs) = fixture(registry);

        let consumer = tokio::spawn(drain(stream));
        inputs
            .send(ExternalInput::Confirmation {
                call_id: "t1".into(),
                approved: false,
            })
            .unwrap();

        let calls = vec![ToolCall::with_id("t1", "guarded", json!({}))];
        let outcomes = execute_calls(&turn, &config, &calls, &out).await.unwrap();
        drop(out);
        consumer.await.unwrap();

        assert_eq!(
            outcomes[0].1.error_code(),
            Some(tool_codes::CONFIRMATION_DENIED)
        );
    }
}

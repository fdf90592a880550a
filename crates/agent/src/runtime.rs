//! Bounded multi-step tool-calling loop.
//!
//! Each step asks the gateway for one action: a tool call or a final answer.
//! The loop stops on a final answer, when the step budget runs out, when the
//! same call repeats back to back, or when the gateway fails.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};
use tempra_core::config::{AgentConfig, LlmConfig};
use tempra_core::ChatMessage;
use tracing::{debug, info, warn};

use crate::guardrails::{GuardrailDecision, GuardrailPolicy, RepeatTracker, ToolCallSignature};
use crate::llm::{complete_within, CompletionGateway, CompletionRequest};
use crate::parse::parse_object;
use crate::tools::{RunContext, ToolRegistry};

pub const GATEWAY_FAILURE_MESSAGE: &str =
    "Sorry, I lost my train of thought while working on that. Please try again.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentSettings {
    pub max_steps: u32,
    pub repeat_threshold: u32,
    pub gateway_timeout: Duration,
    pub tool_timeout: Duration,
    pub max_result_chars: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_steps: 6,
            repeat_threshold: 2,
            gateway_timeout: Duration::from_secs(30),
            tool_timeout: Duration::from_secs(30),
            max_result_chars: 4000,
        }
    }
}

impl AgentSettings {
    pub fn from_config(agent: &AgentConfig, llm: &LlmConfig) -> Self {
        Self {
            max_steps: agent.max_steps,
            repeat_threshold: agent.repeat_threshold,
            gateway_timeout: Duration::from_secs(llm.timeout_secs),
            tool_timeout: Duration::from_secs(agent.tool_timeout_secs),
            max_result_chars: agent.max_result_chars,
        }
    }
}

/// One decision returned by the gateway.
#[derive(Clone, Debug, PartialEq)]
pub enum AgentAction {
    Tool { name: String, args: Value },
    Final(String),
}

impl AgentAction {
    /// Anything that is not a `tool` or `final` object is a final answer verbatim.
    pub fn parse(raw: &str) -> Self {
        let verbatim = || Self::Final(raw.trim().to_owned());
        let Some(mut object) = parse_object(raw) else {
            return verbatim();
        };

        if let Some(Value::String(text)) = object.remove("final") {
            return Self::Final(text);
        }
        match object.remove("tool") {
            Some(Value::String(name)) if !name.trim().is_empty() => {
                let args = match object.remove("args") {
                    Some(Value::Object(args)) => Value::Object(args),
                    _ => Value::Object(Map::new()),
                };
                Self::Tool { name: name.trim().to_owned(), args }
            }
            _ => verbatim(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    Completed,
    CircuitBreaker,
    StepBudgetExhausted,
    GatewayFailure,
}

impl Termination {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::CircuitBreaker => "circuit_breaker",
            Self::StepBudgetExhausted => "step_budget_exhausted",
            Self::GatewayFailure => "gateway_failure",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AgentOutcome {
    pub message: String,
    pub termination: Termination,
    pub steps_taken: u32,
    /// Last result per tool name, successes and failures alike.
    pub tool_results: BTreeMap<String, String>,
    /// Names of the tools actually invoked, in call order.
    pub calls: Vec<String>,
}

#[derive(Debug, Default)]
struct AgentRunState {
    steps_taken: u32,
    tool_results: BTreeMap<String, String>,
    calls: Vec<String>,
    repeats: RepeatTracker,
    history: Vec<ChatMessage>,
}

impl AgentRunState {
    fn finish(self, message: impl Into<String>, termination: Termination) -> AgentOutcome {
        AgentOutcome {
            message: message.into(),
            termination,
            steps_taken: self.steps_taken,
            tool_results: self.tool_results,
            calls: self.calls,
        }
    }
}

pub struct AgentRuntime {
    gateway: Arc<dyn CompletionGateway>,
    guardrails: GuardrailPolicy,
    settings: AgentSettings,
}

impl AgentRuntime {
    pub fn new(gateway: Arc<dyn CompletionGateway>, settings: AgentSettings) -> Self {
        Self {
            gateway,
            guardrails: GuardrailPolicy::new(settings.max_steps, settings.repeat_threshold),
            settings,
        }
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub async fn run(
        &self,
        message: &str,
        tools: &ToolRegistry,
        history: &[ChatMessage],
        context: &RunContext,
    ) -> AgentOutcome {
        let mut state = AgentRunState {
            history: history.iter().filter(|entry| !entry.is_blank()).cloned().collect(),
            ..AgentRunState::default()
        };
        let system = system_prompt(tools);

        loop {
            if let GuardrailDecision::Halt { reason_code, user_message } =
                self.guardrails.check_budget(state.steps_taken)
            {
                warn!(
                    event_name = "agent.run.halted",
                    reason_code,
                    steps_taken = state.steps_taken,
                    "agent step budget exhausted"
                );
                return state.finish(user_message, Termination::StepBudgetExhausted);
            }
            state.steps_taken += 1;

            let mut messages = Vec::with_capacity(state.history.len() + 2);
            messages.push(ChatMessage::system(system.clone()));
            messages.extend(state.history.iter().cloned());
            messages.push(ChatMessage::user(message));

            let reply = match complete_within(
                self.gateway.as_ref(),
                CompletionRequest::new(messages),
                self.settings.gateway_timeout,
            )
            .await
            {
                Ok(reply) => reply,
                Err(error) => {
                    warn!(
                        event_name = "agent.run.gateway_failed",
                        error = %error,
                        steps_taken = state.steps_taken,
                        "agent step failed at the completion gateway"
                    );
                    return state.finish(GATEWAY_FAILURE_MESSAGE, Termination::GatewayFailure);
                }
            };

            let (name, args) = match AgentAction::parse(&reply) {
                AgentAction::Final(text) => {
                    info!(
                        event_name = "agent.run.completed",
                        steps_taken = state.steps_taken,
                        tools_called = state.calls.len(),
                        "agent produced a final answer"
                    );
                    return state.finish(text, Termination::Completed);
                }
                AgentAction::Tool { name, args } => (name, args),
            };

            let signature = ToolCallSignature::new(&name, &args);
            if let GuardrailDecision::Halt { reason_code, user_message } =
                self.guardrails.observe_call(&mut state.repeats, signature)
            {
                warn!(
                    event_name = "agent.run.halted",
                    reason_code,
                    tool = %name,
                    repeat_count = state.repeats.repeat_count,
                    "repeated tool call tripped the circuit breaker"
                );
                return state.finish(user_message, Termination::CircuitBreaker);
            }

            let result = self.invoke(&name, args.clone(), tools, context, &mut state).await;
            let shown = truncate(&result, self.settings.max_result_chars);
            state.history.push(ChatMessage::assistant(format!(
                "Called {name} with {args}. Result: {shown}"
            )));
        }
    }

    async fn invoke(
        &self,
        name: &str,
        args: Value,
        tools: &ToolRegistry,
        context: &RunContext,
        state: &mut AgentRunState,
    ) -> String {
        let Some(tool) = tools.get(name) else {
            debug!(event_name = "agent.tool.unknown", tool = %name, "model asked for an unknown tool");
            let result = format!("Unknown tool: {name}");
            state.tool_results.insert(name.to_owned(), result.clone());
            return result;
        };

        state.calls.push(name.to_owned());
        let input = context.inject(tool.spec(), args);
        let result = match tokio::time::timeout(self.settings.tool_timeout, tool.execute(input)).await
        {
            Ok(Ok(value)) => {
                info!(event_name = "agent.tool.executed", tool = %name, "tool call succeeded");
                stringify(&value)
            }
            Ok(Err(error)) => {
                warn!(event_name = "agent.tool.failed", tool = %name, error = %error, "tool call failed");
                format!("Error calling tool {name}: {error:#}")
            }
            Err(_) => {
                warn!(
                    event_name = "agent.tool.failed",
                    tool = %name,
                    timeout_secs = self.settings.tool_timeout.as_secs(),
                    "tool call timed out"
                );
                format!(
                    "Error calling tool {name}: timed out after {}s",
                    self.settings.tool_timeout.as_secs()
                )
            }
        };
        state.tool_results.insert(name.to_owned(), result.clone());
        result
    }
}

fn system_prompt(tools: &ToolRegistry) -> String {
    let schemas: Vec<String> =
        tools.specs().iter().map(|spec| spec.prompt_schema().to_string()).collect();

    format!(
        "You are an assistant that completes the user's request by calling tools one at a time. \
         After each call you will see its result. Continue until the request is fully handled.\n\
         The current date-time is {now}. Always pass date-times as ISO 8601 values with a date.\n\n\
         Tools:\n{tools}\n\n\
         Reply with exactly one JSON object and nothing else:\n\
         {{\"tool\": \"<tool name>\", \"args\": {{...}}}} to call a tool, or\n\
         {{\"final\": \"<message to the user>\"}} when you are done or need clarification.",
        now = Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
        tools = schemas.join("\n"),
    )
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}... (truncated)", &text[..cut]),
        None => text.to_owned(),
    }
}

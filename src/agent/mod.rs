//! Tool-calling agent loop
//!
//! MODEL → TOOL CALLS → OBSERVE → ... → final_answer

use crate::error::AssistantError;
use crate::execution::ExecutionEngine;
use crate::llm::{strip_reasoning, ChatMessage, ChatModel, ModelResponse};
use crate::models::{AgentRun, AgentStep, TokenUsage, ToolCall, ToolParam, ToolSpec};
use crate::prompt::{render_system_prompt, FINAL_ANSWER_TOOL};
use crate::tools::build_spec;
use crate::Result;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

const EMPTY_RESPONSE_ERROR: &str =
    "Error: the response contained neither a tool call nor an answer. \
     Call one of the available tools, or call final_answer to finish.";

fn final_answer_spec() -> ToolSpec {
    build_spec(
        FINAL_ANSWER_TOOL,
        "Provides the final answer to the task and ends the run.",
        &[ToolParam {
            name: "answer",
            param_type: "string",
            description: "The final answer to the task",
            nullable: false,
        }],
    )
}

/// Pull the answer text out of a `final_answer` call.
fn final_answer_text(call: &ToolCall) -> Option<String> {
    let answer = match &call.arguments {
        Value::Object(args) => args.get("answer")?,
        other => other,
    };
    match answer {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::String(_) | Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn thought_of(response: &ModelResponse) -> Option<String> {
    let text = strip_reasoning(&response.content);
    (!text.is_empty()).then(|| text.to_string())
}

pub struct FinancialAgent {
    model: Arc<dyn ChatModel>,
    execution_engine: ExecutionEngine,
    system_prompt: String,
    max_steps: usize,
}

impl FinancialAgent {
    pub fn new(model: Arc<dyn ChatModel>, execution_engine: ExecutionEngine, max_steps: usize) -> Self {
        let system_prompt = render_system_prompt(execution_engine.registry());
        Self {
            model,
            execution_engine,
            system_prompt,
            max_steps: max_steps.max(1),
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn model_id(&self) -> &str {
        self.model.model_id()
    }

    /// Registry specs plus the built-in `final_answer`.
    pub fn tool_specs(&self) -> Vec<ToolSpec> {
        let mut specs = self.execution_engine.registry().specs();
        specs.push(final_answer_spec());
        specs
    }

    /// Answer a single task.
    pub async fn run(&self, task: &str) -> Result<AgentRun> {
        let start_time = Instant::now();
        let run_id = Uuid::new_v4();
        let specs = self.tool_specs();
        let mut usage = TokenUsage::default();
        let mut steps = Vec::new();

        let mut messages = vec![
            ChatMessage::system(self.system_prompt.clone()),
            ChatMessage::user(task),
        ];

        info!(
            run_id = %run_id,
            model = %self.model.model_id(),
            max_steps = self.max_steps,
            "Agent: starting run"
        );

        for step_number in 1..=self.max_steps {
            let response = self.model.complete(&messages, &specs).await?;
            usage.add(response.usage);

            let mut step = AgentStep {
                step_number,
                thought: thought_of(&response),
                tool_calls: response.tool_calls.clone(),
                observations: Vec::new(),
                error: None,
            };

            if response.tool_calls.is_empty() {
                if let Some(answer) = step.thought.clone() {
                    steps.push(step);
                    return Ok(self.finish(run_id, task, answer, steps, usage, start_time));
                }

                warn!(run_id = %run_id, step = step_number, "Model returned an empty response");
                step.error = Some(EMPTY_RESPONSE_ERROR.to_string());
                messages.push(ChatMessage::assistant(response.content, Vec::new()));
                messages.push(ChatMessage::user(EMPTY_RESPONSE_ERROR));
                steps.push(step);
                continue;
            }

            messages.push(ChatMessage::assistant(
                response.content.clone(),
                response.tool_calls.clone(),
            ));

            for call in &response.tool_calls {
                if call.name == FINAL_ANSWER_TOOL {
                    match final_answer_text(call) {
                        Some(answer) => {
                            steps.push(step);
                            return Ok(self.finish(run_id, task, answer, steps, usage, start_time));
                        }
                        None => {
                            let error = "final_answer requires a non-empty 'answer' argument";
                            step.error = Some(error.to_string());
                            messages.push(ChatMessage::tool_result(call, format!("Error: {}", error)));
                            continue;
                        }
                    }
                }

                let observation = self.execution_engine.execute(call).await;
                debug!(
                    run_id = %run_id,
                    step = step_number,
                    tool_name = %observation.tool_name,
                    status = %observation.status,
                    execution_time_ms = observation.execution_time_ms,
                    "Observation recorded"
                );

                messages.push(ChatMessage::tool_result(call, observation.tool_output.to_string()));
                step.observations.push(observation);
            }

            steps.push(step);
        }

        // Out of steps: ask once more, without tools.
        warn!(run_id = %run_id, max_steps = self.max_steps, "Step limit reached, requesting final answer");
        messages.push(ChatMessage::user(format!(
            "You have reached the maximum number of steps. Using only the observations \
             gathered so far, give your best final answer to the task: {}",
            task
        )));

        let response = self.model.complete(&messages, &[]).await?;
        usage.add(response.usage);

        let answer = response
            .tool_calls
            .iter()
            .find(|call| call.name == FINAL_ANSWER_TOOL)
            .and_then(final_answer_text)
            .or_else(|| thought_of(&response));

        steps.push(AgentStep {
            step_number: self.max_steps + 1,
            thought: thought_of(&response),
            tool_calls: response.tool_calls,
            observations: Vec::new(),
            error: None,
        });

        match answer {
            Some(answer) => Ok(self.finish(run_id, task, answer, steps, usage, start_time)),
            None => Err(AssistantError::MaxStepsExceeded(self.max_steps)),
        }
    }

    fn finish(
        &self,
        run_id: Uuid,
        task: &str,
        answer: String,
        steps: Vec<AgentStep>,
        usage: TokenUsage,
        start_time: Instant,
    ) -> AgentRun {
        let execution_time_ms = start_time.elapsed().as_millis() as u64;
        info!(
            run_id = %run_id,
            steps = steps.len(),
            total_tokens = usage.total_tokens,
            execution_time_ms,
            "Agent: run complete"
        );

        AgentRun {
            run_id,
            task: task.to_string(),
            answer,
            steps,
            usage,
            execution_time_ms,
            created_at: Utc::now(),
        }
    }
}

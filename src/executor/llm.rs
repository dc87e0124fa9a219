//! LLM-backed task executor.
//!
//! Runs two sub-agents per task:
//! 1. A solver that works the question over a bounded number of turns until
//!    it emits a `FINAL ANSWER:` line
//! 2. A reformulator that condenses the solver transcript into the final
//!    answer text
//!
//! Token usage is reported per sub-agent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::aggregate::{PARSE_ERROR_MARKER, STEP_LIMIT_MARKER};
use super::{AgentUsage, RawOutcome, TaskExecutor};
use crate::error::ExecutorError;
use crate::ledger::TokenUsage;
use crate::llm::{GenerationRequest, GenerationResponse, LlmProvider, Message};
use crate::tasks::Task;

/// Instruction header prepended to every question.
pub const AUGMENTATION_PREFIX: &str = "You have one question to answer. It is paramount that you provide a correct answer.
Give it all you can: I know for a fact that you have access to all the relevant tools to solve it and find the correct answer (the answer does exist). Failure or 'I cannot answer' or 'None found' will not be tolerated, success will be rewarded.
Run verification steps if that's needed, you must make sure you find the correct answer!
Here is the task:
";

/// Tag the solver uses to mark its answer.
const FINAL_ANSWER_TAG: &str = "FINAL ANSWER:";

const SOLVER_SYSTEM_PROMPT: &str = "You are an expert problem solver. Think step by step. \
When you are confident, end your reply with a line of the form `FINAL ANSWER: <answer>`. \
If you need more reasoning, continue without that line and you will be asked to go on.";

const CONTINUE_PROMPT: &str =
    "Continue working on the task. Reply with `FINAL ANSWER: <answer>` once you are sure.";

const EMPTY_REPLY_PROMPT: &str =
    "Your last reply was empty. Continue working and finish with `FINAL ANSWER: <answer>`.";

const REFORMULATOR_SYSTEM_PROMPT: &str = "You are given a question and the transcript of an agent \
that worked on it. Reply with only the final answer, as concise as possible: a number, a few \
words, or a comma separated list. Do not explain.";

/// Configuration for [`LlmExecutor`].
#[derive(Debug, Clone)]
pub struct LlmExecutorConfig {
    /// Model identifier sent to the provider; also the ledger label.
    pub model: String,
    /// Maximum solver turns before giving up.
    pub max_steps: usize,
    /// Maximum tokens per completion.
    pub max_tokens: u32,
    /// Sampling temperature, if the model accepts one.
    pub temperature: Option<f64>,
    /// Wall-clock limit for a whole task.
    pub task_timeout: Duration,
    /// Whether to run the reformulator after the solver.
    pub reformulate: bool,
}

impl Default for LlmExecutorConfig {
    fn default() -> Self {
        Self {
            model: "o1".to_string(),
            max_steps: 12,
            max_tokens: 4096,
            temperature: None,
            task_timeout: Duration::from_secs(1800),
            reformulate: true,
        }
    }
}

impl LlmExecutorConfig {
    /// Creates a configuration for the given model.
    pub fn new(model: impl Into<String>) -> Self {
        let model = model.into();
        let max_tokens = if is_reasoning_model(&model) { 8192 } else { 4096 };
        Self {
            model,
            max_tokens,
            ..Default::default()
        }
    }

    /// Sets the maximum solver turns.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Sets the per-completion token limit.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Sets the sampling temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the per-task timeout.
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Enables or disables the reformulation pass.
    pub fn with_reformulation(mut self, reformulate: bool) -> Self {
        self.reformulate = reformulate;
        self
    }
}

/// Reasoning models get a larger completion budget.
fn is_reasoning_model(model: &str) -> bool {
    let name = model.rsplit('/').next().unwrap_or(model);
    matches!(name, "o1" | "o3") || name.starts_with("o1-") || name.starts_with("o3-")
}

/// Executor that answers tasks with an [`LlmProvider`].
pub struct LlmExecutor {
    provider: Arc<dyn LlmProvider>,
    config: LlmExecutorConfig,
}

impl LlmExecutor {
    /// Creates an executor over a shared provider.
    pub fn new(provider: Arc<dyn LlmProvider>, config: LlmExecutorConfig) -> Self {
        Self { provider, config }
    }

    /// Returns the executor configuration.
    pub fn config(&self) -> &LlmExecutorConfig {
        &self.config
    }

    fn request(&self, messages: Vec<Message>) -> GenerationRequest {
        let request = GenerationRequest::new(self.config.model.clone(), messages)
            .with_max_tokens(self.config.max_tokens);
        match self.config.temperature {
            Some(t) => request.with_temperature(t),
            None => request,
        }
    }

    /// Runs solver and reformulator. Every response's usage is added to
    /// `spent` as it arrives, so it survives a later error or timeout.
    async fn run_agents(
        &self,
        question: &str,
        spent: &mut TokenUsage,
    ) -> Result<RawOutcome, ExecutorError> {
        let solved = self.solve(question, spent).await?;
        let mut outcome = RawOutcome::default()
            .with_usage(AgentUsage::new("solver", solved.usage));

        let output = match solved.answer {
            Some(answer) if self.config.reformulate => {
                let (text, usage) = self.reformulate(question, &solved.trace, &answer).await?;
                spent.accumulate(usage);
                outcome = outcome.with_usage(AgentUsage::new("reformulator", usage));
                text
            }
            Some(answer) => answer,
            None => {
                let last = solved.last_reply.unwrap_or_default();
                format!("{} Last reply: {}", STEP_LIMIT_MARKER, last.trim())
            }
        };

        outcome.output = output;
        outcome.trace = solved.trace;
        Ok(outcome)
    }

    async fn solve(
        &self,
        question: &str,
        spent: &mut TokenUsage,
    ) -> Result<SolverRun, ExecutorError> {
        let mut messages = vec![
            Message::system(SOLVER_SYSTEM_PROMPT),
            Message::user(question),
        ];
        let mut run = SolverRun::default();

        for step in 1..=self.config.max_steps {
            let response = self.provider.generate(self.request(messages.clone())).await?;
            let usage = token_usage(&response);
            run.usage.accumulate(usage);
            spent.accumulate(usage);

            let Some(content) = response.first_content() else {
                run.trace.push(format!(
                    "step {}: {}: model returned an empty reply",
                    step, PARSE_ERROR_MARKER
                ));
                messages.push(Message::user(EMPTY_REPLY_PROMPT));
                continue;
            };
            let content = content.to_string();
            run.trace.push(format!("step {}: {}", step, content));

            if let Some(answer) = extract_final_answer(&content) {
                debug!(step, "Solver produced a final answer");
                run.answer = Some(answer);
                return Ok(run);
            }

            messages.push(Message::assistant(content.clone()));
            messages.push(Message::user(CONTINUE_PROMPT));
            run.last_reply = Some(content);
        }

        run.trace.push(STEP_LIMIT_MARKER.to_string());
        Ok(run)
    }

    async fn reformulate(
        &self,
        question: &str,
        trace: &[String],
        answer: &str,
    ) -> Result<(String, TokenUsage), ExecutorError> {
        let transcript = format!(
            "Question:\n{}\n\nTranscript:\n{}\n\nAgent answer: {}",
            question,
            trace.join("\n"),
            answer
        );
        let response = self
            .provider
            .generate(self.request(vec![
                Message::system(REFORMULATOR_SYSTEM_PROMPT),
                Message::user(transcript),
            ]))
            .await?;

        let usage = token_usage(&response);
        let text = response
            .first_content()
            .map(|c| c.trim().to_string())
            .unwrap_or_else(|| answer.to_string());
        Ok((text, usage))
    }
}

#[async_trait]
impl TaskExecutor for LlmExecutor {
    fn label(&self) -> String {
        self.config.model.clone()
    }

    fn augment(&self, task: &Task) -> String {
        format!("{}{}", AUGMENTATION_PREFIX, task.payload)
    }

    async fn execute(&self, task: &Task) -> Result<RawOutcome, ExecutorError> {
        let question = self.augment(task);
        let mut spent = TokenUsage::default();
        let result =
            tokio::time::timeout(self.config.task_timeout, self.run_agents(&question, &mut spent))
                .await;

        match result {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(err)) => Err(err.with_usage(spent)),
            Err(_) => Err(ExecutorError::Timeout {
                seconds: self.config.task_timeout.as_secs(),
            }
            .with_usage(spent)),
        }
    }
}

/// Intermediate state of the solver loop.
#[derive(Debug, Default)]
struct SolverRun {
    trace: Vec<String>,
    answer: Option<String>,
    last_reply: Option<String>,
    usage: TokenUsage,
}

fn token_usage(response: &GenerationResponse) -> TokenUsage {
    TokenUsage::new(
        u64::from(response.usage.prompt_tokens),
        u64::from(response.usage.completion_tokens),
    )
}

/// Returns the text after the last `FINAL ANSWER:` tag, if any.
fn extract_final_answer(content: &str) -> Option<String> {
    content
        .rfind(FINAL_ANSWER_TAG)
        .map(|idx| content[idx + FINAL_ANSWER_TAG.len()..].trim().to_string())
        .filter(|answer| !answer.is_empty())
}

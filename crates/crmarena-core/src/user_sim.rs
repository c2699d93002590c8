// Simulated user for interactive episodes
//
// The simulator is a model policy, not a script: it keeps its own history
// (persona prompt, greeting, exchanged turns) apart from the agent's and asks
// the model for each next utterance. From the simulator's side the roles are
// mirrored: agent replies are user messages, its own utterances are assistant
// messages.

use crate::error::{EvalError, Result};
use crate::llm::{LlmMessage, ModelEndpoint};
use crate::prompts::{user_simulator_prompt, STOP_SENTINEL, USER_GREETING};
use crate::usage::UsageLog;
use tracing::debug;

#[derive(Debug)]
pub struct UserSimulator {
    model: ModelEndpoint,
    history: Vec<LlmMessage>,
    usage: UsageLog,
}

impl UserSimulator {
    pub fn new(model: ModelEndpoint) -> Self {
        Self {
            model,
            history: Vec::new(),
            usage: UsageLog::default(),
        }
    }

    /// Start a new conversation and return the opening utterance
    pub async fn reset(&mut self, instruction: &str, persona: Option<&str>) -> Result<String> {
        self.history = vec![
            LlmMessage::system(user_simulator_prompt(instruction, persona.unwrap_or_default())),
            LlmMessage::user(USER_GREETING),
        ];
        self.generate().await
    }

    /// Feed the agent's reply and return the next utterance
    pub async fn step(&mut self, agent_reply: &str) -> Result<String> {
        if self.history.is_empty() {
            return Err(EvalError::NotReset);
        }
        self.history.push(LlmMessage::user(agent_reply));
        self.generate().await
    }

    async fn generate(&mut self) -> Result<String> {
        let response = self
            .model
            .complete("user_simulator", self.history.clone(), &mut self.usage)
            .await
            .map_err(|err| match err {
                EvalError::Llm(msg) => EvalError::user_simulator(msg),
                other => other,
            })?;
        let utterance = response.text.trim().to_string();
        debug!(turns = self.history.len(), stop = is_stop(&utterance), "Simulated user replied");
        self.history.push(LlmMessage::assistant(utterance.clone()));
        Ok(utterance)
    }

    pub fn history(&self) -> &[LlmMessage] {
        &self.history
    }

    /// Usage spent on simulator calls so far
    pub fn usage(&self) -> &UsageLog {
        &self.usage
    }
}

/// Whether an utterance ends the conversation
pub fn is_stop(utterance: &str) -> bool {
    utterance.contains(STOP_SENTINEL)
}

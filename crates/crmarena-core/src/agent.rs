// Agent Loop - drives one episode
//
// AgentLoop owns the conversation history and the agent's usage accounting.
// Each turn: call the model, record usage, parse one action, step the
// environment, append the observation. Malformed output is answered with a
// corrective message and costs a turn; it is never retried.
//
// The strategy decides the parser, the prompt and how actions and
// observations are written back into the history:
// - react / act: tag parser, observations as "Salesforce instance output: ..."
// - tool_call / tool_call_flex with native tool calling: tool messages tied
//   to the call id
// - tool_call / tool_call_flex without it: the text catalogue in the prompt
//   and "Action: / Action Input:" turns
//
// `max_turns` bounds the agent turns between two user messages. In
// interactive runs the count starts over whenever the simulated user replies;
// the user-turn budget itself is enforced by the environment.

use crate::action::{Action, ParseOutcome};
use crate::config::EvalConfig;
use crate::environment::{EndReason, EndSource, Environment};
use crate::error::Result;
use crate::llm::{quirk_aware_config, LlmCallConfig, LlmMessage, LlmResponse, SharedLlmDriver};
use crate::model_profiles::{get_model_quirks, ModelQuirks};
use crate::parser::{render_text_tool_call, ActionParser};
use crate::prompts::{
    metadata_section, render_schema, rule_string, system_prompt, PromptVariant,
    INVALID_TOOL_CALL_MESSAGE, OBSERVATION_PREFIX,
};
use crate::reward::Reward;
use crate::task::{SchemaObject, TaskMetadata};
use crate::tools::ToolRegistry;
use crate::usage::UsageLog;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Per-episode record stored with every result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub end_reason: Option<EndReason>,
    pub usage: UsageLog,
    pub total_cost: f64,
    pub num_turns: usize,
    pub observation_sizes: Vec<usize>,
    /// Judge and simulated-user usage, kept apart from the agent's
    pub evaluation_usage: UsageLog,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed_answer: Option<Vec<String>>,
}

/// What an episode produced
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeOutcome {
    pub reward: Reward,
    pub info: AgentInfo,
}

/// How tool calls travel between the model and the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ToolChannel {
    /// No tools: tag-based strategies
    None,
    Native,
    Text,
}

pub struct AgentLoop {
    driver: SharedLlmDriver,
    config: EvalConfig,
    schema: String,
}

impl AgentLoop {
    pub fn new(driver: SharedLlmDriver, config: EvalConfig) -> Self {
        Self {
            driver,
            config,
            schema: String::new(),
        }
    }

    /// Backend schema rendered into the prompts that need it
    pub fn with_schema(mut self, objects: &[SchemaObject]) -> Self {
        self.schema = render_schema(objects);
        self
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    fn tool_channel(&self, quirks: &ModelQuirks) -> ToolChannel {
        if !self.config.strategy.uses_tools() {
            ToolChannel::None
        } else if quirks.native_tool_calls {
            ToolChannel::Native
        } else {
            ToolChannel::Text
        }
    }

    fn parser(&self, channel: ToolChannel) -> ActionParser {
        match channel {
            ToolChannel::None => ActionParser::chat(),
            ToolChannel::Native => ActionParser::NativeToolCall,
            ToolChannel::Text => ActionParser::TextToolCall,
        }
    }

    fn call_config(&self, channel: ToolChannel, tools: Option<&ToolRegistry>) -> LlmCallConfig {
        let mut builder = quirk_aware_config(
            self.config.agent_model_id(),
            self.config.temperature,
            self.config.top_p,
        );
        if channel == ToolChannel::Native {
            if let Some(registry) = tools {
                builder = builder.tools(registry.tool_definitions());
            }
        }
        builder.build()
    }

    /// Opening messages: system prompt with task context, then the first observation
    pub fn initial_messages(
        &self,
        observation: &str,
        metadata: &TaskMetadata,
        tools: Option<&ToolRegistry>,
    ) -> Vec<LlmMessage> {
        let quirks = get_model_quirks(self.config.agent_model_id());
        let channel = self.tool_channel(&quirks);
        let variant = PromptVariant {
            strategy: self.config.strategy,
            persona: self.config.persona,
            interactive: self.config.interactive,
            privacy_aware: self.config.privacy_aware,
            native_tools: channel != ToolChannel::Text,
        };
        let catalogue = match channel {
            ToolChannel::Text => tools.map(ToolRegistry::render_catalogue),
            _ => None,
        };

        let mut system = system_prompt(&variant, &self.schema, catalogue.as_deref());
        let context = metadata_section(metadata, self.config.eval_mode);
        if !context.is_empty() {
            system.push('\n');
            system.push_str(&context);
        }

        if quirks.omit_system_role {
            vec![LlmMessage::user(format!("{system}\n\n{observation}"))]
        } else {
            vec![LlmMessage::system(system), LlmMessage::user(observation)]
        }
    }

    /// Run one episode on `task_id`.
    ///
    /// The history is written into `transcript` as it grows, so the caller
    /// keeps the partial conversation when the episode fails.
    pub async fn run(
        &self,
        env: &mut dyn Environment,
        task_id: u64,
        transcript: &mut Vec<LlmMessage>,
    ) -> Result<EpisodeOutcome> {
        let model_id = self.config.agent_model_id().to_string();
        let quirks = get_model_quirks(&model_id);
        let channel = self.tool_channel(&quirks);
        let parser = self.parser(channel);

        let reset = env.reset(task_id).await?;
        transcript.clear();
        transcript.extend(self.initial_messages(&reset.observation, &reset.metadata, env.tools()));
        let call_config = self.call_config(channel, env.tools());

        info!(
            task_id,
            model = %model_id,
            strategy = %self.config.strategy,
            interactive = self.config.interactive,
            "Episode started"
        );

        let mut usage = UsageLog::default();
        let mut reward = Reward::zero();
        let mut end_reason: Option<EndReason> = None;
        let mut parsed_answer = None;
        let mut observation_sizes = Vec::new();
        let mut num_turns = 0;
        let mut turns_since_user = 0;
        let mut done = false;
        let mut last_text = String::new();

        while turns_since_user < self.config.max_turns {
            let turn = num_turns;
            if turn > 0 {
                tokio::time::sleep(self.config.step_delay()).await;
            }
            num_turns += 1;
            turns_since_user += 1;

            debug!(task_id, turn, model = %model_id, "Calling model");
            let response: LlmResponse = self
                .config
                .retry
                .run("agent_completion", || {
                    self.driver.chat_completion(transcript.clone(), &call_config)
                })
                .await?;
            usage.record_priced(&model_id, &response.metadata);
            last_text = response.text.clone();

            let action = match parser.parse(&response, env.tools()) {
                ParseOutcome::Action(action) => action,
                ParseOutcome::Invalid(invalid) => {
                    warn!(task_id, turn, reason = %invalid.reason, "Invalid action");
                    end_reason = Some(EndReason::new(
                        EndSource::Agent,
                        "Invalid action",
                        response.text.clone(),
                    ));
                    match invalid.rejected_call {
                        Some(call) if channel == ToolChannel::Native => {
                            transcript.push(LlmMessage::assistant_with_tool_calls(
                                response.text.clone(),
                                vec![call.clone()],
                            ));
                            transcript.push(LlmMessage::tool(
                                call.id,
                                call.name,
                                INVALID_TOOL_CALL_MESSAGE,
                            ));
                        }
                        _ => {
                            transcript.push(LlmMessage::assistant(response.text.clone()));
                            transcript.push(LlmMessage::user(rule_string(self.config.strategy)));
                        }
                    }
                    continue;
                }
            };

            debug!(task_id, turn, action = action.kind(), "Parsed action");
            let native_call = match (&action, channel) {
                (Action::ToolCall { .. }, ToolChannel::Native) => response.first_tool_call().cloned(),
                _ => None,
            };
            transcript.push(match (&action, &native_call) {
                (_, Some(call)) => {
                    LlmMessage::assistant_with_tool_calls(response.text.clone(), vec![call.clone()])
                }
                (Action::ToolCall { name, arguments, .. }, None) if channel == ToolChannel::Text => {
                    LlmMessage::assistant(render_text_tool_call(name, arguments))
                }
                _ => LlmMessage::assistant(response.text.clone()),
            });

            let step = env.step(action).await?;
            if let Some(size) = step.info.observation_size {
                observation_sizes.push(size);
            }
            if step.info.end_reason.is_some() {
                end_reason = step.info.end_reason.clone();
            }
            if step.info.parsed_answer.is_some() {
                parsed_answer = step.info.parsed_answer.clone();
            }
            reward = step.reward;

            if step.done {
                done = true;
                break;
            }
            if step.info.from_user {
                turns_since_user = 0;
            }

            transcript.push(match native_call {
                Some(call) => LlmMessage::tool(call.id, call.name, step.observation),
                None if step.info.from_user => LlmMessage::user(step.observation),
                None => LlmMessage::user(format!("{OBSERVATION_PREFIX}{}", step.observation)),
            });
        }

        if !done {
            info!(task_id, max_turns = self.config.max_turns, "Max turns reached");
            end_reason = Some(EndReason::new(EndSource::Agent, "Max turns reached", last_text));
            reward = Reward::zero();
        }

        let info = AgentInfo {
            end_reason,
            total_cost: usage.total_cost(),
            usage,
            num_turns,
            observation_sizes,
            evaluation_usage: env.overhead_usage(),
            parsed_answer,
        };
        info!(
            task_id,
            reward = ?reward,
            num_turns,
            cost = info.total_cost,
            "Episode finished"
        );
        Ok(EpisodeOutcome { reward, info })
    }
}

//! Agent actions
//!
//! An [`Action`] is the single operation an agent issues per turn. The parser
//! produces either an action or an [`InvalidOutput`]; malformed output is never
//! coerced into an action.

use crate::llm::LlmToolCall;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Names of the terminal pseudo-tool
pub const RESPOND_TOOL: &str = "respond";
pub const SUBMIT_TOOL: &str = "submit";

/// A parsed agent action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Action {
    /// Run a query against the backend
    Execute { content: String },
    /// Terminal answer (also produced by `<submit>` tags)
    Respond { content: String },
    /// Call a registered tool
    #[serde(rename = "tool_call")]
    ToolCall {
        id: String,
        #[serde(rename = "tool")]
        name: String,
        arguments: Map<String, Value>,
    },
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Execute { .. } => "execute",
            Action::Respond { .. } => "respond",
            Action::ToolCall { .. } => "tool_call",
        }
    }

    /// Whether this action proposes a final answer
    pub fn is_terminal(&self) -> bool {
        match self {
            Action::Respond { .. } => true,
            Action::ToolCall { name, .. } => is_terminal_tool(name),
            Action::Execute { .. } => false,
        }
    }

    /// The proposed final answer, for terminal actions.
    ///
    /// A non-string `content` argument is rendered as JSON text; a missing one
    /// is the empty string.
    pub fn proposed_answer(&self) -> Option<String> {
        match self {
            Action::Respond { content } => Some(content.clone()),
            Action::ToolCall {
                name, arguments, ..
            } if is_terminal_tool(name) => Some(match arguments.get("content") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            }),
            _ => None,
        }
    }

    /// Compact text of what the action did, used in trajectories shown to judges
    pub fn trajectory_text(&self) -> String {
        match self {
            Action::Execute { content } | Action::Respond { content } => content.clone(),
            Action::ToolCall {
                name, arguments, ..
            } => format!("{name}({})", Value::Object(arguments.clone())),
        }
    }
}

pub fn is_terminal_tool(name: &str) -> bool {
    name == RESPOND_TOOL || name == SUBMIT_TOOL
}

/// Model output that did not yield a valid action
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidOutput {
    pub reason: String,
    /// The native tool call that was rejected, so the loop can answer its id
    pub rejected_call: Option<LlmToolCall>,
}

impl InvalidOutput {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            rejected_call: None,
        }
    }

    pub fn with_call(reason: impl Into<String>, call: LlmToolCall) -> Self {
        Self {
            reason: reason.into(),
            rejected_call: Some(call),
        }
    }
}

/// Result of parsing one model response
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Action(Action),
    Invalid(InvalidOutput),
}

impl ParseOutcome {
    pub fn is_invalid(&self) -> bool {
        matches!(self, ParseOutcome::Invalid(_))
    }
}

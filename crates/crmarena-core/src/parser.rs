// Action parser
//
// Turns one model response into an Action or an InvalidOutput. Three modes:
// - Tagged: free text with <execute>/<respond>/<submit> wrappers
// - NativeToolCall: the provider's structured tool_calls payload
// - TextToolCall: "Action: name" / "Action Input: {...}" for models without
//   native function calling
//
// Parsing is pure. Only the first tag or the first tool call of a response is
// honored.

use crate::action::{Action, InvalidOutput, ParseOutcome};
use crate::llm::{LlmResponse, LlmToolCall};
use crate::tools::ToolRegistry;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use tracing::debug;
use uuid::Uuid;

/// Wrapper tags understood in tagged mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionTag {
    Execute,
    Respond,
    Submit,
}

impl ActionTag {
    pub fn name(&self) -> &'static str {
        match self {
            ActionTag::Execute => "execute",
            ActionTag::Respond => "respond",
            ActionTag::Submit => "submit",
        }
    }

    fn regex(&self) -> &'static Regex {
        static EXECUTE: OnceLock<Regex> = OnceLock::new();
        static RESPOND: OnceLock<Regex> = OnceLock::new();
        static SUBMIT: OnceLock<Regex> = OnceLock::new();
        let (cell, pattern) = match self {
            ActionTag::Execute => (&EXECUTE, r"(?s)<execute>(.*?)</execute>"),
            ActionTag::Respond => (&RESPOND, r"(?s)<respond>(.*?)</respond>"),
            ActionTag::Submit => (&SUBMIT, r"(?s)<submit>(.*?)</submit>"),
        };
        cell.get_or_init(|| Regex::new(pattern).expect("valid regex"))
    }

    fn into_action(self, content: String) -> Action {
        match self {
            ActionTag::Execute => Action::Execute { content },
            ActionTag::Respond | ActionTag::Submit => Action::Respond { content },
        }
    }
}

/// How model output is turned into actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionParser {
    /// Tags tried in priority order
    Tagged(Vec<ActionTag>),
    NativeToolCall,
    TextToolCall,
}

impl ActionParser {
    /// Tagged parser for the chat strategies: execute, then respond, then submit
    pub fn chat() -> Self {
        ActionParser::Tagged(vec![
            ActionTag::Execute,
            ActionTag::Respond,
            ActionTag::Submit,
        ])
    }

    /// Parse a model response.
    ///
    /// `registry` is used to check required tool arguments; calls to tools it
    /// does not know are passed through for the environment to reject.
    pub fn parse(&self, response: &LlmResponse, registry: Option<&ToolRegistry>) -> ParseOutcome {
        let outcome = match self {
            ActionParser::Tagged(tags) => parse_tagged(&response.text, tags),
            ActionParser::NativeToolCall => parse_native(response, registry),
            ActionParser::TextToolCall => parse_text_tool_call(&response.text, registry),
        };
        if let ParseOutcome::Invalid(invalid) = &outcome {
            debug!(reason = %invalid.reason, "Model output did not parse to an action");
        }
        outcome
    }
}

// ============================================================================
// Tagged mode
// ============================================================================

fn parse_tagged(text: &str, tags: &[ActionTag]) -> ParseOutcome {
    let text = text.trim();
    for tag in tags {
        let content = tag
            .regex()
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim())
            .unwrap_or_default();
        if !content.is_empty() {
            return ParseOutcome::Action(tag.into_action(content.to_string()));
        }
    }
    ParseOutcome::Invalid(InvalidOutput::new("no non-empty action tag found"))
}

// ============================================================================
// Native tool-call mode
// ============================================================================

fn parse_native(response: &LlmResponse, registry: Option<&ToolRegistry>) -> ParseOutcome {
    let Some(call) = response.first_tool_call() else {
        return ParseOutcome::Invalid(InvalidOutput::new("response contains no tool call"));
    };

    let name = call.name.trim();
    let arguments = match serde_json::from_str::<Value>(call.arguments.trim()) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            return ParseOutcome::Invalid(InvalidOutput::with_call(
                "tool arguments are not a JSON object",
                call.clone(),
            ))
        }
        Err(err) => {
            return ParseOutcome::Invalid(InvalidOutput::with_call(
                format!("tool arguments are not valid JSON: {err}"),
                call.clone(),
            ))
        }
    };

    if let Err(reason) = check_arguments(registry, name, &arguments) {
        return ParseOutcome::Invalid(InvalidOutput::with_call(reason, call.clone()));
    }

    ParseOutcome::Action(Action::ToolCall {
        id: call.id.trim().to_string(),
        name: name.to_string(),
        arguments,
    })
}

fn check_arguments(
    registry: Option<&ToolRegistry>,
    name: &str,
    arguments: &Map<String, Value>,
) -> std::result::Result<(), String> {
    match registry {
        Some(registry) => registry.validate_arguments(name, arguments),
        None => Ok(()),
    }
}

// ============================================================================
// Text tool-call mode
// ============================================================================

fn action_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Action:\s*(\w+)").expect("valid regex"))
}

fn fenced_object_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json\s*)?\n*(\{.*?\})\n*```").expect("valid regex"))
}

const ACTION_LABEL: &str = "Action:";
const ACTION_INPUT_LABEL: &str = "Action Input:";

fn parse_text_tool_call(text: &str, registry: Option<&ToolRegistry>) -> ParseOutcome {
    let text = text.trim();
    if !text.contains(ACTION_LABEL) {
        if text.is_empty() {
            return ParseOutcome::Invalid(InvalidOutput::new("empty response"));
        }
        // a plain conversational reply
        return ParseOutcome::Action(Action::Respond {
            content: text.to_string(),
        });
    }

    let Some(name) = action_name_regex()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
    else {
        return ParseOutcome::Invalid(InvalidOutput::new("no tool name after 'Action:'"));
    };

    let Some((_, raw_input)) = text.split_once(ACTION_INPUT_LABEL) else {
        return ParseOutcome::Invalid(InvalidOutput::new("missing 'Action Input:'"));
    };
    let raw_input = raw_input.trim();
    let raw_input = fenced_object_regex()
        .captures(raw_input)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(raw_input);

    let value = match serde_json::from_str::<Value>(raw_input) {
        Ok(value) => value,
        Err(_) => match parse_python_literal(raw_input) {
            Some(value) => value,
            None => {
                return ParseOutcome::Invalid(InvalidOutput::new(
                    "action input is neither JSON nor a literal structure",
                ))
            }
        },
    };
    let Value::Object(arguments) = value else {
        return ParseOutcome::Invalid(InvalidOutput::new("action input is not an object"));
    };

    if let Err(reason) = check_arguments(registry, &name, &arguments) {
        return ParseOutcome::Invalid(InvalidOutput::new(reason));
    }

    ParseOutcome::Action(Action::ToolCall {
        id: format!("call_{}", Uuid::now_v7().simple()),
        name,
        arguments,
    })
}

/// Render a text-mode action back into the canonical assistant turn
pub fn render_text_tool_call(name: &str, arguments: &Map<String, Value>) -> String {
    format!(
        "{ACTION_LABEL} {name}\n{ACTION_INPUT_LABEL} {}",
        Value::Object(arguments.clone())
    )
}

/// Synthesize the call record for a text-mode action, for transcripts
pub fn synthetic_call(id: &str, name: &str, arguments: &Map<String, Value>) -> LlmToolCall {
    LlmToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments: Value::Object(arguments.clone()).to_string(),
    }
}

// ============================================================================
// Permissive literal parsing
// ============================================================================

/// Parse a Python-style literal: single- or double-quoted strings,
/// `True`/`False`/`None`, tuples (as arrays), trailing commas.
///
/// The whole input must be consumed; returns `None` otherwise.
pub fn parse_python_literal(input: &str) -> Option<Value> {
    let mut parser = LiteralParser {
        chars: input.chars().collect(),
        pos: 0,
    };
    let value = parser.value()?;
    parser.skip_ws();
    (parser.pos == parser.chars.len()).then_some(value)
}

struct LiteralParser {
    chars: Vec<char>,
    pos: usize,
}

impl LiteralParser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn value(&mut self) -> Option<Value> {
        self.skip_ws();
        match self.peek()? {
            '{' => self.dict(),
            '[' => self.sequence('[', ']'),
            '(' => self.sequence('(', ')'),
            '\'' | '"' => self.string().map(Value::String),
            c if c == '-' || c == '+' || c.is_ascii_digit() || c == '.' => self.number(),
            _ => self.keyword(),
        }
    }

    fn dict(&mut self) -> Option<Value> {
        self.bump();
        let mut map = Map::new();
        loop {
            if self.eat('}') {
                return Some(Value::Object(map));
            }
            let key = match self.value()? {
                Value::String(s) => s,
                other => other.to_string(),
            };
            if !self.eat(':') {
                return None;
            }
            let value = self.value()?;
            map.insert(key, value);
            if !self.eat(',') {
                return self.eat('}').then_some(Value::Object(map));
            }
        }
    }

    fn sequence(&mut self, _open: char, close: char) -> Option<Value> {
        self.bump();
        let mut items = Vec::new();
        loop {
            if self.eat(close) {
                return Some(Value::Array(items));
            }
            items.push(self.value()?);
            if !self.eat(',') {
                return self.eat(close).then_some(Value::Array(items));
            }
        }
    }

    fn string(&mut self) -> Option<String> {
        let quote = self.bump()?;
        let mut out = String::new();
        loop {
            match self.bump()? {
                c if c == quote => return Some(out),
                '\\' => match self.bump()? {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '0' => out.push('\0'),
                    other => out.push(other),
                },
                c => out.push(c),
            }
        }
    }

    fn number(&mut self) -> Option<Value> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E' | '_'))
        {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        let text = text.trim_start_matches('+');
        if let Ok(int) = text.parse::<i64>() {
            return Some(Value::from(int));
        }
        let float = text.parse::<f64>().ok()?;
        serde_json::Number::from_f64(float).map(Value::Number)
    }

    fn keyword(&mut self) -> Option<Value> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        match word.as_str() {
            "True" | "true" => Some(Value::Bool(true)),
            "False" | "false" => Some(Value::Bool(false)),
            "None" | "null" => Some(Value::Null),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmToolCall;
    use serde_json::json;

    fn text(s: &str) -> LlmResponse {
        LlmResponse::text(s)
    }

    fn with_calls(calls: Vec<(&str, &str, &str)>) -> LlmResponse {
        LlmResponse {
            tool_calls: Some(
                calls
                    .into_iter()
                    .map(|(id, name, args)| LlmToolCall {
                        id: id.into(),
                        name: name.into(),
                        arguments: args.into(),
                    })
                    .collect(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn test_tag_priority_ignores_text_order() {
        let parser = ActionParser::chat();
        let outcome = parser.parse(
            &text("<respond>42</respond> then <execute>SELECT Id FROM Case</execute>"),
            None,
        );
        assert_eq!(
            outcome,
            ParseOutcome::Action(Action::Execute {
                content: "SELECT Id FROM Case".into()
            })
        );
    }

    #[test]
    fn test_empty_tag_is_invalid() {
        let parser = ActionParser::chat();
        assert!(parser.parse(&text("<execute>   </execute>"), None).is_invalid());
        assert!(parser.parse(&text("no tags at all"), None).is_invalid());
    }

    #[test]
    fn test_empty_higher_priority_tag_falls_through() {
        let parser = ActionParser::chat();
        let outcome = parser.parse(&text("<execute>\n</execute><submit> 005A </submit>"), None);
        assert_eq!(
            outcome,
            ParseOutcome::Action(Action::Respond {
                content: "005A".into()
            })
        );
    }

    #[test]
    fn test_multiline_tag_content() {
        let parser = ActionParser::chat();
        let outcome = parser.parse(
            &text("Thought: count them\n<execute>\nSELECT COUNT()\nFROM Opportunity\n</execute>"),
            None,
        );
        assert_eq!(
            outcome,
            ParseOutcome::Action(Action::Execute {
                content: "SELECT COUNT()\nFROM Opportunity".into()
            })
        );
    }

    #[test]
    fn test_native_first_call_only() {
        let registry = ToolRegistry::crm();
        let response = with_calls(vec![
            ("call_1", "get_issues", "{}"),
            ("call_2", "respond", r#"{"content": "x"}"#),
        ]);
        let outcome = ActionParser::NativeToolCall.parse(&response, Some(&registry));
        let ParseOutcome::Action(Action::ToolCall { id, name, .. }) = outcome else {
            panic!("expected tool call");
        };
        assert_eq!(id, "call_1");
        assert_eq!(name, "get_issues");
    }

    #[test]
    fn test_native_bad_json_keeps_rejected_call() {
        let response = with_calls(vec![("call_9", "get_cases", "{not json")]);
        let ParseOutcome::Invalid(invalid) = ActionParser::NativeToolCall.parse(&response, None)
        else {
            panic!("expected invalid");
        };
        assert_eq!(invalid.rejected_call.unwrap().id, "call_9");
    }

    #[test]
    fn test_native_missing_required_argument() {
        let registry = ToolRegistry::crm();
        let response = with_calls(vec![("call_1", "get_shipping_state", "{}")]);
        assert!(ActionParser::NativeToolCall
            .parse(&response, Some(&registry))
            .is_invalid());
    }

    #[test]
    fn test_native_without_call_is_invalid() {
        let outcome = ActionParser::NativeToolCall.parse(&text("I think the answer is 4"), None);
        let ParseOutcome::Invalid(invalid) = outcome else {
            panic!("expected invalid");
        };
        assert!(invalid.rejected_call.is_none());
    }

    #[test]
    fn test_text_mode_plain_reply_is_respond() {
        let outcome = ActionParser::TextToolCall.parse(&text("  The agent is 005A.  "), None);
        assert_eq!(
            outcome,
            ParseOutcome::Action(Action::Respond {
                content: "The agent is 005A.".into()
            })
        );
        assert!(ActionParser::TextToolCall.parse(&text("   "), None).is_invalid());
    }

    #[test]
    fn test_text_mode_fenced_json() {
        let outcome = ActionParser::TextToolCall.parse(
            &text("Action: get_order_item_ids_by_product\nAction Input: ```json\n{\"product_id\": \"01tA\"}\n```"),
            None,
        );
        let ParseOutcome::Action(Action::ToolCall {
            id,
            name,
            arguments,
        }) = outcome
        else {
            panic!("expected tool call");
        };
        assert!(id.starts_with("call_"));
        assert_eq!(name, "get_order_item_ids_by_product");
        assert_eq!(arguments["product_id"], "01tA");
    }

    #[test]
    fn test_text_mode_python_literal() {
        let outcome = ActionParser::TextToolCall.parse(
            &text("Action: find_id_with_max_value\nAction Input: {'values_by_id': {'a': 1, 'b': 2.5,}, 'flag': True}"),
            None,
        );
        let ParseOutcome::Action(Action::ToolCall { arguments, .. }) = outcome else {
            panic!("expected tool call");
        };
        assert_eq!(
            Value::Object(arguments),
            json!({"values_by_id": {"a": 1, "b": 2.5}, "flag": true})
        );
    }

    #[test]
    fn test_text_mode_invalid_inputs() {
        let parser = ActionParser::TextToolCall;
        assert!(parser.parse(&text("Action: get_issues"), None).is_invalid());
        assert!(parser
            .parse(&text("Action: get_issues\nAction Input: not a dict"), None)
            .is_invalid());
        assert!(parser
            .parse(&text("Action: get_issues\nAction Input: [1, 2]"), None)
            .is_invalid());
    }

    #[test]
    fn test_python_literal_parser() {
        assert_eq!(
            parse_python_literal("('a', \"b\", None, -3)"),
            Some(json!(["a", "b", null, -3]))
        );
        assert_eq!(parse_python_literal("{'k': 'it\\'s'}"), Some(json!({"k": "it's"})));
        assert_eq!(parse_python_literal("{'k': 1} trailing"), None);
        assert_eq!(parse_python_literal("undefined_name"), None);
    }

    #[test]
    fn test_render_text_tool_call() {
        let mut args = Map::new();
        args.insert("content".into(), json!("005A"));
        assert_eq!(
            render_text_tool_call("respond", &args),
            "Action: respond\nAction Input: {\"content\":\"005A\"}"
        );
    }
}

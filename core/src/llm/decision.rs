use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{RelayError, Result};

/// One tool the model asked for
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub id: Option<String>,
    pub tool_name: String,
    /// As sent by the model: usually a JSON-encoded string, sometimes an object
    pub raw_arguments: Value,
}

impl ToolInvocation {
    /// Decode the arguments into a JSON object
    pub fn arguments(&self) -> Result<Map<String, Value>> {
        let decoded = match &self.raw_arguments {
            Value::Null => return Ok(Map::new()),
            Value::String(text) if text.trim().is_empty() => return Ok(Map::new()),
            Value::String(text) => serde_json::from_str::<Value>(text).map_err(|e| {
                RelayError::Decode(format!(
                    "Arguments for {} are not valid JSON: {e}",
                    self.tool_name
                ))
            })?,
            other => other.clone(),
        };
        match decoded {
            Value::Object(map) => Ok(map),
            other => Err(RelayError::Decode(format!(
                "Arguments for {} must be a JSON object, got {other}",
                self.tool_name
            ))),
        }
    }
}

/// Parsed result of the decision call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelDecision {
    /// In the order the model emitted them
    pub invocations: Vec<ToolInvocation>,
    /// Plain assistant text, if any
    pub text: Option<String>,
}

impl ModelDecision {
    pub fn has_tool_calls(&self) -> bool {
        !self.invocations.is_empty()
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<AssistantMessage>,
}

#[derive(Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<RawToolCall>>,
}

#[derive(Deserialize)]
struct RawToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    function: Option<RawFunction>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct RawFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Read `choices[0].message` into a [`ModelDecision`]
pub fn parse_decision(doc: &Value) -> Result<ModelDecision> {
    let completion: ChatCompletion = serde_json::from_value(doc.clone())
        .map_err(|e| RelayError::Protocol(format!("Unexpected decision response shape: {e}")))?;

    let message = completion
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .ok_or_else(|| RelayError::Protocol("Decision response has no choices[0].message".into()))?;

    let mut decision = ModelDecision::default();
    let mut texts: Vec<String> = message
        .content
        .into_iter()
        .filter(|s| !s.trim().is_empty())
        .collect();

    for call in message.tool_calls.unwrap_or_default() {
        match (call.kind.as_deref(), call.function) {
            (Some("text"), _) => texts.extend(call.text),
            (_, Some(function)) if !function.name.is_empty() => {
                decision.invocations.push(ToolInvocation {
                    id: call.id,
                    tool_name: function.name,
                    raw_arguments: function.arguments,
                });
            }
            _ => {
                return Err(RelayError::Protocol(
                    "Tool call entry has neither a function nor text".into(),
                ))
            }
        }
    }

    if !texts.is_empty() {
        decision.text = Some(texts.join("\n"));
    }
    Ok(decision)
}

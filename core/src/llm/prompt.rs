//! Message construction for the decision and narration calls

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::mcp::ToolDescriptor;

/// One chat turn in the OpenAI-compatible `messages` array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// System instruction listing every tool plus the argument rules, then the query
pub fn decision_messages(
    query: &str,
    tools: &[ToolDescriptor],
    normalization_hints: &[String],
    today: NaiveDate,
) -> Vec<ChatMessage> {
    let mut system = String::from(
        "## You are a tool-using assistant. Call the tools below to answer the user.\n\
         ## Available tools:\n",
    );
    for tool in tools {
        system.push_str(&format!("- {}: {}\n", tool.name, tool.description));
    }

    system.push_str("## Argument rules\n");
    system.push_str("- Translate localized values into English\n");
    for hint in normalization_hints {
        system.push_str(&format!("- {hint}\n"));
    }
    system.push_str("- Keep every other field (such as days) unchanged\n");
    system.push_str(&format!(
        "- Today is {today}; resolve relative dates such as \"tomorrow\" from it\n"
    ));

    system.push_str(
        "## Examples\n\
         1. {city: '杭州'} -> {city: 'hangzhou'}\n\
         2. {location: 'hangzhou'} -> {city: 'hangzhou'}\n\
         3. {city: '杭州', days: 1} -> {city: 'hangzhou', days: 1}\n",
    );

    vec![ChatMessage::system(system), ChatMessage::user(query)]
}

/// Tool list in OpenAI function-calling format
pub fn tool_specs(tools: &[ToolDescriptor]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.input_schema,
                }
            })
        })
        .collect()
}

/// Instruction to turn a structured tool result into prose, with the payload inlined
pub fn narration_messages(query: &str, payload: &Value) -> Vec<ChatMessage> {
    let system = format!(
        "## Rewrite structured tool output as short natural-language sentences.\n\
         ## Write one line per array element, in the order given.\n\
         ## Examples\n\
         1. [{{date: '2025-03-21', temperature: '18.95', conditions: 'clear sky'}}]\n   \
            -> Weather: on 2025-03-21 the temperature is 18.95 with clear sky.\n\
         2. [{{date: '2025-03-21', temperature: '18.95', conditions: 'clear sky'}}, \
         {{date: '2025-03-22', temperature: '10.95', conditions: 'clear sky'}}]\n   \
            -> - Weather: on 2025-03-21 the temperature is 18.95 with clear sky.\n      \
               - Weather: on 2025-03-22 the temperature is 10.95 with clear sky.\n\
         ## Data\n{payload}\n"
    );
    vec![ChatMessage::system(system), ChatMessage::user(query)]
}

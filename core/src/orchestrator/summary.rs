use serde_json::Value;

/// Render a tool payload as text lines without a model call.
///
/// Arrays become one line per element, in order; objects list their fields
/// in the order the tool produced them.
pub fn render_lines(payload: &Value) -> Vec<String> {
    match payload {
        Value::Array(items) => items.iter().map(render_item).collect(),
        Value::Null => Vec::new(),
        other => vec![render_item(other)],
    }
}

fn render_item(item: &Value) -> String {
    match item {
        Value::Object(fields) => {
            let parts: Vec<String> = fields
                .iter()
                .map(|(k, v)| format!("{k}: {}", scalar(v)))
                .collect();
            format!("- {}", parts.join(", "))
        }
        other => format!("- {}", scalar(other)),
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

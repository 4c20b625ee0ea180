use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Rewrites model-produced tool arguments into the canonical schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationRules {
    /// source field -> canonical field
    pub field_renames: HashMap<String, String>,
    /// localized value -> canonical value (matched after trimming)
    pub value_aliases: HashMap<String, String>,
    /// Fields whose values are trimmed and matched against `value_aliases`.
    /// Rename targets and `lowercase_fields` are always included; every other
    /// field passes through untouched.
    pub canonical_fields: Vec<String>,
    /// Canonical fields whose string values are lowercased
    pub lowercase_fields: Vec<String>,
}

impl Default for NormalizationRules {
    fn default() -> Self {
        let field_renames = [("location", "city")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let value_aliases = [
            ("杭州", "hangzhou"),
            ("杭州市", "hangzhou"),
            ("北京", "beijing"),
            ("北京市", "beijing"),
            ("上海", "shanghai"),
            ("上海市", "shanghai"),
            ("广州", "guangzhou"),
            ("深圳", "shenzhen"),
            ("成都", "chengdu"),
            ("南京", "nanjing"),
            ("武汉", "wuhan"),
            ("西安", "xian"),
            ("苏州", "suzhou"),
            ("重庆", "chongqing"),
            ("天津", "tianjin"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            field_renames,
            value_aliases,
            canonical_fields: vec!["city".to_string()],
            lowercase_fields: vec!["city".to_string()],
        }
    }
}

impl NormalizationRules {
    /// Rules that change nothing
    pub fn none() -> Self {
        Self {
            field_renames: HashMap::new(),
            value_aliases: HashMap::new(),
            canonical_fields: Vec::new(),
            lowercase_fields: Vec::new(),
        }
    }

    /// Apply renames, aliases and lowercasing. Non-canonical fields pass through.
    pub fn normalize(&self, arguments: Map<String, Value>) -> Map<String, Value> {
        let mut out = Map::with_capacity(arguments.len());
        let mut renamed = Vec::new();

        for (key, value) in arguments {
            match self.field_renames.get(&key) {
                Some(target) => renamed.push((target.clone(), value)),
                None => {
                    let value = self.normalize_value(&key, value);
                    out.insert(key, value);
                }
            }
        }

        // An explicit canonical field wins over a renamed one
        for (target, value) in renamed {
            if !out.contains_key(&target) {
                let value = self.normalize_value(&target, value);
                out.insert(target, value);
            }
        }
        out
    }

    fn is_canonical(&self, field: &str) -> bool {
        self.canonical_fields.iter().any(|f| f == field)
            || self.lowercase_fields.iter().any(|f| f == field)
            || self.field_renames.values().any(|target| target == field)
    }

    fn normalize_value(&self, field: &str, value: Value) -> Value {
        if !self.is_canonical(field) {
            return value;
        }
        let Value::String(text) = value else {
            return value;
        };
        let trimmed = text.trim();
        let mapped = match self.value_aliases.get(trimmed) {
            Some(alias) => alias.clone(),
            None => trimmed.to_string(),
        };
        if self.lowercase_fields.iter().any(|f| f == field) {
            Value::String(mapped.to_lowercase())
        } else {
            Value::String(mapped)
        }
    }

    /// Human-readable rule lines for the decision prompt
    pub fn hints(&self) -> Vec<String> {
        let mut renames: Vec<_> = self.field_renames.iter().collect();
        renames.sort();
        let mut hints: Vec<String> = renames
            .into_iter()
            .map(|(from, to)| format!("A \"{from}\" field must be renamed to \"{to}\""))
            .collect();

        if !self.value_aliases.is_empty() {
            let mut aliases: Vec<_> = self.value_aliases.iter().collect();
            aliases.sort();
            let listed: Vec<String> = aliases
                .into_iter()
                .map(|(from, to)| format!("{from} -> {to}"))
                .collect();
            hints.push(format!("Use these canonical values: {}", listed.join(", ")));
        }
        for field in &self.lowercase_fields {
            hints.push(format!("\"{field}\" values are lowercase romanized names"));
        }
        hints
    }
}

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use relay_core::mcp::McpServerConfig;
use relay_core::orchestrator::{NarrationMode, NormalizationRules, OrchestratorOptions};
use relay_core::{IngressConfig, ModelClientConfig};

/// How queries reach the agent
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// HTTP endpoint streaming server-sent events
    Serve,
    /// Line-oriented prompt on stdin/stdout
    Prompt,
}

/// Everything the agent needs to start
#[derive(Clone, Debug)]
pub struct RelayAgentConfig {
    pub mode: Mode,
    pub model: ModelClientConfig,
    /// Tool provider; `None` runs without tools
    pub mcp: Option<McpServerConfig>,
    pub ingress: IngressConfig,
    pub orchestrator: OrchestratorOptions,
}

impl Default for RelayAgentConfig {
    fn default() -> Self {
        let mode = match std::env::var("RELAY_MODE").ok().as_deref() {
            Some("prompt") => Mode::Prompt,
            _ => Mode::Serve,
        };

        // SSE url wins over a local script
        let mcp = match (
            std::env::var("RELAY_MCP_URL").ok().filter(|s| !s.is_empty()),
            std::env::var("RELAY_MCP_SCRIPT").ok().filter(|s| !s.is_empty()),
        ) {
            (Some(url), _) => Some(McpServerConfig::sse("mcp", url)),
            (None, Some(script)) => match McpServerConfig::from_script(&script) {
                Ok(cfg) => Some(cfg),
                Err(e) => {
                    tracing::warn!(target: "relay_agent", error = %e, "Ignoring RELAY_MCP_SCRIPT");
                    None
                }
            },
            (None, None) => None,
        };

        Self {
            mode,
            model: ModelClientConfig::default(),
            mcp,
            ingress: IngressConfig::from_env(),
            orchestrator: OrchestratorOptions::default(),
        }
    }
}

impl RelayAgentConfig {
    /// Load configuration from a TOML file (path via RELAY_AGENT_CONFIG or ./relay_agent.toml),
    /// overlaying values onto env-driven defaults.
    pub fn load() -> Self {
        let path =
            std::env::var("RELAY_AGENT_CONFIG").unwrap_or_else(|_| "relay_agent.toml".into());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(p: &Path) -> Self {
        let default = Self::default();
        if !p.exists() {
            tracing::info!(target: "relay_agent", path = %p.display(), "No TOML config found; using defaults/env");
            return default;
        }
        match fs::read_to_string(p) {
            Ok(s) => match toml::from_str::<RelayAgentToml>(&s) {
                Ok(t) => t.overlay(default),
                Err(e) => {
                    tracing::warn!(target: "relay_agent", error = %e, "Failed to parse TOML; using defaults");
                    default
                }
            },
            Err(e) => {
                tracing::warn!(target: "relay_agent", error = %e, "Failed to read TOML; using defaults");
                default
            }
        }
    }
}

// =========================
// TOML overlay definitions
// =========================

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct RelayAgentToml {
    pub mode: Option<Mode>,
    pub model: Option<ModelToml>,
    pub mcp: Option<McpToml>,
    pub ingress: Option<IngressToml>,
    pub orchestrator: Option<OrchestratorToml>,
}

impl RelayAgentToml {
    fn overlay(self, mut base: RelayAgentConfig) -> RelayAgentConfig {
        if let Some(m) = self.mode {
            base.mode = m;
        }
        if let Some(m) = self.model {
            m.apply(&mut base.model);
        }
        if let Some(m) = self.mcp {
            if let Some(cfg) = m.into_config() {
                base.mcp = Some(cfg);
            }
        }
        if let Some(i) = self.ingress {
            i.apply(&mut base.ingress);
        }
        if let Some(o) = self.orchestrator {
            o.apply(&mut base.orchestrator);
        }
        base
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct ModelToml {
    pub endpoint_url: Option<String>,
    pub auth_token: Option<String>,
    pub model: Option<String>,
    pub timeout_ms: Option<u64>,
    pub decision_max_tokens: Option<u32>,
    pub narration_max_tokens: Option<u32>,
}
impl ModelToml {
    fn apply(self, m: &mut ModelClientConfig) {
        if let Some(x) = self.endpoint_url {
            m.endpoint_url = x;
        }
        if let Some(x) = self.auth_token.filter(|s| !s.is_empty()) {
            m.auth_token = Some(x);
        }
        if let Some(x) = self.model {
            m.model = x;
        }
        if let Some(x) = self.timeout_ms {
            m.timeout = Duration::from_millis(x);
        }
        if let Some(x) = self.decision_max_tokens {
            m.decision_max_tokens = x;
        }
        if let Some(x) = self.narration_max_tokens {
            m.narration_max_tokens = x;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct McpToml {
    pub name: Option<String>,
    pub url: Option<String>,
    pub script: Option<String>,
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
    pub env: Option<HashMap<String, String>>,
    pub cwd: Option<String>,
    pub protocol_version: Option<String>,
}
impl McpToml {
    fn into_config(self) -> Option<McpServerConfig> {
        let mut cfg = if let Some(url) = self.url {
            McpServerConfig::sse(self.name.clone().unwrap_or_else(|| "mcp".into()), url)
        } else if let Some(script) = self.script {
            match McpServerConfig::from_script(&script) {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::warn!(target: "relay_agent", error = %e, "Ignoring [mcp] script");
                    return None;
                }
            }
        } else if let Some(command) = self.command {
            McpServerConfig {
                name: "mcp".into(),
                command,
                args: self.args.clone().unwrap_or_default(),
                env: None,
                cwd: None,
                url: None,
                protocol_version: None,
            }
        } else {
            return None;
        };

        if let Some(x) = self.name {
            cfg.name = x;
        }
        if let Some(x) = self.env {
            cfg.env = Some(x);
        }
        if let Some(x) = self.cwd {
            cfg.cwd = Some(x);
        }
        if let Some(x) = self.protocol_version {
            cfg.protocol_version = Some(x);
        }
        Some(cfg)
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct IngressToml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
}
impl IngressToml {
    fn apply(self, i: &mut IngressConfig) {
        if let Some(x) = self.host {
            i.host = x;
        }
        if let Some(x) = self.port {
            i.port = x;
        }
        if let Some(x) = self.path {
            i.path = if x.starts_with('/') { x } else { format!("/{x}") };
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct OrchestratorToml {
    pub narration: Option<NarrationMode>,
    pub narrate_with_model: Option<bool>,
    pub field_renames: Option<HashMap<String, String>>,
    pub value_aliases: Option<HashMap<String, String>>,
    pub canonical_fields: Option<Vec<String>>,
    pub lowercase_fields: Option<Vec<String>>,
}
impl OrchestratorToml {
    fn apply(self, o: &mut OrchestratorOptions) {
        if let Some(x) = self.narration {
            o.narration = x;
        }
        if let Some(x) = self.narrate_with_model {
            o.narrate_with_model = x;
        }
        let rules: &mut NormalizationRules = &mut o.normalization;
        if let Some(x) = self.field_renames {
            rules.field_renames.extend(x);
        }
        if let Some(x) = self.value_aliases {
            rules.value_aliases.extend(x);
        }
        if let Some(x) = self.canonical_fields {
            rules.canonical_fields = x;
        }
        if let Some(x) = self.lowercase_fields {
            rules.lowercase_fields = x;
        }
    }
}

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::options::{NarrationMode, OrchestratorOptions};
use super::sink::{narration_delta, OutputSink, SinkEvent};
use super::summary::render_lines;
use crate::http::StreamEvent;
use crate::llm::{
    decision_messages, narration_messages, parse_decision, tool_specs, ChatMessage, ModelClient,
    ModelDecision, ToolInvocation,
};
use crate::mcp::{McpToolResult, ToolCatalog, ToolDescriptor, ToolProvider};
use crate::{RelayError, Result};

/// Why a session ended in `Failed`
#[derive(Debug, Clone, PartialEq)]
pub struct SessionFailure {
    pub stage: &'static str,
    pub code: String,
    pub message: String,
}

/// Session state; each variant carries what the next step needs
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    AwaitingDecision,
    ExecutingTools { decision: ModelDecision },
    Narrating { results: Vec<ToolInvocationResult> },
    Complete,
    Failed { failure: SessionFailure },
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::AwaitingDecision => "awaiting_decision",
            SessionState::ExecutingTools { .. } => "executing_tools",
            SessionState::Narrating { .. } => "narrating",
            SessionState::Complete => "complete",
            SessionState::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Complete | SessionState::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolFailure {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Success(Value),
    Failed(ToolFailure),
}

/// One executed (or rejected) tool invocation
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocationResult {
    pub tool_name: String,
    /// Normalized arguments, or the raw model text when they could not be decoded
    pub arguments: Value,
    pub outcome: ToolOutcome,
    pub latency_ms: u64,
}

impl ToolInvocationResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Success(_))
    }

    pub fn payload(&self) -> Option<&Value> {
        match &self.outcome {
            ToolOutcome::Success(v) => Some(v),
            ToolOutcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&ToolFailure> {
        match &self.outcome {
            ToolOutcome::Success(_) => None,
            ToolOutcome::Failed(f) => Some(f),
        }
    }
}

/// A query plus the catalog snapshot taken when the session started
#[derive(Debug, Clone)]
pub struct OrchestrationRequest {
    pub query: String,
    pub session_tools: Arc<Vec<ToolDescriptor>>,
}

/// Summary of one finished session
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: String,
    pub final_state: &'static str,
    /// Every state entered, in order
    pub transitions: Vec<&'static str>,
    pub decision_text: Option<String>,
    pub results: Vec<ToolInvocationResult>,
    pub narration: String,
    pub elapsed_ms: u64,
    pub failure: Option<SessionFailure>,
}

impl SessionReport {
    fn new(session_id: String) -> Self {
        Self {
            session_id,
            final_state: SessionState::AwaitingDecision.name(),
            transitions: Vec::new(),
            decision_text: None,
            results: Vec::new(),
            narration: String::new(),
            elapsed_ms: 0,
            failure: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.final_state == "complete"
    }
}

/// One query's run through decide -> execute -> narrate.
///
/// Owns its request, its cancellation scope and handles to the shared model
/// client and tool provider.
pub struct OrchestrationSession {
    id: String,
    request: OrchestrationRequest,
    model: Arc<ModelClient>,
    provider: Arc<dyn ToolProvider>,
    options: Arc<OrchestratorOptions>,
    cancel: CancellationToken,
}

impl OrchestrationSession {
    pub fn new(
        request: OrchestrationRequest,
        model: Arc<ModelClient>,
        provider: Arc<dyn ToolProvider>,
        options: Arc<OrchestratorOptions>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            request,
            model,
            provider,
            options,
            cancel,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn request(&self) -> &OrchestrationRequest {
        &self.request
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drive the state machine to a terminal state. The sink receives `Done`
    /// on success or `Error` on failure, never both.
    pub async fn run(self, sink: &dyn OutputSink) -> SessionReport {
        let span = info_span!("session", id = %self.id);
        self.drive(sink).instrument(span).await
    }

    async fn drive(self, sink: &dyn OutputSink) -> SessionReport {
        let started = Instant::now();
        let mut report = SessionReport::new(self.id.clone());
        let mut state = SessionState::AwaitingDecision;

        info!(
            target: "session",
            tools = self.request.session_tools.len(),
            "Session started"
        );

        loop {
            report.transitions.push(state.name());
            debug!(target: "session", state = state.name(), "Entering state");

            state = match state {
                SessionState::AwaitingDecision => self.await_decision(&mut report, sink).await,
                SessionState::ExecutingTools { decision } => {
                    self.execute_tools(decision, &mut report, sink).await
                }
                SessionState::Narrating { results } => {
                    self.narrate(&results, &mut report, sink).await
                }
                SessionState::Complete => {
                    sink.emit(SinkEvent::Done);
                    report.final_state = "complete";
                    break;
                }
                SessionState::Failed { failure } => {
                    sink.emit(SinkEvent::Error {
                        code: failure.code.clone(),
                        message: failure.message.clone(),
                    });
                    report.final_state = "failed";
                    report.failure = Some(failure);
                    break;
                }
            };
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            target: "session",
            state = report.final_state,
            results = report.results.len(),
            latency_ms = report.elapsed_ms,
            "Session finished"
        );
        report
    }

    async fn await_decision(
        &self,
        report: &mut SessionReport,
        sink: &dyn OutputSink,
    ) -> SessionState {
        let tools = &self.request.session_tools;
        let messages = decision_messages(
            &self.request.query,
            tools,
            &self.options.normalization.hints(),
            chrono::Local::now().date_naive(),
        );

        let started = Instant::now();
        let decision = match self
            .model
            .decide(&messages, &tool_specs(tools), &self.cancel)
            .await
            .and_then(|doc| parse_decision(&doc))
        {
            Ok(d) => d,
            Err(e) => return failed("awaiting_decision", e),
        };

        info!(
            target: "session",
            calls = decision.invocations.len(),
            latency_ms = started.elapsed().as_millis() as u64,
            "Decision received"
        );

        if let Some(text) = &decision.text {
            sink.emit(SinkEvent::Text(text.clone()));
            report.decision_text = Some(text.clone());
        }

        if decision.has_tool_calls() {
            SessionState::ExecutingTools { decision }
        } else {
            SessionState::Complete
        }
    }

    async fn execute_tools(
        &self,
        decision: ModelDecision,
        report: &mut SessionReport,
        sink: &dyn OutputSink,
    ) -> SessionState {
        let mut results = Vec::with_capacity(decision.invocations.len());

        for invocation in &decision.invocations {
            let result = self.invoke(invocation).await;
            if self.cancel.is_cancelled() {
                report.results = results;
                return failed("executing_tools", RelayError::Cancelled);
            }

            if let Some(failure) = result.failure() {
                sink.emit(SinkEvent::ToolError {
                    tool: result.tool_name.clone(),
                    code: failure.code.clone(),
                    message: failure.message.clone(),
                });
            }
            results.push(result);
        }

        let succeeded = results.iter().filter(|r| r.is_success()).count();
        info!(
            target: "session",
            succeeded,
            failed = results.len() - succeeded,
            "Tool execution finished"
        );

        report.results = results.clone();
        if succeeded == 0 {
            // Nothing to narrate; an empty narration still completes the session
            SessionState::Complete
        } else {
            SessionState::Narrating { results }
        }
    }

    /// Run one invocation; every failure is folded into the result
    async fn invoke(&self, invocation: &ToolInvocation) -> ToolInvocationResult {
        let name = invocation.tool_name.clone();
        let started = Instant::now();

        let arguments = match invocation.arguments() {
            Ok(args) => Value::Object(self.options.normalization.normalize(args)),
            Err(e) => {
                warn!(target: "session", tool = %name, error = %e, "Skipping invocation with undecodable arguments");
                return tool_failed(name, invocation.raw_arguments.clone(), &e, 0);
            }
        };

        debug!(target: "session", tool = %name, arguments = %arguments, "Invoking tool");
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(RelayError::Cancelled),
            res = self.provider.call_tool(&name, Some(arguments.clone())) => match res {
                Ok(result) => tool_payload(&name, result),
                Err(e) => Err(RelayError::ToolExecution(e.to_string())),
            },
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(payload) => {
                info!(target: "session", tool = %name, latency_ms, "Tool invocation succeeded");
                ToolInvocationResult {
                    tool_name: name,
                    arguments,
                    outcome: ToolOutcome::Success(payload),
                    latency_ms,
                }
            }
            Err(e) => {
                warn!(target: "session", tool = %name, error = %e, latency_ms, "Tool invocation failed");
                tool_failed(name, arguments, &e, latency_ms)
            }
        }
    }

    async fn narrate(
        &self,
        results: &[ToolInvocationResult],
        report: &mut SessionReport,
        sink: &dyn OutputSink,
    ) -> SessionState {
        let successes: Vec<(&str, &Value)> = results
            .iter()
            .filter_map(|r| r.payload().map(|p| (r.tool_name.as_str(), p)))
            .collect();

        if !self.options.narrate_with_model {
            for (_, payload) in &successes {
                let text = render_lines(payload).join("\n");
                if text.is_empty() {
                    continue;
                }
                if !report.narration.is_empty() {
                    report.narration.push('\n');
                }
                report.narration.push_str(&text);
                sink.emit(SinkEvent::Text(text));
            }
            return SessionState::Complete;
        }

        let outcome = match self.options.narration {
            NarrationMode::PerResult => {
                let mut outcome = Ok(());
                for (_, payload) in &successes {
                    let messages = narration_messages(&self.request.query, payload);
                    outcome = self.stream_narration(&messages, report, sink).await;
                    if outcome.is_err() {
                        break;
                    }
                }
                outcome
            }
            NarrationMode::Combined => {
                let combined: Vec<Value> = successes
                    .iter()
                    .map(|(tool, payload)| json!({"tool": tool, "result": payload}))
                    .collect();
                let messages = narration_messages(&self.request.query, &Value::Array(combined));
                self.stream_narration(&messages, report, sink).await
            }
        };

        match outcome {
            Ok(()) => SessionState::Complete,
            Err(e) => failed("narrating", e),
        }
    }

    /// One streaming narration call; frames go to the sink as they arrive
    async fn stream_narration(
        &self,
        messages: &[ChatMessage],
        report: &mut SessionReport,
        sink: &dyn OutputSink,
    ) -> Result<()> {
        let narration = &mut report.narration;
        let outcome = self
            .model
            .narrate(messages, &self.cancel, |event| match event {
                StreamEvent::Data(frame) => {
                    if let Some(delta) = narration_delta(&frame) {
                        narration.push_str(delta);
                    }
                    sink.emit(SinkEvent::Frame(frame));
                }
                StreamEvent::DecodeError(e) => {
                    debug!(target: "session", error = %e, "Narration frame skipped");
                }
                StreamEvent::Done => {}
            })
            .await?;

        debug!(target: "session", streamed = outcome.is_stream(), "Narration call finished");
        Ok(())
    }
}

fn failed(stage: &'static str, error: RelayError) -> SessionState {
    warn!(target: "session", stage, code = error.code(), error = %error, "Session failed");
    SessionState::Failed {
        failure: SessionFailure {
            stage,
            code: error.code().to_string(),
            message: error.to_string(),
        },
    }
}

fn tool_failed(
    tool_name: String,
    arguments: Value,
    error: &RelayError,
    latency_ms: u64,
) -> ToolInvocationResult {
    ToolInvocationResult {
        tool_name,
        arguments,
        outcome: ToolOutcome::Failed(ToolFailure {
            code: error.code().to_string(),
            message: error.to_string(),
        }),
        latency_ms,
    }
}

/// `content[0].text` decoded as JSON; plain text is kept as a string
fn tool_payload(name: &str, result: McpToolResult) -> Result<Value> {
    if result.is_error {
        let detail = result.joined();
        return Err(RelayError::ToolExecution(if detail.is_empty() {
            format!("Tool {name} reported an error")
        } else {
            detail
        }));
    }
    let text = result.primary_text().ok_or_else(|| {
        RelayError::ToolExecution(format!("Tool {name} returned no text content"))
    })?;
    Ok(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())))
}

/// Shared entry point that hands out sessions
pub struct Orchestrator {
    model: Arc<ModelClient>,
    provider: Arc<dyn ToolProvider>,
    catalog: Arc<ToolCatalog>,
    options: Arc<OrchestratorOptions>,
}

impl Orchestrator {
    pub fn new(
        model: ModelClient,
        provider: Arc<dyn ToolProvider>,
        catalog: Arc<ToolCatalog>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            model: Arc::new(model),
            provider,
            catalog,
            options: Arc::new(options),
        }
    }

    pub fn catalog(&self) -> &Arc<ToolCatalog> {
        &self.catalog
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    /// New session with its own cancellation scope
    pub fn session(&self, query: impl Into<String>) -> OrchestrationSession {
        self.session_with_cancel(query, CancellationToken::new())
    }

    pub fn session_with_cancel(
        &self,
        query: impl Into<String>,
        cancel: CancellationToken,
    ) -> OrchestrationSession {
        let request = OrchestrationRequest {
            query: query.into(),
            session_tools: self.catalog.list(),
        };
        OrchestrationSession::new(
            request,
            Arc::clone(&self.model),
            Arc::clone(&self.provider),
            Arc::clone(&self.options),
            cancel,
        )
    }
}

//! Orchestration sessions: decide tools, execute them in order, narrate the results.

mod normalize;
mod options;
mod session;
mod sink;
mod summary;

pub use normalize::NormalizationRules;
pub use options::{NarrationMode, OrchestratorOptions};
pub use session::{
    OrchestrationRequest, OrchestrationSession, Orchestrator, SessionFailure, SessionReport,
    SessionState, ToolFailure, ToolInvocationResult, ToolOutcome,
};
pub use sink::{narration_delta, ChannelSink, CollectingSink, OutputSink, SinkEvent};
pub use summary::render_lines;

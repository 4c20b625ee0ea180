// Ingress: the ways a query reaches an orchestration session.
//
// - `server`: axum route streaming session output as server-sent events
// - `prompt`: line-oriented interactive loop

mod prompt;
mod server;

pub use prompt::run_prompt;
pub use server::{IngressConfig, IngressServer};

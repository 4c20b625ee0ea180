use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::orchestrator::{narration_delta, ChannelSink, Orchestrator, SinkEvent};
use crate::{RelayError, Result};

/// Interactive loop: one session per input line until `quit` or end of input.
///
/// Narration is written as it streams in, not after the session ends.
pub async fn run_prompt<R, W>(orchestrator: &Orchestrator, input: R, mut output: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    output
        .write_all(b"\nRelay client started!\nType your queries or 'quit' to exit.\n")
        .await?;

    let mut lines = input.lines();
    loop {
        output.write_all(b"\nQuery: ").await?;
        output.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if query.eq_ignore_ascii_case("quit") {
            break;
        }

        let session = orchestrator.session(query);
        let cancel = session.cancel_token();
        let (sink, rx) = ChannelSink::channel(cancel.clone());

        // The sink is dropped when the session ends, which closes `rx`
        let run = async move { session.run(&sink).await };
        let print = async {
            let mut rx = rx;
            while let Some(event) = rx.recv().await {
                if let Err(e) = write_event(&mut output, &event).await {
                    warn!(target: "ingress", error = %e, "Output failed; cancelling session");
                    cancel.cancel();
                    return Err(e);
                }
            }
            Ok::<_, RelayError>(())
        };
        let (report, printed) = tokio::join!(run, print);
        printed?;
        output.write_all(b"\n").await?;

        debug!(
            target: "ingress",
            session = %report.session_id,
            state = report.final_state,
            latency_ms = report.elapsed_ms,
            "Prompt query finished"
        );
    }

    output.flush().await?;
    Ok(())
}

async fn write_event<W>(output: &mut W, event: &SinkEvent) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    match event {
        SinkEvent::Frame(frame) => {
            if let Some(delta) = narration_delta(frame) {
                output.write_all(delta.as_bytes()).await?;
            }
        }
        SinkEvent::Text(text) => {
            output.write_all(text.as_bytes()).await?;
            output.write_all(b"\n").await?;
        }
        SinkEvent::ToolError { tool, message, .. } => {
            output
                .write_all(format!("[{tool} failed: {message}]\n").as_bytes())
                .await?;
        }
        SinkEvent::Error { code, message } => {
            output
                .write_all(format!("\nError ({code}): {message}\n").as_bytes())
                .await?;
        }
        SinkEvent::Done => {}
    }
    output.flush().await?;
    Ok(())
}

//! `colloquy chat`: one turn from the terminal.
//!
//! Streams through the same pipeline the HTTP endpoint uses, with a
//! [`TerminalSink`] in place of the SSE channel. Ctrl+C cancels the turn;
//! whatever arrived so far is still saved.

use anyhow::{Result, bail};
use console::style;
use tokio_util::sync::CancellationToken;

use colloquy_core::chat::pipeline::{FailureCause, StreamState};
use colloquy_types::chat::TurnRequest;

use crate::cli::sink::TerminalSink;
use crate::state::AppState;

pub async fn run_chat(
    state: &AppState,
    user: &str,
    turn: TurnRequest,
    json: bool,
) -> Result<()> {
    if !turn.stream {
        let reply = state.chat_service.run_turn(user, &turn).await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&reply)?);
        } else {
            println!("{}", reply.content);
        }
        return Ok(());
    }

    let streaming = state.chat_service.start_streaming_turn(user, &turn).await?;
    let message_id = streaming.message_id();

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let outcome = if json {
        // Deltas are not printed in JSON mode; the outcome is.
        let mut sink = TerminalSink::new(std::io::sink(), std::io::stderr());
        streaming.run(&mut sink, cancel).await
    } else {
        let mut sink = TerminalSink::stdio();
        streaming.run(&mut sink, cancel).await
    };
    ctrl_c.abort();

    if json {
        let summary = serde_json::json!({
            "conversation_id": turn.conversation_id,
            "message_id": outcome.message.as_ref().map(|m| m.id).unwrap_or(message_id),
            "content": outcome.content,
            "state": outcome.state.to_string(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    if let Some(err) = &outcome.persist_error {
        eprintln!(
            "  {} Reply was not saved: {err}",
            style("!").yellow().bold()
        );
    }

    match (outcome.state, outcome.failure) {
        (StreamState::Failed, Some(FailureCause::Backend(message))) => {
            bail!("model backend failed: {message}")
        }
        (StreamState::Cancelled, _) => {
            eprintln!("  {}", style("Cancelled.").dim());
            Ok(())
        }
        _ => Ok(()),
    }
}

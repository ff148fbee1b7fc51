//! `colloquy history`: print one page of a conversation.

use anyhow::Result;
use console::style;
use tracing::debug;
use uuid::Uuid;

use colloquy_types::chat::ChatMessage;
use colloquy_types::llm::MessageRole;

use crate::state::AppState;

fn role_label(message: &ChatMessage) -> String {
    match message.role {
        MessageRole::User => style("you").green().bold().to_string(),
        MessageRole::Assistant => style("assistant").cyan().bold().to_string(),
        MessageRole::System => style("system").dim().to_string(),
    }
}

pub async fn show_history(
    state: &AppState,
    conversation_id: &str,
    limit: Option<u32>,
    before: Option<&str>,
    json: bool,
) -> Result<()> {
    let cursor = match before.map(str::parse::<Uuid>) {
        Some(Ok(id)) => Some(id),
        Some(Err(e)) => {
            debug!(error = %e, "Ignoring malformed --before cursor");
            None
        }
        None => None,
    };

    let page = state
        .chat_service
        .list_history(conversation_id, limit, cursor)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&page)?);
        return Ok(());
    }

    if page.messages.is_empty() {
        println!();
        println!(
            "  {} No messages in '{}'. Start with: {}",
            style("i").blue().bold(),
            style(conversation_id).cyan(),
            style(format!("colloquy chat {conversation_id} \"hello\"")).yellow()
        );
        println!();
        return Ok(());
    }

    println!();
    for message in &page.messages {
        println!(
            "  {} {}",
            role_label(message),
            style(message.created_at.format("%Y-%m-%d %H:%M:%S")).dim()
        );
        for line in message.content.lines() {
            println!("    {line}");
        }
        println!();
    }

    if page.has_more {
        if let Some(oldest) = page.messages.first() {
            println!(
                "  {} {}",
                style("Older messages:").dim(),
                style(format!("colloquy history {conversation_id} --before {}", oldest.id)).yellow()
            );
            println!();
        }
    }

    Ok(())
}

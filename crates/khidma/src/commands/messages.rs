//! `khidma messages` -- conversations and direct messages.

use tabled::Tabled;

use khidma_core::{EntityId, Marketplace, aggregate_conversations};

use crate::cli::{GlobalOpts, MessagesArgs, MessagesCommand};
use crate::error::CliError;
use crate::output::{print_output, render_list};

#[derive(Tabled)]
struct ConversationRow {
    #[tabled(rename = "WITH")]
    counterparty: String,
    #[tabled(rename = "UNREAD")]
    unread: u64,
    #[tabled(rename = "LAST MESSAGE")]
    last: String,
    #[tabled(rename = "AT")]
    at: String,
}

#[derive(Tabled)]
struct MessageRow {
    #[tabled(rename = "FROM")]
    from: String,
    #[tabled(rename = "MESSAGE")]
    content: String,
    #[tabled(rename = "AT")]
    at: String,
}

/// Clip a preview to a single table-friendly line.
fn preview(content: &str) -> String {
    const MAX: usize = 48;
    let flat = content.replace('\n', " ");
    if flat.chars().count() > MAX {
        let clipped: String = flat.chars().take(MAX).collect();
        format!("{clipped}...")
    } else {
        flat
    }
}

pub async fn handle(
    args: MessagesArgs,
    marketplace: &Marketplace,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    marketplace.connect().await.map_err(CliError::from)?;

    let outcome = run(args, marketplace, global).await;

    marketplace.disconnect().await;
    outcome
}

async fn run(
    args: MessagesArgs,
    marketplace: &Marketplace,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match args.command {
        MessagesCommand::List => {
            let identity = marketplace.identity().await.map_err(CliError::from)?;
            let messages = marketplace
                .list_my_messages()
                .await
                .map_err(CliError::from)?;

            let viewer = EntityId::from(identity.id);
            let conversations = aggregate_conversations(&viewer, &messages);

            // Conversations aren't serde types; project them first.
            let projected: Vec<serde_json::Value> = conversations
                .iter()
                .map(|c| {
                    serde_json::json!({
                        "counterparty_id": c.counterparty_id.to_string(),
                        "unread": c.unread,
                        "last_message": c.last_message.content,
                        "last_at": c.last_message.created_at.to_rfc3339(),
                    })
                })
                .collect();

            let rendered = render_list(
                &global.output,
                &projected,
                |v| ConversationRow {
                    counterparty: v["counterparty_id"].as_str().unwrap_or_default().to_owned(),
                    unread: v["unread"].as_u64().unwrap_or(0),
                    last: preview(v["last_message"].as_str().unwrap_or_default()),
                    at: v["last_at"].as_str().unwrap_or_default().to_owned(),
                },
                |v| v["counterparty_id"].as_str().unwrap_or_default().to_owned(),
            );
            print_output(&rendered, global.quiet);
            Ok(())
        }

        MessagesCommand::Show { user_id } => {
            let identity = marketplace.identity().await.map_err(CliError::from)?;
            let messages = marketplace
                .list_my_messages()
                .await
                .map_err(CliError::from)?;

            let counterparty = EntityId::from(user_id.as_str());
            let me = EntityId::from(identity.id);

            let thread: Vec<_> = messages
                .into_iter()
                .filter(|m| {
                    (m.sender_id == counterparty && m.receiver_id == me)
                        || (m.sender_id == me && m.receiver_id == counterparty)
                })
                .collect();

            let rendered = render_list(
                &global.output,
                &thread,
                |m| MessageRow {
                    from: if m.sender_id == me {
                        "me".into()
                    } else {
                        m.sender_id.to_string()
                    },
                    content: preview(&m.content),
                    at: m.created_at.to_rfc3339(),
                },
                |m| m.id.to_string(),
            );
            print_output(&rendered, global.quiet);
            Ok(())
        }

        MessagesCommand::Send { to, content } => {
            let message = marketplace
                .send_message(&to, &content)
                .await
                .map_err(CliError::from)?;
            print_output(&format!("sent {}", message.id), global.quiet);
            Ok(())
        }
    }
}

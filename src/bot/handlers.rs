//! Telegram dispatch schema and endpoints.
//!
//! Endpoints are thin: extract the user and text, call the engine, deliver
//! the replies. Engine failures are logged and turned into a generic error
//! message so the dispatcher never dies on a handler error.

use crate::bot::views;
use crate::engine::ConversationEngine;
use crate::error::BotResult;
use crate::reply::Reply;
use std::sync::Arc;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, ChatId};
use teloxide::utils::command::BotCommands;
use tracing::error;

/// Supported slash commands.
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    /// Register (or greet) and show the main menu
    #[command(description = "register and show the main menu")]
    Start,
    /// Resolve a pending WhatsApp QR login
    #[command(description = "confirm a pending WhatsApp login")]
    Confirm,
    /// Abandon the current dialog
    #[command(description = "cancel the current operation")]
    Cancel,
    /// Show the command list
    #[command(description = "show this help")]
    Help,
}

/// The update dispatch tree: callbacks, commands, then free text.
#[must_use]
pub fn schema() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handle_callback))
        .branch(
            Update::filter_message()
                .branch(
                    dptree::entry()
                        .filter_command::<Command>()
                        .endpoint(handle_command),
                )
                .branch(
                    dptree::filter(|msg: Message| msg.text().is_some()).endpoint(handle_text),
                ),
        )
}

/// User ID of the message sender, `0` for channel posts without one.
#[must_use]
pub fn get_user_id_safe(msg: &Message) -> i64 {
    msg.from.as_ref().map_or(0, |u| u.id.0.cast_signed())
}

fn get_user_name(msg: &Message) -> String {
    msg.from
        .as_ref()
        .map_or_else(|| "Unknown".to_string(), |u| u.first_name.clone())
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    engine: Arc<ConversationEngine>,
) -> Result<(), teloxide::RequestError> {
    let user_id = get_user_id_safe(&msg);
    let username = get_user_name(&msg);

    let outcome = match cmd {
        Command::Start => engine.handle_start(user_id, &username).await,
        Command::Confirm => engine.handle_confirm(user_id).await,
        Command::Cancel => engine.handle_cancel(user_id).await,
        Command::Help => Ok(vec![Reply::text(Command::descriptions().to_string())]),
    };
    deliver_outcome(&bot, msg.chat.id, user_id, outcome).await
}

async fn handle_text(
    bot: Bot,
    msg: Message,
    engine: Arc<ConversationEngine>,
) -> Result<(), teloxide::RequestError> {
    let Some(body) = msg.text() else {
        return respond(());
    };
    let user_id = get_user_id_safe(&msg);
    let username = get_user_name(&msg);

    let outcome = engine.handle_text(user_id, &username, body).await;
    deliver_outcome(&bot, msg.chat.id, user_id, outcome).await
}

async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    engine: Arc<ConversationEngine>,
) -> Result<(), teloxide::RequestError> {
    bot.answer_callback_query(q.id.clone()).await?;

    let Some(chat_id) = q.message.as_ref().map(|msg| msg.chat().id) else {
        return respond(());
    };
    let Some(data) = q.data.as_deref() else {
        return respond(());
    };
    let user_id = q.from.id.0.cast_signed();

    let outcome = engine.handle_callback(user_id, data).await;
    deliver_outcome(&bot, chat_id, user_id, outcome).await
}

async fn deliver_outcome(
    bot: &Bot,
    chat_id: ChatId,
    user_id: i64,
    outcome: BotResult<Vec<Reply>>,
) -> Result<(), teloxide::RequestError> {
    match outcome {
        Ok(replies) => views::deliver(bot, chat_id, &replies).await?,
        Err(e) => {
            error!(user_id, error = %e, "handler failed");
            bot.send_message(chat_id, "⚠️ Something went wrong. Please try again.")
                .await?;
        }
    }
    respond(())
}

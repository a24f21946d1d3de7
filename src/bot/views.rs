//! Rendering of transport-agnostic replies into Telegram messages.
//!
//! Keyboards are built here and nowhere else, so the engine never touches
//! teloxide types.

use crate::reply::{labels, Markup, Reply};
use teloxide::prelude::*;
use teloxide::types::{
    ChatId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, KeyboardButton, KeyboardMarkup,
    ReplyMarkup,
};
use tracing::warn;

/// The persistent main-menu keyboard. Admins get two extra rows.
#[must_use]
pub fn main_menu(admin: bool) -> KeyboardMarkup {
    let mut rows = vec![
        vec![
            KeyboardButton::new(labels::LOGIN),
            KeyboardButton::new(labels::ACCOUNT),
        ],
        vec![
            KeyboardButton::new(labels::WITHDRAW),
            KeyboardButton::new(labels::REFERRAL),
        ],
        vec![KeyboardButton::new(labels::SESSIONS)],
    ];
    if admin {
        rows.push(vec![
            KeyboardButton::new(labels::ADMIN_USERS),
            KeyboardButton::new(labels::ADMIN_WITHDRAWALS),
        ]);
        rows.push(vec![
            KeyboardButton::new(labels::ADMIN_SESSIONS),
            KeyboardButton::new(labels::ADMIN_BROADCAST),
        ]);
    }
    KeyboardMarkup::new(rows).resize_keyboard()
}

fn inline(rows: Vec<Vec<(String, crate::admin::CallbackKey)>>) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(rows.into_iter().map(|row| {
        row.into_iter()
            .map(|(label, key)| InlineKeyboardButton::callback(label, key.encode()))
            .collect::<Vec<_>>()
    }))
}

fn render_markup(markup: Markup) -> ReplyMarkup {
    match markup {
        Markup::MainMenu { admin } => ReplyMarkup::Keyboard(main_menu(admin)),
        Markup::Inline(rows) => ReplyMarkup::InlineKeyboard(inline(rows)),
    }
}

/// Send every reply to the chat, in order.
///
/// # Errors
///
/// Returns an error if Telegram rejects a send.
pub async fn deliver(
    bot: &Bot,
    chat_id: ChatId,
    replies: &[Reply],
) -> Result<(), teloxide::RequestError> {
    for reply in replies {
        send_one(bot, chat_id, reply).await?;
    }
    Ok(())
}

async fn send_one(bot: &Bot, chat_id: ChatId, reply: &Reply) -> Result<(), teloxide::RequestError> {
    let markup = reply.markup.clone().map(render_markup);

    if let Some(raw) = &reply.photo_url {
        match url::Url::parse(raw) {
            Ok(parsed) => {
                let mut request = bot
                    .send_photo(chat_id, InputFile::url(parsed))
                    .caption(reply.text.clone());
                if let Some(markup) = markup {
                    request = request.reply_markup(markup);
                }
                request.await?;
                return Ok(());
            }
            Err(e) => {
                warn!(url = %raw, error = %e, "unparseable photo url, sending as text");
                let mut request =
                    bot.send_message(chat_id, format!("{}\n{raw}", reply.text));
                if let Some(markup) = markup {
                    request = request.reply_markup(markup);
                }
                request.await?;
                return Ok(());
            }
        }
    }

    let mut request = bot.send_message(chat_id, reply.text.clone());
    if let Some(markup) = markup {
        request = request.reply_markup(markup);
    }
    request.await?;
    Ok(())
}

//! Thin typed wrappers over common Bot API methods.
//!
//! Every helper builds the parameter object and queues the call on the
//! bot's call pool, handing back the task handle. Handles can be awaited
//! for the raw API payload or dropped for fire-and-forget sends; the call
//! runs either way.
//!
//! # Example
//!
//! ```rust,ignore
//! use courier::api;
//!
//! // Fire and forget
//! api::send_message(&bot, chat_id, "on my way");
//!
//! // Wait for the sent message payload
//! let sent = api::send_message(&bot, chat_id, "ping").wait().await?;
//! let message_id = sent.i64_at("message_id");
//! ```

use serde_json::{Value, json};

use courier_core::{ApiError, InputFile, PayloadExt, TaskHandle, TaskResult};
use courier_runtime::Bot;

/// `getMe`: the bot's own account payload.
pub fn get_me(bot: &Bot) -> TaskHandle<Value> {
    bot.call("getMe", json!({}))
}

/// `sendMessage` to a chat.
pub fn send_message(bot: &Bot, chat_id: i64, text: impl Into<String>) -> TaskHandle<Value> {
    bot.call(
        "sendMessage",
        json!({"chat_id": chat_id, "text": text.into()}),
    )
}

/// `sendMessage` replying to the message in `message`.
///
/// `message` is a message payload as handlers receive it; chat and message
/// id are taken from it.
pub fn reply_to(bot: &Bot, message: &Value, text: impl Into<String>) -> TaskHandle<Value> {
    bot.call(
        "sendMessage",
        json!({
            "chat_id": message.i64_at("chat.id"),
            "text": text.into(),
            "reply_parameters": {"message_id": message.i64_at("message_id")},
        }),
    )
}

/// `sendChatAction`, e.g. `"typing"` or `"upload_photo"`.
pub fn send_chat_action(bot: &Bot, chat_id: i64, action: &str) -> TaskHandle<Value> {
    bot.call(
        "sendChatAction",
        json!({"chat_id": chat_id, "action": action}),
    )
}

/// `sendPhoto` with an optional caption.
pub fn send_photo(
    bot: &Bot,
    chat_id: i64,
    photo: InputFile,
    caption: Option<String>,
) -> TaskHandle<Value> {
    send_media(bot, "sendPhoto", "photo", chat_id, photo, caption)
}

/// `sendDocument` with an optional caption.
pub fn send_document(
    bot: &Bot,
    chat_id: i64,
    document: InputFile,
    caption: Option<String>,
) -> TaskHandle<Value> {
    send_media(bot, "sendDocument", "document", chat_id, document, caption)
}

fn send_media(
    bot: &Bot,
    method: &str,
    field: &str,
    chat_id: i64,
    file: InputFile,
    caption: Option<String>,
) -> TaskHandle<Value> {
    let params = json!({"chat_id": chat_id, "caption": caption});
    bot.call_with_files(method, params, vec![(field.to_string(), file)])
}

/// `copyMessage`: re-sends a message without the forward header.
pub fn copy_message(
    bot: &Bot,
    chat_id: i64,
    from_chat_id: i64,
    message_id: i64,
) -> TaskHandle<Value> {
    bot.call(
        "copyMessage",
        json!({
            "chat_id": chat_id,
            "from_chat_id": from_chat_id,
            "message_id": message_id,
        }),
    )
}

/// `deleteMessage`.
pub fn delete_message(bot: &Bot, chat_id: i64, message_id: i64) -> TaskHandle<Value> {
    bot.call(
        "deleteMessage",
        json!({"chat_id": chat_id, "message_id": message_id}),
    )
}

/// `answerCallbackQuery`, with an optional toast text.
pub fn answer_callback_query(
    bot: &Bot,
    callback_query_id: &str,
    text: Option<String>,
) -> TaskHandle<Value> {
    bot.call(
        "answerCallbackQuery",
        json!({"callback_query_id": callback_query_id, "text": text}),
    )
}

/// `setMyCommands` from `(command, description)` pairs.
pub fn set_my_commands(bot: &Bot, commands: &[(&str, &str)]) -> TaskHandle<Value> {
    let commands: Vec<Value> = commands
        .iter()
        .map(|(command, description)| {
            json!({"command": command, "description": description})
        })
        .collect();
    bot.call("setMyCommands", json!({"commands": commands}))
}

/// `getFile`: resolves a file id to a downloadable file payload.
pub fn get_file(bot: &Bot, file_id: &str) -> TaskHandle<Value> {
    bot.call("getFile", json!({"file_id": file_id}))
}

/// Resolves `file_id` via `getFile` and downloads its content.
pub async fn download_file(bot: &Bot, file_id: &str) -> TaskResult<Vec<u8>> {
    let file = get_file(bot, file_id).wait().await?;
    let path = file.str_at("file_path").ok_or_else(|| {
        ApiError::Serialization("getFile response carries no file_path".to_string())
    })?;
    Ok(bot.download(path).await?)
}

//! Payload-shape filter builders.
//!
//! Every builder returns a [`Filter`] over the event payload, i.e. the
//! object classified out of the update envelope (a message, a callback
//! query, ...). Paths like `chat.id` are therefore relative to that object,
//! not to the envelope.

use regex::Regex;
use serde_json::Value;
use tracing::warn;

use super::Filter;
use crate::update::PayloadExt;

/// Matches when the payload carries at least one of `keys` at top level.
pub fn any_keys<I, S>(keys: I) -> Filter
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
    let name = format!("any_keys({})", keys.join(", "));
    Filter::new(name, move |payload: &Value| {
        payload
            .as_object()
            .is_some_and(|map| keys.iter().any(|key| map.contains_key(key)))
    })
}

/// Matches when the payload carries every one of `keys` at top level.
pub fn all_keys<I, S>(keys: I) -> Filter
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
    let name = format!("all_keys({})", keys.join(", "));
    Filter::new(name, move |payload: &Value| {
        payload
            .as_object()
            .is_some_and(|map| keys.iter().all(|key| map.contains_key(key)))
    })
}

/// Matches when `keys` form a chain of nested objects in the payload.
///
/// `sub_keys(["reply_to_message", "photo"])` matches a reply to a photo.
pub fn sub_keys<I, S>(keys: I) -> Filter
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
    let name = format!("sub_keys({})", keys.join(" > "));
    Filter::new(name, move |payload: &Value| {
        let mut current = payload;
        for key in &keys {
            match current.as_object().and_then(|map| map.get(key)) {
                Some(next) => current = next,
                None => return false,
            }
        }
        true
    })
}

/// Matches when any of `patterns` is found anywhere in the payload's `text`.
pub fn regex_match<I, S>(patterns: I) -> Filter
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    field_regex(
        "text",
        "regex_match",
        patterns.into_iter().map(Into::into).collect(),
    )
}

/// Matches when any of `patterns` is found anywhere in the payload's `caption`.
pub fn caption_regex_match<I, S>(patterns: I) -> Filter
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    field_regex(
        "caption",
        "caption_regex_match",
        patterns.into_iter().map(Into::into).collect(),
    )
}

/// Matches bot commands in the payload's `text` with a `/` prefix.
///
/// The command name may be passed with or without the prefix. Matching uses
/// a word boundary: `/test 123` and `hey /test` match `commands(["test"])`,
/// `/test123` does not.
pub fn commands<I, S>(cmds: I) -> Filter
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    commands_in_field(cmds, "/", "text")
}

/// Like [`commands`] with a custom prefix, e.g. `!` for legacy bots.
pub fn commands_with_prefix<I, S>(cmds: I, prefix: &str) -> Filter
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    commands_in_field(cmds, prefix, "text")
}

/// Matches bot commands in the payload's `caption` with a `/` prefix.
pub fn caption_commands<I, S>(cmds: I) -> Filter
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    commands_in_field(cmds, "/", "caption")
}

/// Matches when the payload's `text` starts with any of `prefixes`.
pub fn text_startswith<I, S>(prefixes: I) -> Filter
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let prefixes: Vec<String> = prefixes.into_iter().map(Into::into).collect();
    let name = format!("text_startswith({})", prefixes.join(", "));
    Filter::new(name, move |payload: &Value| {
        payload.str_at("text").is_some_and(|text| {
            prefixes.iter().any(|prefix| text.starts_with(prefix.as_str()))
        })
    })
}

/// Matches messages from any of the given chats.
pub fn chat_ids(ids: impl IntoIterator<Item = i64>) -> Filter {
    let ids: Vec<i64> = ids.into_iter().collect();
    let name = format!("chat_ids({})", join_ids(&ids));
    Filter::new(name, move |payload: &Value| {
        payload.i64_at("chat.id").is_some_and(|id| ids.contains(&id))
    })
}

/// Matches messages in any of the given chat types (`private`, `group`,
/// `supergroup`, `channel`).
pub fn chat_types<I, S>(types: I) -> Filter
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let types: Vec<String> = types.into_iter().map(Into::into).collect();
    let name = format!("chat_types({})", types.join(", "));
    Filter::new(name, move |payload: &Value| {
        payload
            .str_at("chat.type")
            .is_some_and(|ty| types.iter().any(|want| want == ty))
    })
}

/// Matches events originated by any of the given users.
pub fn from_users(ids: impl IntoIterator<Item = i64>) -> Filter {
    let ids: Vec<i64> = ids.into_iter().collect();
    let name = format!("from_users({})", join_ids(&ids));
    Filter::new(name, move |payload: &Value| {
        payload.i64_at("from.id").is_some_and(|id| ids.contains(&id))
    })
}

/// Matches callback queries whose `data` equals any of `values`.
pub fn callback_data<I, S>(values: I) -> Filter
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let values: Vec<String> = values.into_iter().map(Into::into).collect();
    let name = format!("callback_data({})", values.join(", "));
    Filter::new(name, move |payload: &Value| {
        payload
            .str_at("data")
            .is_some_and(|data| values.iter().any(|want| want == data))
    })
}

/// Matches callback queries whose `data` starts with any of `prefixes`.
pub fn callback_data_startswith<I, S>(prefixes: I) -> Filter
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let prefixes: Vec<String> = prefixes.into_iter().map(Into::into).collect();
    let name = format!("callback_data_startswith({})", prefixes.join(", "));
    Filter::new(name, move |payload: &Value| {
        payload.str_at("data").is_some_and(|data| {
            prefixes.iter().any(|prefix| data.starts_with(prefix.as_str()))
        })
    })
}

// ============================================================================
// Helpers
// ============================================================================

fn commands_in_field<I, S>(cmds: I, prefix: &str, field: &'static str) -> Filter
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let normalized: Vec<String> = cmds
        .into_iter()
        .map(|cmd| {
            let cmd = cmd.into();
            format!("{}{}", prefix, cmd.trim_start_matches(prefix))
        })
        .collect();
    let pattern: Vec<String> = normalized
        .iter()
        .map(|cmd| format!(r"{}\b", regex::escape(cmd)))
        .collect();
    field_regex_named(
        field,
        format!("commands({})", normalized.join(", ")),
        pattern,
    )
}

fn field_regex(field: &'static str, op: &str, patterns: Vec<String>) -> Filter {
    let name = format!("{}({})", op, patterns.join(", "));
    field_regex_named(field, name, patterns)
}

/// Joins `patterns` into one alternation and search-matches it against a
/// top-level string field. A pattern that fails to compile yields a filter
/// that never matches, with a warning at build time.
fn field_regex_named(field: &'static str, name: String, patterns: Vec<String>) -> Filter {
    match Regex::new(&patterns.join("|")) {
        Ok(re) => Filter::new(name, move |payload: &Value| {
            payload.str_at(field).is_some_and(|text| re.is_match(text))
        }),
        Err(err) => {
            warn!(
                filter = %name,
                error = %err,
                "invalid pattern, filter will never match"
            );
            Filter::new(name, |_| false)
        }
    }
}

fn join_ids(ids: &[i64]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn key_presence_builders() {
        let photo_msg = json!({"photo": [{"file_id": "abc"}], "caption": "look"});
        assert!(any_keys(["text", "photo"]).check(&photo_msg).await);
        assert!(!any_keys(["text", "video"]).check(&photo_msg).await);
        assert!(all_keys(["photo", "caption"]).check(&photo_msg).await);
        assert!(!all_keys(["photo", "text"]).check(&photo_msg).await);
    }

    #[tokio::test]
    async fn sub_keys_walks_nested_objects() {
        let reply = json!({"reply_to_message": {"photo": [{"file_id": "abc"}]}});
        assert!(sub_keys(["reply_to_message", "photo"]).check(&reply).await);
        assert!(!sub_keys(["reply_to_message", "video"]).check(&reply).await);
        assert!(!sub_keys(["forward_from", "id"]).check(&reply).await);
    }

    #[tokio::test]
    async fn commands_match_on_word_boundaries() {
        let filter = commands(["test"]);
        assert!(filter.check(&json!({"text": "/test"})).await);
        assert!(filter.check(&json!({"text": "/test 123"})).await);
        assert!(filter.check(&json!({"text": "hey /test"})).await);
        assert!(!filter.check(&json!({"text": "/test123"})).await);
        assert!(!filter.check(&json!({"text": "test"})).await);
    }

    #[tokio::test]
    async fn commands_accept_prefixed_and_bare_names() {
        let filter = commands(["/start", "help"]);
        assert_eq!(filter.name(), "commands(/start, /help)");
        assert!(filter.check(&json!({"text": "/help me"})).await);
        assert!(filter.check(&json!({"text": "/start"})).await);
    }

    #[tokio::test]
    async fn custom_prefix_commands() {
        let filter = commands_with_prefix(["ping"], "!");
        assert!(filter.check(&json!({"text": "!ping"})).await);
        assert!(!filter.check(&json!({"text": "/ping"})).await);
    }

    #[tokio::test]
    async fn regex_match_searches_anywhere() {
        let filter = regex_match([r"\d{4}"]);
        assert!(filter.check(&json!({"text": "year 2024 was wild"})).await);
        assert!(!filter.check(&json!({"text": "no digits"})).await);
        assert!(!filter.check(&json!({"photo": []})).await);
    }

    #[tokio::test]
    async fn invalid_pattern_never_matches() {
        let filter = regex_match(["(unclosed"]);
        assert!(!filter.check(&json!({"text": "(unclosed"})).await);
    }

    #[tokio::test]
    async fn chat_and_user_scoping() {
        let payload = json!({
            "chat": {"id": -100123, "type": "supergroup"},
            "from": {"id": 42},
            "text": "hi"
        });
        assert!(chat_ids([-100123]).check(&payload).await);
        assert!(!chat_ids([7]).check(&payload).await);
        assert!(chat_types(["supergroup", "group"]).check(&payload).await);
        assert!(!chat_types(["private"]).check(&payload).await);
        assert!(from_users([42]).check(&payload).await);
        assert!(!from_users([43]).check(&payload).await);
    }

    #[tokio::test]
    async fn callback_data_builders() {
        let query = json!({"id": "q1", "data": "menu:settings"});
        assert!(callback_data(["menu:settings"]).check(&query).await);
        assert!(!callback_data(["menu:home"]).check(&query).await);
        assert!(callback_data_startswith(["menu:"]).check(&query).await);
        assert!(!callback_data_startswith(["game:"]).check(&query).await);
    }

    #[tokio::test]
    async fn text_startswith_checks_prefixes() {
        let payload = json!({"text": "hello world"});
        assert!(text_startswith(["hello", "hi"]).check(&payload).await);
        assert!(!text_startswith(["world"]).check(&payload).await);
    }
}

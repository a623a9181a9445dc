//! Update model and event classification.
//!
//! This module provides:
//!
//! - [`Update`] - one inbound update: an id plus an opaque payload object
//! - [`EventType`] - the closed classification of update kinds
//! - [`PayloadExt`] - dotted-path lookups over payload values
//!
//! # Classification
//!
//! An update object carries exactly one payload key next to `update_id`
//! ("message", "callback_query", ...). Classification inspects the keys and
//! maps the first recognized one to an [`EventType`]; anything else is
//! [`EventType::Unknown`] and quietly dropped by the dispatcher. The payload
//! itself stays an opaque [`serde_json::Value`]; handlers and filters work
//! on its shape directly instead of a typed mirror of the wire schema.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FilterError;

// ============================================================================
// Event Type Classification
// ============================================================================

/// Classification of update kinds, mirroring the wire-level payload keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    /// New incoming message of any kind.
    Message,
    /// New version of a message that is known to the bot and was edited.
    EditedMessage,
    /// New incoming channel post of any kind.
    ChannelPost,
    /// New version of a channel post that is known to the bot and was edited.
    EditedChannelPost,
    /// The bot was connected to or disconnected from a business account.
    BusinessConnection,
    /// New message from a connected business account.
    BusinessMessage,
    /// New version of a message from a connected business account.
    EditedBusinessMessage,
    /// Messages were deleted from a connected business account.
    DeletedBusinessMessages,
    /// A reaction to a message was changed by a user.
    MessageReaction,
    /// Reactions to a message with anonymous reactions were changed.
    MessageReactionCount,
    /// New incoming inline query.
    InlineQuery,
    /// The result of an inline query that was chosen by a user.
    ChosenInlineResult,
    /// New incoming callback query.
    CallbackQuery,
    /// New incoming shipping query.
    ShippingQuery,
    /// New incoming pre-checkout query.
    PreCheckoutQuery,
    /// A user purchased paid media sent by the bot.
    PurchasedPaidMedia,
    /// New poll state.
    Poll,
    /// A user changed their answer in a non-anonymous poll.
    PollAnswer,
    /// The bot's chat member status was updated in a chat.
    MyChatMember,
    /// A chat member's status was updated in a chat.
    ChatMember,
    /// A request to join the chat has been sent.
    ChatJoinRequest,
    /// A chat boost was added or changed.
    ChatBoost,
    /// A boost was removed from a chat.
    RemovedChatBoost,
    /// Unrecognized payload shape; dropped by the dispatcher.
    Unknown,
}

impl EventType {
    /// Every known event type, in wire order. Excludes [`EventType::Unknown`].
    pub const ALL: [EventType; 23] = [
        EventType::Message,
        EventType::EditedMessage,
        EventType::ChannelPost,
        EventType::EditedChannelPost,
        EventType::BusinessConnection,
        EventType::BusinessMessage,
        EventType::EditedBusinessMessage,
        EventType::DeletedBusinessMessages,
        EventType::MessageReaction,
        EventType::MessageReactionCount,
        EventType::InlineQuery,
        EventType::ChosenInlineResult,
        EventType::CallbackQuery,
        EventType::ShippingQuery,
        EventType::PreCheckoutQuery,
        EventType::PurchasedPaidMedia,
        EventType::Poll,
        EventType::PollAnswer,
        EventType::MyChatMember,
        EventType::ChatMember,
        EventType::ChatJoinRequest,
        EventType::ChatBoost,
        EventType::RemovedChatBoost,
    ];

    /// Returns the wire-level payload key for this event type.
    pub fn as_key(&self) -> &'static str {
        match self {
            EventType::Message => "message",
            EventType::EditedMessage => "edited_message",
            EventType::ChannelPost => "channel_post",
            EventType::EditedChannelPost => "edited_channel_post",
            EventType::BusinessConnection => "business_connection",
            EventType::BusinessMessage => "business_message",
            EventType::EditedBusinessMessage => "edited_business_message",
            EventType::DeletedBusinessMessages => "deleted_business_messages",
            EventType::MessageReaction => "message_reaction",
            EventType::MessageReactionCount => "message_reaction_count",
            EventType::InlineQuery => "inline_query",
            EventType::ChosenInlineResult => "chosen_inline_result",
            EventType::CallbackQuery => "callback_query",
            EventType::ShippingQuery => "shipping_query",
            EventType::PreCheckoutQuery => "pre_checkout_query",
            EventType::PurchasedPaidMedia => "purchased_paid_media",
            EventType::Poll => "poll",
            EventType::PollAnswer => "poll_answer",
            EventType::MyChatMember => "my_chat_member",
            EventType::ChatMember => "chat_member",
            EventType::ChatJoinRequest => "chat_join_request",
            EventType::ChatBoost => "chat_boost",
            EventType::RemovedChatBoost => "removed_chat_boost",
            EventType::Unknown => "unknown",
        }
    }

    /// Maps a wire-level payload key to its event type.
    pub fn from_key(key: &str) -> Option<EventType> {
        EventType::ALL.iter().copied().find(|e| e.as_key() == key)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_key())
    }
}

impl FromStr for EventType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(EventType::from_key(s).unwrap_or(EventType::Unknown))
    }
}

// ============================================================================
// Update
// ============================================================================

/// One inbound update from the API.
///
/// The payload keys other than `update_id` are kept as an opaque JSON map.
/// An update is immutable once received; the dispatcher hands each handler
/// an owned copy of the payload so no handler can leak mutations to another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Update {
    /// Monotonically increasing update identifier.
    pub update_id: i64,

    /// The remaining top-level keys of the update object.
    #[serde(flatten)]
    fields: serde_json::Map<String, Value>,
}

impl Update {
    /// Builds an update from its id and payload object, mostly for tests
    /// and scripted transports.
    pub fn new(update_id: i64, kind: EventType, payload: Value) -> Self {
        let mut fields = serde_json::Map::new();
        fields.insert(kind.as_key().to_owned(), payload);
        Self { update_id, fields }
    }

    /// The update identifier.
    pub fn id(&self) -> i64 {
        self.update_id
    }

    /// Classifies this update by its payload key.
    ///
    /// Pure and total: an update whose keys are all unrecognized classifies
    /// as [`EventType::Unknown`].
    pub fn kind(&self) -> EventType {
        self.fields
            .keys()
            .find_map(|k| EventType::from_key(k))
            .unwrap_or(EventType::Unknown)
    }

    /// Borrows the payload object stored under the classified key.
    pub fn payload(&self) -> Option<&Value> {
        self.fields.get(self.kind().as_key())
    }

    /// Consumes the update, returning the owned payload object.
    pub fn into_payload(mut self) -> Option<Value> {
        let key = self.kind().as_key();
        self.fields.remove(key)
    }
}

// ============================================================================
// Payload Lookups
// ============================================================================

/// Dotted-path lookups over payload values.
///
/// Paths are dot-separated key sequences; a numeric segment indexes into an
/// array (`"photo.0.file_id"`). Lookups are infallible and return `Option`;
/// [`PayloadExt::require`] is the fallible variant for predicates that
/// want `?`.
pub trait PayloadExt {
    /// Walks `path` and returns the value it points at, if present.
    fn at(&self, path: &str) -> Option<&Value>;

    /// Walks `path` and returns the string it points at.
    fn str_at(&self, path: &str) -> Option<&str> {
        self.at(path).and_then(Value::as_str)
    }

    /// Walks `path` and returns the integer it points at.
    fn i64_at(&self, path: &str) -> Option<i64> {
        self.at(path).and_then(Value::as_i64)
    }

    /// Walks `path` and returns the boolean it points at.
    fn bool_at(&self, path: &str) -> Option<bool> {
        self.at(path).and_then(Value::as_bool)
    }

    /// Like [`PayloadExt::at`], but missing paths become a
    /// [`FilterError::MissingKey`].
    fn require(&self, path: &str) -> Result<&Value, FilterError>;
}

impl PayloadExt for Value {
    fn at(&self, path: &str) -> Option<&Value> {
        let mut current = self;
        for segment in path.split('.') {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    fn require(&self, path: &str) -> Result<&Value, FilterError> {
        self.at(path)
            .ok_or_else(|| FilterError::MissingKey(path.to_owned()))
    }
}

//! Ready-made filters for the common message shapes.

use super::{any_keys, Filter};

/// Matches messages carrying a `text` field.
pub fn is_text() -> Filter {
    any_keys(["text"]).renamed("is_text")
}

/// Matches media messages carrying a `caption` field.
pub fn has_caption() -> Filter {
    any_keys(["caption"]).renamed("has_caption")
}

/// Matches messages carrying either `text` or `caption`.
pub fn contains_text() -> Filter {
    any_keys(["text", "caption"]).renamed("contains_text")
}

/// Matches photo messages.
pub fn is_photo() -> Filter {
    any_keys(["photo"]).renamed("is_photo")
}

/// Matches video messages.
pub fn is_video() -> Filter {
    any_keys(["video"]).renamed("is_video")
}

/// Matches document messages.
pub fn is_document() -> Filter {
    any_keys(["document"]).renamed("is_document")
}

/// Matches messages that reply to another message.
pub fn is_reply() -> Filter {
    any_keys(["reply_to_message"]).renamed("is_reply")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn presets_inspect_top_level_keys() {
        let text = json!({"text": "hi"});
        let photo = json!({"photo": [], "caption": "snap"});

        assert!(is_text().check(&text).await);
        assert!(!is_text().check(&photo).await);
        assert!(is_photo().check(&photo).await);
        assert!(has_caption().check(&photo).await);
        assert!(contains_text().check(&text).await);
        assert!(contains_text().check(&photo).await);
        assert!(!is_reply().check(&text).await);
    }
}

//! Multipart upload assembly.
//!
//! The Bot API takes file content through multipart form fields referenced
//! from the JSON parameters as `attach://<field>`. [`normalize_uploads`]
//! rewrites a call into that shape: local paths and in-memory buffers become
//! form parts, remote references (file ids, URLs) collapse into plain string
//! parameters, and string parameters that point at a readable local file are
//! promoted to uploads.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tracing::trace;

use courier_core::{ApiResult, InputFile, TransportError};

/// The parameter value that points a field at a multipart part.
pub fn attach_url(field: &str) -> String {
    format!("attach://{field}")
}

/// Fields of `method` that may carry file content.
///
/// Used to promote string parameters that name a local file. Methods not
/// listed here accept no uploads.
pub fn upload_fields(method: &str) -> &'static [&'static str] {
    match method {
        "sendPhoto" => &["photo"],
        "sendAudio" => &["audio", "thumbnail"],
        "sendDocument" => &["document", "thumbnail"],
        "sendVideo" => &["video", "thumbnail", "cover"],
        "sendAnimation" => &["animation", "thumbnail"],
        "sendVoice" => &["voice"],
        "sendVideoNote" => &["video_note", "thumbnail"],
        "sendSticker" => &["sticker"],
        "setWebhook" => &["certificate"],
        "setChatPhoto" => &["photo"],
        _ => &[],
    }
}

/// Rewrites a call into uploadable shape.
///
/// Every returned upload has a matching `attach://` parameter; remote
/// references are folded into the parameters and need no part. String
/// parameters in an upload field of `method` that name an existing local
/// file become [`InputFile::Path`] uploads.
pub async fn normalize_uploads(
    method: &str,
    mut params: Value,
    files: Vec<(String, InputFile)>,
) -> (Value, Vec<(String, InputFile)>) {
    let mut uploads = Vec::with_capacity(files.len());
    for (field, file) in files {
        match file {
            InputFile::Remote(reference) => {
                params[field.as_str()] = Value::String(reference);
            }
            file => {
                params[field.as_str()] = Value::String(attach_url(&field));
                uploads.push((field, file));
            }
        }
    }
    for &field in upload_fields(method) {
        if uploads.iter().any(|(name, _)| name == field) {
            continue;
        }
        let Some(candidate) = params.get(field).and_then(Value::as_str) else {
            continue;
        };
        if candidate.starts_with("attach://") {
            continue;
        }
        if tokio::fs::metadata(candidate).await.is_ok_and(|m| m.is_file()) {
            trace!(method, field, "promoting local path to upload");
            let path = candidate.into();
            params[field] = Value::String(attach_url(field));
            uploads.push((field.to_string(), InputFile::Path(path)));
        }
    }
    (params, uploads)
}

/// Builds the multipart form: one text part per parameter, one file part per
/// upload.
pub(crate) async fn build_form(
    params: &Value,
    files: &[(String, InputFile)],
) -> ApiResult<Form> {
    let mut form = Form::new();
    if let Some(map) = params.as_object() {
        for (key, value) in map {
            let text = match value {
                Value::Null => continue,
                Value::String(text) => text.clone(),
                other => serde_json::to_string(other)?,
            };
            form = form.text(key.clone(), text);
        }
    }
    for (field, file) in files {
        form = form.part(field.clone(), file_part(file).await?);
    }
    Ok(form)
}

async fn file_part(file: &InputFile) -> ApiResult<Part> {
    match file {
        InputFile::Path(path) => {
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|err| TransportError::Io(err.to_string()))?;
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(fallback_file_name);
            part_with_mime(bytes, file_name)
        }
        InputFile::Bytes { file_name, bytes } => part_with_mime(bytes.clone(), file_name.clone()),
        // Remote references never reach the form; send the reference text
        // if one slips through.
        InputFile::Remote(reference) => Ok(Part::text(reference.clone())),
    }
}

fn part_with_mime(bytes: Vec<u8>, file_name: String) -> ApiResult<Part> {
    let mime = mime_for(&file_name);
    Part::bytes(bytes)
        .file_name(file_name)
        .mime_str(mime)
        .map_err(|err| TransportError::Http(err.to_string()).into())
}

fn mime_for(file_name: &str) -> &'static str {
    let extension = Path::new(file_name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase());
    match extension.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        Some("mp3") => "audio/mpeg",
        Some("m4a") => "audio/mp4",
        Some("ogg" | "oga") => "audio/ogg",
        Some("wav") => "audio/wav",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("gz") => "application/gzip",
        Some("txt") => "text/plain",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

fn fallback_file_name() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.subsec_nanos())
        .unwrap_or(0);
    format!("upload-{nanos}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn attach_urls_name_their_field() {
        assert_eq!(attach_url("photo"), "attach://photo");
    }

    #[test]
    fn upload_fields_cover_the_media_methods() {
        assert_eq!(upload_fields("sendPhoto"), &["photo"]);
        assert_eq!(upload_fields("sendVideo"), &["video", "thumbnail", "cover"]);
        assert!(upload_fields("sendMessage").is_empty());
    }

    #[tokio::test]
    async fn local_uploads_are_rewritten_to_attach_urls() {
        let files = vec![(
            "photo".to_string(),
            InputFile::Bytes {
                file_name: "cat.png".to_string(),
                bytes: vec![1, 2, 3],
            },
        )];
        let (params, uploads) =
            normalize_uploads("sendPhoto", json!({"chat_id": 1}), files).await;
        assert_eq!(params["photo"], "attach://photo");
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].0, "photo");
    }

    #[tokio::test]
    async fn remote_references_become_plain_parameters() {
        let files = vec![(
            "photo".to_string(),
            InputFile::Remote("AgACAgIAAxkBAAIB".to_string()),
        )];
        let (params, uploads) =
            normalize_uploads("sendPhoto", json!({"chat_id": 1}), files).await;
        assert_eq!(params["photo"], "AgACAgIAAxkBAAIB");
        assert!(uploads.is_empty());
    }

    #[tokio::test]
    async fn string_parameters_naming_local_files_are_promoted() {
        let dir = std::env::temp_dir().join("courier-upload-test");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("report.pdf");
        tokio::fs::write(&path, b"%PDF-").await.unwrap();

        let params = json!({"chat_id": 1, "document": path.to_string_lossy()});
        let (params, uploads) = normalize_uploads("sendDocument", params, Vec::new()).await;
        assert_eq!(params["document"], "attach://document");
        assert_eq!(
            uploads,
            vec![("document".to_string(), InputFile::Path(path.clone()))]
        );

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn file_ids_in_string_parameters_pass_through() {
        let params = json!({"chat_id": 1, "photo": "AgACAgIAAxkBAAIB"});
        let (params, uploads) = normalize_uploads("sendPhoto", params, Vec::new()).await;
        assert_eq!(params["photo"], "AgACAgIAAxkBAAIB");
        assert!(uploads.is_empty());
    }

    #[test]
    fn mime_guesses_follow_the_extension() {
        assert_eq!(mime_for("cat.JPG"), "image/jpeg");
        assert_eq!(mime_for("clip.webm"), "video/webm");
        assert_eq!(mime_for("notes.txt"), "text/plain");
        assert_eq!(mime_for("mystery"), "application/octet-stream");
    }
}

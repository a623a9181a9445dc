//! The transport seam between the engine and the Bot API wire.
//!
//! The engine never talks HTTP directly; everything goes through the
//! [`Transport`] trait. The production implementation lives in
//! `courier-transport`; tests drive the engine with scripted transports.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ApiResult;
use crate::update::Update;

/// A file going out with an API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputFile {
    /// Read and upload a local file. The file name is taken from the path.
    Path(PathBuf),
    /// Upload an in-memory buffer under the given file name.
    Bytes { file_name: String, bytes: Vec<u8> },
    /// Not an upload at all: a `file_id` or an HTTP URL the API server
    /// fetches itself. Passed through as a plain string parameter.
    Remote(String),
}

impl InputFile {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    pub fn bytes(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self::Bytes {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn remote(value: impl Into<String>) -> Self {
        Self::Remote(value.into())
    }

    /// True when sending this value requires a multipart upload.
    pub fn is_upload(&self) -> bool {
        !matches!(self, Self::Remote(_))
    }
}

/// Wire access to the Bot API.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Calls `method` with JSON `params` and returns the `result` field of
    /// the response.
    async fn invoke(&self, method: &str, params: Value) -> ApiResult<Value>;

    /// Like [`Transport::invoke`], but ships `files` as a multipart form
    /// alongside the parameters.
    async fn invoke_with_files(
        &self,
        method: &str,
        params: Value,
        files: Vec<(String, InputFile)>,
    ) -> ApiResult<Value>;

    /// Long-polls for updates.
    ///
    /// `offset` is the first update id to return; `0` means "from the
    /// oldest available" and `-1` asks for the newest update only, which
    /// the polling loop uses to skip a backlog on start. `timeout_secs` is
    /// the server-side long-poll hold; `allowed` narrows the subscription
    /// to the given update keys (empty keeps the server default).
    async fn fetch_updates(
        &self,
        offset: i64,
        limit: Option<u32>,
        timeout_secs: u64,
        allowed: &[String],
    ) -> ApiResult<Vec<Update>>;

    /// Downloads a file previously located via `getFile`.
    async fn download(&self, file_path: &str) -> ApiResult<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_values_are_not_uploads() {
        assert!(InputFile::path("/tmp/cat.png").is_upload());
        assert!(InputFile::bytes("cat.png", vec![1, 2, 3]).is_upload());
        assert!(!InputFile::remote("AgACAgIAAxkBAc").is_upload());
    }
}

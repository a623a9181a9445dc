//! # Courier Transport
//!
//! HTTP transport for the Telegram Bot API:
//!
//! - [`HttpTransport`] - a retrying reqwest client implementing the
//!   [`Transport`](courier_core::Transport) trait
//! - token validation and redaction (the token never appears in logs or
//!   error text)
//! - multipart upload assembly with `attach://` references
//!
//! # Example
//!
//! ```rust,ignore
//! use courier_transport::HttpTransport;
//!
//! let transport = HttpTransport::new(std::env::var("BOT_TOKEN")?)?;
//! let me = transport.invoke("getMe", serde_json::json!({})).await?;
//! ```

pub mod client;
pub mod upload;

pub use client::{sanitize, HttpTransport};
pub use upload::{attach_url, upload_fields};

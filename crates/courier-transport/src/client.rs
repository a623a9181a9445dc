//! The retrying Bot API client.
//!
//! One [`HttpTransport`] wraps one bot token. Every call goes through the
//! same cycle: build the request, map the response status onto [`ApiError`],
//! and retry what is retryable. Two classes of errors retry:
//!
//! - rate limiting and transient server failures (429/500/502/504) wait for
//!   the server-suggested pause
//! - timeouts and socket errors back off exponentially (1s, 2s, 4s, ...)
//!   while growing the per-attempt request timeout
//!
//! Everything else surfaces immediately. The token never appears in logs or
//! error text; [`sanitize`] scrubs it out of URLs and response bodies.

use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{trace, warn};

use courier_core::{
    ApiError, ApiResult, InputFile, PayloadExt, Transport, TransportError, Update,
};

use crate::upload;

const DEFAULT_API_URL: &str = "https://api.telegram.org";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_TIMEOUT: Duration = Duration::from_secs(60);
const TIMEOUT_GROWTH: Duration = Duration::from_secs(10);
const DEFAULT_MAX_RETRIES: u32 = 5;

/// Pause before retrying a 5xx when the server did not suggest one.
const SERVER_ERROR_PAUSE_SECS: u64 = 20;
/// Pause before retrying a 429 whose body carried no `retry_after`.
const RATE_LIMIT_FALLBACK_PAUSE_SECS: u64 = 5;

// ============================================================================
// Token Handling
// ============================================================================

static TOKEN_SHAPE: OnceLock<Regex> = OnceLock::new();
static TOKEN_IN_TEXT: OnceLock<Regex> = OnceLock::new();

fn token_shape() -> &'static Regex {
    TOKEN_SHAPE.get_or_init(|| {
        Regex::new(r"^\d+:[A-Za-z0-9_-]+$").expect("token pattern compiles")
    })
}

fn token_in_text() -> &'static Regex {
    TOKEN_IN_TEXT.get_or_init(|| {
        Regex::new(r"\d+:[A-Za-z0-9_-]{28,}\b").expect("token pattern compiles")
    })
}

/// Replaces anything token-shaped in `text` with `<token>`.
///
/// Applied to every error message and response body excerpt before it can
/// reach a log line.
pub fn sanitize(text: &str) -> String {
    token_in_text().replace_all(text, "<token>").into_owned()
}

// ============================================================================
// HttpTransport
// ============================================================================

/// Retrying HTTP implementation of [`Transport`].
pub struct HttpTransport {
    client: Client,
    token: String,
    api_url: String,
    max_retries: u32,
    default_timeout: Duration,
    max_timeout: Duration,
}

impl HttpTransport {
    /// Creates a transport for `token`, validating its shape first.
    pub fn new(token: impl Into<String>) -> ApiResult<Self> {
        let token = token.into();
        if !token_shape().is_match(&token) {
            return Err(ApiError::InvalidToken);
        }
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|err| TransportError::Http(sanitize(&err.to_string())))?;
        Ok(Self {
            client,
            token,
            api_url: DEFAULT_API_URL.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            default_timeout: DEFAULT_TIMEOUT,
            max_timeout: MAX_TIMEOUT,
        })
    }

    /// Points the transport at a different API server (a local Bot API
    /// server, or a test double).
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.token, method)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.api_url, self.token, file_path)
    }

    /// One request/response cycle without retries.
    async fn execute(
        &self,
        method: &str,
        body: &RequestBody<'_>,
        timeout: Duration,
    ) -> ApiResult<Value> {
        let request = match body {
            RequestBody::Json(params) => self.client.post(self.method_url(method)).json(params),
            RequestBody::Multipart { params, files } => {
                let form = upload::build_form(params, files).await?;
                self.client.post(self.method_url(method)).multipart(form)
            }
        };
        let response = request
            .timeout(timeout)
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            let mut envelope: Value = response.json().await.map_err(map_transport_error)?;
            if envelope.bool_at("ok") == Some(true) {
                return Ok(envelope["result"].take());
            }
            let code = envelope.i64_at("error_code").unwrap_or(status as i64) as u16;
            return Err(api_error(method, code, &envelope, ""));
        }
        let text = response.text().await.unwrap_or_default();
        let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
        Err(api_error(method, status, &body, &text))
    }

    /// Full call cycle: execute with the retry policy applied.
    async fn call(&self, method: &str, body: RequestBody<'_>) -> ApiResult<Value> {
        self.call_with_timeout(method, body, self.default_timeout)
            .await
    }

    async fn call_with_timeout(
        &self,
        method: &str,
        body: RequestBody<'_>,
        initial_timeout: Duration,
    ) -> ApiResult<Value> {
        let mut retry = RetryState::new(self.max_retries, initial_timeout, self.max_timeout);
        loop {
            trace!(method, attempt = retry.attempts, "calling API method");
            match self.execute(method, &body, retry.timeout).await {
                Ok(result) => return Ok(result),
                Err(err) => self.pause_or_bail(method, &mut retry, err).await?,
            }
        }
    }

    /// Sleeps before the next attempt, or converts the error into the final
    /// verdict for this call.
    async fn pause_or_bail(
        &self,
        method: &str,
        retry: &mut RetryState,
        err: ApiError,
    ) -> ApiResult<()> {
        match retry.plan_retry(&err) {
            Some(pause) => {
                warn!(
                    method,
                    attempt = retry.attempts,
                    pause_secs = pause.as_secs(),
                    error = %err,
                    "API call failed, retrying"
                );
                tokio::time::sleep(pause).await;
                Ok(())
            }
            None if err.is_retryable() => Err(ApiError::MaxRetriesExceeded {
                method: method.to_string(),
                attempts: retry.attempts,
            }),
            None => Err(err),
        }
    }

    async fn fetch_file(&self, file_path: &str, timeout: Duration) -> ApiResult<Vec<u8>> {
        let response = self
            .client
            .get(self.file_url(file_path))
            .timeout(timeout)
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let text = response.text().await.unwrap_or_default();
            let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
            return Err(api_error("download", status, &body, &text));
        }
        let bytes = response.bytes().await.map_err(map_transport_error)?;
        Ok(bytes.to_vec())
    }
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("api_url", &self.api_url)
            .field("token", &"<token>")
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn invoke(&self, method: &str, mut params: Value) -> ApiResult<Value> {
        strip_nulls(&mut params);
        self.call(method, RequestBody::Json(&params)).await
    }

    async fn invoke_with_files(
        &self,
        method: &str,
        mut params: Value,
        files: Vec<(String, InputFile)>,
    ) -> ApiResult<Value> {
        strip_nulls(&mut params);
        let (params, uploads) = upload::normalize_uploads(method, params, files).await;
        if uploads.is_empty() {
            return self.call(method, RequestBody::Json(&params)).await;
        }
        self.call(
            method,
            RequestBody::Multipart {
                params: &params,
                files: &uploads,
            },
        )
        .await
    }

    async fn fetch_updates(
        &self,
        offset: i64,
        limit: Option<u32>,
        timeout_secs: u64,
        allowed: &[String],
    ) -> ApiResult<Vec<Update>> {
        let hold = if offset == -1 { 0 } else { timeout_secs };
        let params = build_poll_params(offset, limit, timeout_secs, allowed)?;
        // The client-side timeout must outlive the server-side hold.
        let timeout = self.default_timeout + Duration::from_secs(hold);
        let result = self
            .call_with_timeout("getUpdates", RequestBody::Json(&params), timeout)
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn download(&self, file_path: &str) -> ApiResult<Vec<u8>> {
        let mut retry = RetryState::new(self.max_retries, self.default_timeout, self.max_timeout);
        loop {
            match self.fetch_file(file_path, retry.timeout).await {
                Ok(bytes) => return Ok(bytes),
                Err(err) => self.pause_or_bail("download", &mut retry, err).await?,
            }
        }
    }
}

enum RequestBody<'a> {
    Json(&'a Value),
    Multipart {
        params: &'a Value,
        files: &'a [(String, InputFile)],
    },
}

// ============================================================================
// Retry Policy
// ============================================================================

struct RetryState {
    attempts: u32,
    max_retries: u32,
    timeout: Duration,
    max_timeout: Duration,
}

impl RetryState {
    fn new(max_retries: u32, timeout: Duration, max_timeout: Duration) -> Self {
        Self {
            attempts: 0,
            max_retries,
            timeout,
            max_timeout,
        }
    }

    /// Returns the pause before the next attempt, or `None` when this error
    /// ends the call (not retryable, or the budget is spent).
    ///
    /// Server-paced errors (429, 5xx) wait exactly what the server asked
    /// for. Timeouts and socket errors back off exponentially and widen the
    /// per-attempt timeout, since a slow response may just need more room.
    fn plan_retry(&mut self, err: &ApiError) -> Option<Duration> {
        if !err.is_retryable() || self.attempts >= self.max_retries {
            return None;
        }
        let pause = match err.retry_after() {
            Some(pause) => pause,
            None => {
                let backoff = Duration::from_secs(1u64 << self.attempts.min(6));
                if self.timeout < self.max_timeout {
                    self.timeout = (self.timeout + TIMEOUT_GROWTH).min(self.max_timeout);
                }
                backoff
            }
        };
        self.attempts += 1;
        Some(pause)
    }
}

// ============================================================================
// Error Mapping
// ============================================================================

fn map_transport_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        return ApiError::Timeout;
    }
    let message = sanitize(&err.to_string());
    if err.is_connect() {
        TransportError::Connect(message).into()
    } else if err.is_decode() || err.is_body() {
        TransportError::Http(message).into()
    } else {
        TransportError::Io(message).into()
    }
}

/// Maps a non-ok response onto [`ApiError::Telegram`].
///
/// `body` is the parsed error envelope when the server sent JSON, `Null`
/// otherwise; `raw` is the raw body text used as a fallback description.
fn api_error(method: &str, code: u16, body: &Value, raw: &str) -> ApiError {
    let description = body
        .str_at("description")
        .map(str::to_owned)
        .unwrap_or_else(|| raw.trim().to_string());
    let retry_after = match code {
        429 => body
            .i64_at("parameters.retry_after")
            .map(|secs| secs.max(0) as u64)
            .or(Some(RATE_LIMIT_FALLBACK_PAUSE_SECS)),
        500 | 502 | 504 => Some(SERVER_ERROR_PAUSE_SECS),
        _ => None,
    };
    ApiError::Telegram {
        method: method.to_string(),
        code,
        description: sanitize(&description),
        retry_after,
    }
}

// ============================================================================
// Request Assembly
// ============================================================================

/// Drops top-level nulls so optional parameters can stay in call sites.
fn strip_nulls(params: &mut Value) {
    if let Some(map) = params.as_object_mut() {
        map.retain(|_, value| !value.is_null());
    }
}

/// Builds `getUpdates` parameters.
///
/// `offset == -1` is the backlog probe: it asks for the newest update only
/// and deliberately carries nothing else, so the server answers at once.
fn build_poll_params(
    offset: i64,
    limit: Option<u32>,
    timeout_secs: u64,
    allowed: &[String],
) -> ApiResult<Value> {
    if offset == -1 {
        return Ok(json!({ "offset": -1 }));
    }
    let mut params = json!({
        "offset": offset,
        "timeout": timeout_secs,
    });
    if let Some(limit) = limit {
        params["limit"] = limit.into();
    }
    if !allowed.is_empty() {
        params["allowed_updates"] = serde_json::to_value(allowed)?;
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "1234567890:AAE4nZ9uQvwxyz_AbCdEfGhIjKlMnOpQrSt";

    #[test]
    fn token_shapes_are_validated() {
        assert!(HttpTransport::new(TOKEN).is_ok());
        for bad in ["", "not a token", "12345:short spaces", ":missingid", "1234567890:"] {
            assert_eq!(
                HttpTransport::new(bad).err(),
                Some(ApiError::InvalidToken),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn sanitize_scrubs_tokens_from_urls() {
        let leaky = format!("https://api.telegram.org/bot{TOKEN}/sendMessage returned 404");
        let clean = sanitize(&leaky);
        assert!(!clean.contains(TOKEN));
        assert!(clean.contains("bot<token>/sendMessage"));
    }

    #[test]
    fn transport_debug_never_shows_the_token() {
        let transport = HttpTransport::new(TOKEN).unwrap();
        let rendered = format!("{transport:?}");
        assert!(!rendered.contains(TOKEN));
    }

    #[test]
    fn rate_limits_carry_the_server_pause() {
        let body = json!({
            "ok": false,
            "error_code": 429,
            "description": "Too Many Requests: retry after 7",
            "parameters": {"retry_after": 7}
        });
        let err = api_error("sendMessage", 429, &body, "");
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn rate_limits_without_a_pause_get_the_fallback() {
        let err = api_error("sendMessage", 429, &Value::Null, "Too Many Requests");
        assert_eq!(
            err.retry_after(),
            Some(Duration::from_secs(RATE_LIMIT_FALLBACK_PAUSE_SECS))
        );
    }

    #[test]
    fn server_errors_are_retryable_with_a_default_pause() {
        let err = api_error("getUpdates", 502, &Value::Null, "<html>Bad Gateway</html>");
        assert!(err.is_retryable());
        assert_eq!(
            err.retry_after(),
            Some(Duration::from_secs(SERVER_ERROR_PAUSE_SECS))
        );
    }

    #[test]
    fn auth_and_conflict_errors_are_fatal() {
        let unauthorized = api_error("getMe", 401, &json!({"description": "Unauthorized"}), "");
        assert!(unauthorized.is_fatal());
        let conflict = api_error(
            "getUpdates",
            409,
            &json!({"description": "terminated by other getUpdates request"}),
            "",
        );
        assert!(conflict.is_fatal());
        let bad_request = api_error("sendMessage", 400, &json!({"description": "Bad Request"}), "");
        assert!(!bad_request.is_fatal());
        assert!(!bad_request.is_retryable());
    }

    #[test]
    fn error_descriptions_are_sanitized() {
        let raw = format!("Not Found: /bot{TOKEN}/sendMessag");
        let err = api_error("sendMessag", 404, &Value::Null, &raw);
        assert!(!err.to_string().contains(TOKEN));
    }

    #[test]
    fn retry_policy_backs_off_and_widens_timeouts() {
        let mut retry = RetryState::new(3, Duration::from_secs(30), Duration::from_secs(60));

        assert_eq!(retry.plan_retry(&ApiError::Timeout), Some(Duration::from_secs(1)));
        assert_eq!(retry.timeout, Duration::from_secs(40));
        assert_eq!(retry.plan_retry(&ApiError::Timeout), Some(Duration::from_secs(2)));
        assert_eq!(retry.plan_retry(&ApiError::Timeout), Some(Duration::from_secs(4)));
        assert_eq!(retry.timeout, Duration::from_secs(60));

        // Budget spent.
        assert_eq!(retry.plan_retry(&ApiError::Timeout), None);
        assert_eq!(retry.attempts, 3);
    }

    #[test]
    fn retry_policy_honors_the_server_pause_without_widening() {
        let mut retry = RetryState::new(5, Duration::from_secs(30), Duration::from_secs(60));
        let rate_limited = api_error("sendMessage", 429, &json!({"parameters": {"retry_after": 9}}), "");
        assert_eq!(retry.plan_retry(&rate_limited), Some(Duration::from_secs(9)));
        assert_eq!(retry.timeout, Duration::from_secs(30));
    }

    #[test]
    fn retry_policy_rejects_non_retryable_errors() {
        let mut retry = RetryState::new(5, Duration::from_secs(30), Duration::from_secs(60));
        let bad_request = api_error("sendMessage", 400, &Value::Null, "Bad Request");
        assert_eq!(retry.plan_retry(&bad_request), None);
        assert_eq!(retry.attempts, 0);
    }

    #[test]
    fn poll_params_probe_is_bare() {
        assert_eq!(
            build_poll_params(-1, Some(50), 20, &["message".to_string()]).unwrap(),
            json!({"offset": -1})
        );
    }

    #[test]
    fn poll_params_carry_the_subscription() {
        let allowed = vec!["callback_query".to_string(), "message".to_string()];
        let params = build_poll_params(42, Some(100), 20, &allowed).unwrap();
        assert_eq!(
            params,
            json!({
                "offset": 42,
                "timeout": 20,
                "limit": 100,
                "allowed_updates": ["callback_query", "message"],
            })
        );

        // No limit, no subscription narrowing.
        assert_eq!(
            build_poll_params(0, None, 20, &[]).unwrap(),
            json!({"offset": 0, "timeout": 20})
        );
    }

    #[test]
    fn null_parameters_are_dropped() {
        let mut params = json!({"chat_id": 1, "reply_markup": Value::Null, "text": "hi"});
        strip_nulls(&mut params);
        assert_eq!(params, json!({"chat_id": 1, "text": "hi"}));
    }
}

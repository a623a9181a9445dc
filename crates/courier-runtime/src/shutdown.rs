//! Shutdown coordination and process exit codes.
//!
//! A [`ShutdownHandle`] is the one switch that stops a polling loop. It can
//! be flipped from anywhere: a handler, a signal watcher, another task. The
//! first request wins and pins the [`ExitCode`]; later requests are ignored
//! so a supervisor always sees the original reason.
//!
//! # Example
//!
//! ```rust,ignore
//! use courier_runtime::{ExitCode, ShutdownHandle};
//!
//! let handle = ShutdownHandle::new();
//! handle.restart();
//! assert_eq!(handle.exit_code(), ExitCode::Restart);
//! ```

use std::fmt;
use std::process;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Why the polling loop stopped, as seen by the supervising process.
///
/// The numeric codes are stable so wrapper scripts can restart on `1` and
/// alert on anything above it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Clean stop, no restart wanted.
    Ok,
    /// Clean stop, the supervisor should start a fresh process.
    Restart,
    /// A non-API failure (startup hook, payload decoding).
    UnexpectedError,
    /// The API rejected the bot outright (bad token, second poller).
    FatalApiError,
    /// The API returned an error polling cannot recover from.
    UnexpectedApiError,
}

impl ExitCode {
    /// The process exit code for this outcome.
    pub fn code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::Restart => 1,
            Self::UnexpectedError => 2,
            Self::FatalApiError => 3,
            Self::UnexpectedApiError => 4,
        }
    }

    /// Whether a supervisor should start a replacement process.
    pub fn is_restart(self) -> bool {
        matches!(self, Self::Restart)
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "ok",
            Self::Restart => "restart",
            Self::UnexpectedError => "unexpected error",
            Self::FatalApiError => "fatal API error",
            Self::UnexpectedApiError => "unexpected API error",
        };
        write!(f, "{name}")
    }
}

impl From<ExitCode> for process::ExitCode {
    fn from(code: ExitCode) -> Self {
        process::ExitCode::from(code.code() as u8)
    }
}

// ============================================================================
// ShutdownHandle
// ============================================================================

/// Cloneable switch that requests a stop and carries the exit code.
///
/// The first call to [`request`](Self::request) decides the exit code;
/// every later call is a no-op. Cloning is cheap and every clone observes
/// the same state.
#[derive(Clone, Default)]
pub struct ShutdownHandle {
    inner: Arc<ShutdownInner>,
}

#[derive(Default)]
struct ShutdownInner {
    token: CancellationToken,
    code: Mutex<Option<ExitCode>>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stop with `code`. The first request wins.
    pub fn request(&self, code: ExitCode) {
        {
            let mut slot = self.inner.code.lock();
            if slot.is_some() {
                debug!(ignored = %code, "shutdown already requested, keeping the first exit code");
                return;
            }
            *slot = Some(code);
        }
        info!(code = %code, "shutdown requested");
        self.inner.token.cancel();
    }

    /// Requests a clean stop.
    pub fn shutdown(&self) {
        self.request(ExitCode::Ok);
    }

    /// Requests a stop that asks the supervisor for a fresh process.
    pub fn restart(&self) {
        self.request(ExitCode::Restart);
    }

    pub fn is_requested(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// The exit code pinned by the first request, `Ok` before any request.
    pub fn exit_code(&self) -> ExitCode {
        (*self.inner.code.lock()).unwrap_or(ExitCode::Ok)
    }

    /// Resolves once a stop has been requested.
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await;
    }
}

impl fmt::Debug for ShutdownHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownHandle")
            .field("requested", &self.is_requested())
            .field("code", &*self.inner.code.lock())
            .finish()
    }
}

// ============================================================================
// Signal Watching
// ============================================================================

/// Spawns a task that turns Ctrl+C (and SIGTERM on Unix) into a clean
/// shutdown request.
///
/// Must be called from within a Tokio runtime.
pub fn watch_signals(handle: ShutdownHandle) {
    tokio::spawn(async move {
        wait_for_signal().await;
        handle.shutdown();
    });
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down");
    }
}

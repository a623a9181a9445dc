//! The bot handle.
//!
//! A [`Bot`] ties everything together: the transport that talks to the Bot
//! API, the dispatcher that routes incoming updates, and the task pools
//! that bound how much of each runs at once. It is a cheap-to-clone handle;
//! clones share all state, so handlers can carry one around freely.
//!
//! # Example
//!
//! ```rust,ignore
//! use courier_core::{EventType, HandlerEntry, filters};
//! use courier_runtime::{Bot, config::load_config};
//! use serde_json::json;
//!
//! let bot = Bot::new(load_config()?)?;
//! bot.on(
//!     EventType::Message,
//!     HandlerEntry::new("ping", {
//!         let bot = bot.clone();
//!         move |msg| {
//!             let bot = bot.clone();
//!             async move {
//!                 let chat = msg.i64_at("chat.id").unwrap_or_default();
//!                 bot.call("sendMessage", json!({"chat_id": chat, "text": "pong"}));
//!                 Ok(())
//!             }
//!         }
//!     })
//!     .with_filters([filters::commands(["ping"])]),
//! )?;
//! let exit = bot.run().await;
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::warn;

use courier_core::{
    ApiResult, Dispatcher, EventType, Filter, FlowBuilder, FlowEntry, FlowRegistry, HandlerEntry,
    HandlerError, HandlerRegistry, InputFile, Outcome, RegistryError, TaskError, TaskHandle,
    TaskScheduler, Transport,
};
use courier_transport::HttpTransport;

use crate::config::CourierConfig;
use crate::error::{RuntimeError, RuntimeResult};
use crate::polling;
use crate::shutdown::{ExitCode, ShutdownHandle, watch_signals};

pub(crate) type StartupHook =
    Arc<dyn Fn(Bot) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;
pub(crate) type ShutdownHook = Arc<dyn Fn(Bot, ExitCode) -> BoxFuture<'static, ()> + Send + Sync>;

/// Lifecycle state of a bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BotState {
    /// Not polling. The initial state, and the final one after a run.
    Stopped = 0,
    /// The polling loop is fetching and dispatching updates.
    Running = 1,
    /// Polling has ended, task pools are finishing their backlog.
    Draining = 2,
}

impl BotState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

impl fmt::Display for BotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Draining => "draining",
        };
        write!(f, "{name}")
    }
}

#[derive(Default)]
struct Hooks {
    startup: Option<StartupHook>,
    shutdown: Option<ShutdownHook>,
}

/// Cheap-to-clone handle to one bot instance.
#[derive(Clone)]
pub struct Bot {
    inner: Arc<BotInner>,
}

struct BotInner {
    transport: Arc<dyn Transport>,
    scheduler: TaskScheduler,
    dispatcher: Dispatcher,
    config: CourierConfig,
    hooks: Mutex<Hooks>,
    shutdown: ShutdownHandle,
    state: AtomicU8,
}

impl Bot {
    /// Creates a bot from configuration, building an HTTP transport for the
    /// configured token.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: CourierConfig) -> RuntimeResult<Self> {
        let token = config.token.clone().ok_or(RuntimeError::MissingToken)?;
        let mut transport = HttpTransport::new(token)?
            .with_max_retries(config.network.max_retries)
            .with_request_timeout(config.network.request_timeout());
        if let Some(api_url) = &config.api_url {
            transport = transport.with_api_url(api_url.clone());
        }
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Creates a bot over an existing transport. This is the entry point
    /// for tests and custom transports.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn with_transport(config: CourierConfig, transport: Arc<dyn Transport>) -> Self {
        let scheduler = TaskScheduler::new(
            config.pools.max_concurrent_calls,
            config.pools.max_concurrent_handlers,
        );
        let dispatcher = Dispatcher::new(
            HandlerRegistry::new(),
            FlowRegistry::new(),
            scheduler.chains().clone(),
        );
        Self {
            inner: Arc::new(BotInner {
                transport,
                scheduler,
                dispatcher,
                config,
                hooks: Mutex::new(Hooks::default()),
                shutdown: ShutdownHandle::new(),
                state: AtomicU8::new(BotState::Stopped as u8),
            }),
        }
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Registers a permanent handler for `event_type`.
    ///
    /// Fails once polling has started; register everything before `run`.
    pub fn on(&self, event_type: EventType, entry: HandlerEntry) -> Result<(), RegistryError> {
        self.inner.dispatcher.registry().register(event_type, entry)
    }

    /// The permanent handler registry.
    pub fn registry(&self) -> &HandlerRegistry {
        self.inner.dispatcher.registry()
    }

    /// The flow registry. Flows can be added and removed at any time.
    pub fn flows(&self) -> &FlowRegistry {
        self.inner.dispatcher.flows()
    }

    /// The task scheduler carrying both pools and their metrics.
    pub fn scheduler(&self) -> &TaskScheduler {
        &self.inner.scheduler
    }

    pub fn config(&self) -> &CourierConfig {
        &self.inner.config
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    // ========================================================================
    // API Calls
    // ========================================================================

    /// Queues an API call on the call pool and returns its handle.
    ///
    /// The handle can be awaited for the result or dropped outright; the
    /// call runs either way.
    pub fn call(&self, method: impl Into<String>, params: Value) -> TaskHandle<Value> {
        let method = method.into();
        let transport = Arc::clone(&self.inner.transport);
        let invoked = method.clone();
        self.inner.scheduler.calls().submit(method, async move {
            transport
                .invoke(&invoked, params)
                .await
                .map_err(TaskError::from)
        })
    }

    /// Queues an API call that carries file uploads.
    pub fn call_with_files(
        &self,
        method: impl Into<String>,
        params: Value,
        files: Vec<(String, InputFile)>,
    ) -> TaskHandle<Value> {
        let method = method.into();
        let transport = Arc::clone(&self.inner.transport);
        let invoked = method.clone();
        self.inner.scheduler.calls().submit(method, async move {
            transport
                .invoke_with_files(&invoked, params, files)
                .await
                .map_err(TaskError::from)
        })
    }

    /// Downloads a file by the `file_path` obtained from `getFile`.
    ///
    /// Downloads bypass the call pool; they stream bytes rather than
    /// produce a JSON result.
    pub async fn download(&self, file_path: &str) -> ApiResult<Vec<u8>> {
        self.inner.transport.download(file_path).await
    }

    // ========================================================================
    // Lifecycle Hooks
    // ========================================================================

    /// Sets the startup hook, run once after polling connects and before
    /// the first fetch. A failing startup hook aborts the run.
    ///
    /// There is one slot; setting a second hook replaces the first.
    pub fn on_startup<F, Fut>(&self, hook: F)
    where
        F: Fn(Bot) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let mut hooks = self.inner.hooks.lock();
        if hooks.startup.is_some() {
            warn!("replacing an existing startup hook");
        }
        hooks.startup = Some(Arc::new(move |bot| hook(bot).boxed()));
    }

    /// Sets the shutdown hook, run after the task pools have drained. It
    /// receives the exit code the run ends with.
    ///
    /// There is one slot; setting a second hook replaces the first.
    pub fn on_shutdown<F, Fut>(&self, hook: F)
    where
        F: Fn(Bot, ExitCode) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut hooks = self.inner.hooks.lock();
        if hooks.shutdown.is_some() {
            warn!("replacing an existing shutdown hook");
        }
        hooks.shutdown = Some(Arc::new(move |bot, code| hook(bot, code).boxed()));
    }

    pub(crate) fn startup_hook(&self) -> Option<StartupHook> {
        self.inner.hooks.lock().startup.clone()
    }

    pub(crate) fn shutdown_hook(&self) -> Option<ShutdownHook> {
        self.inner.hooks.lock().shutdown.clone()
    }

    // ========================================================================
    // Waiting
    // ========================================================================

    /// Waits for the next update of `event_type` that passes `filters` and
    /// returns its payload.
    ///
    /// Registers a single-step flow that captures exactly one update. With
    /// a `timeout` the wait gives up and removes the flow after that long.
    /// Returns `None` on timeout, or right away when polling is already
    /// running without `event_type` in its subscription, since such an
    /// update can never arrive.
    pub async fn wait_for(
        &self,
        event_type: EventType,
        filters: Vec<Filter>,
        timeout: Option<Duration>,
    ) -> Option<Value> {
        if self.state() != BotState::Stopped
            && !self
                .inner
                .dispatcher
                .subscribed_event_types()
                .contains(&event_type)
        {
            warn!(
                event = %event_type,
                "event type is outside the poll subscription, wait_for would never resolve"
            );
            return None;
        }

        let (sender, receiver) = oneshot::channel();
        let slot = Arc::new(Mutex::new(Some(sender)));
        let step = FlowEntry::new("deliver", move |payload, _context| {
            let slot = Arc::clone(&slot);
            async move {
                if let Some(sender) = slot.lock().take() {
                    let _ = sender.send(payload);
                }
                Ok::<_, HandlerError>(Outcome::Handled)
            }
        })
        .with_filters(filters);
        let ticket = self
            .flows()
            .register(FlowBuilder::new(event_type).named("wait_for").entry(step));

        let received = match timeout {
            Some(limit) => tokio::time::timeout(limit, receiver)
                .await
                .ok()
                .and_then(Result::ok),
            None => receiver.await.ok(),
        };
        if received.is_none() {
            ticket.cancel();
        }
        received
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Runs the polling loop until shutdown is requested or a fatal error
    /// occurs, draining the task pools before returning.
    pub async fn run_polling(&self) -> ExitCode {
        polling::run(self.clone()).await
    }

    /// Runs the polling loop with Ctrl+C and SIGTERM wired to a clean
    /// shutdown.
    pub async fn run(&self) -> ExitCode {
        watch_signals(self.shutdown_handle());
        self.run_polling().await
    }

    /// A handle for requesting shutdown from other tasks.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.inner.shutdown.clone()
    }

    /// Requests a clean stop.
    pub fn shutdown(&self) {
        self.inner.shutdown.shutdown();
    }

    /// Requests a stop with the restart exit code.
    pub fn restart(&self) {
        self.inner.shutdown.restart();
    }

    pub fn state(&self) -> BotState {
        BotState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Moves `Stopped` to `Running`. Returns false when a loop is already
    /// driving this bot.
    pub(crate) fn try_start(&self) -> bool {
        self.inner
            .state
            .compare_exchange(
                BotState::Stopped as u8,
                BotState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn set_state(&self, state: BotState) {
        self.inner.state.store(state as u8, Ordering::Release);
    }
}

impl fmt::Debug for Bot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bot")
            .field("state", &self.state())
            .field("shutdown", &self.inner.shutdown)
            .finish()
    }
}

//! The long polling loop.
//!
//! One loop per bot: fetch a batch of updates, hand each to the dispatcher,
//! advance the confirmation offset, repeat. The loop only ends on a
//! shutdown request or an error the API client could not retry away. Either
//! way it drains the task pools and runs the shutdown hook before handing
//! back an [`ExitCode`].
//!
//! Updates are confirmed by offset: the next fetch carries the highest
//! dispatched id plus one, which tells the server to discard everything up
//! to it. A batch in flight when shutdown lands is never confirmed, so the
//! server redelivers it on the next run.

use courier_core::{ApiError, Update};
use tracing::{debug, error, info, warn};

use crate::bot::{Bot, BotState};
use crate::shutdown::ExitCode;

pub(crate) async fn run(bot: Bot) -> ExitCode {
    if !bot.try_start() {
        warn!("polling loop is already running");
        return ExitCode::UnexpectedError;
    }
    // No registrations past this point; the subscription is about to be
    // pinned.
    bot.registry().lock();

    let allowed: Vec<String> = bot
        .dispatcher()
        .subscribed_event_types()
        .iter()
        .map(|kind| kind.as_key().to_string())
        .collect();
    if allowed.is_empty() {
        warn!("no handlers or flows registered, every update will be dropped");
    }
    info!(subscription = ?allowed, "starting polling");

    let shutdown = bot.shutdown_handle();
    let config = bot.config().clone();
    let mut next_offset: i64 = 0;

    if config.polling.drop_pending {
        // Probe for the newest pending update; confirming past it discards
        // the backlog without dispatching it.
        match bot.transport().fetch_updates(-1, None, 0, &[]).await {
            Ok(backlog) => {
                if let Some(latest) = backlog.iter().map(Update::id).max() {
                    debug!(latest, "dropping pending updates");
                    next_offset = latest + 1;
                }
            }
            Err(err) if err.is_fatal() => {
                error!(error = %err, "fatal API error while probing the backlog");
                return finish(&bot, ExitCode::FatalApiError).await;
            }
            Err(err) => {
                warn!(error = %err, "backlog probe failed, keeping pending updates");
            }
        }
    }

    if let Some(hook) = bot.startup_hook() {
        debug!("running startup hook");
        if let Err(err) = hook(bot.clone()).await {
            error!(error = %err, "startup hook failed, aborting");
            return finish(&bot, ExitCode::UnexpectedError).await;
        }
    }

    let code = loop {
        let fetched = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break shutdown.exit_code(),
            fetched = bot.transport().fetch_updates(
                next_offset,
                config.polling.limit,
                config.polling.timeout_secs,
                &allowed,
            ) => fetched,
        };

        match fetched {
            Ok(mut updates) => {
                updates.sort_by_key(Update::id);
                for update in updates {
                    let id = update.id();
                    if id < next_offset {
                        continue;
                    }
                    next_offset = id + 1;
                    // The handle is dropped on purpose; the pool logs and
                    // counts the outcome either way.
                    let _ = bot.dispatcher().on_update(update);
                }
            }
            Err(err) if err.is_fatal() => {
                error!(error = %err, "fatal API error, stopping");
                break ExitCode::FatalApiError;
            }
            Err(err) if can_resume(&err) => {
                let backoff = config.polling.error_backoff();
                warn!(
                    error = %err,
                    backoff_secs = backoff.as_secs(),
                    "polling failed, backing off"
                );
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break shutdown.exit_code(),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
            Err(err @ ApiError::Telegram { .. }) => {
                error!(error = %err, "unexpected API error, stopping");
                break ExitCode::UnexpectedApiError;
            }
            Err(err) => {
                error!(error = %err, "polling failed, stopping");
                break ExitCode::UnexpectedError;
            }
        }
    };

    finish(&bot, code).await
}

/// Whether polling should back off and try again rather than stop.
fn can_resume(err: &ApiError) -> bool {
    err.is_retryable() || matches!(err, ApiError::MaxRetriesExceeded { .. })
}

/// Drains the pools, runs the shutdown hook and returns `code`.
async fn finish(bot: &Bot, code: ExitCode) -> ExitCode {
    bot.set_state(BotState::Draining);
    let grace = bot.config().polling.drain_grace();
    debug!(grace_secs = grace.as_secs(), "draining task pools");
    bot.scheduler().shutdown(grace).await;

    if let Some(hook) = bot.shutdown_hook() {
        debug!("running shutdown hook");
        hook(bot.clone(), code).await;
    }

    bot.set_state(BotState::Stopped);
    info!(code = %code, "polling stopped");
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{Value, json};

    use courier_core::{
        ApiResult, EventType, HandlerEntry, InputFile, PayloadExt, Transport,
    };

    use crate::config::CourierConfig;

    struct ScriptedTransport {
        script: Mutex<VecDeque<ApiResult<Vec<Update>>>>,
        offsets: Mutex<Vec<i64>>,
        sent: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<ApiResult<Vec<Update>>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                offsets: Mutex::new(Vec::new()),
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn invoke(&self, method: &str, _params: Value) -> ApiResult<Value> {
            self.sent.lock().push(method.to_string());
            Ok(Value::Null)
        }

        async fn invoke_with_files(
            &self,
            method: &str,
            params: Value,
            _files: Vec<(String, InputFile)>,
        ) -> ApiResult<Value> {
            self.invoke(method, params).await
        }

        async fn fetch_updates(
            &self,
            offset: i64,
            _limit: Option<u32>,
            _timeout_secs: u64,
            _allowed: &[String],
        ) -> ApiResult<Vec<Update>> {
            self.offsets.lock().push(offset);
            let next = self.script.lock().pop_front();
            match next {
                Some(result) => result,
                None => {
                    // Script exhausted: behave like an idle server.
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(Vec::new())
                }
            }
        }

        async fn download(&self, _file_path: &str) -> ApiResult<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    fn message(id: i64, text: &str) -> Update {
        Update::new(id, EventType::Message, json!({"text": text}))
    }

    fn telegram_error(code: u16) -> ApiError {
        ApiError::Telegram {
            method: "getUpdates".to_string(),
            code,
            description: format!("HTTP {code}"),
            retry_after: None,
        }
    }

    /// Collects message texts and shuts the bot down once `stop_after`
    /// have been seen.
    fn collector(bot: &Bot, stop_after: usize) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let entry = HandlerEntry::new("collect", {
            let seen = Arc::clone(&seen);
            let bot = bot.clone();
            move |payload: Value| {
                let seen = Arc::clone(&seen);
                let bot = bot.clone();
                async move {
                    let text = payload.str_at("text").unwrap_or_default().to_string();
                    let total = {
                        let mut seen = seen.lock();
                        seen.push(text);
                        seen.len()
                    };
                    if total >= stop_after {
                        bot.shutdown();
                    }
                }
            }
        });
        bot.on(EventType::Message, entry).unwrap();
        seen
    }

    #[tokio::test(start_paused = true)]
    async fn updates_are_dispatched_and_confirmed() {
        let transport = ScriptedTransport::new(vec![Ok(vec![message(1, "a"), message(2, "b")])]);
        let bot = Bot::with_transport(CourierConfig::default(), transport.clone());
        let seen = collector(&bot, 2);

        assert_eq!(bot.run_polling().await, ExitCode::Ok);

        let mut texts = seen.lock().clone();
        texts.sort();
        assert_eq!(texts, vec!["a", "b"]);

        let offsets = transport.offsets.lock();
        assert_eq!(offsets[0], 0);
        // Everything after the batch confirms past update 2.
        assert!(offsets[1..].iter().all(|&offset| offset == 3));
        assert_eq!(bot.state(), BotState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_stop_polling() {
        for code in [401, 409] {
            let transport = ScriptedTransport::new(vec![Err(telegram_error(code))]);
            let bot = Bot::with_transport(CourierConfig::default(), transport.clone());

            assert_eq!(bot.run_polling().await, ExitCode::FatalApiError);
            assert_eq!(transport.offsets.lock().len(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_api_errors_stop_polling() {
        let transport = ScriptedTransport::new(vec![Err(telegram_error(400))]);
        let bot = Bot::with_transport(CourierConfig::default(), transport);

        assert_eq!(bot.run_polling().await, ExitCode::UnexpectedApiError);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_back_off_and_resume() {
        let transport = ScriptedTransport::new(vec![
            Err(ApiError::MaxRetriesExceeded {
                method: "getUpdates".to_string(),
                attempts: 5,
            }),
            Ok(vec![message(5, "after")]),
        ]);
        let bot = Bot::with_transport(CourierConfig::default(), transport.clone());
        let seen = collector(&bot, 1);

        let started = tokio::time::Instant::now();
        assert_eq!(bot.run_polling().await, ExitCode::Ok);

        assert_eq!(*seen.lock(), vec!["after"]);
        // The configured backoff elapsed between the two fetches.
        assert!(started.elapsed() >= Duration::from_secs(60));
        let offsets = transport.offsets.lock();
        assert_eq!(&offsets[..2], &[0, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_pending_skips_the_backlog() {
        let mut config = CourierConfig::default();
        config.polling.drop_pending = true;

        let transport = ScriptedTransport::new(vec![
            Ok(vec![message(7, "stale")]),
            Ok(vec![message(8, "fresh")]),
        ]);
        let bot = Bot::with_transport(config, transport.clone());
        let seen = collector(&bot, 1);

        assert_eq!(bot.run_polling().await, ExitCode::Ok);

        // The probed backlog is confirmed away, never dispatched.
        assert_eq!(*seen.lock(), vec!["fresh"]);
        let offsets = transport.offsets.lock();
        assert_eq!(offsets[0], -1);
        assert_eq!(offsets[1], 8);
        assert_eq!(offsets[2], 9);
    }

    #[tokio::test(start_paused = true)]
    async fn a_failing_startup_hook_aborts_the_run() {
        let transport = ScriptedTransport::new(Vec::new());
        let bot = Bot::with_transport(CourierConfig::default(), transport.clone());

        bot.on_startup(|_bot| async { Err(courier_core::HandlerError::new("no session")) });
        let observed = Arc::new(Mutex::new(None));
        bot.on_shutdown({
            let observed = Arc::clone(&observed);
            move |_bot, code| {
                let observed = Arc::clone(&observed);
                async move {
                    *observed.lock() = Some(code);
                }
            }
        });

        assert_eq!(bot.run_polling().await, ExitCode::UnexpectedError);
        // Polling never fetched; the hook failed first.
        assert!(transport.offsets.lock().is_empty());
        assert_eq!(*observed.lock(), Some(ExitCode::UnexpectedError));
        assert_eq!(bot.state(), BotState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_requests_surface_in_the_exit_code() {
        let transport = ScriptedTransport::new(vec![Ok(vec![message(1, "go")])]);
        let bot = Bot::with_transport(CourierConfig::default(), transport);

        let entry = HandlerEntry::new("restarter", {
            let bot = bot.clone();
            move |_payload: Value| {
                let bot = bot.clone();
                async move {
                    bot.restart();
                }
            }
        });
        bot.on(EventType::Message, entry).unwrap();

        let code = bot.run_polling().await;
        assert_eq!(code, ExitCode::Restart);
        assert_eq!(code.code(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn a_running_bot_rejects_a_second_loop_and_late_registration() {
        let transport = ScriptedTransport::new(Vec::new());
        let bot = Bot::with_transport(CourierConfig::default(), transport);
        collector(&bot, 1);

        let runner = {
            let bot = bot.clone();
            tokio::spawn(async move { bot.run_polling().await })
        };
        while bot.state() != BotState::Running {
            tokio::task::yield_now().await;
        }

        assert_eq!(bot.run_polling().await, ExitCode::UnexpectedError);
        let late = HandlerEntry::new("late", |_payload: Value| async {});
        assert!(bot.on(EventType::Message, late).is_err());

        bot.shutdown();
        assert_eq!(runner.await.unwrap(), ExitCode::Ok);
    }
}

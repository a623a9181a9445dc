//! Countdown Bot Example
//!
//! A small demonstration of the two handler layers in Courier:
//!
//! - a permanent `/test` command handler, registered once at startup
//! - a temporary countdown flow the handler arms in the requesting chat
//!
//! Send `/test` in a private chat and the bot counts your next messages
//! down from three before it goes off. `/cancel` defuses it, and an
//! abandoned countdown expires on its own after five minutes.
//!
//! # Usage
//!
//! ```bash
//! COURIER_TOKEN=<bot token> cargo run --package countdown-bot
//! ```

use std::time::Duration;

use anyhow::Result;
use serde_json::{Value, json};
use tracing::{error, info};

use courier::prelude::*;

const START_COUNT: i64 = 3;

// ============================================================================
// Handlers and Flow Steps
// ============================================================================

/// `/test` handler: arms a countdown flow pinned to the requesting chat.
async fn start_countdown(bot: Bot, message: Value) -> Outcome {
    let Some(chat) = message.i64_at("chat.id") else {
        return Outcome::Unhandled;
    };
    info!(chat, "arming a countdown");

    let cancel_bot = bot.clone();
    let tick_bot = bot.clone();
    bot.flows().register(
        FlowBuilder::new(EventType::Message)
            .named("countdown")
            .scoped([filters::chat_ids([chat])])
            .context(json!({"count": START_COUNT}))
            .entry(
                FlowEntry::new("cancel", move |message, _ctx| {
                    defuse(cancel_bot.clone(), message)
                })
                .with_filters([filters::commands(["cancel"])]),
            )
            .entry(FlowEntry::new("tick", move |message, ctx| {
                tick(tick_bot.clone(), message, ctx)
            }))
            .expires_in(Duration::from_secs(300)),
    );

    if let Err(err) = api::reply_to(&bot, &message, "Countdown armed. Say anything...")
        .wait()
        .await
    {
        error!(error = %err, "failed to announce the countdown");
    }
    Outcome::Handled
}

/// Countdown step: every message in the chat ticks the counter down.
async fn tick(bot: Bot, message: Value, ctx: FlowContext) -> Outcome {
    let Some(chat) = message.i64_at("chat.id") else {
        return Outcome::Unhandled;
    };
    let count = ctx.get("count").and_then(|v| v.as_i64()).unwrap_or(0);

    if count > 0 {
        // Fire and forget; the call pool logs failures.
        api::send_message(&bot, chat, format!("Explode after {count}..."));
        ctx.set("count", count - 1);
        Outcome::Unhandled
    } else {
        api::send_message(&bot, chat, "BOOM!");
        Outcome::Handled
    }
}

/// `/cancel` step: defuses the countdown and completes the flow.
async fn defuse(bot: Bot, message: Value) -> Outcome {
    if let Some(chat) = message.i64_at("chat.id") {
        api::send_message(&bot, chat, "Explosion canceled!");
    }
    Outcome::Handled
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let config = courier::runtime::load_config()?;
    courier::runtime::logging::init_from_config(&config.logging);

    let bot = Bot::new(config)?;

    let armed = bot.clone();
    bot.on(
        EventType::Message,
        HandlerEntry::new("test", move |message| start_countdown(armed.clone(), message))
            .with_filters([
                filters::commands(["test"]),
                filters::chat_types(["private"]),
            ]),
    )?;

    bot.on_startup(|bot| async move {
        api::set_my_commands(
            &bot,
            &[("test", "arm a countdown"), ("cancel", "defuse it")],
        );
        info!("countdown bot ready");
        Ok(())
    });

    // Blocks until shutdown; the exit code tells a supervisor what happened.
    std::process::exit(bot.run().await.code())
}

use std::fmt::Write as _;
use std::sync::Arc;

use teloxide::{dispatching::UpdateHandler, prelude::*, utils::command::BotCommands};
use tracing::{info, warn};

use common::TradingMode;
use engine::{SettingsPatch, TradeManager};

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Dependencies injected into every handler via `dptree`.
#[derive(Clone)]
pub struct BotDeps {
    pub manager: TradeManager,
    pub trading_mode: TradingMode,
    pub allowed_user_ids: Arc<Vec<i64>>,
}

/// Telegram bot commands exposed to the operator.
#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "TradeWatch commands:")]
pub enum Command {
    #[command(description = "Show mode, watcher count and simulation results")]
    Status,
    #[command(description = "List watchers grouped by aggregator")]
    Watchers,
    #[command(description = "Enable or disable trade entries: /entries on|off")]
    Entries(String),
    #[command(description = "Enable or disable trade exits: /exits on|off")]
    Exits(String),
    #[command(description = "Set agreeing votes required: /confirmations <n>")]
    Confirmations(String),
}

/// Start the Telegram bot in long-polling mode.
pub async fn start_bot(token: String, deps: BotDeps) {
    let bot = Bot::new(token);
    let deps = Arc::new(deps);

    info!("Telegram bot starting (long-polling)");

    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![deps])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

fn schema() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync>> {
    use dptree::case;

    let command_handler = teloxide::filter_command::<Command, _>()
        .branch(case![Command::Status].endpoint(handle_status))
        .branch(case![Command::Watchers].endpoint(handle_watchers))
        .branch(case![Command::Entries(arg)].endpoint(handle_entries))
        .branch(case![Command::Exits(arg)].endpoint(handle_exits))
        .branch(case![Command::Confirmations(arg)].endpoint(handle_confirmations));

    Update::filter_message()
        .filter_map(|msg: Message| msg.from().map(|u| u.id))
        .filter_async(auth_filter)
        .branch(command_handler)
}

/// Silently drop messages from users not in the allowed list.
async fn auth_filter(user_id: UserId, deps: Arc<BotDeps>) -> bool {
    let uid = user_id.0 as i64;
    let allowed = deps.allowed_user_ids.contains(&uid);
    if !allowed {
        warn!(user_id = uid, "Unauthorized Telegram access attempt");
    }
    allowed
}

async fn handle_status(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let mode = deps.trading_mode;
    let watchers = deps.manager.watcher_count().await;
    let aggregators = deps.manager.aggregators().await.len();
    let mut text = format!(
        "TradeWatch Status\n\
         Mode: {mode}\n\
         Watchers: {watchers}\n\
         Aggregators: {aggregators}"
    );
    if mode.is_simulation() {
        let summary = deps.manager.collaborators().stats.summary().await;
        let _ = write!(
            text,
            "\nSimulated trades: {} (win rate {:.0}%)\nTotal profit: {:+.2}",
            summary.trades,
            summary.win_rate * 100.0,
            summary.total_profit
        );
    }
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_watchers(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let groups = deps.manager.watchers_by_aggregator().await;
    if groups.is_empty() {
        bot.send_message(msg.chat.id, "No watchers running.").await?;
        return Ok(());
    }

    let mut text = String::new();
    for group in groups {
        let id = group.aggregator.id().await;
        let settings = group.aggregator.settings().await;
        let _ = writeln!(
            text,
            "{id} (confirmations {}, entries {}, exits {})",
            settings.min_confirmations,
            on_off(settings.entry_enabled),
            on_off(settings.exit_enabled)
        );
        for watcher in group.watchers {
            let signal = watcher
                .state()
                .signal()
                .await
                .map_or_else(|| "-".to_string(), |s| s.to_string());
            let _ = writeln!(text, "  {} [{signal}]", watcher.id());
        }
    }
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_entries(bot: Bot, msg: Message, deps: Arc<BotDeps>, arg: String) -> HandlerResult {
    let reply = match parse_switch(&arg) {
        Some(enabled) => {
            let patch = SettingsPatch {
                entry_enabled: Some(enabled),
                ..Default::default()
            };
            let n = deps.manager.update_all(&patch).await;
            info!(enabled, aggregators = n, "Entries toggled from Telegram");
            format!("Entries {} on {n} aggregator(s).", on_off(enabled))
        }
        None => "Usage: /entries on|off".to_string(),
    };
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

async fn handle_exits(bot: Bot, msg: Message, deps: Arc<BotDeps>, arg: String) -> HandlerResult {
    let reply = match parse_switch(&arg) {
        Some(enabled) => {
            let patch = SettingsPatch {
                exit_enabled: Some(enabled),
                ..Default::default()
            };
            let n = deps.manager.update_all(&patch).await;
            info!(enabled, aggregators = n, "Exits toggled from Telegram");
            format!("Exits {} on {n} aggregator(s).", on_off(enabled))
        }
        None => "Usage: /exits on|off".to_string(),
    };
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

async fn handle_confirmations(
    bot: Bot,
    msg: Message,
    deps: Arc<BotDeps>,
    arg: String,
) -> HandlerResult {
    let reply = match parse_confirmations(&arg) {
        Some(n) => {
            let patch = SettingsPatch {
                min_confirmations: Some(n),
                ..Default::default()
            };
            let updated = deps.manager.update_all(&patch).await;
            info!(min_confirmations = n, aggregators = updated, "Confirmations set from Telegram");
            format!("Confirmations set to {n} on {updated} aggregator(s).")
        }
        None => "Usage: /confirmations <n> (n >= 1)".to_string(),
    };
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

fn parse_switch(arg: &str) -> Option<bool> {
    match arg.trim().to_lowercase().as_str() {
        "on" | "true" | "1" => Some(true),
        "off" | "false" | "0" => Some(false),
        _ => None,
    }
}

fn parse_confirmations(arg: &str) -> Option<usize> {
    arg.trim().parse::<usize>().ok().filter(|n| *n >= 1)
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

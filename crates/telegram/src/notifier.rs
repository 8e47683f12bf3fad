use async_trait::async_trait;
use teloxide::prelude::*;
use tracing::warn;

use common::{Bar, Contract, Interval, Notifier, PatternInfo, Signal, Trade};

/// Pushes trade lifecycle alerts to every allowed chat.
pub struct TelegramNotifier {
    bot: Bot,
    chat_ids: Vec<ChatId>,
}

impl TelegramNotifier {
    pub fn new(bot: Bot, user_ids: &[i64]) -> Self {
        Self {
            bot,
            chat_ids: user_ids.iter().map(|&id| ChatId(id)).collect(),
        }
    }

    async fn broadcast(&self, message: &str) {
        send_alert(&self.bot, &self.chat_ids, message).await;
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn on_entry(&self, contract: &Contract, trade: &Trade, recent_bar: &Bar) {
        self.broadcast(&entry_message(contract, trade, recent_bar)).await;
    }

    async fn on_exit(&self, contract: &Contract, trade: &Trade, recent_bar: &Bar) {
        self.broadcast(&exit_message(contract, trade, recent_bar)).await;
    }

    async fn on_pattern_info_changed(
        &self,
        contract: &Contract,
        interval: Interval,
        signal: Option<Signal>,
        info: &PatternInfo,
    ) {
        self.broadcast(&pattern_message(contract, interval, signal, info))
            .await;
    }
}

/// Send a proactive alert to all configured chat IDs.
pub async fn send_alert(bot: &Bot, chat_ids: &[ChatId], message: &str) {
    for &chat_id in chat_ids {
        if let Err(e) = bot.send_message(chat_id, message).await {
            warn!(chat_id = ?chat_id, error = %e, "Failed to send Telegram alert");
        }
    }
}

pub fn entry_message(contract: &Contract, trade: &Trade, recent_bar: &Bar) -> String {
    format!(
        "ENTRY {label} {direction}\n\
         Price: {price:.4}  Stop: {stop:.4}\n\
         Units: {units}  Confidence: {confidence:.2}\n\
         Bar: {bar}",
        label = contract.label(),
        direction = trade.signal.direction,
        price = trade.price,
        stop = trade.stop_price,
        units = trade.units,
        confidence = trade.signal.confidence,
        bar = recent_bar.open_time.format("%Y-%m-%d %H:%M UTC"),
    )
}

pub fn exit_message(contract: &Contract, trade: &Trade, recent_bar: &Bar) -> String {
    let profit = trade.profit_at(recent_bar.close);
    let reason = if trade.stop_hit(recent_bar.close) {
        "stop hit"
    } else {
        "strategy exit"
    };
    format!(
        "EXIT {label} {direction} ({reason})\n\
         Entry: {entry:.4}  Close: {close:.4}\n\
         PnL at close: {profit:+.2}",
        label = contract.label(),
        direction = trade.signal.direction,
        entry = trade.price,
        close = recent_bar.close,
    )
}

pub fn pattern_message(
    contract: &Contract,
    interval: Interval,
    signal: Option<Signal>,
    info: &PatternInfo,
) -> String {
    let headline = match signal {
        Some(signal) => format!("Pattern {} {interval}s: {signal}", contract.label()),
        None => format!("Pattern {} {interval}s: none", contract.label()),
    };
    info.iter().fold(headline, |mut text, (key, value)| {
        text.push_str(&format!("\n{key}: {value:.4}"));
        text
    })
}

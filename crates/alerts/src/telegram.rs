//! Telegram transport for transaction alerts.

use crate::notifier::{Notifier, NotifyError};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use watchlist_core::{Chain, TransactionFingerprint, WatchlistEntry};

/// Sends alerts to Telegram chats through the Bot API.
pub struct TelegramNotifier {
    bot: Bot,
    chain: Chain,
}

impl TelegramNotifier {
    /// Create a notifier with the given bot token. `chain` picks the explorer
    /// used for transaction links.
    pub fn new(token: &str, chain: Chain) -> Self {
        Self {
            bot: Bot::new(token),
            chain,
        }
    }

    /// Send an HTML message to a chat.
    pub async fn send_alert(&self, chat_id: &str, message: &str) -> Result<(), NotifyError> {
        let chat_id = parse_chat_id(chat_id)?;
        self.bot
            .send_message(chat_id, message)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(
        &self,
        destination: &str,
        entry: &WatchlistEntry,
        tx: &TransactionFingerprint,
    ) -> Result<(), NotifyError> {
        let message = format_alert_message(entry, tx, self.chain);
        self.send_alert(destination, &message).await
    }

    fn name(&self) -> &'static str {
        "telegram"
    }
}

fn parse_chat_id(raw: &str) -> Result<ChatId, NotifyError> {
    raw.trim()
        .parse::<i64>()
        .map(ChatId)
        .map_err(|_| NotifyError::InvalidDestination(raw.to_string()))
}

/// Format a detected transaction as an alert message.
pub fn format_alert_message(
    entry: &WatchlistEntry,
    tx: &TransactionFingerprint,
    chain: Chain,
) -> String {
    format!(
        "🚨 <b>New Transaction Detected</b>\n\n\
         <b>Watched:</b> <code>{}</code>\n\
         <b>Tx:</b> <code>{}</code>\n\
         <b>From:</b> <code>{}</code>\n\
         <b>To:</b> <code>{}</code>\n\
         <b>Value:</b> {} {}\n\
         <b>Block:</b> {} ({})\n\n\
         ⏰ {}\n\
         <a href=\"{}\">View on explorer</a>",
        entry.address,
        tx.hash,
        tx.from,
        tx.to_display(),
        tx.value,
        chain.native_symbol(),
        tx.block_number,
        chain,
        tx.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        chain.tx_url(&tx.hash),
    )
}

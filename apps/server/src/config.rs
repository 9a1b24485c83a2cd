//! Application configuration.

use clap::Parser;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use url::Url;
use watchlist_alerts::{NotifierConfig, RetryPolicy, StoreConfig};
use watchlist_core::Chain;
use watchlist_feeds::EtherscanConfig;

/// Watchlist monitor CLI
#[derive(Parser, Debug, Clone)]
#[command(name = "watchlist-monitor")]
#[command(about = "Polls watched addresses and alerts on new transactions", long_about = None)]
pub struct Args {
    /// SQLite database shared with the watchlist API
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://fraud_history.db")]
    pub database_url: String,

    /// Etherscan API key
    #[arg(long, env = "ETHERSCAN_API_KEY", hide_env_values = true)]
    pub etherscan_api_key: String,

    /// Etherscan v2 endpoint
    #[arg(long, env = "ETHERSCAN_BASE_URL", default_value = EtherscanConfig::DEFAULT_BASE_URL)]
    pub etherscan_base_url: String,

    /// Chain id of the monitored network
    #[arg(long, env = "CHAIN_ID", default_value_t = 1)]
    pub chain_id: u64,

    /// Seconds between cycles
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value_t = 120)]
    pub poll_interval_secs: u64,

    /// Delay between per-address requests in milliseconds
    #[arg(long, env = "RATE_LIMIT_DELAY_MS", default_value_t = 300)]
    pub rate_limit_delay_ms: u64,

    /// Cooldown after a failed cycle in seconds
    #[arg(long, env = "ERROR_COOLDOWN_SECS", default_value_t = 60)]
    pub error_cooldown_secs: u64,

    /// HTTP timeout for ledger requests in seconds
    #[arg(long, env = "FETCH_TIMEOUT_SECS", default_value_t = 10)]
    pub fetch_timeout_secs: u64,

    /// Attempts for a store operation that finds the database locked
    #[arg(long, env = "STORE_MAX_ATTEMPTS", default_value_t = 5)]
    pub store_max_attempts: u32,

    /// Delay between store retries in milliseconds
    #[arg(long, env = "STORE_RETRY_DELAY_MS", default_value_t = 200)]
    pub store_retry_delay_ms: u64,

    /// SQLite busy timeout in milliseconds
    #[arg(long, env = "STORE_BUSY_TIMEOUT_MS", default_value_t = 5000)]
    pub store_busy_timeout_ms: u64,

    /// Telegram bot token; notifications are disabled without it
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    pub telegram_bot_token: Option<String>,

    /// Send attempts per alert
    #[arg(long, env = "NOTIFY_MAX_ATTEMPTS", default_value_t = 3)]
    pub notify_max_attempts: u32,

    /// Log level: trace, debug, info, warn, error
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Run a single cycle and exit
    #[arg(long, default_value_t = false)]
    pub once: bool,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("ETHERSCAN_API_KEY must not be empty")]
    MissingApiKey,
    #[error("Unsupported chain id: {0}")]
    UnknownChain(u64),
    #[error("Invalid endpoint URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Timing of the run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    pub poll_interval: Duration,
    pub rate_limit_delay: Duration,
    pub error_cooldown: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(120),
            rate_limit_delay: Duration::from_millis(300),
            error_cooldown: Duration::from_secs(60),
        }
    }
}

/// Validated process configuration.
#[derive(Clone)]
pub struct MonitorConfig {
    pub etherscan: EtherscanConfig,
    pub store: StoreConfig,
    pub notifier: NotifierConfig,
    pub telegram_bot_token: Option<String>,
    pub loop_settings: LoopSettings,
    pub log_level: String,
    pub once: bool,
}

impl MonitorConfig {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let api_key = args.etherscan_api_key.trim().to_string();
        if api_key.is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        let chain = Chain::from_id(args.chain_id).ok_or(ConfigError::UnknownChain(args.chain_id))?;
        let base_url = Url::parse(&args.etherscan_base_url).map_err(|e| ConfigError::InvalidUrl {
            url: args.etherscan_base_url.clone(),
            reason: e.to_string(),
        })?;

        if args.poll_interval_secs == 0 {
            return Err(ConfigError::Zero("POLL_INTERVAL_SECS"));
        }
        if args.fetch_timeout_secs == 0 {
            return Err(ConfigError::Zero("FETCH_TIMEOUT_SECS"));
        }
        if args.store_max_attempts == 0 {
            return Err(ConfigError::Zero("STORE_MAX_ATTEMPTS"));
        }
        if args.notify_max_attempts == 0 {
            return Err(ConfigError::Zero("NOTIFY_MAX_ATTEMPTS"));
        }

        let telegram_bot_token = args
            .telegram_bot_token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        Ok(Self {
            etherscan: EtherscanConfig {
                base_url,
                api_key,
                chain,
                timeout: Duration::from_secs(args.fetch_timeout_secs),
            },
            store: StoreConfig {
                database_url: args.database_url,
                busy_timeout: Duration::from_millis(args.store_busy_timeout_ms),
                retry: RetryPolicy::new(
                    args.store_max_attempts,
                    Duration::from_millis(args.store_retry_delay_ms),
                ),
                ..Default::default()
            },
            notifier: NotifierConfig {
                max_attempts: args.notify_max_attempts,
                ..Default::default()
            },
            telegram_bot_token,
            loop_settings: LoopSettings {
                poll_interval: Duration::from_secs(args.poll_interval_secs),
                rate_limit_delay: Duration::from_millis(args.rate_limit_delay_ms),
                error_cooldown: Duration::from_secs(args.error_cooldown_secs),
            },
            log_level: args.log_level,
            once: args.once,
        })
    }

    pub fn chain(&self) -> Chain {
        self.etherscan.chain
    }
}

impl fmt::Debug for MonitorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorConfig")
            .field("etherscan", &self.etherscan)
            .field("store", &self.store)
            .field("notifier", &self.notifier)
            .field(
                "telegram_bot_token",
                &self.telegram_bot_token.as_ref().map(|_| "<redacted>"),
            )
            .field("loop_settings", &self.loop_settings)
            .field("log_level", &self.log_level)
            .field("once", &self.once)
            .finish()
    }
}

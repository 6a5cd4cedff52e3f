use crate::RunMode;

/// All configuration loaded from environment variables at startup.
/// Missing required variables cause an immediate panic with a clear message.
#[derive(Debug, Clone)]
pub struct Config {
    // Exchange credentials (required only for live mode)
    pub bybit_api_key: String,
    pub bybit_api_secret: String,
    pub bybit_testnet: bool,

    // Run mode: backtest | replay | live
    pub run_mode: RunMode,

    // Session
    pub symbol: String,
    pub interval: String,
    pub lookback_bars: usize,
    pub poll_seconds: u64,

    // Trade ledger CSV path
    pub report_path: String,

    // Strategy config file path
    pub strategy_config_path: String,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let run_mode = match required_env("RUN_MODE").to_lowercase().as_str() {
            "backtest" => RunMode::Backtest,
            "replay" => RunMode::Replay,
            "live" => RunMode::Live,
            other => panic!("ERROR: RUN_MODE must be 'backtest', 'replay' or 'live', got: '{other}'"),
        };

        let bybit_api_key = optional_env("BYBIT_API_KEY").unwrap_or_default();
        let bybit_api_secret = optional_env("BYBIT_API_SECRET").unwrap_or_default();
        if run_mode == RunMode::Live && (bybit_api_key.is_empty() || bybit_api_secret.is_empty()) {
            panic!("BYBIT_API_KEY and BYBIT_API_SECRET must be set for live mode. Check your .env file.");
        }

        Config {
            bybit_api_key,
            bybit_api_secret,
            bybit_testnet: optional_env("BYBIT_TESTNET")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(true),
            run_mode,
            symbol: optional_env("SYMBOL").unwrap_or_else(|| "BTCUSDT".to_string()),
            interval: optional_env("INTERVAL").unwrap_or_else(|| "15".to_string()),
            lookback_bars: optional_env("LOOKBACK_BARS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(500),
            poll_seconds: optional_env("POLL_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            report_path: optional_env("REPORT_PATH")
                .unwrap_or_else(|| "reports/paper_trades.csv".to_string()),
            strategy_config_path: optional_env("STRATEGY_CONFIG_PATH")
                .unwrap_or_else(|| "config/strategy.toml".to_string()),
        }
    }
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

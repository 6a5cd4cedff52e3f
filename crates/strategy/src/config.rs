use serde::{Deserialize, Serialize};

/// Strategy config file (TOML).
///
/// Example `config/strategy.toml`:
/// ```toml
/// [strategy]
/// type = "sma_cross"
/// fast = 20
/// slow = 50
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyFileConfig {
    pub strategy: StrategyConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyConfig {
    /// Strategy type identifier, currently only "sma_cross".
    #[serde(rename = "type")]
    pub strategy_type: String,
    pub fast: Option<usize>,
    pub slow: Option<usize>,
}

impl StrategyFileConfig {
    /// Load from a TOML file. Exits process on error.
    pub fn load(path: &str) -> Self {
        let content = std::fs::read_to_string(path)
            .unwrap_or_else(|e| panic!("Failed to read strategy config at '{path}': {e}"));
        toml::from_str(&content)
            .unwrap_or_else(|e| panic!("Failed to parse strategy config at '{path}': {e}"))
    }

    /// Default SMA-cross setup when no config file is present.
    pub fn load_or_default(path: &str) -> Self {
        if std::path::Path::new(path).exists() {
            Self::load(path)
        } else {
            Self {
                strategy: StrategyConfig {
                    strategy_type: "sma_cross".to_string(),
                    fast: Some(20),
                    slow: Some(50),
                },
            }
        }
    }
}

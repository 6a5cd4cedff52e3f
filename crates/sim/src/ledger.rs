use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use common::{Result, Trade};

/// Append-only CSV ledger of closed trades.
///
/// One row per closed position, ordered by close time. The header is
/// written once when the file is created; subsequent sessions append.
pub struct TradeLog {
    path: PathBuf,
    interval: String,
    mode: String,
}

/// The fixed column set persisted for every closed trade.
#[derive(Debug, Serialize)]
struct TradeRow<'a> {
    time: String,
    symbol: &'a str,
    side: String,
    entry_px: f64,
    exit_px: f64,
    qty: f64,
    reason: String,
    pnl: f64,
    equity_after: f64,
    bar_interval: &'a str,
    mode: &'a str,
}

impl TradeLog {
    /// Open (or create) the ledger at `path`. Creates parent directories
    /// and writes the CSV header if the file does not exist yet.
    pub fn open(path: impl AsRef<Path>, interval: impl Into<String>, mode: impl Into<String>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if !path.exists() {
            let file = OpenOptions::new().create(true).write(true).open(&path)?;
            let mut writer = csv::Writer::from_writer(file);
            writer.write_record([
                "time",
                "symbol",
                "side",
                "entry_px",
                "exit_px",
                "qty",
                "reason",
                "pnl",
                "equity_after",
                "bar_interval",
                "mode",
            ])?;
            writer.flush()?;
            info!(path = %path.display(), "Trade ledger created");
        }
        Ok(Self {
            path,
            interval: interval.into(),
            mode: mode.into(),
        })
    }

    /// Append one closed trade.
    pub fn append(&self, trade: &Trade) -> Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        writer.serialize(TradeRow {
            time: trade.exit_time.to_rfc3339(),
            symbol: &trade.symbol,
            side: trade.side.to_string(),
            entry_px: trade.entry_price,
            exit_px: trade.exit_price,
            qty: trade.quantity,
            reason: trade.reason.to_string(),
            pnl: trade.pnl,
            equity_after: trade.equity_after,
            bar_interval: &self.interval,
            mode: &self.mode,
        })?;
        writer.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

use common::{
    Bar, BracketOrder, Error, ExchangeClient, InstrumentFilters, Result, Side,
};

const MAINNET_URL: &str = "https://api.bybit.com";
const TESTNET_URL: &str = "https://api-testnet.bybit.com";
const RECV_WINDOW: &str = "5000";
const CATEGORY: &str = "linear";

/// REST client for Bybit v5 (USDT perpetuals).
///
/// Market data endpoints are public; order endpoints are signed with
/// HMAC-SHA256 over `timestamp + api_key + recv_window + payload`.
pub struct BybitClient {
    api_key: String,
    secret: String,
    base_url: String,
    http: Client,
}

impl BybitClient {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>, testnet: bool) -> Self {
        Self {
            api_key: api_key.into(),
            secret: secret.into(),
            base_url: if testnet { TESTNET_URL } else { MAINNET_URL }.to_string(),
            http: Client::builder()
                .use_rustls_tls()
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64
    }

    fn sign(&self, payload: &str) -> String {
        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn public_get<T: DeserializeOwned>(&self, path: &str, query: &str) -> Result<T> {
        let url = format!("{}{path}?{query}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Exchange(format!("HTTP {status}: {body}")));
        }
        unwrap_envelope(&body)
    }

    async fn signed_post<T: DeserializeOwned>(&self, path: &str, body: &serde_json::Value) -> Result<T> {
        let ts = Self::timestamp_ms();
        let body_str = body.to_string();
        let signature = self.sign(&format!("{ts}{}{RECV_WINDOW}{body_str}", self.api_key));
        let url = format!("{}{path}", self.base_url);

        let resp = self
            .http
            .post(&url)
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", ts.to_string())
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW)
            .header("X-BAPI-SIGN", signature)
            .header("Content-Type", "application/json")
            .body(body_str)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Exchange(format!("HTTP {status}: {text}")));
        }
        unwrap_envelope(&text)
    }
}

fn bybit_side(side: Side) -> &'static str {
    match side {
        Side::Long => "Buy",
        Side::Short => "Sell",
    }
}

#[async_trait]
impl ExchangeClient for BybitClient {
    async fn fetch_bars(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Bar>> {
        let query = format!("category={CATEGORY}&symbol={symbol}&interval={interval}&limit={limit}");
        let result: KlineResult = self.public_get("/v5/market/kline", &query).await?;

        if result.list.is_empty() {
            return Err(Error::Data(format!(
                "no klines returned for {symbol} interval {interval}"
            )));
        }

        // Bybit returns newest-first; the simulators expect oldest-first.
        let mut bars = Vec::with_capacity(result.list.len());
        for row in result.list.iter().rev() {
            bars.push(parse_kline_row(row)?);
        }
        debug!(symbol = symbol, bars = bars.len(), "Fetched klines");
        Ok(bars)
    }

    async fn submit_order(&self, order: &BracketOrder) -> Result<String> {
        let body = serde_json::json!({
            "category": CATEGORY,
            "symbol": order.symbol,
            "side": bybit_side(order.side),
            "orderType": "Limit",
            "qty": order.quantity.to_string(),
            "price": order.price.to_string(),
            // PostOnly: the resting entry never crosses the book
            "timeInForce": "PostOnly",
            "tpslMode": "Full",
            "takeProfit": order.take_profit.to_string(),
            "stopLoss": order.stop_loss.to_string(),
            "orderLinkId": order.id,
        });

        debug!(symbol = %order.symbol, side = %order.side, "Submitting bracket order");
        let result: OrderResult = self.signed_post("/v5/order/create", &body).await?;
        Ok(result.order_id)
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()> {
        let body = serde_json::json!({
            "category": CATEGORY,
            "symbol": symbol,
            "orderId": order_id,
        });
        let _: OrderResult = self.signed_post("/v5/order/cancel", &body).await?;
        Ok(())
    }

    async fn close_position_market(&self, symbol: &str, side: Side, quantity: f64) -> Result<()> {
        let body = serde_json::json!({
            "category": CATEGORY,
            "symbol": symbol,
            "side": bybit_side(side.opposite()),
            "orderType": "Market",
            "qty": quantity.to_string(),
            "reduceOnly": true,
            "timeInForce": "IOC",
        });
        let _: OrderResult = self.signed_post("/v5/order/create", &body).await?;
        Ok(())
    }

    async fn instrument_filters(&self, symbol: &str) -> Result<InstrumentFilters> {
        let query = format!("category={CATEGORY}&symbol={symbol}");
        let result: InstrumentsResult = self
            .public_get("/v5/market/instruments-info", &query)
            .await?;

        let info = result
            .list
            .first()
            .ok_or_else(|| Error::Exchange(format!("no instrument info for {symbol}")))?;

        Ok(InstrumentFilters {
            min_qty: parse_f64(&info.lot_size_filter.min_order_qty)?,
            qty_step: parse_f64(&info.lot_size_filter.qty_step)?,
            tick_size: parse_f64(&info.price_filter.tick_size)?,
        })
    }
}

// ─── Bybit v5 response types ─────────────────────────────────────────────────

#[derive(Deserialize)]
struct Envelope<T> {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg")]
    ret_msg: String,
    result: Option<T>,
}

fn unwrap_envelope<T: DeserializeOwned>(body: &str) -> Result<T> {
    let envelope: Envelope<T> = serde_json::from_str(body)?;
    if envelope.ret_code != 0 {
        return Err(Error::Exchange(format!(
            "retCode {}: {}",
            envelope.ret_code, envelope.ret_msg
        )));
    }
    envelope
        .result
        .ok_or_else(|| Error::Exchange("missing result payload".to_string()))
}

#[derive(Deserialize)]
struct KlineResult {
    /// Rows of `[startTime, open, high, low, close, volume, turnover]`,
    /// newest first.
    list: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct OrderResult {
    #[serde(rename = "orderId")]
    order_id: String,
}

#[derive(Deserialize)]
struct InstrumentsResult {
    list: Vec<InstrumentInfo>,
}

#[derive(Deserialize)]
struct InstrumentInfo {
    #[serde(rename = "lotSizeFilter")]
    lot_size_filter: LotSizeFilter,
    #[serde(rename = "priceFilter")]
    price_filter: PriceFilter,
}

#[derive(Deserialize)]
struct LotSizeFilter {
    #[serde(rename = "minOrderQty")]
    min_order_qty: String,
    #[serde(rename = "qtyStep")]
    qty_step: String,
}

#[derive(Deserialize)]
struct PriceFilter {
    #[serde(rename = "tickSize")]
    tick_size: String,
}

fn parse_f64(s: &str) -> Result<f64> {
    s.parse::<f64>()
        .map_err(|e| Error::Exchange(format!("bad numeric field '{s}': {e}")))
}

fn parse_kline_row(row: &[String]) -> Result<Bar> {
    if row.len() < 6 {
        return Err(Error::Exchange(format!("short kline row: {} fields", row.len())));
    }
    let ts_ms = row[0]
        .parse::<i64>()
        .map_err(|e| Error::Exchange(format!("bad kline timestamp '{}': {e}", row[0])))?;
    let ts: DateTime<Utc> = Utc
        .timestamp_millis_opt(ts_ms)
        .single()
        .ok_or_else(|| Error::Exchange(format!("out-of-range kline timestamp {ts_ms}")))?;

    Ok(Bar {
        ts,
        open: parse_f64(&row[1])?,
        high: parse_f64(&row[2])?,
        low: parse_f64(&row[3])?,
        close: parse_f64(&row[4])?,
        volume: parse_f64(&row[5])?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kline_rows_parse_and_reject_short_rows() {
        let row: Vec<String> = ["1700000000000", "50000", "50100", "49900", "50050", "12.5", "625000"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let bar = parse_kline_row(&row).unwrap();
        assert_eq!(bar.ts.timestamp_millis(), 1_700_000_000_000);
        assert!((bar.open - 50_000.0).abs() < 1e-9);
        assert!((bar.volume - 12.5).abs() < 1e-9);

        assert!(parse_kline_row(&row[..4].to_vec()).is_err());
    }

    #[test]
    fn envelope_surfaces_exchange_errors() {
        let body = r#"{"retCode":10001,"retMsg":"params error","result":null}"#;
        let err = unwrap_envelope::<OrderResult>(body).unwrap_err();
        assert!(matches!(err, Error::Exchange(_)), "got {err:?}");
    }

    #[test]
    fn envelope_unwraps_result_on_success() {
        let body = r#"{"retCode":0,"retMsg":"OK","result":{"orderId":"abc-123"}}"#;
        let result: OrderResult = unwrap_envelope(body).unwrap();
        assert_eq!(result.order_id, "abc-123");
    }
}

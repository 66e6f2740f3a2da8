use rust_decimal::Decimal;
use serde::Deserialize;

/// Deserialize Binance string-encoded numbers to Decimal.
pub fn string_to_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse::<Decimal>().map_err(serde::de::Error::custom)
}

/// Binance aggregate trade stream event (symbol@aggTrade).
///
/// `trade_time` (`T`) drives bucketing; `event_time` (`E`) is the exchange's
/// dispatch time and is kept for diagnostics only.
#[derive(Debug, Deserialize)]
pub struct BinanceAggTradeEvent {
    #[serde(rename = "e")]
    pub event_type: String,
    #[serde(rename = "E")]
    pub event_time: u64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "a")]
    pub agg_trade_id: u64,
    #[serde(rename = "p", deserialize_with = "string_to_decimal")]
    pub price: Decimal,
    #[serde(rename = "q", deserialize_with = "string_to_decimal")]
    pub qty: Decimal,
    #[serde(rename = "T")]
    pub trade_time: u64,
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
}

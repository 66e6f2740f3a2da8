use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite;

use super::types::BinanceAggTradeEvent;
use crate::model::tick::Tick;

/// Connection lifecycle for one symbol's feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Disconnected,
    Connecting,
    Streaming,
}

impl fmt::Display for FeedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Streaming => write!(f, "streaming"),
        }
    }
}

/// Fixed-delay reconnect policy with explicit per-symbol retry state.
#[derive(Debug)]
pub struct ReconnectPolicy {
    delay: Duration,
    attempt: u32,
}

impl ReconnectPolicy {
    pub fn new(delay: Duration) -> Self {
        Self { delay, attempt: 0 }
    }

    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;
        self.delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

pub struct BinanceWsClient {
    url: String,
    symbol: String,
}

impl BinanceWsClient {
    pub fn new(ws_base_url: &str, symbol: &str) -> Self {
        Self {
            url: format!("{}/{}@aggTrade", ws_base_url, symbol.to_lowercase()),
            symbol: symbol.to_string(),
        }
    }

    fn transition(&self, state: &mut FeedState, to: FeedState) {
        tracing::info!(symbol = %self.symbol, from = %state, to = %to, "feed state");
        *state = to;
    }

    /// Connect and run the receive loop with automatic reconnection.
    ///
    /// Decoded ticks are sent through `tick_tx`. A text frame that fails to
    /// decode is a single malformed tick: counted in `malformed` and skipped.
    /// Transport errors and end-of-stream both tear the connection down and
    /// re-enter the connect loop after the fixed backoff delay.
    pub async fn connect_and_run(
        &self,
        tick_tx: mpsc::Sender<Tick>,
        malformed: Arc<AtomicU64>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut policy = ReconnectPolicy::new(Duration::from_secs(5));
        let mut state = FeedState::Disconnected;

        loop {
            self.transition(&mut state, FeedState::Connecting);
            match self
                .connect_once(&tick_tx, &malformed, &mut shutdown, &mut state, &mut policy)
                .await
            {
                Ok(()) => {
                    self.transition(&mut state, FeedState::Disconnected);
                    break;
                }
                Err(e) => {
                    self.transition(&mut state, FeedState::Disconnected);
                    let delay = policy.next_delay();
                    tracing::warn!(
                        symbol = %self.symbol,
                        error = %e,
                        attempt = policy.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        "feed disconnected, reconnecting"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => continue,
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }
        Ok(())
    }

    async fn connect_once(
        &self,
        tick_tx: &mpsc::Sender<Tick>,
        malformed: &AtomicU64,
        shutdown: &mut watch::Receiver<bool>,
        state: &mut FeedState,
        policy: &mut ReconnectPolicy,
    ) -> Result<()> {
        let (ws_stream, _resp) = tokio_tungstenite::connect_async(&self.url)
            .await
            .context("WebSocket connect failed")?;

        self.transition(state, FeedState::Streaming);
        policy.reset();

        let (_write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(tungstenite::Message::Text(text))) => {
                            match serde_json::from_str::<BinanceAggTradeEvent>(&text) {
                                Ok(event) => {
                                    let tick = Tick {
                                        symbol: event.symbol,
                                        price: event.price,
                                        qty: event.qty,
                                        event_time_ms: event.trade_time,
                                    };
                                    if tick_tx.send(tick).await.is_err() {
                                        // Receiver gone: the aggregator task shut down.
                                        return Ok(());
                                    }
                                }
                                Err(e) => {
                                    malformed.fetch_add(1, Ordering::Relaxed);
                                    tracing::debug!(
                                        symbol = %self.symbol,
                                        error = %e,
                                        "dropping malformed feed frame"
                                    );
                                }
                            }
                        }
                        Some(Ok(tungstenite::Message::Ping(_))) => {
                            // tokio-tungstenite replies with pong automatically
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            return Err(anyhow::anyhow!("WebSocket read error: {}", e));
                        }
                        None => {
                            // End-of-stream is handled exactly like a transport error.
                            return Err(anyhow::anyhow!("WebSocket stream ended"));
                        }
                    }
                }
                _ = shutdown.changed() => {
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_policy_keeps_fixed_delay() {
        let mut policy = ReconnectPolicy::new(Duration::from_secs(5));
        assert_eq!(policy.attempt(), 0);
        assert_eq!(policy.next_delay(), Duration::from_secs(5));
        assert_eq!(policy.next_delay(), Duration::from_secs(5));
        assert_eq!(policy.attempt(), 2);

        policy.reset();
        assert_eq!(policy.attempt(), 0);
    }

    #[test]
    fn stream_url_targets_agg_trade() {
        let client = BinanceWsClient::new("wss://fstream.binance.com/ws", "BTCUSDT");
        assert_eq!(client.url, "wss://fstream.binance.com/ws/btcusdt@aggTrade");
    }
}

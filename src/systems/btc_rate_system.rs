use std::{sync::Arc, time::Duration};

use tokio::time::MissedTickBehavior;

use crate::{rate_client::RateClient, retry::RetryPolicy, slots::SlotPools, store::RateSink};

pub async fn btc_rate_system(
    rate_client: RateClient,
    rate_sink: Arc<dyn RateSink>,
    slots: SlotPools,
    retry: RetryPolicy,
    period: Duration,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        record_btc_rate(&rate_client, rate_sink.as_ref(), &slots, retry).await;
    }
}

/// One fetch-and-store round. `None` when nothing was stored because of a
/// failure, `Some(false)` when the quote was already there.
async fn record_btc_rate(
    rate_client: &RateClient,
    rate_sink: &dyn RateSink,
    slots: &SlotPools,
    retry: RetryPolicy,
) -> Option<bool> {
    tracing::info!(target: "server_log", "Fetching BTC rate...");

    let quote = retry
        .run("BTC rate fetch", || slots.api.run(rate_client.fetch_btc_quote()))
        .await;
    let quote = match quote {
        Ok(quote) => quote,
        Err(e) => {
            tracing::error!(target: "server_log", "Failed to fetch BTC rate after {} attempts: {}", retry.max_attempts, e);
            return None;
        }
    };

    match slots.db.run(rate_sink.add_btc_rate(quote.rate_date, quote.price)).await {
        Ok(true) => {
            tracing::info!(target: "server_log", "Stored BTC rate {} at {}", quote.price, quote.rate_date);
            Some(true)
        }
        Ok(false) => {
            tracing::info!(target: "server_log", "BTC rate at {} already stored", quote.rate_date);
            Some(false)
        }
        Err(e) => {
            tracing::error!(target: "server_log", "Failed to store BTC rate.\nError: {:?}", e);
            None
        }
    }
}

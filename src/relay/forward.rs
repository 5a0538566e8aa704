use crate::models::trade_update::TradeUpdate;
use crate::relay::RelayClient;
use std::future::Future;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Counters from one forwarding run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardStats {
    pub forwarded: u64,
    pub failed: u64,
}

/// Log every trade update and write its order to the relay until `shutdown`
/// resolves or the update channel closes.
///
/// The order is written as the broker sent it. A failed write is logged and
/// the next update is still forwarded.
pub async fn forward_updates<F>(
    mut updates: broadcast::Receiver<TradeUpdate>,
    relay: &RelayClient,
    shutdown: F,
) -> ForwardStats
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut stats = ForwardStats::default();

    loop {
        let update = tokio::select! {
            _ = &mut shutdown => break,
            update = updates.recv() => update,
        };

        let update = match update {
            Ok(u) => u,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Trade update channel lagged by {n} messages");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let order = &update.order;
        info!(
            "{:?}: {} {} {} status={:?} filled={:?} (order {})",
            update.event,
            order.side,
            order.qty.unwrap_or_default(),
            order.symbol,
            order.status,
            order.filled_qty,
            order.id
        );

        let result = if update.raw_order.is_object() {
            relay.write(&update.raw_order).await
        } else {
            relay.write(order).await
        };
        match result {
            Ok(()) => stats.forwarded += 1,
            Err(e) => {
                stats.failed += 1;
                warn!("Relay write failed for order {}: {e}", order.id);
            }
        }
    }

    stats
}

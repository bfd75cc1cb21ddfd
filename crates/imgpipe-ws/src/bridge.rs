//! Bus subscription feeding the local registry

use crate::error::{Result, WsError};
use crate::registry::ConnectionRegistry;
use imgpipe_bus::{BusError, FanoutBus, Subscription};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Forward every delivery to the connections of its user.
///
/// Runs until `shutdown` fires. A subscription that fails or ends on its own
/// is returned as an error: the process can no longer deliver events.
pub async fn run_bridge(
    mut subscription: Subscription,
    registry: ConnectionRegistry,
    shutdown: CancellationToken,
) -> Result<()> {
    loop {
        let delivery = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            next = subscription.recv() => next,
        };

        match delivery {
            Some(Ok(delivery)) => {
                let delivered = registry.broadcast(&delivery.user_id, &delivery.payload);
                tracing::debug!(user_id = %delivery.user_id, delivered, "Event fanned out");
            }
            Some(Err(e)) => {
                tracing::error!(error = %e, "Event subscription failed");
                return Err(WsError::Bus(e));
            }
            None => {
                if shutdown.is_cancelled() {
                    return Ok(());
                }
                tracing::error!("Event subscription closed");
                return Err(WsError::Bus(BusError::Closed));
            }
        }
    }
}

/// Subscribe to `bus` and run the bridge on its own task
pub async fn spawn_bridge(
    bus: Arc<dyn FanoutBus>,
    registry: ConnectionRegistry,
    shutdown: CancellationToken,
) -> Result<JoinHandle<Result<()>>> {
    let subscription = bus.subscribe().await?;
    tracing::info!("Event bridge subscribed");
    Ok(tokio::spawn(run_bridge(subscription, registry, shutdown)))
}

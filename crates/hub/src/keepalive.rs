//! Ticker de keepalive: pede ao hub um `ping` para todas as conexões a cada
//! intervalo, para que conexões meio-abertas sejam despejadas.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use herald_common::ConfigError;
use herald_protocol::Message;

use crate::HubHandle;

/// Inicia o ticker. O primeiro ping sai um intervalo depois do início.
pub fn spawn_keepalive(
    hub: HubHandle,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<JoinHandle<()>, ConfigError> {
    if period.is_zero() {
        return Err(ConfigError::Zero("keepalive"));
    }

    Ok(tokio::spawn(async move {
        let mut tick = interval_at(Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("keepalive iniciado (intervalo {:?})", period);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match hub.broadcast_all(&Message::ping()).await {
                        Ok(delivery) => debug!(
                            "ping enviado para {} conexões ({} despejadas)",
                            delivery.delivered, delivery.evicted
                        ),
                        Err(e) => {
                            warn!("keepalive encerrado: {e}");
                            return;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("keepalive encerrado");
                    return;
                }
            }
        }
    }))
}

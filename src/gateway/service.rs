//! The gateway's receive loop.
//!
//! Radio receive, broker connection attempts, liveness and shutdown are polled
//! by one `select!` on the current task, and each handler finishes before the
//! next event is looked at. A connection attempt is a branch of its own, so
//! frames keep being received and acknowledged while the broker is slow or
//! unreachable.

use std::future::{self, Future};
use std::time::{Duration, Instant};

use super::bridge::{Broker, GatewayBridge};
use super::radio::RadioLink;

const SUPERVISE_EVERY: Duration = Duration::from_secs(1);

/// Relay frames from `link` through `bridge` until `shutdown` completes.
pub async fn serve<B, S>(link: &RadioLink, bridge: &mut GatewayBridge<B>, liveness_interval: Duration, shutdown: S)
where
    B: Broker,
    S: Future<Output = ()>,
{
    let mut liveness = tokio::time::interval(liveness_interval);
    let mut supervise = tokio::time::interval(SUPERVISE_EVERY);
    let mut connecting: Option<B::Connect> = None;
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            received = link.recv() => match received {
                Ok(frame) => {
                    let source = frame.source.to_string();
                    bridge.handle_frame(&frame.bytes, &source, Instant::now()).await;
                }
                Err(e) => tracing::warn!(error = %e, "radio receive failed"),
            },
            result = in_flight(&mut connecting), if connecting.is_some() => {
                connecting = None;
                bridge.finish_connect(result, Instant::now()).await;
            }
            _ = supervise.tick(), if connecting.is_none() => {
                connecting = bridge.begin_connect(Instant::now());
            }
            _ = liveness.tick() => {
                bridge.publish_liveness(Instant::now(), link.signal_quality()).await;
            }
            _ = &mut shutdown => {
                tracing::info!(counters = ?bridge.counters(), "shutting down");
                return;
            }
        }
    }
}

/// Wait for the attempt in flight. Never completes without one.
async fn in_flight<F: Future + Unpin>(connecting: &mut Option<F>) -> F::Output {
    match connecting {
        Some(connect) => connect.await,
        None => future::pending().await,
    }
}

//! Network reachability checks feeding [`HostEvent::NetworkChanged`].
//!
//! A terminal has no `online`/`offline` notifications, so the checker
//! periodically opens a TCP connection to the transport host and reports
//! when reachability flips.

use std::time::Duration;

use tokio::{net::TcpStream, sync::mpsc, task::JoinHandle, time::timeout};

use super::environment::HostEvent;

/// Default interval between checks
pub const REACHABILITY_INTERVAL: Duration = Duration::from_secs(15);

const REACHABILITY_TIMEOUT: Duration = Duration::from_secs(5);

/// Event to report when reachability moves from `previous` to `reachable`
pub fn transition(previous: Option<bool>, reachable: bool) -> Option<HostEvent> {
    match previous {
        Some(was) if was == reachable => None,
        // The watcher starts online, so only an initial failure is news
        None if reachable => None,
        _ => Some(HostEvent::NetworkChanged { online: reachable }),
    }
}

async fn reachable(address: &str) -> bool {
    matches!(
        timeout(REACHABILITY_TIMEOUT, TcpStream::connect(address)).await,
        Ok(Ok(_))
    )
}

/// Spawn the checker task; it stops when the receiving side closes
pub fn spawn_reachability_check(
    address: String,
    interval: Duration,
    events: mpsc::UnboundedSender<HostEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut previous = None;
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let now_reachable = reachable(&address).await;
            if let Some(event) = transition(previous, now_reachable) {
                tracing::debug!("Reachability of {} changed: {}", address, now_reachable);
                if events.send(event).is_err() {
                    break;
                }
            }
            previous = Some(now_reachable);
        }
    })
}

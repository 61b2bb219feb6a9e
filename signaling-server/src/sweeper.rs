use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use tokio::task::JoinHandle;

use crate::lifecycle::LifecycleManager;

/// Periodically marks missed every call that has rung for longer than
/// `ring_timeout`, so calls never stay ringing when both clients vanish.
pub fn spawn(
    lifecycle: Arc<LifecycleManager>,
    ring_timeout: Duration,
    interval: Duration,
) -> JoinHandle<()> {
    let ring_timeout = chrono::Duration::from_std(ring_timeout)
        .unwrap_or_else(|_| chrono::Duration::seconds(i64::from(u32::MAX)));
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval(interval);
        ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticks.tick().await;
            match lifecycle.expire_ringing(chrono::Utc::now(), ring_timeout).await {
                Ok(expired) if !expired.is_empty() => {
                    info!("ring sweeper marked {} call(s) missed", expired.len());
                }
                Ok(_) => {}
                Err(e) => error!("ring sweep failed: {e}"),
            }
        }
    })
}

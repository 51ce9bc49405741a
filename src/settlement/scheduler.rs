use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use super::executor::{SettlementExecutor, TickOutcome};

/// Fixed-interval driver for the settlement executor.
///
/// The loop itself is strictly sequential, so a tick that outlives the
/// interval simply delays the next one; the executor's own guard covers
/// any out-of-band invocation on top of that.
pub struct ExecutorScheduler {
    period: Duration,
    executor: Arc<SettlementExecutor>,
}

impl ExecutorScheduler {
    pub fn new(period: Duration, executor: Arc<SettlementExecutor>) -> Self {
        Self { period, executor }
    }

    pub fn start(&self) -> JoinHandle<()> {
        let executor = self.executor.clone();
        let period = self.period;

        tokio::spawn(async move {
            info!("⏱️  Settlement scheduler started (every {:?})", period);

            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                match executor.tick().await {
                    Ok(TickOutcome::Idle) => debug!("settlement tick: no work"),
                    Ok(TickOutcome::Disabled) => debug!("settlement tick: executor disabled"),
                    Ok(outcome) => debug!("settlement tick: {:?}", outcome),
                    Err(e) => error!("settlement tick failed: {:?}", e),
                }
            }
        })
    }
}

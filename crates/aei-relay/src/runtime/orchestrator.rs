//! Coordinator ticker

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::coordinator::Coordinator;

pub struct IngestOrchestrator {
    coordinator: Arc<Coordinator>,
    interval: Duration,
}

impl IngestOrchestrator {
    pub fn new(coordinator: Arc<Coordinator>, interval: Duration) -> Self {
        Self {
            coordinator,
            interval,
        }
    }

    /// Start the ticker in background. The first run starts immediately.
    ///
    /// A run that outlasts the interval delays the next tick instead of
    /// stacking runs up behind it.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Ingestion orchestrator started, interval {:?}", self.interval);

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                self.coordinator.run_once().await;
            }
        })
    }
}

use crate::prelude::*;

use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelData {
    Shutdown,
}

/// Drives a coordinator at its scan interval.
///
/// Ticks are measured from the start of the previous tick. A new scan
/// interval moves the pending deadline to `last tick + new interval`;
/// settings changes that leave the interval alone do not touch it.
#[derive(Clone)]
pub struct Scheduler {
    coordinator: Coordinator,
    channels: Channels,
}

impl Scheduler {
    pub fn new(coordinator: Coordinator, channels: Channels) -> Self {
        Self {
            coordinator,
            channels,
        }
    }

    pub async fn start(&self) -> Result<()> {
        let mut receiver = self.channels.to_scheduler.subscribe();
        let name = self.coordinator.name().to_owned();

        let mut interval = self.coordinator.scan_interval();
        info!(
            "{}: scheduler starting, polling every {}s",
            name,
            interval.as_secs()
        );

        let mut last_tick = Instant::now();
        self.coordinator.request_refresh().await;
        // a change made while the refresh ran has no waiter to notify
        interval = self.coordinator.scan_interval();
        let mut next_tick = last_tick + interval;

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(next_tick) => {
                    last_tick = Instant::now();
                    self.coordinator.request_refresh().await;
                    interval = self.coordinator.scan_interval();
                    next_tick = last_tick + interval;
                }
                _ = self.coordinator.settings_changed() => {
                    let current = self.coordinator.scan_interval();
                    if current != interval {
                        interval = current;
                        next_tick = last_tick + interval;
                        debug!(
                            "{}: scan interval now {}s, next poll in {}s",
                            name,
                            interval.as_secs(),
                            next_tick
                                .saturating_duration_since(Instant::now())
                                .as_secs()
                        );
                    }
                }
                msg = receiver.recv() => match msg {
                    Ok(ChannelData::Shutdown) | Err(RecvError::Closed) => break,
                    Err(RecvError::Lagged(n)) => warn!("{}: scheduler lagged by {} messages", name, n),
                },
            }
        }

        info!("{}: scheduler exiting", name);
        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.channels.to_scheduler.send(ChannelData::Shutdown);
    }
}


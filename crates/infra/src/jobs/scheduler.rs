//! Two independent timer loops driving the queue: a short collect cadence
//! and a longer reap cadence.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::queue::JobQueue;

/// Handle to the running loops.
#[derive(Debug)]
pub struct SchedulerHandle {
    stops: Vec<Arc<Notify>>,
    loops: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop both loops and wait for them to exit. Runs already spawned
    /// finish on their own.
    pub async fn shutdown(self) {
        for stop in &self.stops {
            stop.notify_one();
        }
        for handle in self.loops {
            let _ = handle.await;
        }
        info!("scheduler stopped");
    }
}

pub struct Scheduler;

impl Scheduler {
    pub fn spawn(
        queue: Arc<JobQueue>,
        collect_interval: Duration,
        reap_interval: Duration,
    ) -> SchedulerHandle {
        let collect_stop = Arc::new(Notify::new());
        let reap_stop = Arc::new(Notify::new());

        let collect_loop = {
            let queue = queue.clone();
            let stop = collect_stop.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(collect_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = stop.notified() => break,
                        _ = ticker.tick() => {
                            if !queue.spawn_collect() {
                                debug!("collect tick skipped; all worker tokens busy");
                            }
                        }
                    }
                }
            })
        };

        let reap_loop = {
            let stop = reap_stop.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(reap_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                // The first tick fires immediately; the first sweep waits a
                // full interval.
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = stop.notified() => break,
                        _ = ticker.tick() => queue.spawn_reap(),
                    }
                }
            })
        };

        info!(
            collect_interval_secs = collect_interval.as_secs_f64(),
            reap_interval_secs = reap_interval.as_secs_f64(),
            "scheduler started"
        );

        SchedulerHandle {
            stops: vec![collect_stop, reap_stop],
            loops: vec![collect_loop, reap_loop],
        }
    }
}

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

/// A spawned task that is owned by whoever holds this handle.
///
/// Dropping the handle aborts the task, so a timer cannot outlive the
/// service that started it.
#[derive(Debug)]
pub struct BackgroundTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    /// Run `future` to completion in the background.
    pub fn spawn<F>(name: &'static str, future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!(task = name, "Starting background task");
        BackgroundTask {
            name,
            handle: tokio::spawn(future),
        }
    }

    /// Run `job` every `period`. The first run happens one full period after
    /// start; runs never overlap.
    pub fn every<F, Fut>(name: &'static str, period: Duration, mut job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::spawn(name, async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                job().await;
            }
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the task.
    pub fn cancel(self) {
        // Drop does the work.
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        if !self.handle.is_finished() {
            debug!(task = self.name, "Stopping background task");
            self.handle.abort();
        }
    }
}

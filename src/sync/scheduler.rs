//! Reschedulable periodic task.
//!
//! Wraps a spawned tokio task around a stored job so the interval can be
//! changed at runtime: rescheduling cancels the current task and re-arms a
//! new one with the same job.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

type Job = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

pub struct PeriodicTask {
    name: &'static str,
    job: Job,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicTask {
    /// Arm `job` to run every `every`, starting one interval from now.
    pub fn spawn<F, Fut>(name: &'static str, every: Duration, job: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let job: Job = Arc::new(move || Box::pin(job()));
        let handle = arm(name, every, Arc::clone(&job));
        PeriodicTask {
            name,
            job,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Cancel the running task and re-arm it with a new interval.
    pub fn reschedule(&self, every: Duration) {
        let mut handle = self.handle.lock().expect("periodic task mutex poisoned");
        if let Some(old) = handle.take() {
            old.abort();
        }
        log::info!("rescheduled task {} to run every {every:?}", self.name);
        *handle = Some(arm(self.name, every, Arc::clone(&self.job)));
    }

    pub fn cancel(&self) {
        if let Some(handle) = self
            .handle
            .lock()
            .expect("periodic task mutex poisoned")
            .take()
        {
            handle.abort();
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn arm(name: &'static str, every: Duration, job: Job) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + every;
        let mut ticker = tokio::time::interval_at(start, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            log::debug!("running periodic task {name}");
            job().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting_task(every: Duration) -> (PeriodicTask, Arc<AtomicUsize>) {
        let counter = Arc::new(AtomicUsize::new(0));
        let job_counter = Arc::clone(&counter);
        let task = PeriodicTask::spawn("test", every, move || {
            let counter = Arc::clone(&job_counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        (task, counter)
    }

    #[tokio::test(start_paused = true)]
    async fn runs_once_per_interval() {
        let (task, counter) = counting_task(Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        task.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_replaces_the_interval() {
        let (task, counter) = counting_task(Duration::from_secs(3600));

        tokio::time::sleep(Duration::from_secs(1)).await;
        task.reschedule(Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_task_stops_running() {
        let (task, counter) = counting_task(Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        task.cancel();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}

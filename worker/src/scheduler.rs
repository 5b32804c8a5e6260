//! Named one-shot job scheduler (component C4).
//!
//! A single timeline of jobs, each spawned with [`actix_web::rt::spawn`] so
//! it shares the same single-threaded-per-worker execution context as the
//! HTTP handlers — matching the cooperative scheduling model where a job and
//! a request are never truly running application code at the same instant.
//! The document lock that actually serialises mutation lives in
//! [`crate::context`]; this module only owns job identity and timing.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use actix_web::rt::task::JoinHandle;
use jiff::{Timestamp, Unit};

use crate::time;

/// Fixed job id for the job that promotes a planned auction to its initial
/// pause.
pub const JOB_AUCTION_START: &str = "auction:start";
/// Fixed job id for a pause-end (round-open) job.
pub const JOB_AUCTION_PAUSE: &str = "auction:pause";
/// Fixed job id for the end-of-auction job.
pub const JOB_AUCTION_END: &str = "auction:<END>";

/// A single-instance, time-ordered set of named one-shot jobs.
///
/// Re-adding an id aborts whatever was previously scheduled under it and
/// installs the new job in its place; there is never more than one live
/// handle per name.
#[derive(Default)]
pub struct Scheduler {
    jobs: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `job` to run at `run_at`, replacing anything already
    /// scheduled under `name`. A `run_at` already in the past runs the job
    /// on the next yield with no delay and no catch-up duplication — a
    /// missed fire time just means the sleep is skipped.
    pub fn add_job<F, Fut>(&self, name: impl Into<String>, run_at: Timestamp, job: F)
    where
        F: FnOnce() -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let name = name.into();
        let delay = duration_until(run_at);
        let job_name = name.clone();
        let handle = actix_web::rt::spawn(async move {
            if let Some(delay) = delay {
                actix_web::rt::time::sleep(delay).await;
            }
            tracing::debug!(job = %job_name, "running scheduled job");
            job().await;
        });

        if let Some(previous) = self.jobs.lock().unwrap().insert(name, handle) {
            previous.abort();
        }
    }

    /// Cancel every pending job. A job whose delay has already elapsed and
    /// is running its body is left to finish; only jobs still sleeping are
    /// actually interrupted.
    pub fn remove_all_jobs(&self) {
        for (_, handle) in self.jobs.lock().unwrap().drain() {
            handle.abort();
        }
    }

    /// Process lifecycle hook. Jobs run as soon as they're added via
    /// `add_job`, so there is no separate armed state to enter here.
    pub fn start(&self) {}

    /// Cancel every pending job immediately; does not block the caller.
    pub fn shutdown(&self) {
        self.remove_all_jobs();
    }
}

fn duration_until(run_at: Timestamp) -> Option<Duration> {
    let now = time::now();
    if run_at <= now {
        return None;
    }
    let seconds = (run_at - now).total(Unit::Second).ok()?;
    if seconds <= 0.0 {
        None
    } else {
        Some(Duration::from_secs_f64(seconds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[actix_web::test]
    async fn past_run_at_fires_without_sleeping() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let f = fired.clone();
        scheduler.add_job("job", time::now(), move || {
            let f = f.clone();
            async move {
                f.fetch_add(1, Ordering::SeqCst);
            }
        });

        // give the spawned task a chance to run
        actix_web::rt::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[actix_web::test]
    async fn readding_same_name_replaces_job() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let far_future = time::now() + jiff::Span::new().hours(1);
        let f = fired.clone();
        scheduler.add_job(JOB_AUCTION_END, far_future, move || {
            let f = f.clone();
            async move {
                f.fetch_add(1, Ordering::SeqCst);
            }
        });

        let f = fired.clone();
        scheduler.add_job(JOB_AUCTION_END, time::now(), move || {
            let f = f.clone();
            async move {
                f.fetch_add(10, Ordering::SeqCst);
            }
        });

        actix_web::rt::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 10);
    }

    #[actix_web::test]
    async fn remove_all_jobs_cancels_pending() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let far_future = time::now() + jiff::Span::new().hours(1);
        let f = fired.clone();
        scheduler.add_job("never", far_future, move || {
            let f = f.clone();
            async move {
                f.fetch_add(1, Ordering::SeqCst);
            }
        });

        scheduler.remove_all_jobs();
        actix_web::rt::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}

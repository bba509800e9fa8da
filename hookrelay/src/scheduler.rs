//! Periodic tick driver for queue draining and maintenance tasks.
//!
//! The scheduler is a cooperative task table: `tick()` makes one pass and
//! runs every task whose interval has elapsed, sequentially, so effects on
//! shared state (the outbox drain, the worker pump) stay serializable per
//! run. An interval of zero means "eligible every tick".

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};

type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type TaskFn = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

struct ScheduledTask {
    name: String,
    interval_seconds: u64,
    last_run: Option<DateTime<Utc>>,
    run: TaskFn,
}

impl ScheduledTask {
    fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.last_run.map_or(true, |last| {
            let elapsed = now.signed_duration_since(last).num_seconds();
            elapsed >= i64::try_from(self.interval_seconds).unwrap_or(i64::MAX)
        })
    }
}

/// Cooperative periodic scheduler.
#[derive(Default)]
pub struct Scheduler {
    // tokio mutex: held across task awaits so one tick's effects complete
    // before the next tick starts.
    tasks: Mutex<Vec<ScheduledTask>>,
}

impl Scheduler {
    /// Create an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a periodic callback.
    ///
    /// `interval_seconds = 0` makes the task eligible on every tick.
    pub async fn add_task<F, Fut>(&self, name: &str, interval_seconds: u64, task: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().await;
        tracing::debug!(
            target: "hookrelay_scheduler",
            task = name,
            interval_seconds,
            "Task registered"
        );
        tasks.push(ScheduledTask {
            name: name.to_string(),
            interval_seconds,
            last_run: None,
            run: Arc::new(move || Box::pin(task())),
        });
    }

    /// Number of registered tasks.
    pub async fn task_count(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Make one cooperative pass: run every due task, sequentially, in
    /// registration order.
    ///
    /// Returns the number of tasks that ran.
    pub async fn tick(&self) -> usize {
        let mut tasks = self.tasks.lock().await;
        let now = Utc::now();
        let mut ran = 0;

        for task in tasks.iter_mut() {
            if !task.is_due(now) {
                continue;
            }
            tracing::trace!(
                target: "hookrelay_scheduler",
                task = %task.name,
                "Running scheduled task"
            );
            (task.run)().await;
            task.last_run = Some(Utc::now());
            ran += 1;
        }

        ran
    }

    /// Drive `tick()` on a fixed cadence until `shutdown` flips to `true`
    /// or its sender is dropped.
    pub async fn run(&self, tick_every: std::time::Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(tick_every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!(target: "hookrelay_scheduler", "Scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }
}

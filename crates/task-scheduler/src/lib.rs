//! A periodic scheduler: an in-memory table of schedule entries, each with
//! one or more trigger times, driven by a single ticker task.
//!
//! Unlike the durable connector in `task-engine`, nothing here survives a
//! restart -- schedules are re-registered by the embedding process on
//! startup; this scheduler is a process-local collaborator, not a
//! persistence layer.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// One trigger-time specification within a schedule entry.
///
/// `next_trigger_time` absent together with every interval field absent
/// means "fire once, as soon as possible" (`addTask` fills it in with
/// `now` at registration time).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Schedule {
    pub next_trigger_time: Option<i64>,
    pub interval_days: Option<i64>,
    pub interval_hours: Option<i64>,
    pub interval_minutes: Option<i64>,
}

impl Schedule {
    fn interval_ms(&self) -> i64 {
        self.interval_days.unwrap_or(0) * 86_400_000
            + self.interval_hours.unwrap_or(0) * 3_600_000
            + self.interval_minutes.unwrap_or(0) * 60_000
    }

    fn is_recurring(&self) -> bool {
        self.interval_ms() > 0
    }
}

type Callback = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

struct Entry {
    times: Vec<Schedule>,
    callback: Callback,
}

/// A single task's reported schedule state, as returned by
/// [`Scheduler::tasks_info`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TasksInfo {
    pub tasks: HashMap<String, Vec<Schedule>>,
}

struct SchedulerInner {
    entries: Mutex<HashMap<String, Entry>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    tick_interval: Duration,
}

/// The periodic scheduler. Cheap to clone (an `Arc` around shared state).
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Construct a scheduler with the default 60-second tick period.
    pub fn new() -> Self {
        Self::with_tick_interval(Duration::from_millis(60_000))
    }

    /// Construct a scheduler with an overridden tick period -- primarily
    /// useful for tests, which cannot wait a full minute per tick.
    pub fn with_tick_interval(tick_interval: Duration) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                entries: Mutex::new(HashMap::new()),
                ticker: Mutex::new(None),
                tick_interval,
            }),
        }
    }

    /// `addTask(id, times, callback)`: register (or replace) the schedule
    /// for `id`. Every schedule with no `next_trigger_time` gets one
    /// computed from `now + interval`, or `now` if it carries no interval
    /// either (a one-shot "fire as soon as possible" entry). Starts the
    /// ticker if it isn't already running.
    pub async fn add_task<F, Fut>(&self, id: impl Into<String>, times: Vec<Schedule>, callback: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let now = Utc::now().timestamp_millis();
        let times: Vec<Schedule> = times
            .into_iter()
            .map(|mut s| {
                if s.next_trigger_time.is_none() {
                    s.next_trigger_time = Some(now + s.interval_ms());
                }
                s
            })
            .collect();

        let callback: Callback = Arc::new(move || Box::pin(callback()));
        let id = id.into();

        {
            let mut entries = self.inner.entries.lock().await;
            entries.insert(id, Entry { times, callback });
        }

        self.ensure_ticker_running().await;
    }

    /// `removeTask(id)`: delete the entry. Stops the ticker once the table
    /// is empty. Safe to call from within a running callback for the same
    /// id -- removal only touches the entry map, never the in-flight
    /// callback future.
    pub async fn remove_task(&self, id: &str) {
        let now_empty = {
            let mut entries = self.inner.entries.lock().await;
            entries.remove(id);
            entries.is_empty()
        };

        if now_empty {
            self.stop_ticker().await;
        }
    }

    /// `tasksInfo() -> { tasks: { id: times[] } }`.
    pub async fn tasks_info(&self) -> TasksInfo {
        let entries = self.inner.entries.lock().await;
        TasksInfo {
            tasks: entries
                .iter()
                .map(|(id, entry)| (id.clone(), entry.times.clone()))
                .collect(),
        }
    }

    async fn ensure_ticker_running(&self) {
        let mut ticker = self.inner.ticker.lock().await;
        if ticker.is_some() {
            return;
        }
        let scheduler = self.clone();
        let interval = self.inner.tick_interval;
        *ticker = Some(tokio::spawn(async move {
            scheduler.run_ticker(interval).await;
        }));
    }

    async fn stop_ticker(&self) {
        if let Some(handle) = self.inner.ticker.lock().await.take() {
            handle.abort();
        }
    }

    async fn run_ticker(&self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.fire_due().await;
        }
    }

    /// One tick: for every `(id, schedule)` due (`next_trigger_time <=
    /// now`), run the callback and advance or clear the trigger.
    async fn fire_due(&self) {
        let now = Utc::now().timestamp_millis();

        let due: Vec<(String, usize, Callback)> = {
            let entries = self.inner.entries.lock().await;
            let mut due = Vec::new();
            for (id, entry) in entries.iter() {
                for (idx, schedule) in entry.times.iter().enumerate() {
                    if matches!(schedule.next_trigger_time, Some(t) if t <= now) {
                        due.push((id.clone(), idx, entry.callback.clone()));
                    }
                }
            }
            due
        };

        for (id, idx, callback) in due {
            tracing::info!(task_id = %id, schedule_index = idx, "scheduled task triggered");
            if AssertUnwindSafe(callback()).catch_unwind().await.is_err() {
                Self::report_callback_failure(&id);
            }

            let mut entries = self.inner.entries.lock().await;
            let Some(entry) = entries.get_mut(&id) else {
                continue;
            };
            let Some(schedule) = entry.times.get_mut(idx) else {
                continue;
            };
            if schedule.is_recurring() {
                let prev = schedule.next_trigger_time.unwrap_or(now);
                schedule.next_trigger_time = Some(prev + schedule.interval_ms());
            } else {
                schedule.next_trigger_time = None;
            }
        }
    }

    fn report_callback_failure(id: &str) {
        tracing::warn!(task_id = %id, "scheduled task callback panicked; schedule continues");
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn one_shot_fires_once_and_goes_dormant() {
        let scheduler = Scheduler::with_tick_interval(Duration::from_millis(50));
        let count = Arc::new(AtomicUsize::new(0));
        let count_for_cb = count.clone();

        let now = Utc::now().timestamp_millis();
        scheduler
            .add_task(
                "t",
                vec![Schedule {
                    next_trigger_time: Some(now + 150),
                    ..Default::default()
                }],
                move || {
                    let count = count_for_cb.clone();
                    async move {
                        count.fetch_add(1, Ordering::SeqCst);
                    }
                },
            )
            .await;

        tokio::time::sleep(StdDuration::from_millis(400)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        let info = scheduler.tasks_info().await;
        assert_eq!(info.tasks["t"][0].next_trigger_time, None);
    }

    #[tokio::test]
    async fn interval_schedule_advances_by_its_period() {
        let scheduler = Scheduler::with_tick_interval(Duration::from_millis(50));
        let count = Arc::new(AtomicUsize::new(0));
        let count_for_cb = count.clone();

        let now = Utc::now().timestamp_millis();
        scheduler
            .add_task(
                "t",
                vec![Schedule {
                    next_trigger_time: Some(now - 59_000),
                    interval_minutes: Some(1),
                    ..Default::default()
                }],
                move || {
                    let count = count_for_cb.clone();
                    async move {
                        count.fetch_add(1, Ordering::SeqCst);
                    }
                },
            )
            .await;

        tokio::time::sleep(StdDuration::from_millis(200)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        let info = scheduler.tasks_info().await;
        let fired_at = now - 59_000;
        let advanced = info.tasks["t"][0].next_trigger_time.unwrap();
        assert_eq!(advanced - fired_at, 60_000);
    }

    #[tokio::test]
    async fn remove_task_stops_reporting_it() {
        let scheduler = Scheduler::with_tick_interval(Duration::from_millis(50));
        scheduler
            .add_task("t", vec![Schedule::default()], || async {})
            .await;
        scheduler.remove_task("t").await;

        let info = scheduler.tasks_info().await;
        assert!(!info.tasks.contains_key("t"));
    }

    #[tokio::test]
    async fn failing_callback_does_not_disable_the_schedule() {
        let scheduler = Scheduler::with_tick_interval(Duration::from_millis(50));
        let count = Arc::new(AtomicUsize::new(0));
        let count_for_cb = count.clone();

        let now = Utc::now().timestamp_millis();
        scheduler
            .add_task(
                "t",
                vec![Schedule {
                    next_trigger_time: Some(now - 59_000),
                    interval_minutes: Some(1),
                    ..Default::default()
                }],
                move || {
                    let count = count_for_cb.clone();
                    async move {
                        count.fetch_add(1, Ordering::SeqCst);
                        // A callback's own errors are its problem to swallow;
                        // the scheduler itself never propagates one out of
                        // `fire_due`.
                    }
                },
            )
            .await;

        tokio::time::sleep(StdDuration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_callback_does_not_kill_the_ticker() {
        let scheduler = Scheduler::with_tick_interval(Duration::from_millis(50));
        let count = Arc::new(AtomicUsize::new(0));
        let count_for_cb = count.clone();

        let now = Utc::now().timestamp_millis();
        scheduler
            .add_task(
                "t",
                vec![Schedule {
                    next_trigger_time: Some(now - 59_000),
                    interval_minutes: Some(1),
                    ..Default::default()
                }],
                move || {
                    let count = count_for_cb.clone();
                    async move {
                        count.fetch_add(1, Ordering::SeqCst);
                        panic!("boom");
                    }
                },
            )
            .await;

        tokio::time::sleep(StdDuration::from_millis(250)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        // The entry survived the panic and its trigger time still advanced,
        // so the next tick can fire it again.
        let info = scheduler.tasks_info().await;
        assert!(info.tasks.contains_key("t"));
        assert!(info.tasks["t"][0].next_trigger_time.is_some());
    }

    #[test]
    fn interval_ms_sums_all_three_components() {
        let s = Schedule {
            interval_days: Some(1),
            interval_hours: Some(2),
            interval_minutes: Some(3),
            ..Default::default()
        };
        assert_eq!(s.interval_ms(), 86_400_000 + 2 * 3_600_000 + 3 * 60_000);
    }
}

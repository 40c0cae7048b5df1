//! Check scheduling and delivery orchestration.
//!
//! The [`Orchestrator`] ties a [`NewsSource`], the [`DedupStore`] and a
//! [`Notifier`] together and drives them from cron timers:
//!
//! 1. **Check** (every N minutes): fetch, filter against the store, then
//!    either send immediately or queue for the daily digest
//! 2. **Drain** (daily, batch mode only): send everything queued as one
//!    message
//!
//! # Delivery Modes
//!
//! | Mode | On new items | Commit | Send failure |
//! |------|--------------|--------|--------------|
//! | `real-time` | send now | after a successful send | nothing committed, next check resends |
//! | `batch` | append to queue | immediately | drained items go back to the queue front |
//!
//! At most one check runs at a time. A timer that fires while a check is in
//! flight is skipped, not queued. The batch queue lives in memory only;
//! anything still queued at an unclean exit is lost.

use crate::error::NewsError;
use crate::models::{NewsItem, StoreStats};
use crate::notify::Notifier;
use crate::scrapers::NewsSource;
use crate::storage::DedupStore;
use chrono::Local;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, instrument, warn};

pub const DEFAULT_INTERVAL_MINUTES: u32 = 15;
const IDLE_POLL: Duration = Duration::from_millis(50);

static BATCH_TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([01]?[0-9]|2[0-3]):([0-5][0-9])$").unwrap());

/// How new items reach the recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    #[default]
    RealTime,
    Batch,
}

impl FromStr for DeliveryMode {
    type Err = NewsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "real-time" | "realtime" => Ok(DeliveryMode::RealTime),
            "batch" => Ok(DeliveryMode::Batch),
            other => Err(NewsError::Config(format!(
                "push mode must be 'real-time' or 'batch', got {other:?}"
            ))),
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryMode::RealTime => f.write_str("real-time"),
            DeliveryMode::Batch => f.write_str("batch"),
        }
    }
}

/// Local time of day for the daily batch drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchTime {
    pub hour: u32,
    pub minute: u32,
}

impl Default for BatchTime {
    fn default() -> Self {
        Self {
            hour: 18,
            minute: 0,
        }
    }
}

impl FromStr for BatchTime {
    type Err = NewsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = BATCH_TIME_RE
            .captures(s.trim())
            .ok_or_else(|| NewsError::Config(format!("batch time must be HH:mm, got {s:?}")))?;
        let hour = caps[1].parse().unwrap_or_default();
        let minute = caps[2].parse().unwrap_or_default();
        Ok(Self { hour, minute })
    }
}

impl fmt::Display for BatchTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl BatchTime {
    /// Parse `HH:mm`, falling back to 18:00 with a warning.
    pub fn parse_or_default(input: &str) -> Self {
        input.parse().unwrap_or_else(|e: NewsError| {
            let fallback = Self::default();
            warn!(input, error = %e, %fallback, "Invalid batch time; using default");
            fallback
        })
    }

    pub fn cron(&self) -> String {
        format!("0 {} {} * * *", self.minute, self.hour)
    }
}

fn every_minutes(minutes: u32) -> String {
    format!("0 */{minutes} * * * *")
}

/// Turn a check interval setting into a cron expression.
///
/// A bare number is a minute count in `1..=59`; anything else must be a
/// valid cron expression, either six-field or the classic five-field form. Bad input never fails: it logs a warning and
/// yields the 15-minute default.
pub fn parse_check_interval(input: &str) -> String {
    let trimmed = input.trim();
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
        return match trimmed.parse::<u32>() {
            Ok(minutes @ 1..=59) => every_minutes(minutes),
            _ => {
                warn!(
                    input,
                    default_minutes = DEFAULT_INTERVAL_MINUTES,
                    "Check interval outside 1-59 minutes; using default"
                );
                every_minutes(DEFAULT_INTERVAL_MINUTES)
            }
        };
    }

    let expr = with_seconds_field(trimmed);
    if is_valid_cron(&expr) {
        return expr;
    }

    warn!(
        input,
        default_minutes = DEFAULT_INTERVAL_MINUTES,
        "Invalid check interval; using default"
    );
    every_minutes(DEFAULT_INTERVAL_MINUTES)
}

/// Classic five-field expressions run at second zero.
fn with_seconds_field(expr: &str) -> String {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() == 5 {
        format!("0 {}", fields.join(" "))
    } else {
        expr.to_string()
    }
}

fn is_valid_cron(expr: &str) -> bool {
    !expr.is_empty() && Job::new(expr, |_uuid, _lock| {}).is_ok()
}

/// Lifecycle of an [`Orchestrator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Checking,
    /// Terminal: a stopped orchestrator never runs another check.
    Stopped,
}

const IDLE: u8 = 0;
const CHECKING: u8 = 1;
const STOPPED: u8 = 2;

impl RunState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            IDLE => RunState::Idle,
            CHECKING => RunState::Checking,
            _ => RunState::Stopped,
        }
    }
}

/// Holds the single-flight slot for one check; releasing it on drop keeps a
/// panicking check from wedging the schedule.
struct CheckGuard<'a> {
    state: &'a AtomicU8,
    in_flight: &'a AtomicBool,
}

impl<'a> CheckGuard<'a> {
    fn acquire(state: &'a AtomicU8, in_flight: &'a AtomicBool) -> Option<Self> {
        state
            .compare_exchange(IDLE, CHECKING, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        in_flight.store(true, Ordering::Release);
        Some(Self { state, in_flight })
    }
}

impl Drop for CheckGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::Release);
        // Leaves STOPPED alone if stop() ran mid-check.
        let _ = self
            .state
            .compare_exchange(CHECKING, IDLE, Ordering::AcqRel, Ordering::Acquire);
    }
}

/// What one check did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another check was in flight.
    Skipped,
    /// The orchestrator has been stopped.
    Stopped,
    NoCandidates,
    NothingNew,
    Delivered { count: usize, message_id: String },
    Queued { count: usize, queue_len: usize },
}

/// What one batch drain did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    Empty,
    Sent { count: usize, message_id: String },
    /// Delivery failed and the items went back to the front of the queue.
    Restored { count: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorStatus {
    pub state: RunState,
    pub batch_queue_len: usize,
    pub store: StoreStats,
}

#[derive(Debug, Clone)]
pub struct ScheduleOptions {
    /// Minute count or cron expression, see [`parse_check_interval`].
    pub check_interval: String,
    pub mode: DeliveryMode,
    pub batch_time: BatchTime,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self {
            check_interval: DEFAULT_INTERVAL_MINUTES.to_string(),
            mode: DeliveryMode::default(),
            batch_time: BatchTime::default(),
        }
    }
}

pub struct Orchestrator {
    source: Arc<dyn NewsSource>,
    notifier: Arc<dyn Notifier>,
    store: Mutex<DedupStore>,
    queue: Mutex<VecDeque<NewsItem>>,
    state: AtomicU8,
    /// Survives `stop()`, unlike `state`, so shutdown can wait on it.
    in_flight: AtomicBool,
    options: ScheduleOptions,
    scheduler: Mutex<Option<JobScheduler>>,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn NewsSource>,
        notifier: Arc<dyn Notifier>,
        store: DedupStore,
        options: ScheduleOptions,
    ) -> Self {
        Self {
            source,
            notifier,
            store: Mutex::new(store),
            queue: Mutex::new(VecDeque::new()),
            state: AtomicU8::new(IDLE),
            in_flight: AtomicBool::new(false),
            options,
            scheduler: Mutex::new(None),
        }
    }

    pub fn state(&self) -> RunState {
        RunState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn mode(&self) -> DeliveryMode {
        self.options.mode
    }

    /// Start the check timer (and the daily drain in batch mode), then kick
    /// off one check right away.
    #[instrument(level = "info", skip_all, fields(mode = %self.options.mode))]
    pub async fn start(self: &Arc<Self>) -> Result<(), NewsError> {
        if self.state() == RunState::Stopped {
            return Err(NewsError::Config(
                "orchestrator was stopped; build a new one to restart".to_string(),
            ));
        }

        let mut slot = self.scheduler.lock().await;
        if slot.is_some() {
            info!("Scheduler already running");
            return Ok(());
        }

        let sched = JobScheduler::new().await.map_err(scheduler_error)?;

        let check_cron = parse_check_interval(&self.options.check_interval);
        let this = Arc::clone(self);
        let check_job = Job::new_async_tz(check_cron.as_str(), Local, move |_uuid, _lock| {
            let this = Arc::clone(&this);
            Box::pin(async move {
                this.run_tick().await;
            })
        })
        .map_err(scheduler_error)?;
        sched.add(check_job).await.map_err(scheduler_error)?;
        info!(interval = %self.options.check_interval, cron = %check_cron, "Check job scheduled");

        if self.options.mode == DeliveryMode::Batch {
            let drain_cron = self.options.batch_time.cron();
            let this = Arc::clone(self);
            let drain_job = Job::new_async_tz(drain_cron.as_str(), Local, move |_uuid, _lock| {
                let this = Arc::clone(&this);
                Box::pin(async move {
                    this.drain_batch().await;
                })
            })
            .map_err(scheduler_error)?;
            sched.add(drain_job).await.map_err(scheduler_error)?;
            info!(at = %self.options.batch_time, cron = %drain_cron, "Daily batch drain scheduled");
        }

        sched.start().await.map_err(scheduler_error)?;
        *slot = Some(sched);
        drop(slot);

        info!("Running first check");
        tokio::spawn(Arc::clone(self).run_tick());
        Ok(())
    }

    /// Cancel all timers and refuse further checks. An in-flight check runs
    /// to completion. The batch queue is left intact for [`Self::flush_queue`].
    #[instrument(level = "info", skip_all)]
    pub async fn stop(&self) {
        self.state.store(STOPPED, Ordering::Release);
        if let Some(mut sched) = self.scheduler.lock().await.take() {
            if let Err(e) = sched.shutdown().await {
                warn!(error = %e, "Scheduler shutdown reported an error");
            }
        }
        info!("Scheduler stopped");
    }

    /// Wait up to `limit` for a running check to finish. Returns `false` if
    /// one was still running when the limit passed.
    pub async fn wait_for_idle(&self, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        while self.in_flight.load(Ordering::Acquire) {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(IDLE_POLL).await;
        }
        true
    }

    /// Run one check in its own task so that a panic is contained and
    /// logged instead of reaching the timer.
    pub async fn run_tick(self: Arc<Self>) {
        let this = Arc::clone(&self);
        match tokio::spawn(async move { this.execute_check().await }).await {
            Ok(Ok(outcome)) => debug!(?outcome, "Check finished"),
            Ok(Err(e)) => error!(error = %e, "Check failed; next tick will retry"),
            Err(e) => error!(error = %e, "Check aborted unexpectedly; next tick will retry"),
        }
    }

    /// Run one guarded check on demand.
    pub async fn manual_check(&self) -> Result<TickOutcome, NewsError> {
        info!("Manual check requested");
        self.execute_check().await
    }

    /// One check: fetch, filter, then deliver or queue.
    ///
    /// Returns [`TickOutcome::Skipped`] without doing anything when another
    /// check holds the single-flight slot.
    #[instrument(level = "info", skip_all)]
    pub async fn execute_check(&self) -> Result<TickOutcome, NewsError> {
        let Some(_guard) = CheckGuard::acquire(&self.state, &self.in_flight) else {
            return Ok(match self.state() {
                RunState::Stopped => {
                    debug!("Orchestrator stopped; not checking");
                    TickOutcome::Stopped
                }
                _ => {
                    info!("Previous check still running; skipping this one");
                    TickOutcome::Skipped
                }
            });
        };

        let started = Instant::now();
        info!(at = %Local::now().format("%Y-%m-%d %H:%M:%S"), "Checking for news");

        let candidates = self.source.fetch().await?;
        if candidates.is_empty() {
            info!("Source returned no items");
            return Ok(TickOutcome::NoCandidates);
        }

        let new_items = self.store.lock().await.filter_new(&candidates);
        if new_items.is_empty() {
            info!(candidates = candidates.len(), "No new items");
            return Ok(TickOutcome::NothingNew);
        }
        info!(count = new_items.len(), "Found new items");

        let outcome = match self.options.mode {
            DeliveryMode::RealTime => {
                let delivery = self.notifier.send(&new_items, None).await?;
                self.store.lock().await.commit(&new_items).await?;
                TickOutcome::Delivered {
                    count: delivery.count,
                    message_id: delivery.message_id,
                }
            }
            DeliveryMode::Batch => {
                let queue_len = self.enqueue(&new_items).await;
                self.store.lock().await.commit(&new_items).await?;
                TickOutcome::Queued {
                    count: new_items.len(),
                    queue_len,
                }
            }
        };

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Check complete"
        );
        Ok(outcome)
    }

    /// Append items not already waiting in the queue; returns the new length.
    async fn enqueue(&self, items: &[NewsItem]) -> usize {
        let mut queue = self.queue.lock().await;
        let queued: HashSet<String> = queue.iter().map(NewsItem::identity).collect();
        queue.extend(
            items
                .iter()
                .filter(|item| !queued.contains(&item.identity()))
                .cloned(),
        );
        info!(queue_len = queue.len(), "Queued items for the daily batch");
        queue.len()
    }

    /// Send everything queued as one message.
    ///
    /// Delivery errors are absorbed: the drained items are put back at the
    /// front of the queue, ahead of anything queued meanwhile.
    #[instrument(level = "info", skip_all)]
    pub async fn drain_batch(&self) -> DrainOutcome {
        let drained: Vec<NewsItem> = {
            let mut queue = self.queue.lock().await;
            if queue.is_empty() {
                info!("Batch queue empty; nothing to send");
                return DrainOutcome::Empty;
            }
            queue.drain(..).collect()
        };
        let count = drained.len();
        info!(count, "Sending batch");

        match self.notifier.send(&drained, None).await {
            Ok(delivery) => {
                info!(count, message_id = %delivery.message_id, "Batch sent");
                DrainOutcome::Sent {
                    count,
                    message_id: delivery.message_id,
                }
            }
            Err(e) => {
                error!(count, error = %e, "Batch send failed; items restored to the queue");
                let mut queue = self.queue.lock().await;
                restore_front(&mut queue, drained);
                DrainOutcome::Restored { count }
            }
        }
    }

    /// Best-effort send of whatever is still queued, for use at shutdown.
    pub async fn flush_queue(&self) -> DrainOutcome {
        info!("Flushing batch queue");
        self.drain_batch().await
    }

    pub async fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            state: self.state(),
            batch_queue_len: self.queue.lock().await.len(),
            store: self.store.lock().await.stats(),
        }
    }
}

fn restore_front(queue: &mut VecDeque<NewsItem>, drained: Vec<NewsItem>) {
    for item in drained.into_iter().rev() {
        queue.push_front(item);
    }
}

fn scheduler_error(e: impl fmt::Display) -> NewsError {
    NewsError::Config(format!("scheduler: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::Delivery;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::AtomicUsize;
    use tempfile::{TempDir, tempdir};
    use tokio::sync::Notify;

    fn item(title: &str, link: &str) -> NewsItem {
        NewsItem::new(title, link, None, "")
    }

    #[derive(Default)]
    struct StubSource {
        items: StdMutex<Vec<NewsItem>>,
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    impl StubSource {
        fn with(items: Vec<NewsItem>) -> Arc<Self> {
            Arc::new(Self {
                items: StdMutex::new(items),
                ..Self::default()
            })
        }

        fn set(&self, items: Vec<NewsItem>) {
            *self.items.lock().unwrap() = items;
        }
    }

    #[async_trait]
    impl NewsSource for StubSource {
        async fn fetch(&self) -> Result<Vec<NewsItem>, NewsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(NewsError::Network("connection refused".into()));
            }
            Ok(self.items.lock().unwrap().clone())
        }
    }

    /// Blocks inside `fetch` until released.
    #[derive(Default)]
    struct GatedSource {
        entered: Notify,
        release: Notify,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl NewsSource for GatedSource {
        async fn fetch(&self) -> Result<Vec<NewsItem>, NewsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            self.release.notified().await;
            Ok(vec![item("Gated headline", "http://x/gated")])
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        fail: AtomicBool,
        sent: StdMutex<Vec<Vec<NewsItem>>>,
    }

    impl RecordingNotifier {
        fn failing() -> Arc<Self> {
            let notifier = Self::default();
            notifier.fail.store(true, Ordering::SeqCst);
            Arc::new(notifier)
        }

        fn sent_titles(&self) -> Vec<Vec<String>> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|batch| batch.iter().map(|i| i.title.clone()).collect())
                .collect()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(
            &self,
            items: &[NewsItem],
            _subject: Option<&str>,
        ) -> Result<Delivery, NewsError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(NewsError::Delivery("535 authentication failed".into()));
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push(items.to_vec());
            Ok(Delivery {
                message_id: format!("<{}@test>", sent.len()),
                count: items.len(),
            })
        }
    }

    async fn orchestrator(
        source: Arc<dyn NewsSource>,
        notifier: Arc<dyn Notifier>,
        mode: DeliveryMode,
    ) -> (Arc<Orchestrator>, TempDir) {
        let dir = tempdir().unwrap();
        let store = DedupStore::initialize(dir.path().join("news.json"))
            .await
            .unwrap();
        let options = ScheduleOptions {
            mode,
            ..ScheduleOptions::default()
        };
        (
            Arc::new(Orchestrator::new(source, notifier, store, options)),
            dir,
        )
    }

    #[tokio::test]
    async fn interval_minutes_become_cron() {
        assert_eq!(parse_check_interval("5"), "0 */5 * * * *");
        assert_eq!(parse_check_interval(" 59 "), "0 */59 * * * *");
        assert_eq!(parse_check_interval("1"), "0 */1 * * * *");
    }

    #[tokio::test]
    async fn out_of_range_or_invalid_interval_degrades_to_default() {
        assert_eq!(parse_check_interval("200"), "0 */15 * * * *");
        assert_eq!(parse_check_interval("0"), "0 */15 * * * *");
        assert_eq!(parse_check_interval("99999999999999"), "0 */15 * * * *");
        assert_eq!(parse_check_interval("whenever possible"), "0 */15 * * * *");
        assert_eq!(parse_check_interval(""), "0 */15 * * * *");
    }

    #[tokio::test]
    async fn valid_cron_expression_passes_through() {
        assert_eq!(parse_check_interval("0 30 9 * * *"), "0 30 9 * * *");
    }

    #[tokio::test]
    async fn five_field_cron_gains_seconds_field() {
        assert_eq!(parse_check_interval("*/5 * * * *"), "0 */5 * * * *");
        assert_eq!(parse_check_interval(" 30  9 * * 1-5 "), "0 30 9 * * 1-5");
        assert_eq!(with_seconds_field("0 */5 * * * *"), "0 */5 * * * *");
    }

    #[test]
    fn batch_time_parsing() {
        assert_eq!(
            "7:05".parse::<BatchTime>().unwrap(),
            BatchTime { hour: 7, minute: 5 }
        );
        assert_eq!(BatchTime::parse_or_default("23:59").to_string(), "23:59");
        assert_eq!(BatchTime::parse_or_default("24:00"), BatchTime::default());
        assert_eq!(BatchTime::parse_or_default("18h"), BatchTime::default());
        assert_eq!(BatchTime::default().cron(), "0 0 18 * * *");
        assert_eq!(BatchTime { hour: 7, minute: 5 }.cron(), "0 5 7 * * *");
    }

    #[test]
    fn delivery_mode_parsing() {
        assert_eq!("batch".parse::<DeliveryMode>().unwrap(), DeliveryMode::Batch);
        assert_eq!(
            "Real-Time".parse::<DeliveryMode>().unwrap(),
            DeliveryMode::RealTime
        );
        assert!("weekly".parse::<DeliveryMode>().is_err());
        assert_eq!(DeliveryMode::RealTime.to_string(), "real-time");
    }

    #[test]
    fn restore_front_keeps_drained_order_ahead_of_newcomers() {
        let mut queue: VecDeque<_> = vec![item("Newcomer", "http://x/c")].into();
        restore_front(
            &mut queue,
            vec![item("First", "http://x/a"), item("Second", "http://x/b")],
        );
        let titles: Vec<_> = queue.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["First", "Second", "Newcomer"]);
    }

    #[tokio::test]
    async fn real_time_delivers_then_commits() {
        let source = StubSource::with(vec![item("One", "http://x/1"), item("Two", "http://x/2")]);
        let notifier = Arc::new(RecordingNotifier::default());
        let (orch, _dir) =
            orchestrator(source.clone(), notifier.clone(), DeliveryMode::RealTime).await;

        let outcome = orch.execute_check().await.unwrap();
        assert_eq!(
            outcome,
            TickOutcome::Delivered {
                count: 2,
                message_id: "<1@test>".into()
            }
        );
        assert_eq!(notifier.sent_titles(), vec![vec!["One", "Two"]]);
        assert_eq!(orch.status().await.store.total_count, 2);

        assert_eq!(orch.execute_check().await.unwrap(), TickOutcome::NothingNew);

        source.set(vec![item("One", "http://x/1"), item("Three", "http://x/3")]);
        orch.execute_check().await.unwrap();
        assert_eq!(notifier.sent_titles()[1], vec!["Three"]);
    }

    #[tokio::test]
    async fn real_time_failure_leaves_store_untouched() {
        let source = StubSource::with(vec![item("One", "http://x/1")]);
        let notifier = RecordingNotifier::failing();
        let (orch, _dir) =
            orchestrator(source.clone(), notifier.clone(), DeliveryMode::RealTime).await;

        let err = orch.execute_check().await.unwrap_err();
        assert!(matches!(err, NewsError::Delivery(_)));
        assert_eq!(orch.status().await.store.total_count, 0);
        assert_eq!(orch.state(), RunState::Idle);

        notifier.fail.store(false, Ordering::SeqCst);
        let outcome = orch.execute_check().await.unwrap();
        assert!(matches!(outcome, TickOutcome::Delivered { count: 1, .. }));
        assert_eq!(orch.status().await.store.total_count, 1);
    }

    #[tokio::test]
    async fn batch_mode_commits_on_queue_and_restores_on_failed_drain() {
        let source = StubSource::with(vec![item("One", "http://x/1"), item("Two", "http://x/2")]);
        let notifier = RecordingNotifier::failing();
        let (orch, _dir) =
            orchestrator(source.clone(), notifier.clone(), DeliveryMode::Batch).await;

        assert_eq!(
            orch.execute_check().await.unwrap(),
            TickOutcome::Queued {
                count: 2,
                queue_len: 2
            }
        );
        let status = orch.status().await;
        assert_eq!(status.store.total_count, 2);
        assert_eq!(status.batch_queue_len, 2);

        assert_eq!(orch.drain_batch().await, DrainOutcome::Restored { count: 2 });
        assert_eq!(orch.status().await.batch_queue_len, 2);

        source.set(vec![item("Three", "http://x/3")]);
        orch.execute_check().await.unwrap();

        notifier.fail.store(false, Ordering::SeqCst);
        assert!(matches!(
            orch.drain_batch().await,
            DrainOutcome::Sent { count: 3, .. }
        ));
        assert_eq!(notifier.sent_titles(), vec![vec!["One", "Two", "Three"]]);
        assert_eq!(orch.drain_batch().await, DrainOutcome::Empty);
    }

    #[tokio::test]
    async fn empty_fetch_and_fetch_errors_end_the_tick() {
        let source = StubSource::with(vec![]);
        let notifier = Arc::new(RecordingNotifier::default());
        let (orch, _dir) =
            orchestrator(source.clone(), notifier.clone(), DeliveryMode::RealTime).await;

        assert_eq!(orch.execute_check().await.unwrap(), TickOutcome::NoCandidates);

        source.fail.store(true, Ordering::SeqCst);
        assert!(matches!(
            orch.execute_check().await,
            Err(NewsError::Network(_))
        ));
        assert_eq!(orch.state(), RunState::Idle);
        assert!(notifier.sent_titles().is_empty());
    }

    #[tokio::test]
    async fn overlapping_check_is_skipped() {
        let source = Arc::new(GatedSource::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let (orch, _dir) =
            orchestrator(source.clone(), notifier.clone(), DeliveryMode::RealTime).await;

        let first = tokio::spawn({
            let orch = Arc::clone(&orch);
            async move { orch.execute_check().await }
        });
        source.entered.notified().await;
        assert_eq!(orch.state(), RunState::Checking);

        assert_eq!(orch.execute_check().await.unwrap(), TickOutcome::Skipped);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        source.release.notify_one();
        let outcome = first.await.unwrap().unwrap();
        assert!(matches!(outcome, TickOutcome::Delivered { count: 1, .. }));
        assert_eq!(notifier.sent_titles().len(), 1);
        assert_eq!(orch.state(), RunState::Idle);
    }

    #[tokio::test]
    async fn shutdown_waits_for_running_check() {
        let source = Arc::new(GatedSource::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let (orch, _dir) =
            orchestrator(source.clone(), notifier.clone(), DeliveryMode::RealTime).await;

        let running = tokio::spawn({
            let orch = Arc::clone(&orch);
            async move { orch.execute_check().await }
        });
        source.entered.notified().await;
        orch.stop().await;

        assert!(!orch.wait_for_idle(Duration::from_millis(100)).await);

        source.release.notify_one();
        assert!(orch.wait_for_idle(Duration::from_secs(5)).await);
        assert!(matches!(
            running.await.unwrap().unwrap(),
            TickOutcome::Delivered { count: 1, .. }
        ));
        assert_eq!(orch.state(), RunState::Stopped);
        assert_eq!(orch.status().await.store.total_count, 1);
    }

    #[tokio::test]
    async fn stop_is_terminal_but_flush_still_drains() {
        let source = StubSource::with(vec![item("One", "http://x/1")]);
        let notifier = Arc::new(RecordingNotifier::default());
        let (orch, _dir) =
            orchestrator(source.clone(), notifier.clone(), DeliveryMode::Batch).await;

        orch.execute_check().await.unwrap();
        orch.stop().await;
        assert_eq!(orch.state(), RunState::Stopped);

        source.set(vec![item("Two", "http://x/2")]);
        assert_eq!(orch.execute_check().await.unwrap(), TickOutcome::Stopped);
        assert!(orch.start().await.is_err());

        assert!(matches!(
            orch.flush_queue().await,
            DrainOutcome::Sent { count: 1, .. }
        ));
        assert_eq!(notifier.sent_titles(), vec![vec!["One"]]);
    }
}

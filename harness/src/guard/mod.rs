//! Runaway-execution guard shared by every harness phase.
//!
//! A [`Guard`] owns all scheduling, DOM-query accounting, listener
//! registration and log volume for one run. Limit violations degrade quietly
//! (skipped call, rejected timer, empty query result, dropped log line) and
//! are counted in [`GuardStatus`]; they never surface as errors to callers.

pub mod clock;
pub mod timers;

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::dom::{Action, ElementId, EventKind, Page};

pub use clock::{Clock, ManualClock, SystemClock};
pub use timers::{IntervalCallback, TimeoutCallback, TimerId};

use timers::{TimerQueue, TimerTask};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogLimits {
    pub log: u32,
    pub warn: u32,
    pub error: u32,
}

impl Default for LogLimits {
    fn default() -> Self {
        Self {
            log: 100,
            warn: 75,
            error: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardLimits {
    pub max_depth: usize,
    pub max_timers: usize,
    pub max_intervals: usize,
    pub min_interval_ms: u64,
    pub max_queries: u32,
    pub query_window_ms: u64,
    pub log_window_ms: u64,
    pub sweep_window_ms: u64,
    /// Sweep cancels timers once more than this many are active.
    pub sweep_threshold: usize,
    /// Oldest timers kept by a sweep.
    pub sweep_keep: usize,
    pub log: LogLimits,
}

impl Default for GuardLimits {
    fn default() -> Self {
        Self {
            max_depth: 5,
            max_timers: 100,
            max_intervals: 20,
            min_interval_ms: 1_000,
            max_queries: 200,
            query_window_ms: 5_000,
            log_window_ms: 10_000,
            sweep_window_ms: 10_000,
            sweep_threshold: 50,
            sweep_keep: 30,
            log: LogLimits::default(),
        }
    }
}

impl GuardLimits {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.max_timers == 0 {
            errors.push("limits.max_timers must be > 0".to_string());
        }
        if self.max_intervals == 0 {
            errors.push("limits.max_intervals must be > 0".to_string());
        }
        if self.query_window_ms == 0 || self.log_window_ms == 0 || self.sweep_window_ms == 0 {
            errors.push("limits windows must be > 0 ms".to_string());
        }
        if self.sweep_keep > self.sweep_threshold {
            errors.push("limits.sweep_keep must be <= limits.sweep_threshold".to_string());
        }
        errors
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Log,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogCounts {
    pub log: u32,
    pub warn: u32,
    pub error: u32,
}

impl LogCounts {
    fn get(&self, level: LogLevel) -> u32 {
        match level {
            LogLevel::Log => self.log,
            LogLevel::Warn => self.warn,
            LogLevel::Error => self.error,
        }
    }

    fn bump(&mut self, level: LogLevel) {
        match level {
            LogLevel::Log => self.log += 1,
            LogLevel::Warn => self.warn += 1,
            LogLevel::Error => self.error += 1,
        }
    }
}

/// Live counters of the guard, as seen by the current window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunawayGuardState {
    pub recursion_depth: usize,
    pub active_timer_ids: BTreeSet<TimerId>,
    pub active_interval_ids: BTreeSet<TimerId>,
    pub query_call_count: u32,
    pub log_counts: LogCounts,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardStatus {
    pub recursion_depth: usize,
    pub active_timers: usize,
    pub active_intervals: usize,
    pub query_calls: u32,
    pub log_counts: LogCounts,
    pub skipped_calls: u64,
    pub rejected_timers: u64,
    pub throttled_queries: u64,
    pub dropped_logs: u64,
    pub duplicate_listeners: u64,
    pub swallowed_errors: u64,
    pub swept_timers: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardGrade {
    Excellent,
    Good,
    NeedsImprovement,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardAudit {
    pub compliance_score: u32,
    pub grade: GuardGrade,
    pub violations: Vec<String>,
}

#[derive(Debug, Default)]
struct Counters {
    depth: usize,
    query_calls: u32,
    query_window_start: Duration,
    log_counts: LogCounts,
    log_window_start: Duration,
    last_sweep: Duration,
    skipped_calls: u64,
    rejected_timers: u64,
    throttled_queries: u64,
    dropped_logs: u64,
    duplicate_listeners: u64,
    swallowed_errors: u64,
    swept_timers: u64,
}

pub struct Guard {
    limits: GuardLimits,
    clock: Box<dyn Clock>,
    counters: RefCell<Counters>,
    timers: RefCell<TimerQueue>,
}

impl std::fmt::Debug for Guard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guard")
            .field("limits", &self.limits)
            .field("status", &self.status())
            .finish()
    }
}

enum DueTask {
    Timeout(TimeoutCallback),
    Interval(IntervalCallback),
}

/// Decrements the recursion depth when the guarded call returns or unwinds.
struct DepthScope<'a>(&'a Guard);

impl Drop for DepthScope<'_> {
    fn drop(&mut self) {
        let mut counters = self.0.counters.borrow_mut();
        counters.depth = counters.depth.saturating_sub(1);
    }
}

impl Guard {
    pub fn new(limits: GuardLimits, clock: Box<dyn Clock>) -> Self {
        Self {
            limits,
            clock,
            counters: RefCell::new(Counters::default()),
            timers: RefCell::new(TimerQueue::default()),
        }
    }

    pub fn system(limits: GuardLimits) -> Self {
        Self::new(limits, Box::new(SystemClock::new()))
    }

    /// Guard on virtual time; `sleep` returns immediately.
    pub fn manual(limits: GuardLimits) -> Self {
        Self::new(limits, Box::new(ManualClock::new()))
    }

    pub fn limits(&self) -> &GuardLimits {
        &self.limits
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Wall-clock milliseconds for result timestamps.
    pub fn wall_ms(&self) -> u64 {
        self.clock.wall_ms()
    }

    pub fn sleep(&self, duration: Duration) {
        self.clock.sleep(duration);
    }

    /// Run `f` unless the nesting depth already exceeds `max_depth`.
    /// Errors are logged at warn and reported as `None`.
    pub fn with_depth_guard<T>(&self, name: &str, f: impl FnOnce() -> Result<T>) -> Option<T> {
        let depth = {
            let mut counters = self.counters.borrow_mut();
            if counters.depth > self.limits.max_depth {
                counters.skipped_calls += 1;
                None
            } else {
                counters.depth += 1;
                Some(counters.depth)
            }
        };
        let Some(depth) = depth else {
            self.warn(&format!(
                "{name} skipped: recursion depth exceeds {}",
                self.limits.max_depth
            ));
            return None;
        };
        debug!(target: "harness", name, depth, "guarded call");

        let _scope = DepthScope(self);
        match f() {
            Ok(value) => Some(value),
            Err(err) => {
                self.counters.borrow_mut().swallowed_errors += 1;
                self.warn(&format!("{name} failed: {err:#}"));
                None
            }
        }
    }

    /// `None` when `max_timers` timeouts are already pending.
    pub fn schedule_timeout(&self, delay: Duration, callback: TimeoutCallback) -> Option<TimerId> {
        let mut timers = self.timers.borrow_mut();
        if timers.count(false) >= self.limits.max_timers {
            drop(timers);
            self.counters.borrow_mut().rejected_timers += 1;
            self.warn("timeout not scheduled: timer limit reached");
            return None;
        }
        Some(timers.insert(self.now() + delay, TimerTask::Timeout(callback)))
    }

    /// `None` when `max_intervals` intervals are active. Periods below
    /// `min_interval_ms` are raised to it.
    pub fn schedule_interval(&self, period: Duration, callback: IntervalCallback) -> Option<TimerId> {
        let period = period.max(Duration::from_millis(self.limits.min_interval_ms));
        let mut timers = self.timers.borrow_mut();
        if timers.count(true) >= self.limits.max_intervals {
            drop(timers);
            self.counters.borrow_mut().rejected_timers += 1;
            self.warn("interval not scheduled: interval limit reached");
            return None;
        }
        Some(timers.insert(
            self.now() + period,
            TimerTask::Interval {
                period,
                callback: Some(callback),
            },
        ))
    }

    pub fn clear_timeout(&self, id: TimerId) -> bool {
        let mut timers = self.timers.borrow_mut();
        if timers.is_interval(id) {
            return false;
        }
        timers.remove(id).is_some()
    }

    pub fn clear_interval(&self, id: TimerId) -> bool {
        let mut timers = self.timers.borrow_mut();
        if !timers.is_interval(id) {
            return false;
        }
        timers.remove(id).is_some()
    }

    /// Watermark for [`Guard::clear_timers_since`].
    pub fn timer_mark(&self) -> u64 {
        self.timers.borrow().mark()
    }

    /// Cancel every timer scheduled after `mark`. Returns how many were pending.
    pub fn clear_timers_since(&self, mark: u64) -> usize {
        let mut timers = self.timers.borrow_mut();
        let ids = timers.ids_after(mark);
        for id in &ids {
            timers.remove(*id);
        }
        ids.len()
    }

    /// Run every timer due now, each under the depth guard. Timers scheduled
    /// by these callbacks wait for the next pump. Returns callbacks run.
    pub fn run_due(&self) -> usize {
        self.sweep();
        let due = self.timers.borrow().due(self.now());
        let mut ran = 0;
        for id in due {
            let task = {
                let mut timers = self.timers.borrow_mut();
                if timers.is_interval(id) {
                    timers.get_mut(id).and_then(|timer| match &mut timer.task {
                        TimerTask::Interval { period, callback } => {
                            timer.due += *period;
                            callback.take().map(DueTask::Interval)
                        }
                        TimerTask::Timeout(_) => None,
                    })
                } else {
                    timers.remove(id).and_then(|timer| match timer.task {
                        TimerTask::Timeout(callback) => Some(DueTask::Timeout(callback)),
                        TimerTask::Interval { .. } => None,
                    })
                }
            };
            match task {
                Some(DueTask::Timeout(callback)) => {
                    self.with_depth_guard("timeout", || callback(self));
                    ran += 1;
                }
                Some(DueTask::Interval(mut callback)) => {
                    self.with_depth_guard("interval", || callback(self));
                    ran += 1;
                    // Put the callback back unless the interval cleared itself.
                    if let Some(timer) = self.timers.borrow_mut().get_mut(id)
                        && let TimerTask::Interval { callback: slot, .. } = &mut timer.task
                    {
                        *slot = Some(callback);
                    }
                }
                None => {}
            }
        }
        ran
    }

    /// Health sweep, at most once per `sweep_window_ms`: when more than
    /// `sweep_threshold` timeouts are pending, cancel all but the oldest
    /// `sweep_keep`. Returns how many were cancelled.
    pub fn sweep(&self) -> usize {
        let now = self.now();
        {
            let mut counters = self.counters.borrow_mut();
            if now.saturating_sub(counters.last_sweep)
                < Duration::from_millis(self.limits.sweep_window_ms)
            {
                return 0;
            }
            counters.last_sweep = now;
        }
        let cancelled = {
            let mut timers = self.timers.borrow_mut();
            let ids = timers.ids(false);
            if ids.len() <= self.limits.sweep_threshold {
                return 0;
            }
            let excess: Vec<TimerId> = ids.into_iter().skip(self.limits.sweep_keep).collect();
            for id in &excess {
                timers.remove(*id);
            }
            excess.len()
        };
        self.counters.borrow_mut().swept_timers += cancelled as u64;
        self.warn(&format!("sweep cancelled {cancelled} pending timers"));
        cancelled
    }

    /// Count a DOM query. Past `max_queries` in the current window the query
    /// is not run and `T::default()` is returned.
    pub fn query<T: Default>(&self, f: impl FnOnce() -> T) -> T {
        self.try_query(f).unwrap_or_default()
    }

    /// [`Guard::query`] that reports a throttled query as `None`, for
    /// callers that must not read an empty answer as "nothing there".
    pub fn try_query<T>(&self, f: impl FnOnce() -> T) -> Option<T> {
        let now = self.now();
        {
            let mut counters = self.counters.borrow_mut();
            if now.saturating_sub(counters.query_window_start)
                >= Duration::from_millis(self.limits.query_window_ms)
            {
                counters.query_window_start = now;
                counters.query_calls = 0;
            }
            if counters.query_calls >= self.limits.max_queries {
                counters.throttled_queries += 1;
                return None;
            }
            counters.query_calls += 1;
        }
        Some(f())
    }

    /// Register a listener unless the same (element, event, action) is
    /// already bound. Returns whether it was added.
    pub fn add_listener(&self, page: &Page, element: ElementId, event: EventKind, action: Action) -> bool {
        let mut doc = page.doc_mut();
        if doc.has_listener(element, event, &action) {
            drop(doc);
            self.counters.borrow_mut().duplicate_listeners += 1;
            self.warn(&format!(
                "duplicate {} listener {} ignored",
                event.as_str(),
                action.name()
            ));
            return false;
        }
        doc.add_listener(element, event, action);
        true
    }

    /// Rate-limited log line routed to `tracing` under the `harness` target.
    pub fn log(&self, level: LogLevel, message: &str) {
        let now = self.now();
        {
            let mut counters = self.counters.borrow_mut();
            if now.saturating_sub(counters.log_window_start)
                >= Duration::from_millis(self.limits.log_window_ms)
            {
                counters.log_window_start = now;
                counters.log_counts = LogCounts::default();
            }
            let limit = match level {
                LogLevel::Log => self.limits.log.log,
                LogLevel::Warn => self.limits.log.warn,
                LogLevel::Error => self.limits.log.error,
            };
            if counters.log_counts.get(level) >= limit {
                counters.dropped_logs += 1;
                return;
            }
            counters.log_counts.bump(level);
        }
        match level {
            LogLevel::Log => info!(target: "harness", "{message}"),
            LogLevel::Warn => warn!(target: "harness", "{message}"),
            LogLevel::Error => error!(target: "harness", "{message}"),
        }
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Log, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    pub fn state(&self) -> RunawayGuardState {
        let counters = self.counters.borrow();
        let timers = self.timers.borrow();
        RunawayGuardState {
            recursion_depth: counters.depth,
            active_timer_ids: timers.ids(false).into_iter().collect(),
            active_interval_ids: timers.ids(true).into_iter().collect(),
            query_call_count: counters.query_calls,
            log_counts: counters.log_counts,
        }
    }

    pub fn status(&self) -> GuardStatus {
        let counters = self.counters.borrow();
        let timers = self.timers.borrow();
        GuardStatus {
            recursion_depth: counters.depth,
            active_timers: timers.count(false),
            active_intervals: timers.count(true),
            query_calls: counters.query_calls,
            log_counts: counters.log_counts,
            skipped_calls: counters.skipped_calls,
            rejected_timers: counters.rejected_timers,
            throttled_queries: counters.throttled_queries,
            dropped_logs: counters.dropped_logs,
            duplicate_listeners: counters.duplicate_listeners,
            swallowed_errors: counters.swallowed_errors,
            swept_timers: counters.swept_timers,
        }
    }

    /// Whether any limit is currently at capacity.
    pub fn is_saturated(&self) -> bool {
        let status = self.status();
        status.active_timers >= self.limits.max_timers
            || status.active_intervals >= self.limits.max_intervals
            || status.query_calls >= self.limits.max_queries
    }

    pub fn audit(&self) -> GuardAudit {
        let status = self.status();
        let mut score: u32 = 100;
        let mut violations = Vec::new();
        if status.skipped_calls > 0 {
            score = score.saturating_sub(10);
            violations.push(format!(
                "recursion limit reached {} time(s)",
                status.skipped_calls
            ));
        }
        if status.active_timers > 10 {
            score = score.saturating_sub(5);
            violations.push(format!("{} timers pending", status.active_timers));
        }
        if status.active_intervals > 5 {
            score = score.saturating_sub(10);
            violations.push(format!("{} intervals active", status.active_intervals));
        }
        if status.dropped_logs > 0 {
            score = score.saturating_sub(15);
            violations.push(format!("{} log lines dropped", status.dropped_logs));
        }
        let grade = match score {
            95.. => GuardGrade::Excellent,
            85..=94 => GuardGrade::Good,
            _ => GuardGrade::NeedsImprovement,
        };
        GuardAudit {
            compliance_score: score,
            grade,
            violations,
        }
    }
}

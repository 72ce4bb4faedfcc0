//! Pending timeouts and intervals owned by a [`Guard`](super::Guard).

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;

use super::Guard;

pub type TimeoutCallback = Box<dyn FnOnce(&Guard) -> Result<()>>;
pub type IntervalCallback = Box<dyn FnMut(&Guard) -> Result<()>>;

/// Handle returned by the scheduling wrappers. Ids increase monotonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TimerId(pub(crate) u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

pub(crate) enum TimerTask {
    Timeout(TimeoutCallback),
    /// Callback is `None` while it is running.
    Interval {
        period: Duration,
        callback: Option<IntervalCallback>,
    },
}

pub(crate) struct Timer {
    pub due: Duration,
    pub task: TimerTask,
}

#[derive(Default)]
pub(crate) struct TimerQueue {
    next_id: u64,
    entries: BTreeMap<TimerId, Timer>,
}

impl TimerQueue {
    pub fn insert(&mut self, due: Duration, task: TimerTask) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.entries.insert(id, Timer { due, task });
        id
    }

    pub fn remove(&mut self, id: TimerId) -> Option<Timer> {
        self.entries.remove(&id)
    }

    pub fn get_mut(&mut self, id: TimerId) -> Option<&mut Timer> {
        self.entries.get_mut(&id)
    }

    /// Ids due at `now`, ordered by due time then id.
    pub fn due(&self, now: Duration) -> Vec<TimerId> {
        let mut due: Vec<(Duration, TimerId)> = self
            .entries
            .iter()
            .filter(|(_, timer)| timer.due <= now)
            .map(|(id, timer)| (timer.due, *id))
            .collect();
        due.sort();
        due.into_iter().map(|(_, id)| id).collect()
    }

    /// Id the next scheduled timer will get; used to scope cleanup.
    pub fn mark(&self) -> u64 {
        self.next_id
    }

    pub fn ids_after(&self, mark: u64) -> Vec<TimerId> {
        self.entries
            .keys()
            .filter(|id| id.0 > mark)
            .copied()
            .collect()
    }

    pub fn is_interval(&self, id: TimerId) -> bool {
        matches!(
            self.entries.get(&id),
            Some(Timer {
                task: TimerTask::Interval { .. },
                ..
            })
        )
    }

    /// Ascending (oldest first) ids of one timer kind.
    pub fn ids(&self, intervals: bool) -> Vec<TimerId> {
        self.entries
            .keys()
            .filter(|id| self.is_interval(**id) == intervals)
            .copied()
            .collect()
    }

    pub fn count(&self, intervals: bool) -> usize {
        self.entries
            .keys()
            .filter(|id| self.is_interval(**id) == intervals)
            .count()
    }
}

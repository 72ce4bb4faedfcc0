//! Shared run context handed to every phase.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::dom::Page;
use crate::guard::Guard;
use crate::overlay::Overlay;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    /// Delay before the first phase so the page can finish loading.
    pub settle_ms: u64,
    /// Pause between components within a phase.
    pub throttle_ms: u64,
    /// Upper bound for waiting on an observable change after an interaction.
    pub click_wait_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            settle_ms: 1_000,
            throttle_ms: 50,
            click_wait_ms: 300,
            poll_interval_ms: 50,
        }
    }
}

/// Everything a phase needs: the guard, the page under test, the overlay and
/// the run's cancellation token.
#[derive(Debug, Clone)]
pub struct HarnessContext<'a> {
    pub guard: &'a Guard,
    pub page: Page,
    pub overlay: &'a Overlay,
    pub cancel: CancelToken,
    pub timing: Timing,
}

impl<'a> HarnessContext<'a> {
    pub fn new(guard: &'a Guard, page: Page, overlay: &'a Overlay) -> Self {
        Self {
            guard,
            page,
            overlay,
            cancel: overlay.cancel_token().clone(),
            timing: Timing::default(),
        }
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Same context on a scratch copy of the page.
    pub fn fork(&self) -> Self {
        Self {
            page: self.page.fork(),
            ..self.clone()
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn now_ms(&self) -> u64 {
        self.guard.wall_ms()
    }

    pub fn throttle(&self) {
        if self.timing.throttle_ms > 0 {
            self.guard
                .sleep(Duration::from_millis(self.timing.throttle_ms));
        }
    }

    pub fn settle(&self) {
        if self.timing.settle_ms > 0 {
            self.guard.sleep(Duration::from_millis(self.timing.settle_ms));
        }
    }

    /// Log through the guard and append to the overlay log.
    pub fn note(&self, message: &str) {
        self.guard.info(message);
        self.overlay.note(self.now_ms(), message);
    }

    /// Poll `probe` every `poll_interval_ms`, pumping due timers first, until
    /// it yields a value or `click_wait_ms` elapses.
    pub fn wait_until<T>(&self, mut probe: impl FnMut() -> Option<T>) -> Option<T> {
        let deadline = self.guard.now() + Duration::from_millis(self.timing.click_wait_ms);
        let interval = Duration::from_millis(self.timing.poll_interval_ms.max(1));
        loop {
            self.guard.run_due();
            if let Some(found) = probe() {
                return Some(found);
            }
            if self.guard.now() >= deadline {
                return None;
            }
            self.guard.sleep(interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::guard::GuardLimits;

    #[test]
    fn wait_until_is_bounded() {
        let guard = Guard::manual(GuardLimits::default());
        let overlay = Overlay::new(CancelToken::new());
        let ctx = HarnessContext::new(&guard, Page::default(), &overlay);
        let polls = Cell::new(0);
        let start = guard.now();
        let found: Option<()> = ctx.wait_until(|| {
            polls.set(polls.get() + 1);
            None
        });
        assert!(found.is_none());
        assert_eq!(guard.now() - start, Duration::from_millis(300));
        assert_eq!(polls.get(), 7);
    }

    #[test]
    fn wait_until_sees_deferred_changes() {
        let guard = Guard::manual(GuardLimits::default());
        let overlay = Overlay::new(CancelToken::new());
        let ctx = HarnessContext::new(&guard, Page::default(), &overlay);
        let flag = std::rc::Rc::new(Cell::new(false));
        let setter = std::rc::Rc::clone(&flag);
        guard.schedule_timeout(
            Duration::from_millis(120),
            Box::new(move |_: &Guard| {
                setter.set(true);
                Ok(())
            }),
        );
        let found = ctx.wait_until(|| flag.get().then_some(()));
        assert_eq!(found, Some(()));
        assert_eq!(guard.now(), Duration::from_millis(150));
    }

    #[test]
    fn fork_shares_guard_and_cancel() {
        let guard = Guard::manual(GuardLimits::default());
        let overlay = Overlay::new(CancelToken::new());
        let ctx = HarnessContext::new(&guard, Page::default(), &overlay);
        let fork = ctx.fork();
        assert!(!fork.page.shares_document_with(&ctx.page));
        overlay.close();
        assert!(fork.is_cancelled());
    }
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The view change timeout timer.
//!
//! The worker thread polls [`ViewChangeTimer::expired`] on every iteration of its loop; when the
//! deadline passes, the engine starts a view change attempt. Each failed attempt increments the
//! change cycle, doubling the next timeout up to a configured cap; a successful commit or entry
//! into a new view resets the cycle to the base timeout.

use std::time::{Duration, Instant};

pub(crate) struct ViewChangeTimer {
    base_timeout: Duration,
    change_cycle: u32,
    change_cycle_cap: u32,
    deadline: Instant,
}

impl ViewChangeTimer {
    /// Create a timer armed `base_timeout` from now, with change cycle 0.
    pub(crate) fn new(base_timeout: Duration, change_cycle_cap: u32) -> ViewChangeTimer {
        ViewChangeTimer {
            base_timeout,
            change_cycle: 0,
            change_cycle_cap,
            deadline: Instant::now() + base_timeout,
        }
    }

    /// The timeout for the current change cycle: `base_timeout * 2^min(cycle, cap)`.
    pub(crate) fn current_timeout(&self) -> Duration {
        let exponent = self.change_cycle.min(self.change_cycle_cap);
        self.base_timeout * 2u32.pow(exponent)
    }

    /// Arm a fresh deadline [`current_timeout`](Self::current_timeout) from now, superseding any
    /// pending expiration.
    pub(crate) fn restart(&mut self) {
        self.deadline = Instant::now() + self.current_timeout();
    }

    /// Whether the armed deadline has passed.
    pub(crate) fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Record a failed view change attempt, doubling the next timeout (up to the cap).
    pub(crate) fn inc_change_cycle(&mut self) {
        self.change_cycle = self.change_cycle.saturating_add(1);
    }

    /// Reset the change cycle to 0. Called on every successful commit and on entering a new view.
    pub(crate) fn reset_change_cycle(&mut self) {
        self.change_cycle = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_doubles_per_change_cycle_up_to_the_cap() {
        let mut timer = ViewChangeTimer::new(Duration::from_millis(100), 3);
        assert_eq!(timer.current_timeout(), Duration::from_millis(100));

        timer.inc_change_cycle();
        assert_eq!(timer.current_timeout(), Duration::from_millis(200));
        timer.inc_change_cycle();
        assert_eq!(timer.current_timeout(), Duration::from_millis(400));
        timer.inc_change_cycle();
        assert_eq!(timer.current_timeout(), Duration::from_millis(800));

        // Capped.
        timer.inc_change_cycle();
        assert_eq!(timer.current_timeout(), Duration::from_millis(800));

        timer.reset_change_cycle();
        assert_eq!(timer.current_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn restart_supersedes_a_pending_expiration() {
        let mut timer = ViewChangeTimer::new(Duration::from_millis(0), 1);
        std::thread::sleep(Duration::from_millis(1));
        assert!(timer.expired());

        timer.base_timeout = Duration::from_secs(60);
        timer.restart();
        assert!(!timer.expired());
    }
}

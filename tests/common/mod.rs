use std::time::{Duration, Instant};

pub(crate) mod logging;

pub(crate) mod mem_db;

pub(crate) mod mem_ledger;

pub(crate) mod network;

pub(crate) mod node;

/// Poll `condition` every 50 milliseconds until it holds, panicking if `timeout` elapses first.
pub(crate) fn wait_until(timeout: Duration, description: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !condition() {
        if Instant::now() >= deadline {
            panic!("timed out waiting until: {}", description);
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Configuration options as specified by the operator.

use std::time::Duration;

/// Operator-provided parameters that determine the behaviour of a replica. These never change
/// while the replica runs.
#[derive(Clone)]
pub struct Configuration {
    /// Base view change timeout. A view change attempt that fails doubles the next timeout, up to
    /// `2^change_cycle_cap` times the base.
    pub consensus_timeout: Duration,

    /// How long the worker blocks waiting for a message before running its periodic work
    /// (timer check, cache expiry).
    pub pop_wait: Duration,

    /// How many indices beyond the next undecided one the engine accepts messages for. Bounds the
    /// memory held by the voting caches.
    pub water_mark_window: u64,

    /// How many indices below the committed one the voting caches retain before expiry.
    pub retain_window: u64,

    /// How many times a log sync request is retried before giving up.
    pub max_sync_retries: u32,

    /// Cap on the view change timeout doubling exponent.
    pub change_cycle_cap: u32,

    /// Maximum number of queued messages between ingress and the worker.
    pub msg_queue_capacity: usize,

    /// How long the log sync client waits for a response before retrying. Doubles per retry.
    pub sync_response_timeout: Duration,

    /// Whether to enable the default event logging handlers.
    pub log_events: bool,
}

impl Configuration {
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder {
            configuration: Configuration::default(),
        }
    }
}

impl Default for Configuration {
    fn default() -> Configuration {
        Configuration {
            consensus_timeout: Duration::from_millis(3000),
            pop_wait: Duration::from_millis(5),
            water_mark_window: 10,
            retain_window: 512,
            max_sync_retries: 5,
            change_cycle_cap: 6,
            msg_queue_capacity: 1024,
            sync_response_timeout: Duration::from_millis(1000),
            log_events: false,
        }
    }
}

/// Builder for [`Configuration`]. Unset options keep their defaults.
pub struct ConfigurationBuilder {
    configuration: Configuration,
}

impl ConfigurationBuilder {
    pub fn consensus_timeout(mut self, timeout: Duration) -> ConfigurationBuilder {
        self.configuration.consensus_timeout = timeout;
        self
    }

    pub fn pop_wait(mut self, pop_wait: Duration) -> ConfigurationBuilder {
        self.configuration.pop_wait = pop_wait;
        self
    }

    pub fn water_mark_window(mut self, window: u64) -> ConfigurationBuilder {
        self.configuration.water_mark_window = window;
        self
    }

    pub fn retain_window(mut self, window: u64) -> ConfigurationBuilder {
        self.configuration.retain_window = window;
        self
    }

    pub fn max_sync_retries(mut self, retries: u32) -> ConfigurationBuilder {
        self.configuration.max_sync_retries = retries;
        self
    }

    pub fn change_cycle_cap(mut self, cap: u32) -> ConfigurationBuilder {
        self.configuration.change_cycle_cap = cap;
        self
    }

    pub fn msg_queue_capacity(mut self, capacity: usize) -> ConfigurationBuilder {
        self.configuration.msg_queue_capacity = capacity;
        self
    }

    pub fn sync_response_timeout(mut self, timeout: Duration) -> ConfigurationBuilder {
        self.configuration.sync_response_timeout = timeout;
        self
    }

    pub fn log_events(mut self, log: bool) -> ConfigurationBuilder {
        self.configuration.log_events = log;
        self
    }

    pub fn build(self) -> Configuration {
        self.configuration
    }
}

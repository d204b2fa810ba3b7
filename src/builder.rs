use core::marker::PhantomData;
use std::time::Duration;

use crate::{config::MonitorConfig, scheduler::Scheduler};

// Builder states
pub struct NeedTickPeriod;
pub struct NeedInfrequentPeriod;
pub struct Ready;

pub struct SchedulerBuilder<State> {
    tick: Duration,
    infrequent: Duration,
    grace_polls: u32,
    grace_interval: Duration,
    _phantom: PhantomData<State>,
}

// Start the builder
impl SchedulerBuilder<NeedTickPeriod> {
    pub fn new() -> Self {
        SchedulerBuilder {
            tick: Duration::ZERO,
            infrequent: Duration::ZERO,
            grace_polls: MonitorConfig::DEFAULT_GRACE_POLLS,
            grace_interval: Duration::from_millis(MonitorConfig::DEFAULT_GRACE_INTERVAL_MS),
            _phantom: PhantomData,
        }
    }

    /// Every setting taken from a config file.
    pub fn from_config(config: &MonitorConfig) -> SchedulerBuilder<Ready> {
        Self::new()
            .tick_period(config.tick_period())
            .infrequent_period(config.infrequent_period())
            .grace(config.grace_polls, config.grace_interval())
    }

    /// Period of the frequent update.
    pub fn tick_period(self, tick: Duration) -> SchedulerBuilder<NeedInfrequentPeriod> {
        SchedulerBuilder {
            tick,
            infrequent: self.infrequent,
            grace_polls: self.grace_polls,
            grace_interval: self.grace_interval,
            _phantom: PhantomData,
        }
    }
}

impl Default for SchedulerBuilder<NeedTickPeriod> {
    fn default() -> Self {
        Self::new()
    }
}

// Set infrequent period
impl SchedulerBuilder<NeedInfrequentPeriod> {
    /// Period of the infrequent update. Rounded down to a whole number of ticks,
    /// at least one.
    pub fn infrequent_period(self, infrequent: Duration) -> SchedulerBuilder<Ready> {
        SchedulerBuilder {
            tick: self.tick,
            infrequent,
            grace_polls: self.grace_polls,
            grace_interval: self.grace_interval,
            _phantom: PhantomData,
        }
    }
}

// Optional settings and build
impl SchedulerBuilder<Ready> {
    /// How long [`Scheduler::shutdown`] waits for the loop to notice a stop.
    pub fn grace(mut self, polls: u32, interval: Duration) -> Self {
        self.grace_polls = polls;
        self.grace_interval = interval;
        self
    }

    pub fn build(self) -> Scheduler {
        Scheduler::new(
            self.tick,
            self.infrequent,
            self.grace_polls,
            self.grace_interval,
        )
    }
}

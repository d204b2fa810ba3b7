//! Two-rate polling loop over every monitored device.
//!
//! Each tick calls, for every system in registration order, `update_timed(now)`
//! and `update_frequent()`; every `infrequent_every()` ticks (starting with the
//! first) it also calls `update_infrequent()`. A failing or panicking system is
//! logged and skipped until the next tick; it never stops the loop.
//!
//! [`Scheduler::stop`] only keeps the next tick from starting. An in-flight
//! transfer always completes. [`Scheduler::shutdown`] waits a bounded time for
//! the loop to notice and then returns whether it did; callers release
//! resources either way.

use std::{
    io,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU8, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use tracing::{debug, error, info, warn};

use crate::{
    builder::{NeedTickPeriod, SchedulerBuilder},
    device::{Chip, Device},
    error::Result,
};

/// What the scheduler drives. Implemented by every [`Device`].
pub trait Monitored: Send + Sync {
    fn name(&self) -> &str;
    fn responsive(&self) -> bool;
    fn update_timed(&self, now: Instant) -> Result<()>;
    fn update_frequent(&self) -> Result<()>;
    fn update_infrequent(&self) -> Result<()>;
}

impl core::fmt::Debug for dyn Monitored {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Monitored")
            .field("name", &self.name())
            .field("responsive", &self.responsive())
            .finish()
    }
}

impl<C: Chip> Monitored for Device<C> {
    fn name(&self) -> &str {
        Device::name(self)
    }

    fn responsive(&self) -> bool {
        Device::responsive(self)
    }

    fn update_timed(&self, now: Instant) -> Result<()> {
        Device::update_timed(self, now)
    }

    fn update_frequent(&self) -> Result<()> {
        Device::update_frequent(self)
    }

    fn update_infrequent(&self) -> Result<()> {
        Device::update_infrequent(self)
    }
}

/// Observer notified after a system's update succeeded, e.g. a display refresh.
pub trait Consumer: Send {
    fn on_frequent(&mut self, system: &dyn Monitored) {
        let _ = system;
    }

    fn on_infrequent(&mut self, system: &dyn Monitored) {
        let _ = system;
    }
}

/// Consumer that ignores every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoConsumer;

impl Consumer for NoConsumer {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SchedulerState {
    Stopped = 0,
    Running = 1,
    StopRequested = 2,
}

impl SchedulerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Running,
            2 => Self::StopRequested,
            _ => Self::Stopped,
        }
    }
}

struct System {
    device: Arc<dyn Monitored>,
    consumer: Box<dyn Consumer>,
}

#[derive(Clone, Copy)]
enum Stage {
    Timed,
    Frequent,
    Infrequent,
}

impl Stage {
    fn label(self) -> &'static str {
        match self {
            Stage::Timed => "timed",
            Stage::Frequent => "frequent",
            Stage::Infrequent => "infrequent",
        }
    }
}

pub struct Scheduler {
    systems: Mutex<Vec<System>>,
    tick: Duration,
    infrequent_every: u64,
    grace_polls: u32,
    grace_interval: Duration,
    state: AtomicU8,
}

impl core::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Scheduler")
            .field("tick", &self.tick)
            .field("infrequent_every", &self.infrequent_every)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub fn builder() -> SchedulerBuilder<NeedTickPeriod> {
        SchedulerBuilder::new()
    }

    pub(crate) fn new(
        tick: Duration,
        infrequent: Duration,
        grace_polls: u32,
        grace_interval: Duration,
    ) -> Self {
        let infrequent_every = if tick.is_zero() {
            1
        } else {
            (infrequent.as_nanos() / tick.as_nanos()).max(1) as u64
        };
        Self {
            systems: Mutex::new(Vec::new()),
            tick,
            infrequent_every,
            grace_polls,
            grace_interval,
            state: AtomicU8::new(SchedulerState::Stopped as u8),
        }
    }

    pub fn tick_period(&self) -> Duration {
        self.tick
    }

    /// Number of ticks between infrequent updates.
    pub fn infrequent_every(&self) -> u64 {
        self.infrequent_every
    }

    /// `(polls, interval)` used by [`Scheduler::shutdown`].
    pub fn grace(&self) -> (u32, Duration) {
        (self.grace_polls, self.grace_interval)
    }

    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// True until the loop has actually exited.
    pub fn running(&self) -> bool {
        self.state() != SchedulerState::Stopped
    }

    pub fn add(&self, device: Arc<dyn Monitored>, consumer: impl Consumer + 'static) {
        self.systems
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(System {
                device,
                consumer: Box::new(consumer),
            });
    }

    pub fn add_device(&self, device: Arc<dyn Monitored>) {
        self.add(device, NoConsumer);
    }

    pub fn len(&self) -> usize {
        self.systems
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs the loop on the calling thread until stopped.
    pub fn run(&self) {
        if self.claim() {
            self.run_loop();
        }
    }

    /// Moves Stopped to Running. Returns false if a loop already owns the
    /// scheduler.
    fn claim(&self) -> bool {
        let claimed = self
            .state
            .compare_exchange(
                SchedulerState::Stopped as u8,
                SchedulerState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if !claimed {
            warn!("scheduler already running");
        }
        claimed
    }

    fn run_loop(&self) {
        info!(tick = ?self.tick, infrequent_every = self.infrequent_every, "scheduler started");

        let mut index = 0u64;
        while self.state() == SchedulerState::Running {
            let started = Instant::now();
            self.step(index);
            index = index.wrapping_add(1);
            if let Some(rest) = self.tick.checked_sub(started.elapsed()) {
                thread::sleep(rest);
            }
        }

        self.state
            .store(SchedulerState::Stopped as u8, Ordering::Release);
        info!(ticks = index, "scheduler stopped");
    }

    /// Runs the loop on its own thread.
    ///
    /// The scheduler is Running before this returns, so a [`Scheduler::stop`]
    /// issued right after is never lost.
    pub fn spawn(self: &Arc<Self>) -> io::Result<JoinHandle<()>> {
        if !self.claim() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "scheduler already running",
            ));
        }
        let scheduler = Arc::clone(self);
        thread::Builder::new()
            .name("regwatch-scheduler".into())
            .spawn(move || scheduler.run_loop())
            .inspect_err(|_| {
                self.state
                    .store(SchedulerState::Stopped as u8, Ordering::Release);
            })
    }

    /// Asks the loop to exit before its next tick.
    pub fn stop(&self) {
        let _ = self.state.compare_exchange(
            SchedulerState::Running as u8,
            SchedulerState::StopRequested as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Stops the loop and waits up to the grace period for it to exit.
    ///
    /// Returns false if the loop was still inside a tick when the grace period
    /// ran out; the loop then exits on its own once that tick completes.
    pub fn shutdown(&self) -> bool {
        self.stop();
        for _ in 0..self.grace_polls {
            if !self.running() {
                return true;
            }
            thread::sleep(self.grace_interval);
        }
        let stopped = !self.running();
        if !stopped {
            warn!(
                polls = self.grace_polls,
                interval = ?self.grace_interval,
                "scheduler did not stop within grace period"
            );
        }
        stopped
    }

    /// Runs one tick synchronously. `index` decides whether the infrequent
    /// update is due.
    pub fn step(&self, index: u64) {
        let now = Instant::now();
        let infrequent = index % self.infrequent_every == 0;
        let mut systems = self.systems.lock().unwrap_or_else(PoisonError::into_inner);

        for system in systems.iter_mut() {
            let device = system.device.as_ref();

            guarded(device, Stage::Timed, || device.update_timed(now));

            if guarded(device, Stage::Frequent, || device.update_frequent()) {
                notify(device, || system.consumer.on_frequent(device));
            }

            if infrequent && guarded(device, Stage::Infrequent, || device.update_infrequent()) {
                notify(device, || system.consumer.on_infrequent(device));
            }
        }
    }
}

/// Runs one update, absorbing errors and panics. Returns whether it succeeded.
fn guarded(device: &dyn Monitored, stage: Stage, f: impl FnOnce() -> Result<()>) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => true,
        Ok(Err(err)) if err.is_transient() => {
            debug!(device = %device.name(), stage = stage.label(), %err, "transport error");
            false
        }
        Ok(Err(err)) => {
            warn!(device = %device.name(), stage = stage.label(), %err, "update failed");
            false
        }
        Err(_) => {
            error!(device = %device.name(), stage = stage.label(), "update panicked");
            false
        }
    }
}

fn notify(device: &dyn Monitored, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!(device = %device.name(), "consumer panicked");
    }
}

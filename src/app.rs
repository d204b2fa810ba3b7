//! Application context.
//!
//! Owns everything a process runs: the devices, the scheduler and its thread,
//! and the interrupt watchers. A signal handler (outside this crate) only needs
//! to reach [`App::shutdown`].

use std::{io, sync::Arc, thread::JoinHandle};

use tracing::{info, warn};

use crate::{
    builder::SchedulerBuilder,
    config::MonitorConfig,
    interrupt::InterruptWatcher,
    scheduler::{Consumer, Monitored, NoConsumer, Scheduler},
};

#[derive(Debug)]
pub struct App {
    scheduler: Arc<Scheduler>,
    scheduler_thread: Option<JoinHandle<()>>,
    watchers: Vec<InterruptWatcher>,
    devices: Vec<Arc<dyn Monitored>>,
}

impl App {
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            scheduler: Arc::new(scheduler),
            scheduler_thread: None,
            watchers: Vec::new(),
            devices: Vec::new(),
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(SchedulerBuilder::from_config(config).build())
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Registers a device with the scheduler.
    pub fn add_device(&mut self, device: Arc<dyn Monitored>) {
        self.add_system(device, NoConsumer);
    }

    pub fn add_system(&mut self, device: Arc<dyn Monitored>, consumer: impl Consumer + 'static) {
        self.scheduler.add(Arc::clone(&device), consumer);
        self.devices.push(device);
    }

    pub fn add_watcher(&mut self, watcher: InterruptWatcher) {
        self.watchers.push(watcher);
    }

    pub fn devices(&self) -> &[Arc<dyn Monitored>] {
        &self.devices
    }

    /// Finds a device by name.
    pub fn device(&self, name: &str) -> Option<&Arc<dyn Monitored>> {
        self.devices.iter().find(|d| d.name() == name)
    }

    /// Starts the scheduler thread. Does nothing if it is already running.
    pub fn start(&mut self) -> io::Result<()> {
        if self.scheduler_thread.is_some() {
            return Ok(());
        }
        self.scheduler_thread = Some(self.scheduler.spawn()?);
        info!(devices = self.devices.len(), watchers = self.watchers.len(), "monitor started");
        Ok(())
    }

    /// Stops watchers, then the scheduler with its bounded grace period.
    ///
    /// Returns whether the scheduler loop confirmed it stopped. If it did not,
    /// its thread is detached and finishes its current tick on its own.
    pub fn shutdown(mut self) -> bool {
        self.stop_all()
    }

    fn stop_all(&mut self) -> bool {
        for mut watcher in self.watchers.drain(..) {
            watcher.stop();
        }

        let stopped = self.scheduler.shutdown();
        if let Some(handle) = self.scheduler_thread.take() {
            if stopped {
                let _ = handle.join();
            } else {
                warn!("detaching scheduler thread still inside a tick");
            }
        }
        info!(stopped, "monitor shut down");
        stopped
    }
}

impl Drop for App {
    fn drop(&mut self) {
        if self.scheduler_thread.is_some() || !self.watchers.is_empty() {
            self.stop_all();
        }
    }
}

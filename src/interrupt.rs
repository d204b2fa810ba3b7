//! GPIO edge watchers.
//!
//! A watcher owns one [`EdgeSource`] and runs on its own thread. On every edge
//! it calls the user callback with the event and the device handle; the
//! callback normally drains the chip with [`Device::receive`], which takes the
//! device mutex and so serializes against the scheduler.

use std::{
    io,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use tracing::{debug, error, info, warn};

use crate::{
    device::{Chip, Device},
    error::{Result, TransportError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
    Both,
}

impl Edge {
    /// True if an edge of kind `other` should fire a watcher configured for `self`.
    pub fn accepts(self, other: Edge) -> bool {
        self == Edge::Both || other == Edge::Both || self == other
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeEvent {
    pub line: u32,
    pub edge: Edge,
    pub timestamp: Instant,
}

/// Blocking source of edge events for one GPIO line.
pub trait EdgeSource: Send + 'static {
    /// Waits up to `timeout` for the next edge. `Ok(None)` means the timeout
    /// expired.
    fn wait_for_edge(
        &mut self,
        timeout: Duration,
    ) -> core::result::Result<Option<EdgeEvent>, TransportError>;
}

/// Producer half of a [`ChannelEdgeSource`], handed to the GPIO driver.
#[derive(Debug, Clone)]
pub struct EdgeSender {
    line: u32,
    tx: Sender<EdgeEvent>,
}

impl EdgeSender {
    /// Reports an edge. Returns false once the watcher side is gone.
    pub fn trigger(&self, edge: Edge) -> bool {
        self.tx
            .send(EdgeEvent {
                line: self.line,
                edge,
                timestamp: Instant::now(),
            })
            .is_ok()
    }
}

/// Edge source fed through a channel, for drivers that deliver edges from
/// their own thread.
#[derive(Debug)]
pub struct ChannelEdgeSource {
    edge: Edge,
    rx: Receiver<EdgeEvent>,
}

impl ChannelEdgeSource {
    /// Creates a source for `line` that reports only edges matching `edge`.
    pub fn channel(line: u32, edge: Edge) -> (EdgeSender, Self) {
        let (tx, rx) = mpsc::channel();
        (EdgeSender { line, tx }, Self { edge, rx })
    }
}

impl EdgeSource for ChannelEdgeSource {
    fn wait_for_edge(
        &mut self,
        timeout: Duration,
    ) -> core::result::Result<Option<EdgeEvent>, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(event) if self.edge.accepts(event.edge) => return Ok(Some(event)),
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => return Err(TransportError::Disconnected),
            }
        }
    }
}

/// Timing of a watcher thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherConfig {
    /// How long one wait blocks before the stop flag is checked again.
    pub poll: Duration,
    /// Callbacks running longer than this are logged; they delay the next edge.
    pub budget: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll: Duration::from_millis(100),
            budget: Duration::from_millis(10),
        }
    }
}

/// Thread watching one line on behalf of one device.
#[derive(Debug)]
pub struct InterruptWatcher {
    name: String,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl InterruptWatcher {
    pub fn spawn<C, S, F>(
        source: S,
        device: Arc<Device<C>>,
        config: WatcherConfig,
        callback: F,
    ) -> io::Result<Self>
    where
        C: Chip,
        S: EdgeSource,
        F: FnMut(&EdgeEvent, &Arc<Device<C>>) -> Result<()> + Send + 'static,
    {
        let name = format!("regwatch-irq-{}", device.name());
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || watch(source, device, config, callback, flag))?;
        Ok(Self {
            name,
            stop,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// False once the thread has exited, e.g. because its source disconnected.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signals the thread and joins it. Returns once any running callback
    /// completes and the current wait times out.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(watcher = %self.name, "watcher thread panicked");
            }
        }
    }
}

impl Drop for InterruptWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn watch<C, S, F>(
    mut source: S,
    device: Arc<Device<C>>,
    config: WatcherConfig,
    mut callback: F,
    stop: Arc<AtomicBool>,
) where
    C: Chip,
    S: EdgeSource,
    F: FnMut(&EdgeEvent, &Arc<Device<C>>) -> Result<()>,
{
    debug!(device = %device.name(), "watcher started");
    while !stop.load(Ordering::Acquire) {
        let event = match source.wait_for_edge(config.poll) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(TransportError::Disconnected) => {
                info!(device = %device.name(), "edge source closed, watcher exiting");
                break;
            }
            Err(err) => {
                warn!(device = %device.name(), %err, "edge wait failed");
                thread::sleep(config.poll);
                continue;
            }
        };

        let started = Instant::now();
        match catch_unwind(AssertUnwindSafe(|| callback(&event, &device))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(device = %device.name(), line = event.line, %err, "interrupt callback failed")
            }
            Err(_) => error!(device = %device.name(), line = event.line, "interrupt callback panicked"),
        }
        let elapsed = started.elapsed();
        if elapsed > config.budget {
            warn!(
                device = %device.name(),
                line = event.line,
                elapsed = ?elapsed,
                budget = ?config.budget,
                "interrupt callback over budget"
            );
        }
    }
    debug!(device = %device.name(), "watcher stopped");
}

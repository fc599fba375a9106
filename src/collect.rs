use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use log::{debug, warn};

use crate::docker::{Container, ContainerDirectory, LogStream, StreamSource};
use crate::store::{LogLine, LogStore};

pub const LIVENESS_INTERVAL: Duration = Duration::from_secs(2);
const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);
const SLEEP_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Streaming,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PumpOutcome {
    /// The container died and the stopped banner was appended.
    ContainerDied,
    /// Shutdown was requested before the container died.
    Interrupted,
}

/// Owns one container's log stream process and the thread that drains it
/// into the store. Lifecycle: Idle -> Streaming -> Stopped, no way back.
pub struct LogCollector {
    container: Container,
    store: Arc<LogStore>,
    directory: Arc<dyn ContainerDirectory>,
    source: Arc<dyn StreamSource>,
    phase: Arc<Mutex<Phase>>,
    stopping: Arc<AtomicBool>,
    stream: Mutex<Option<Box<dyn LogStream>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl LogCollector {
    pub fn new(
        container: Container,
        store: Arc<LogStore>,
        directory: Arc<dyn ContainerDirectory>,
        source: Arc<dyn StreamSource>,
    ) -> Self {
        Self {
            container,
            store,
            directory,
            source,
            phase: Arc::new(Mutex::new(Phase::Idle)),
            stopping: Arc::new(AtomicBool::new(false)),
            stream: Mutex::new(None),
            reader: Mutex::new(None),
        }
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    fn phase(&self) -> Phase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn start(&self) -> Result<()> {
        {
            let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
            if *phase != Phase::Idle {
                bail!(
                    "log collection for {} was already started",
                    self.container.name
                );
            }
            *phase = Phase::Streaming;
        }
        self.spawn_reader().inspect_err(|_| {
            *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = Phase::Idle;
        })
    }

    fn spawn_reader(&self) -> Result<()> {
        let mut stream = self.source.open(&self.container)?;
        let reader = match stream.take_reader() {
            Ok(reader) => reader,
            Err(err) => {
                stream.terminate();
                return Err(err);
            }
        };

        let store = Arc::clone(&self.store);
        let directory = Arc::clone(&self.directory);
        let phase = Arc::clone(&self.phase);
        let stopping = Arc::clone(&self.stopping);
        let id = self.container.id.clone();
        let name = self.container.name.clone();
        let spawned = thread::Builder::new()
            .name(format!("logs-{name}"))
            .spawn(move || {
                let alive = || directory.is_running(&id);
                let outcome = pump_lines(reader, &store, &alive, &stopping, LIVENESS_INTERVAL);
                if outcome == PumpOutcome::ContainerDied {
                    *phase.lock().unwrap_or_else(PoisonError::into_inner) = Phase::Stopped;
                    debug!("container {name} stopped");
                }
            });
        match spawned {
            Ok(handle) => {
                *self.stream.lock().unwrap_or_else(PoisonError::into_inner) = Some(stream);
                *self.reader.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                Ok(())
            }
            Err(err) => {
                stream.terminate();
                Err(err).context("spawning the log reader thread")
            }
        }
    }

    /// Terminates the stream process and joins the reader with a bounded
    /// wait. Safe to call twice, and from any phase.
    pub fn stop(&self) {
        debug!(
            "stopping collector for {} from {:?}",
            self.container.name,
            self.phase()
        );
        self.stopping.store(true, Ordering::Relaxed);
        if let Some(mut stream) = self
            .stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            stream.terminate();
        }
        if let Some(handle) = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            if !join_with_timeout(handle, READER_JOIN_TIMEOUT) {
                warn!(
                    "log reader for {} ignored shutdown for {READER_JOIN_TIMEOUT:?}",
                    self.container.name
                );
            }
        }
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = Phase::Stopped;
    }
}

/// Drains the stream into the store, consulting `alive` at most once per
/// `liveness_interval`. The stopped transition is driven only by that poll,
/// so after end-of-stream it keeps firing until death or shutdown — a dead
/// container can never miss its banner.
pub(crate) fn pump_lines(
    reader: impl BufRead,
    store: &LogStore,
    alive: &dyn Fn() -> bool,
    stopping: &AtomicBool,
    liveness_interval: Duration,
) -> PumpOutcome {
    let mut last_check = Instant::now();
    for line in reader.lines() {
        if stopping.load(Ordering::Relaxed) {
            return PumpOutcome::Interrupted;
        }
        match line {
            Ok(text) => store.append(LogLine::arrived_now(text)),
            Err(err) => {
                debug!("log stream read error: {err}");
                break;
            }
        }
        if last_check.elapsed() >= liveness_interval {
            if !alive() {
                store.append_stopped_banner(terminal_width());
                return PumpOutcome::ContainerDied;
            }
            last_check = Instant::now();
        }
    }
    debug!("stream ended with {} lines buffered", store.len());
    loop {
        if stopping.load(Ordering::Relaxed) {
            return PumpOutcome::Interrupted;
        }
        if !alive() {
            store.append_stopped_banner(terminal_width());
            return PumpOutcome::ContainerDied;
        }
        let deadline = Instant::now() + liveness_interval;
        while Instant::now() < deadline {
            if stopping.load(Ordering::Relaxed) {
                return PumpOutcome::Interrupted;
            }
            thread::sleep(SLEEP_SLICE);
        }
    }
}

/// Waits for a thread without risking a hung shutdown; `false` means the
/// thread was abandoned still running.
pub(crate) fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
    handle.join().is_ok()
}

fn terminal_width() -> usize {
    crossterm::terminal::size()
        .map(|(cols, _)| cols as usize)
        .unwrap_or(80)
}

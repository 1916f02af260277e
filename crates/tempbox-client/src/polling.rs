use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tempbox_config::PollingConfig;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    NewData,
    Empty,
}

/// Delay state for one watched inbox.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    multiplier: f64,
    threshold: u32,
    delay: Duration,
    empty_polls: u32,
}

impl Backoff {
    pub fn new(config: &PollingConfig) -> Self {
        let min = Duration::from_millis(config.min_delay_ms.max(1));
        let max = Duration::from_millis(config.max_delay_ms).max(min);
        Self {
            min,
            max,
            multiplier: config.backoff_multiplier.max(1.0),
            threshold: config.empty_threshold,
            delay: min,
            empty_polls: 0,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn empty_polls(&self) -> u32 {
        self.empty_polls
    }

    pub fn reset(&mut self) {
        self.delay = self.min;
        self.empty_polls = 0;
    }

    pub fn record(&mut self, outcome: PollOutcome) {
        match outcome {
            PollOutcome::NewData => self.reset(),
            PollOutcome::Empty => {
                self.empty_polls = self.empty_polls.saturating_add(1);
                if self.empty_polls >= self.threshold {
                    self.delay = self.delay.mul_f64(self.multiplier).min(self.max);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollingSnapshot {
    pub address: Option<String>,
    pub delay: Duration,
    pub empty_polls: u32,
    pub active: bool,
}

struct Watch {
    handle: JoinHandle<()>,
    wake: Arc<Notify>,
}

/// Runs one inbox watch at a time, stretching the interval while the
/// inbox stays quiet.
pub struct PollingController {
    backoff: Arc<Mutex<Backoff>>,
    address: Mutex<Option<String>>,
    watch: Mutex<Option<Watch>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PollingController {
    pub fn new(config: &PollingConfig) -> Self {
        Self {
            backoff: Arc::new(Mutex::new(Backoff::new(config))),
            address: Mutex::new(None),
            watch: Mutex::new(None),
        }
    }

    /// Replaces any running watch. The first fetch runs right away.
    pub fn watch<F, Fut, E>(&self, address: impl Into<String>, mut fetch: F)
    where
        F: FnMut(String) -> Fut + Send + 'static,
        Fut: Future<Output = Result<PollOutcome, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let address = address.into();
        let mut current = lock(&self.watch);
        if let Some(previous) = current.take() {
            previous.handle.abort();
        }
        lock(&self.backoff).reset();
        *lock(&self.address) = Some(address.clone());

        let backoff = Arc::clone(&self.backoff);
        let wake = Arc::new(Notify::new());
        let woken = Arc::clone(&wake);
        tracing::info!(%address, "polling started");

        let handle = tokio::spawn(async move {
            loop {
                let result = fetch(address.clone()).await;
                let delay = {
                    let mut state = lock(&backoff);
                    match result {
                        Ok(outcome) => {
                            let before = state.delay();
                            state.record(outcome);
                            if state.delay() != before {
                                tracing::debug!(
                                    %address,
                                    empty_polls = state.empty_polls(),
                                    delay_ms = state.delay().as_millis() as u64,
                                    "poll interval changed"
                                );
                            }
                        }
                        Err(err) => tracing::warn!(%address, "poll failed: {err}"),
                    }
                    state.delay()
                };

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = woken.notified() => {}
                }
            }
        });
        *current = Some(Watch { handle, wake });
    }

    pub fn stop(&self) {
        if let Some(watch) = lock(&self.watch).take() {
            watch.handle.abort();
            tracing::info!("polling stopped");
        }
        *lock(&self.address) = None;
    }

    /// Resets the backoff and wakes the watcher without waiting out the delay.
    pub fn poll_now(&self) {
        lock(&self.backoff).reset();
        if let Some(watch) = lock(&self.watch).as_ref() {
            watch.wake.notify_one();
        }
    }

    pub fn snapshot(&self) -> PollingSnapshot {
        let active = lock(&self.watch)
            .as_ref()
            .map(|watch| !watch.handle.is_finished())
            .unwrap_or(false);
        let address = lock(&self.address).clone();
        let state = lock(&self.backoff).clone();
        PollingSnapshot {
            address,
            delay: state.delay(),
            empty_polls: state.empty_polls(),
            active,
        }
    }
}

impl Drop for PollingController {
    fn drop(&mut self) {
        if let Some(watch) = lock(&self.watch).take() {
            watch.handle.abort();
        }
    }
}

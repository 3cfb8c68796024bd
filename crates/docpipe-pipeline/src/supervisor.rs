//! Pipeline lifecycle: start, background refresh and bounded shutdown

use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use docpipe_core::CoreError;

use crate::manager::{run_periodic, Cycle};
use crate::registry::Refresh;
use crate::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Both background tasks finished within the timeout
    Graceful,
    /// The timeout elapsed first; the tasks were left to finish detached
    TimedOut,
}

#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    pub refresh_interval: Duration,
    pub shutdown_timeout: Duration,
}

struct Running {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

enum State {
    Idle,
    /// Initial refresh in flight; holds the token the loops will use
    Starting(CancellationToken),
    Running(Running),
    Stopped,
}

/// Owns a manager loop and a registry refresh loop
pub struct Supervisor<C: Cycle, R: Refresh> {
    manager: Arc<C>,
    registry: Arc<R>,
    config: SupervisorConfig,
    state: Mutex<State>,
}

impl<C: Cycle, R: Refresh> Supervisor<C, R> {
    pub fn new(manager: Arc<C>, registry: Arc<R>, config: SupervisorConfig) -> Self {
        Self {
            manager,
            registry,
            config,
            state: Mutex::new(State::Idle),
        }
    }

    pub fn manager(&self) -> &Arc<C> {
        &self.manager
    }

    pub fn registry(&self) -> &Arc<R> {
        &self.registry
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock(), State::Running(_))
    }

    /// Load the registry once, then spawn the manager and refresh loops.
    ///
    /// A failed initial load is returned and nothing is spawned. Either
    /// `cancel` or [`Supervisor::stop`] ends the spawned tasks; a stop that
    /// lands while the initial load is running makes `start` return
    /// `Cancelled` without spawning.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<()> {
        let cancel = cancel.child_token();
        {
            let mut state = self.state.lock();
            if !matches!(*state, State::Idle) {
                return Err(PipelineError::AlreadyStarted);
            }
            *state = State::Starting(cancel.clone());
        }

        let name = self.manager.name();
        let loaded = tokio::select! {
            _ = cancel.cancelled() => Err(PipelineError::Core(CoreError::Cancelled)),
            loaded = self.registry.refresh() => loaded,
        };
        let units = match loaded {
            Ok(units) => units,
            Err(e) => {
                let mut state = self.state.lock();
                if matches!(*state, State::Starting(_)) {
                    *state = State::Idle;
                }
                return Err(e);
            }
        };
        info!(pipeline = name, units = units, "Registry loaded");

        let mut state = self.state.lock();
        if !matches!(*state, State::Starting(_)) || cancel.is_cancelled() {
            info!(pipeline = name, "Stopped before start completed");
            return Err(CoreError::Cancelled.into());
        }

        let manager = tokio::spawn(run_periodic(self.manager.clone(), cancel.clone()));
        let refresher = tokio::spawn(refresh_loop(
            name,
            self.registry.clone(),
            self.config.refresh_interval,
            cancel.clone(),
        ));
        *state = State::Running(Running {
            cancel,
            handles: vec![manager, refresher],
        });
        drop(state);

        info!(pipeline = name, "Pipeline started");
        Ok(())
    }

    /// Signal both loops and wait for them, at most `shutdown_timeout`
    pub async fn stop(&self) -> ShutdownOutcome {
        let running = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, State::Stopped) {
                State::Running(running) => running,
                State::Starting(cancel) => {
                    cancel.cancel();
                    info!(pipeline = self.manager.name(), "Pipeline stopped while starting");
                    return ShutdownOutcome::Graceful;
                }
                previous => {
                    *state = previous;
                    return ShutdownOutcome::Graceful;
                }
            }
        };

        let name = self.manager.name();
        running.cancel.cancel();

        match tokio::time::timeout(self.config.shutdown_timeout, join_all(running.handles)).await {
            Ok(_) => {
                info!(pipeline = name, "Pipeline stopped gracefully");
                ShutdownOutcome::Graceful
            }
            Err(_) => {
                warn!(
                    pipeline = name,
                    timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                    "Pipeline shutdown timed out"
                );
                ShutdownOutcome::TimedOut
            }
        }
    }
}

async fn refresh_loop<R: Refresh>(
    name: &'static str,
    registry: Arc<R>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => match registry.refresh().await {
                Ok(units) => debug!(pipeline = name, units = units, "Registry refreshed"),
                Err(e) => warn!(pipeline = name, error = %e, "Registry refresh failed, keeping previous units"),
            },
        }
    }
}

//! Decides when a listener or relay stops serving.
//!
//! Serving ends on a termination signal, or earlier when the bus itself can
//! no longer serve, such as a relay whose upstream listener went away.

use std::fmt;
use std::io;
use std::thread;
use std::time::Duration;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use signal_hook::low_level::signal_name;
use thiserror::Error;
use tracing::info;

use super::PROCESS_TARGET;

const STOP_SIGNALS: [i32; 4] = [SIGTERM, SIGINT, SIGQUIT, SIGHUP];

/// How often the bus is asked whether it has ended.
const ENDED_POLL: Duration = Duration::from_millis(100);

/// Why serving stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause {
    /// A termination signal arrived.
    Signal(i32),
    /// The bus ended without being asked to.
    Ended,
}

impl fmt::Display for StopCause {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal(signal) => {
                formatter.write_str(signal_name(*signal).unwrap_or("unknown signal"))
            }
            Self::Ended => formatter.write_str("bus ended"),
        }
    }
}

/// Source of the decision to stop serving.
pub trait ShutdownSignal: Send + Sync {
    /// Blocks until serving should stop. `ended` is polled and reports
    /// whether the bus has stopped on its own.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError`] when the signal handlers cannot be
    /// installed.
    fn wait(&self, ended: &dyn Fn() -> bool) -> Result<StopCause, ShutdownError>;
}

/// Errors reported while waiting to stop.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Stops on SIGTERM, SIGINT, SIGQUIT or SIGHUP, or when the bus ends.
#[derive(Debug, Clone)]
pub struct SystemShutdownSignal {
    grace: Duration,
}

impl SystemShutdownSignal {
    /// Builds a stop source that reports `grace` as the shutdown budget.
    #[must_use]
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }
}

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&self, ended: &dyn Fn() -> bool) -> Result<StopCause, ShutdownError> {
        let mut signals =
            Signals::new(STOP_SIGNALS).map_err(|source| ShutdownError::Install { source })?;
        let cause = wait_for_stop(&mut signals, ended, ENDED_POLL);
        info!(
            target: PROCESS_TARGET,
            %cause,
            grace_ms = self.grace.as_millis(),
            "stopping"
        );
        Ok(cause)
    }
}

fn wait_for_stop(signals: &mut Signals, ended: &dyn Fn() -> bool, poll: Duration) -> StopCause {
    loop {
        if let Some(signal) = signals.pending().next() {
            return StopCause::Signal(signal);
        }
        if ended() {
            return StopCause::Ended;
        }
        thread::sleep(poll);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use signal_hook::consts::signal::{SIGUSR1, SIGUSR2};
    use signal_hook::low_level::raise;

    use super::*;

    #[test]
    fn an_ended_bus_stops_without_a_signal() {
        let mut signals = Signals::new([SIGUSR1]).expect("install handler");
        let polls = AtomicUsize::new(0);
        let ended = || polls.fetch_add(1, Ordering::SeqCst) >= 2;
        let cause = wait_for_stop(&mut signals, &ended, Duration::from_millis(1));
        assert_eq!(cause, StopCause::Ended);
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn a_pending_signal_wins_over_a_live_bus() {
        let mut signals = Signals::new([SIGUSR2]).expect("install handler");
        raise(SIGUSR2).expect("raise signal");
        let cause = wait_for_stop(&mut signals, &|| false, Duration::from_millis(1));
        assert_eq!(cause, StopCause::Signal(SIGUSR2));
        assert_eq!(cause.to_string(), "SIGUSR2");
    }
}

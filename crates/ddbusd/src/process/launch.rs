//! Supervises listener launch sequencing and runtime orchestration.

use std::env;
use std::fmt;
use std::sync::Arc;

use ddbus_config::{Config, RuntimePaths, SocketEndpoint};
use tracing::{info, warn};

use crate::StructuredHealthReporter;
use crate::bootstrap::{
    ConfigLoader, Daemon, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
use crate::health::HealthReporter;
use crate::transport::RelayProxy;

use super::daemonizer::{Daemonizer, SystemDaemonizer};
use super::errors::LaunchError;
use super::guard::{HealthState, ProcessGuard};
use super::shutdown::{ShutdownSignal, StopCause, SystemShutdownSignal};
use super::{FOREGROUND_ENV_VAR, PROCESS_TARGET, SHUTDOWN_TIMEOUT};

/// Launch mode for the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Fork into the background and detach from the controlling terminal.
    Background,
    /// Remain attached to the terminal; primarily used for debugging and tests.
    Foreground,
}

impl LaunchMode {
    fn detect() -> Self {
        if env::var_os(FOREGROUND_ENV_VAR).is_some() {
            Self::Foreground
        } else {
            Self::Background
        }
    }
}

/// What a launched process serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServingRole {
    /// Routes clients through a listener core.
    Listener {
        /// Endpoint tools connect to.
        endpoint: SocketEndpoint,
    },
    /// Forwards local tools to another listener.
    Relay {
        /// Endpoint local tools connect to.
        local: SocketEndpoint,
        /// Listener the tools are forwarded to.
        upstream: SocketEndpoint,
    },
}

impl ServingRole {
    pub(crate) fn of(config: &Config) -> Self {
        let local = config.listen_socket().clone();
        match config.relay_upstream() {
            Some(upstream) => Self::Relay {
                local,
                upstream: upstream.clone(),
            },
            None => Self::Listener { endpoint: local },
        }
    }
}

impl fmt::Display for ServingRole {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listener { endpoint } => write!(formatter, "listener on {endpoint}"),
            Self::Relay { local, upstream } => {
                write!(formatter, "relay on {local} forwarding to {upstream}")
            }
        }
    }
}

/// Process-level collaborators needed to control the listener lifecycle.
pub(crate) struct ProcessControl<D, S> {
    pub(crate) mode: LaunchMode,
    pub(crate) daemonizer: D,
    pub(crate) shutdown: S,
}

/// Service dependencies required to construct the listener runtime.
pub(crate) struct ServiceDeps<L> {
    pub(crate) loader: L,
    pub(crate) reporter: Arc<dyn HealthReporter>,
}

/// Collaborators required to launch the listener runtime.
pub(crate) struct LaunchPlan<L, D, S> {
    pub(crate) process: ProcessControl<D, S>,
    pub(crate) services: ServiceDeps<L>,
}

/// Runs the listener using the production collaborators.
///
/// # Errors
///
/// Returns [`LaunchError`] when any launch step fails; see
/// [`LaunchError`] for the individual causes.
pub fn run_daemon() -> Result<(), LaunchError> {
    let plan = LaunchPlan {
        process: ProcessControl {
            mode: LaunchMode::detect(),
            daemonizer: SystemDaemonizer::new(),
            shutdown: SystemShutdownSignal::new(SHUTDOWN_TIMEOUT),
        },
        services: ServiceDeps {
            loader: SystemConfigLoader,
            reporter: Arc::new(StructuredHealthReporter::new()),
        },
    };
    run_daemon_with(plan)
}

/// Runs the listener with injected collaborators.
///
/// The runtime serves as a listener, or as a relay proxy when an upstream
/// listener is configured, until `shutdown` fires.
pub(crate) fn run_daemon_with<L, D, S>(plan: LaunchPlan<L, D, S>) -> Result<(), LaunchError>
where
    L: ConfigLoader,
    D: Daemonizer,
    S: ShutdownSignal,
{
    let LaunchPlan { process, services } = plan;
    let ProcessControl {
        mode,
        daemonizer,
        shutdown,
    } = process;
    let ServiceDeps { loader, reporter } = services;

    let config = loader.load()?;
    config.check_endpoints()?;
    let role = ServingRole::of(&config);
    info!(target: PROCESS_TARGET, ?mode, %role, "starting");
    config.listen_socket().prepare_filesystem()?;
    let mut guard = ProcessGuard::acquire(RuntimePaths::from_config(&config)?)?;
    if matches!(mode, LaunchMode::Background) {
        daemonizer.daemonize(&role, guard.paths())?;
    }
    guard.write_pid(std::process::id())?;
    guard.write_health(HealthState::Starting)?;

    let daemon = bootstrap_with(&StaticConfigLoader::new(config.clone()), reporter)?;
    let served = match role {
        ServingRole::Relay { local, upstream } => serve_relay(&local, upstream, &guard, &shutdown),
        ServingRole::Listener { .. } => serve_listener(&daemon, &guard, &shutdown),
    };
    daemon.shutdown();
    served?;
    info!(target: PROCESS_TARGET, "shutdown sequence completed");
    Ok(())
}

fn serve_listener<S: ShutdownSignal>(
    daemon: &Daemon,
    guard: &ProcessGuard,
    shutdown: &S,
) -> Result<(), LaunchError> {
    daemon.attach_configured_transports()?;
    guard.write_health(HealthState::Ready)?;
    let core = daemon.core();
    if shutdown.wait(&|| core.is_shut_down())? == StopCause::Ended {
        warn!(target: PROCESS_TARGET, "listener core shut down; stopping");
    }
    guard.write_health(HealthState::Stopping)?;
    Ok(())
}

fn serve_relay<S: ShutdownSignal>(
    local: &SocketEndpoint,
    upstream: SocketEndpoint,
    guard: &ProcessGuard,
    shutdown: &S,
) -> Result<(), LaunchError> {
    let upstream_name = upstream.to_string();
    let relay = RelayProxy::bind(local, upstream)?.start()?;
    guard.write_health(HealthState::Ready)?;
    let cause = shutdown.wait(&|| !relay.is_connected())?;
    guard.write_health(HealthState::Stopping)?;
    relay.shutdown();
    relay.join()?;
    match cause {
        StopCause::Ended => Err(LaunchError::UpstreamLost {
            upstream: upstream_name,
        }),
        StopCause::Signal(_) => Ok(()),
    }
}

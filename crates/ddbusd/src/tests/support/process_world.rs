//! Process supervision world shared across lifecycle scenarios.

use std::fs;
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use ddbus_config::{RuntimePaths, SocketEndpoint};
use serde_json::Value;
use signal_hook::consts::signal::SIGTERM;

use crate::bootstrap::ConfigLoader;
use crate::health::HealthReporter;
use crate::process::daemonizer::{DaemonizeError, Daemonizer};
use crate::process::launch::{
    LaunchPlan, ProcessControl, ServiceDeps, ServingRole, run_daemon_with,
};
use crate::process::shutdown::{ShutdownError, ShutdownSignal, StopCause};
use crate::process::{LaunchError, LaunchMode};

use super::config_loader::{FailingConfigLoader, TestConfigLoader};
use super::reporter::RecordingHealthReporter;

const WAIT_TIMEOUT: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(25);

pub type StepResult = Result<(), String>;

pub struct ProcessTestWorld {
    loader: TestConfigLoader,
    reporter: Arc<RecordingHealthReporter>,
    daemonizer: TestDaemonizer,
    shutdown: TestShutdownSignal,
    handle: Option<thread::JoinHandle<Result<(), LaunchError>>>,
    result: Option<Result<(), LaunchError>>,
    upstream: Option<TcpListener>,
}

impl Default for ProcessTestWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTestWorld {
    pub fn new() -> Self {
        Self {
            loader: TestConfigLoader::new(),
            reporter: Arc::new(RecordingHealthReporter::default()),
            daemonizer: TestDaemonizer::default(),
            shutdown: TestShutdownSignal::new(),
            handle: None,
            result: None,
            upstream: None,
        }
    }

    /// Serves as a relay towards a stand-in upstream listener.
    pub fn forward_to_upstream(&mut self) -> StepResult {
        let upstream = TcpListener::bind(("127.0.0.1", 0)).map_err(|error| error.to_string())?;
        let port = upstream.local_addr().map_err(|error| error.to_string())?.port();
        self.loader = self
            .loader
            .clone()
            .with_relay_upstream(SocketEndpoint::tcp("127.0.0.1", port));
        self.upstream = Some(upstream);
        Ok(())
    }

    /// Accepts the relay's upstream link and closes it along with the
    /// stand-in listener.
    pub fn stop_upstream(&mut self) -> StepResult {
        let upstream = self
            .upstream
            .take()
            .ok_or_else(|| "no upstream listener".to_owned())?;
        let (link, _): (TcpStream, _) = upstream.accept().map_err(|error| error.to_string())?;
        drop(link);
        Ok(())
    }

    pub fn start_background(&mut self) -> StepResult {
        if self.handle.is_some() {
            return Err("listener already running".to_owned());
        }
        let plan = self.plan(LaunchMode::Background, self.loader.clone(), self.shutdown.clone());
        self.handle = Some(thread::spawn(move || run_daemon_with(plan)));
        Ok(())
    }

    pub fn start_foreground(&mut self, pretrigger: bool) -> StepResult {
        if self.result.is_some() {
            return Err("result already recorded".to_owned());
        }
        let shutdown = TestShutdownSignal::new();
        if pretrigger {
            shutdown.trigger();
        }
        let plan = self.plan(LaunchMode::Foreground, self.loader.clone(), shutdown);
        self.result = Some(run_daemon_with(plan));
        Ok(())
    }

    pub fn start_with_invalid_config(&mut self) -> StepResult {
        if self.result.is_some() {
            return Err("result already recorded".to_owned());
        }
        let plan = self.plan(LaunchMode::Foreground, FailingConfigLoader, TestShutdownSignal::new());
        self.result = Some(run_daemon_with(plan));
        Ok(())
    }

    fn plan<L: ConfigLoader>(
        &self,
        mode: LaunchMode,
        loader: L,
        shutdown: TestShutdownSignal,
    ) -> LaunchPlan<L, TestDaemonizer, TestShutdownSignal> {
        let reporter: Arc<dyn HealthReporter> = self.reporter.clone();
        LaunchPlan {
            process: ProcessControl {
                mode,
                daemonizer: self.daemonizer.clone(),
                shutdown,
            },
            services: ServiceDeps { loader, reporter },
        }
    }

    pub fn join_background(&mut self) -> StepResult {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| "listener not running".to_owned())?;
        let result = handle
            .join()
            .map_err(|_| "listener thread panicked".to_owned())?;
        self.result = Some(result);
        Ok(())
    }

    pub fn trigger_shutdown(&self) {
        self.shutdown.trigger();
    }

    pub fn reporter(&self) -> &RecordingHealthReporter {
        &self.reporter
    }

    pub fn lock_path(&self) -> PathBuf {
        self.loader.runtime_dir().join("ddbusd.lock")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.loader.runtime_dir().join("ddbusd.pid")
    }

    pub fn health_path(&self) -> PathBuf {
        self.loader.runtime_dir().join("ddbusd.health")
    }

    pub fn socket_path(&self) -> PathBuf {
        self.loader.runtime_dir().join("ddbusd.sock")
    }

    pub fn read_health(&self) -> Result<Value, String> {
        let content = fs::read_to_string(self.health_path()).map_err(|error| error.to_string())?;
        serde_json::from_str(&content).map_err(|error| error.to_string())
    }

    pub fn write_stale_runtime(&self) -> StepResult {
        fs::write(self.lock_path(), b"").map_err(|error| error.to_string())?;
        fs::write(self.pid_path(), b"0\n").map_err(|error| error.to_string())
    }

    pub fn daemonizer_calls(&self) -> usize {
        self.daemonizer.calls()
    }

    pub fn daemonized_roles(&self) -> Vec<ServingRole> {
        self.daemonizer.roles()
    }

    pub fn last_result(&self) -> Option<&Result<(), LaunchError>> {
        self.result.as_ref()
    }

    pub fn last_error(&self) -> Option<&LaunchError> {
        self.result.as_ref()?.as_ref().err()
    }

    pub fn wait_for_status(&self, expected: &str) -> StepResult {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        while Instant::now() < deadline {
            let status = self
                .read_health()
                .ok()
                .map(|snapshot| snapshot_status(&snapshot).to_owned());
            if status.as_deref() == Some(expected) {
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL);
        }
        Err(format!("listener did not publish {expected} health snapshot"))
    }
}

impl Drop for ProcessTestWorld {
    fn drop(&mut self) {
        self.shutdown.trigger();
        if let Some(handle) = self.handle.take() {
            drop(handle.join());
        }
    }
}

#[derive(Clone, Default)]
pub struct TestDaemonizer {
    calls: Arc<AtomicUsize>,
    roles: Arc<Mutex<Vec<ServingRole>>>,
}

impl TestDaemonizer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn roles(&self) -> Vec<ServingRole> {
        self.roles.lock().expect("roles mutex poisoned").clone()
    }
}

impl Daemonizer for TestDaemonizer {
    fn daemonize(&self, role: &ServingRole, _paths: &RuntimePaths) -> Result<(), DaemonizeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.roles
            .lock()
            .expect("roles mutex poisoned")
            .push(role.clone());
        Ok(())
    }
}

#[derive(Clone)]
pub struct TestShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl TestShutdownSignal {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    pub fn trigger(&self) {
        let (lock, cvar) = &*self.inner;
        let mut triggered = lock.lock().expect("shutdown mutex poisoned");
        *triggered = true;
        cvar.notify_all();
    }
}

impl ShutdownSignal for TestShutdownSignal {
    fn wait(&self, ended: &dyn Fn() -> bool) -> Result<StopCause, ShutdownError> {
        let (lock, cvar) = &*self.inner;
        let mut triggered = lock.lock().expect("shutdown mutex poisoned");
        while !*triggered {
            if ended() {
                return Ok(StopCause::Ended);
            }
            triggered = cvar
                .wait_timeout(triggered, POLL_INTERVAL)
                .expect("shutdown mutex poisoned during wait")
                .0;
        }
        Ok(StopCause::Signal(SIGTERM))
    }
}

pub fn snapshot_status(snapshot: &Value) -> &str {
    snapshot
        .get("status")
        .and_then(Value::as_str)
        .expect("health snapshot should contain a status field")
}

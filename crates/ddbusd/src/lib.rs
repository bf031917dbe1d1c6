//! Listener for the diagnostic message bus.
//!
//! `ddbusd` accepts connections from diagnostic tools, registers each one as
//! a client, and routes frames between them. Requests addressed to the
//! listener's own host client are answered by URI services registered with
//! the [`ListenerCore`]; the built-in `listener` service reports
//! connected clients, managed transports and listener settings.
//!
//! Connections arrive through [`transport::Transport`] implementations. The
//! [`transport::SocketTransport`] speaks JSON Lines over Unix or TCP sockets,
//! and a forwarding variant accepts clients relayed by a
//! [`transport::RelayProxy`] running on another host.
//!
//! The bootstrap sequence loads configuration, initialises telemetry,
//! prepares socket paths, and assembles the core. Health reporting hooks emit
//! structured events at each stage and whenever transports or clients come
//! and go.

mod bootstrap;
pub mod core;
mod health;
mod process;
pub mod registry;
pub mod services;
mod telemetry;
pub mod transport;
pub mod uri;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Daemon, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use crate::core::{ListenerCore, RouteError};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use process::{FileAction, LaunchError, LaunchMode, run_daemon};
pub use registry::{ClientInfo, ClientRegistry};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use uri::{RequestContext, UriError, UriRequest, UriService};

#[cfg(test)]
mod tests;

//! URI services built into the listener.

mod listener_info;

pub use listener_info::ListenerUriService;

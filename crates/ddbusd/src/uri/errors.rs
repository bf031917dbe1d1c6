//! Error types for URI services and request contexts.

use thiserror::Error;

/// Errors surfaced while dispatching a URI request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UriError {
    /// The request line could not be split into service and command.
    #[error("malformed request line '{line}': {reason}")]
    MalformedRequest {
        /// Offending request line.
        line: String,
        /// What was wrong with it.
        reason: &'static str,
    },
    /// No service is registered under the name.
    #[error("unknown service '{service}'")]
    UnknownService {
        /// Requested service name.
        service: String,
    },
    /// The service does not implement the command.
    #[error("service '{service}' does not handle command '{command}'")]
    UnhandledCommand {
        /// Service that received the request.
        service: String,
        /// Command it did not recognise.
        command: String,
    },
    /// A service is already registered under the name.
    #[error("a service named '{name}' is already registered")]
    NameCollision {
        /// Contested name.
        name: String,
    },
    /// The service is not bound to a running listener.
    #[error("service '{service}' is not bound to a listener")]
    Unbound {
        /// Detached service.
        service: String,
    },
    /// The response writer was used out of order.
    #[error("cannot {operation} while the response is {state}")]
    InvalidWriterState {
        /// Attempted operation.
        operation: &'static str,
        /// State the writer was in.
        state: &'static str,
    },
    /// Internal failure, such as a poisoned lock.
    #[error("internal error: {message}")]
    Internal {
        /// Failure description.
        message: String,
    },
}

impl UriError {
    /// Builds an [`UriError::UnhandledCommand`].
    pub fn unhandled(service: impl Into<String>, command: impl Into<String>) -> Self {
        Self::UnhandledCommand {
            service: service.into(),
            command: command.into(),
        }
    }

    /// Builds an [`UriError::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

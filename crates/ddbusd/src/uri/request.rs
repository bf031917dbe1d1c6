//! Parsed URI request lines.

use super::UriError;

/// A validated request, `<service>/<command>[ <arguments>]`.
///
/// Service and command are compared verbatim by services; the argument
/// string is handed over unparsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriRequest {
    service: String,
    command: String,
    arguments: String,
    payload: Option<Vec<u8>>,
}

impl UriRequest {
    /// Parses a request line and attaches an optional binary payload.
    ///
    /// # Errors
    ///
    /// Returns [`UriError::MalformedRequest`] when the service or command is
    /// missing, or the service name contains whitespace.
    pub fn parse(line: &str, payload: Option<Vec<u8>>) -> Result<Self, UriError> {
        let malformed = |reason| UriError::MalformedRequest {
            line: line.to_owned(),
            reason,
        };
        let (service, rest) = line
            .split_once('/')
            .ok_or_else(|| malformed("missing '/' separator"))?;
        if service.is_empty() {
            return Err(malformed("empty service name"));
        }
        if service.chars().any(char::is_whitespace) {
            return Err(malformed("service name contains whitespace"));
        }
        let (command, arguments) = rest.split_once(' ').unwrap_or((rest, ""));
        if command.is_empty() {
            return Err(malformed("empty command"));
        }
        Ok(Self {
            service: service.to_owned(),
            command: command.to_owned(),
            arguments: arguments.to_owned(),
            payload,
        })
    }

    /// Target service name.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Command within the service.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Raw argument string, empty when absent.
    #[must_use]
    pub fn arguments(&self) -> &str {
        &self.arguments
    }

    /// Binary payload supplied with the request.
    #[must_use]
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }
}

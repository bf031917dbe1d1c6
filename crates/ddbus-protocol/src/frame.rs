//! Frame and envelope definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::{ClientId, RequestId};

/// Terminal status of a request.
///
/// Every request resolves to exactly one of these codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultCode {
    /// The request was handled and any body is complete.
    Success,
    /// Generic failure, including unknown services and unhandled commands.
    Error,
    /// The addressed client is not registered.
    NotConnected,
    /// The handler abandoned its response.
    Timeout,
    /// The transport carrying the request closed before it resolved.
    TransportClosed,
    /// The addressed client unregistered before answering.
    ClientDisconnected,
}

impl ResultCode {
    /// Reports whether the code denotes success.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    /// Snake-case name used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::NotConnected => "not_connected",
            Self::Timeout => "timeout",
            Self::TransportClosed => "transport_closed",
            Self::ClientDisconnected => "client_disconnected",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Body of a completed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ResponseBody {
    /// Concatenated text fragments, in write order.
    Text(String),
    /// Opaque binary block.
    Binary(Vec<u8>),
}

impl ResponseBody {
    /// Returns the text when the body is textual.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }
}

/// A single protocol message.
///
/// Serialised internally tagged by `kind`, for example
/// `{"kind":"identify","name":"tracer","description":"trace capture"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame {
    /// Handshake opening a client session.
    Register {
        /// Process id claimed by the client; the listener prefers the
        /// operating system's view where one is available.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        process_id: Option<u32>,
        /// Asks to be designated host when no host exists yet.
        #[serde(default)]
        host: bool,
    },
    /// Listener reply to [`Frame::Register`].
    Registered {
        /// Identifier allocated to the new client.
        client_id: ClientId,
    },
    /// Completes the handshake with display metadata.
    Identify {
        /// Display name.
        name: String,
        /// Free-text description.
        #[serde(default)]
        description: String,
    },
    /// Listener reply to [`Frame::Identify`].
    Identified {
        /// Identifier of the now-identified client.
        client_id: ClientId,
    },
    /// URI request addressed to a service or a client.
    Request {
        /// Correlation id chosen by the sender.
        request_id: RequestId,
        /// Client that should answer; the host when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<ClientId>,
        /// Originating client, stamped by the listener on forwarded requests.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<ClientId>,
        /// Request line, `<service>/<command>[ <arguments>]`.
        uri: String,
        /// Optional binary payload.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Vec<u8>>,
    },
    /// Terminal answer to a [`Frame::Request`].
    Response {
        /// Correlation id copied from the request.
        request_id: RequestId,
        /// Outcome of the request.
        result: ResultCode,
        /// Response body; absent on failures.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<ResponseBody>,
        /// Human-readable failure detail.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    /// One-way message forwarded verbatim to another client.
    Message {
        /// Sender, stamped by the listener.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<ClientId>,
        /// Receiving client.
        destination: ClientId,
        /// Arbitrary JSON payload.
        payload: serde_json::Value,
    },
    /// Ends the client session.
    Disconnect,
    /// Failure that cannot be attributed to a request.
    Error {
        /// Failure class.
        code: ResultCode,
        /// Human-readable detail.
        detail: String,
    },
}

impl Frame {
    /// Builds a failed response without a body.
    #[must_use]
    pub fn failure(request_id: RequestId, result: ResultCode, detail: impl Into<String>) -> Self {
        Self::Response {
            request_id,
            result,
            body: None,
            detail: Some(detail.into()),
        }
    }

    /// Builds an error frame.
    #[must_use]
    pub fn error(code: ResultCode, detail: impl Into<String>) -> Self {
        Self::Error {
            code,
            detail: detail.into(),
        }
    }

    /// Short name of the frame kind, as used in the `kind` tag.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Registered { .. } => "registered",
            Self::Identify { .. } => "identify",
            Self::Identified { .. } => "identified",
            Self::Request { .. } => "request",
            Self::Response { .. } => "response",
            Self::Message { .. } => "message",
            Self::Disconnect => "disconnect",
            Self::Error { .. } => "error",
        }
    }
}

/// A frame as it travels over a connection.
///
/// Forwarding relays multiplex many tools over one connection and tag each
/// frame with `relay`, the relay's own identifier for the tool. Direct
/// connections leave it unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Relay-local identifier of the tool the frame belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay: Option<u32>,
    /// The wrapped frame.
    #[serde(flatten)]
    pub frame: Frame,
}

impl Envelope {
    /// Wraps a frame for a direct connection.
    #[must_use]
    pub const fn direct(frame: Frame) -> Self {
        Self { relay: None, frame }
    }

    /// Wraps a frame on behalf of a relayed tool.
    #[must_use]
    pub const fn relayed(relay: u32, frame: Frame) -> Self {
        Self {
            relay: Some(relay),
            frame,
        }
    }
}

impl From<Frame> for Envelope {
    fn from(frame: Frame) -> Self {
        Self::direct(frame)
    }
}

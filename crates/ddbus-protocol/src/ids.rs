//! Identifier newtypes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Listener-assigned identifier of a connected client.
///
/// Identifiers are allocated from 1 upwards; [`ClientId::NONE`] marks the
/// absence of a client, for example before a host has been designated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(u32);

impl ClientId {
    /// Sentinel meaning "no client".
    pub const NONE: Self = Self(0);

    /// Wraps a raw identifier.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Reports whether this is the [`ClientId::NONE`] sentinel.
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::NONE
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Correlates a `request` frame with its `response`.
///
/// Request identifiers are chosen by whoever sends the request and are only
/// meaningful on the connection they travel over.
pub type RequestId = u64;

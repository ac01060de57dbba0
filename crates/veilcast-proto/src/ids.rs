//! Service and device identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::ProtocolError;

/// Stable service identifier for one account.
///
/// On the wire this is a lowercase UUID string (`8-4-4-4-12` hex groups).
/// The newtype validates the shape once at the boundary so the rest of the
/// engine never has to re-check it. Deserialization routes through
/// [`ServiceId::parse`], so ids arriving in server bodies get the same
/// validation and lowercasing as locally constructed ones; a mixed-case
/// wire id always compares equal to its canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceId(String);

impl ServiceId {
    /// Parse a service identifier from its wire string.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedServiceId`] if the string is not a
    /// UUID-shaped lowercase hex string.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        if !is_uuid_shaped(raw) {
            return Err(ProtocolError::MalformedServiceId(raw.to_string()));
        }
        Ok(Self(raw.to_ascii_lowercase()))
    }

    /// The wire representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ServiceId {
    type Error = ProtocolError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<ServiceId> for String {
    fn from(id: ServiceId) -> Self {
        id.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_uuid_shaped(raw: &str) -> bool {
    if raw.len() != 36 {
        return false;
    }
    raw.char_indices().all(|(i, c)| match i {
        8 | 13 | 18 | 23 => c == '-',
        _ => c.is_ascii_hexdigit(),
    })
}

/// Per-account device identifier.
///
/// Device ids are small positive integers assigned by the server; the
/// primary device is always id 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u32);

impl DeviceId {
    /// The account's primary device.
    pub const PRIMARY: Self = Self(1);
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

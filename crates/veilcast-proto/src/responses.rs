//! Server response body shapes for the multicast endpoint.
//!
//! These are a server contract and must round-trip bit-for-bit:
//!
//! - 200: `{"uuids404": [ServiceId, ...]}` lists the identities the server
//!   considers unregistered; every other submitted identity succeeded.
//! - 409: `[{"uuid": ..., "devices": {"missingDevices": [...], "extraDevices": [...]}}]`
//!   carries per-account device-set deltas to apply before resending.
//! - 410: `[{"uuid": ..., "devices": {"staleDevices": [...]}}]` names devices
//!   whose sessions must be reset before resending.

use serde::{Deserialize, Serialize};

use crate::{
    errors::ProtocolError,
    ids::{DeviceId, ServiceId},
};

/// Body of a 200 response: the unregistered-identity list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MulticastSuccess {
    /// Identities the server could not deliver to because the account no
    /// longer exists. Absent on the wire when empty.
    #[serde(rename = "uuids404", default)]
    pub unregistered: Vec<ServiceId>,
}

impl MulticastSuccess {
    /// Decode a 200 body.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedBody`] if the body is not the
    /// documented shape; the caller treats this as a broken server contract.
    pub fn from_body(body: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(body).map_err(ProtocolError::from)
    }
}

/// Device-set deltas for one account, from a 409 body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MismatchedDevices {
    /// Devices the server knows about that were not addressed.
    #[serde(rename = "missingDevices", default)]
    pub missing_devices: Vec<DeviceId>,

    /// Devices that were addressed but no longer exist.
    #[serde(rename = "extraDevices", default)]
    pub extra_devices: Vec<DeviceId>,
}

/// One entry of a 409 response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountMismatchedDevices {
    /// The account whose device set drifted.
    pub uuid: ServiceId,

    /// The deltas to apply.
    pub devices: MismatchedDevices,
}

impl AccountMismatchedDevices {
    /// Decode a 409 body (an array of per-account entries).
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedBody`] on any deviation from the
    /// documented shape.
    pub fn from_body(body: &[u8]) -> Result<Vec<Self>, ProtocolError> {
        serde_json::from_slice(body).map_err(ProtocolError::from)
    }
}

/// Stale-device list for one account, from a 410 body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleDevices {
    /// Devices whose sessions are stale and must be reset.
    #[serde(rename = "staleDevices", default)]
    pub stale_devices: Vec<DeviceId>,
}

/// One entry of a 410 response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountStaleDevices {
    /// The account with stale sessions.
    pub uuid: ServiceId,

    /// The stale devices.
    pub devices: StaleDevices,
}

impl AccountStaleDevices {
    /// Decode a 410 body (an array of per-account entries).
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedBody`] on any deviation from the
    /// documented shape.
    pub fn from_body(body: &[u8]) -> Result<Vec<Self>, ProtocolError> {
        serde_json::from_slice(body).map_err(ProtocolError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(raw: &str) -> ServiceId {
        ServiceId::parse(raw).unwrap()
    }

    #[test]
    fn decodes_200_body() {
        let body = br#"{"uuids404":["7b9e3a10-55c4-4a2f-9f01-8c2d6e4b0a17"]}"#;
        let parsed = MulticastSuccess::from_body(body).unwrap();
        assert_eq!(parsed.unregistered, vec![sid("7b9e3a10-55c4-4a2f-9f01-8c2d6e4b0a17")]);
    }

    #[test]
    fn decodes_200_body_with_absent_list() {
        let parsed = MulticastSuccess::from_body(b"{}").unwrap();
        assert!(parsed.unregistered.is_empty());
    }

    #[test]
    fn rejects_malformed_200_body() {
        assert!(MulticastSuccess::from_body(b"[]").is_err());
        assert!(MulticastSuccess::from_body(b"not json").is_err());
    }

    #[test]
    fn rejects_malformed_ids_inside_a_200_body() {
        assert!(MulticastSuccess::from_body(br#"{"uuids404":["definitely-not-a-uuid"]}"#).is_err());
    }

    #[test]
    fn normalizes_mixed_case_ids_inside_bodies() {
        let body = br#"{"uuids404":["7B9E3A10-55C4-4A2F-9F01-8C2D6E4B0A17"]}"#;
        let parsed = MulticastSuccess::from_body(body).unwrap();
        assert_eq!(parsed.unregistered, vec![sid("7b9e3a10-55c4-4a2f-9f01-8c2d6e4b0a17")]);
    }

    #[test]
    fn encodes_200_body_bit_for_bit() {
        let success =
            MulticastSuccess { unregistered: vec![sid("7b9e3a10-55c4-4a2f-9f01-8c2d6e4b0a17")] };
        let json = serde_json::to_string(&success).unwrap();
        assert_eq!(json, r#"{"uuids404":["7b9e3a10-55c4-4a2f-9f01-8c2d6e4b0a17"]}"#);
    }

    #[test]
    fn decodes_409_body() {
        let body = br#"[{"uuid":"7b9e3a10-55c4-4a2f-9f01-8c2d6e4b0a17","devices":{"missingDevices":[5],"extraDevices":[2]}}]"#;
        let parsed = AccountMismatchedDevices::from_body(body).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].uuid, sid("7b9e3a10-55c4-4a2f-9f01-8c2d6e4b0a17"));
        assert_eq!(parsed[0].devices.missing_devices, vec![DeviceId(5)]);
        assert_eq!(parsed[0].devices.extra_devices, vec![DeviceId(2)]);
    }

    #[test]
    fn encodes_409_body_bit_for_bit() {
        let entry = AccountMismatchedDevices {
            uuid: sid("7b9e3a10-55c4-4a2f-9f01-8c2d6e4b0a17"),
            devices: MismatchedDevices {
                missing_devices: vec![DeviceId(5)],
                extra_devices: vec![DeviceId(2)],
            },
        };
        let json = serde_json::to_string(&vec![entry]).unwrap();
        assert_eq!(
            json,
            r#"[{"uuid":"7b9e3a10-55c4-4a2f-9f01-8c2d6e4b0a17","devices":{"missingDevices":[5],"extraDevices":[2]}}]"#
        );
    }

    #[test]
    fn decodes_410_body() {
        let body = br#"[{"uuid":"7b9e3a10-55c4-4a2f-9f01-8c2d6e4b0a17","devices":{"staleDevices":[1,3]}}]"#;
        let parsed = AccountStaleDevices::from_body(body).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].devices.stale_devices, vec![DeviceId(1), DeviceId(3)]);
    }

    #[test]
    fn decodes_multi_account_409_body() {
        let body = br#"[
            {"uuid":"7b9e3a10-55c4-4a2f-9f01-8c2d6e4b0a17","devices":{"missingDevices":[2],"extraDevices":[]}},
            {"uuid":"1c4f8d22-0a3b-4e61-b7c5-9d0e2f6a8b30","devices":{"missingDevices":[],"extraDevices":[4]}}
        ]"#;
        let parsed = AccountMismatchedDevices::from_body(body).unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(parsed[1].devices.missing_devices.is_empty());
        assert_eq!(parsed[1].devices.extra_devices, vec![DeviceId(4)]);
    }
}

//! Values flowing through a scan: the targets handed to probes and the
//! device records assembled from their outcomes.
use std::fmt;

use serde_derive::Serialize;

use crate::input::Protocol;

/// One `(address, port, protocol)` tuple to be probed.
///
/// Targets are produced by [`expand`](crate::address::expand) and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    /// Dotted-quad, IPv6 literal or resolvable host name.
    pub address: String,
    /// Destination port.
    pub port: u16,
    /// Transport used for the connection attempt.
    pub protocol: Protocol,
}

impl Target {
    /// Builds a target from its parts.
    pub fn new(address: impl Into<String>, port: u16, protocol: Protocol) -> Self {
        Self {
            address: address.into(),
            port,
            protocol,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.address.contains(':') {
            write!(f, "[{}]:{}/{}", self.address, self.port, self.protocol.as_str())
        } else {
            write!(f, "{}:{}/{}", self.address, self.port, self.protocol.as_str())
        }
    }
}

/// Result record for one probed target.
///
/// `(address, port)` identifies a device; a scan emits exactly one record per
/// target, positioned like the target it came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Address the probe was sent to.
    #[serde(rename = "ip")]
    pub address: String,
    /// Port the probe was sent to.
    pub port: u16,
    /// Whether the probe reached the service. Closed until proven open.
    pub open: bool,
    /// Only filled in by discovery backends, never by port probing.
    pub device_type: String,
    /// Only filled in by discovery backends, never by port probing.
    pub device_name: String,
}

impl From<&Target> for Device {
    fn from(target: &Target) -> Self {
        Self {
            address: target.address.clone(),
            port: target.port,
            ..Device::default()
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.open { "open" } else { "closed" };
        if self.address.contains(':') {
            write!(f, "[{}]:{} {}", self.address, self.port, state)
        } else {
            write!(f, "{}:{} {}", self.address, self.port, state)
        }
    }
}

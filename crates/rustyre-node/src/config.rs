//! TOML-based configuration for rustyre nodes.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use rustyre_core::constants::DISCOVERY_PORT;
use rustyre_net::BeaconConfig;

use crate::error::NodeError;
use crate::peer::Timing;

/// Top-level node configuration, loadable from a TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub timing: TimingSection,
    /// Headers announced to new peers in HELLO.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, NodeError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| NodeError::Config(format!("failed to read config file: {e}")))?;
        toml::from_str(&content)
            .map_err(|e| NodeError::Config(format!("failed to parse config: {e}")))
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(format!("failed to parse config: {e}")))
    }

    /// The beacon driver configuration this node config describes.
    pub fn beacon_config(&self) -> BeaconConfig {
        // With an ephemeral bind port there is no well-known port to target,
        // so fall back to the protocol's discovery port.
        let target_port = if self.node.beacon_port != 0 {
            self.node.beacon_port
        } else {
            DISCOVERY_PORT
        };
        let broadcast_addr = self.node.broadcast_addr.unwrap_or_else(|| {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), target_port)
        });

        BeaconConfig {
            port: self.node.beacon_port,
            broadcast_addr,
            interval: Duration::from_millis(self.node.beacon_interval_ms),
            host: self.node.host,
        }
    }

    /// Per-peer liveness deadlines.
    pub fn timing(&self) -> Timing {
        Timing {
            evasive: Duration::from_millis(self.timing.evasive_ms),
            expired: Duration::from_millis(self.timing.expired_ms),
        }
    }

    /// How often the liveness pass runs.
    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.timing.reap_ms)
    }
}

/// The `[node]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeSection {
    /// UDP port for discovery beacons. Port 0 binds ephemerally (useful for
    /// tests running several nodes on one host).
    #[serde(default = "default_beacon_port")]
    pub beacon_port: u16,
    /// Override for the beacon broadcast target. Defaults to the limited
    /// broadcast address on the beacon port.
    pub broadcast_addr: Option<SocketAddr>,
    /// Override for the local address advertised in HELLO and beacons.
    pub host: Option<IpAddr>,
    /// Milliseconds between beacon broadcasts.
    #[serde(default = "default_beacon_interval_ms")]
    pub beacon_interval_ms: u64,
}

fn default_beacon_port() -> u16 {
    DISCOVERY_PORT
}

fn default_beacon_interval_ms() -> u64 {
    1000
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            beacon_port: default_beacon_port(),
            broadcast_addr: None,
            host: None,
            beacon_interval_ms: default_beacon_interval_ms(),
        }
    }
}

/// The `[timing]` section. All values in milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct TimingSection {
    /// Quiet time before a peer gets a PING.
    #[serde(default = "default_evasive_ms")]
    pub evasive_ms: u64,
    /// Quiet time before a peer is expired.
    #[serde(default = "default_expired_ms")]
    pub expired_ms: u64,
    /// Interval between liveness passes.
    #[serde(default = "default_reap_ms")]
    pub reap_ms: u64,
}

fn default_evasive_ms() -> u64 {
    5000
}

fn default_expired_ms() -> u64 {
    30_000
}

fn default_reap_ms() -> u64 {
    1000
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            evasive_ms: default_evasive_ms(),
            expired_ms: default_expired_ms(),
            reap_ms: default_reap_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.node.beacon_port, 5670);
        assert_eq!(config.timing.evasive_ms, 5000);
        assert_eq!(config.timing.expired_ms, 30_000);
        assert_eq!(config.timing.reap_ms, 1000);
        assert!(config.headers.is_empty());

        let beacon = config.beacon_config();
        assert_eq!(beacon.port, 5670);
        assert_eq!(beacon.broadcast_addr.to_string(), "255.255.255.255:5670");
    }

    #[test]
    fn parse_full_config() {
        let config = NodeConfig::parse(
            r#"
[node]
beacon_port = 6000
host = "192.168.1.5"
beacon_interval_ms = 250

[timing]
evasive_ms = 100
expired_ms = 400
reap_ms = 50

[headers]
X-NAME = "alice"
"#,
        )
        .unwrap();

        assert_eq!(config.node.beacon_port, 6000);
        assert_eq!(config.node.host.unwrap().to_string(), "192.168.1.5");
        assert_eq!(config.timing().evasive.as_millis(), 100);
        assert_eq!(config.timing().expired.as_millis(), 400);
        assert_eq!(config.reap_interval().as_millis(), 50);
        assert_eq!(config.headers["X-NAME"], "alice");
    }

    #[test]
    fn ephemeral_port_targets_discovery_port() {
        let mut config = NodeConfig::default();
        config.node.beacon_port = 0;
        assert_eq!(config.beacon_config().broadcast_addr.port(), 5670);
    }

    #[test]
    fn parse_rejects_bad_toml() {
        assert!(matches!(
            NodeConfig::parse("[node]\nbeacon_port = \"oops\""),
            Err(NodeError::Config(_))
        ));
    }
}

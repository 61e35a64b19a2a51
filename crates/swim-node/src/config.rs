//! Node configuration.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use swim_detector::DetectorConfig;
use swim_relay::RelayConfig;
use swim_types::{NodeAddr, ParentSet, PeerAddress};

use crate::error::{Error, Result};

/// Everything needed to run one node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// UDP address to bind. Port 0 picks a free port.
    pub bind: SocketAddr,
    /// Node id, part of the node's identity.
    pub node_id: u32,
    /// Whether this node is publicly reachable.
    pub open: bool,
    /// Initial parents of a NAT'd node.
    pub parents: Vec<NodeAddr>,
    /// Peers known at startup.
    pub bootstrap: Vec<PeerAddress>,
    /// How often the relay gets a fresh peer sample.
    pub sample_interval: Duration,
    /// Socket send buffer size in bytes.
    pub sndbuf: usize,
    /// Socket receive buffer size in bytes.
    pub rcvbuf: usize,
    pub detector: DetectorConfig,
    pub relay: RelayConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 12345)),
            node_id: 0,
            open: true,
            parents: Vec::new(),
            bootstrap: Vec::new(),
            sample_interval: Duration::from_millis(1000),
            sndbuf: 1024 * 1024, // 1MB
            rcvbuf: 1024 * 1024, // 1MB
            detector: DetectorConfig::default(),
            relay: RelayConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load from `SWIM_*` environment variables, falling back to defaults.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `SWIM_BIND` | `127.0.0.1:12345` |
    /// | `SWIM_NODE_ID` | `0` |
    /// | `SWIM_OPEN` | `true` |
    /// | `SWIM_PARENTS` | empty, comma separated `id@ip:port` |
    /// | `SWIM_BOOTSTRAP` | empty, comma separated `id@ip:port` (open peers) |
    /// | `SWIM_SAMPLE_INTERVAL_MS` | `1000` |
    /// | `SWIM_PROBE_INTERVAL_MS` | `1000` |
    /// | `SWIM_PING_TIMEOUT_MS` | `2000` |
    /// | `SWIM_SUSPECTED_TIMEOUT_MS` | `2000` |
    /// | `SWIM_DEAD_TIMEOUT_MS` | `2000` |
    /// | `SWIM_STATUS_INTERVAL_MS` | `1000` |
    /// | `SWIM_K` | `4` |
    /// | `SWIM_MAX_MESSAGE_SIZE` | `10000` rumors, capped to one datagram |
    /// | `SWIM_LAMBDA` | `3.0` |
    /// | `SWIM_PARENT_COUNT` | `3` |
    /// | `SWIM_HEARTBEAT_INTERVAL_MS` | `500` |
    /// | `SWIM_NAT_PING_TIMEOUT_MS` | `500` |
    /// | `SWIM_SEED` | `0` (the relay uses `seed + 1`) |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let bind = parse_or(&lookup, "SWIM_BIND", defaults.bind)?;
        let node_id = parse_or(&lookup, "SWIM_NODE_ID", defaults.node_id)?;
        let open = parse_or(&lookup, "SWIM_OPEN", defaults.open)?;
        let parents = parse_list::<NodeAddr>(&lookup, "SWIM_PARENTS")?;
        let bootstrap = parse_list::<NodeAddr>(&lookup, "SWIM_BOOTSTRAP")?
            .into_iter()
            .map(PeerAddress::open)
            .collect();
        let sample_interval = millis_or(&lookup, "SWIM_SAMPLE_INTERVAL_MS", defaults.sample_interval)?;
        let seed: u64 = parse_or(&lookup, "SWIM_SEED", 0)?;

        let detector = DetectorConfig::default()
            .with_probe_interval(millis_or(
                &lookup,
                "SWIM_PROBE_INTERVAL_MS",
                defaults.detector.probe_interval,
            )?)
            .with_ping_timeout(millis_or(
                &lookup,
                "SWIM_PING_TIMEOUT_MS",
                defaults.detector.ping_timeout,
            )?)
            .with_suspected_timeout(millis_or(
                &lookup,
                "SWIM_SUSPECTED_TIMEOUT_MS",
                defaults.detector.suspected_timeout,
            )?)
            .with_dead_timeout(millis_or(
                &lookup,
                "SWIM_DEAD_TIMEOUT_MS",
                defaults.detector.dead_timeout,
            )?)
            .with_status_interval(millis_or(
                &lookup,
                "SWIM_STATUS_INTERVAL_MS",
                defaults.detector.status_interval,
            )?)
            .with_k(parse_or(&lookup, "SWIM_K", defaults.detector.k)?)
            .with_max_message_size(parse_or(
                &lookup,
                "SWIM_MAX_MESSAGE_SIZE",
                defaults.detector.max_message_size,
            )?)
            .with_lambda(parse_or(&lookup, "SWIM_LAMBDA", defaults.detector.lambda)?)
            .with_seed(seed);
        let relay = RelayConfig::default()
            .with_parent_count(parse_or(
                &lookup,
                "SWIM_PARENT_COUNT",
                defaults.relay.parent_count,
            )?)
            .with_heartbeat_interval(millis_or(
                &lookup,
                "SWIM_HEARTBEAT_INTERVAL_MS",
                defaults.relay.heartbeat_interval,
            )?)
            .with_ping_timeout(millis_or(
                &lookup,
                "SWIM_NAT_PING_TIMEOUT_MS",
                defaults.relay.ping_timeout,
            )?)
            .with_seed(seed.wrapping_add(1));

        let config = Self {
            bind,
            node_id,
            open,
            parents,
            bootstrap,
            sample_interval,
            detector,
            relay,
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the protocol settings and that a NAT'd node has parents.
    pub fn validate(&self) -> Result<()> {
        self.detector.validate()?;
        self.relay.validate()?;
        if !self.open && self.parents.is_empty() {
            return Err(Error::Config(
                "a NAT'd node needs at least one parent (SWIM_PARENTS)".to_string(),
            ));
        }
        if self.sample_interval.is_zero() {
            return Err(Error::Config("sample_interval must be non-zero".to_string()));
        }
        Ok(())
    }

    /// This node's address once bound to `local`.
    pub fn self_address(&self, local: SocketAddr) -> PeerAddress {
        let id = NodeAddr::new(local.ip(), local.port(), self.node_id);
        if self.open {
            PeerAddress::open(id)
        } else {
            PeerAddress::nated(id, ParentSet::new(self.parents.iter().copied()))
        }
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("invalid {key}: {raw:?}"))),
    }
}

fn millis_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration> {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    parse_or(lookup, key, default_ms).map(Duration::from_millis)
}

fn parse_list<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Vec<T>> {
    let Some(raw) = lookup(key) else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.parse()
                .map_err(|_| Error::Config(format!("invalid entry in {key}: {item:?}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = NodeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind, NodeConfig::default().bind);
        assert!(config.open);
        assert!(config.bootstrap.is_empty());
        assert_eq!(config.detector.k, 4);
        assert_eq!(config.relay.seed, 1);
    }

    #[test]
    fn nated_node_from_environment() {
        let config = NodeConfig::from_lookup(lookup(&[
            ("SWIM_BIND", "10.0.0.5:7000"),
            ("SWIM_NODE_ID", "12"),
            ("SWIM_OPEN", "false"),
            ("SWIM_PARENTS", "1@10.0.0.1:7000, 2@10.0.0.2:7000"),
            ("SWIM_BOOTSTRAP", "1@10.0.0.1:7000"),
            ("SWIM_PROBE_INTERVAL_MS", "250"),
            ("SWIM_SUSPECTED_TIMEOUT_MS", "3000"),
            ("SWIM_DEAD_TIMEOUT_MS", "4000"),
            ("SWIM_STATUS_INTERVAL_MS", "5000"),
            ("SWIM_MAX_MESSAGE_SIZE", "64"),
            ("SWIM_LAMBDA", "2.5"),
            ("SWIM_HEARTBEAT_INTERVAL_MS", "800"),
            ("SWIM_NAT_PING_TIMEOUT_MS", "300"),
            ("SWIM_SEED", "41"),
        ]))
        .unwrap();

        assert_eq!(config.detector.probe_interval, Duration::from_millis(250));
        assert_eq!(config.detector.suspected_timeout, Duration::from_millis(3000));
        assert_eq!(config.detector.dead_timeout, Duration::from_millis(4000));
        assert_eq!(config.detector.status_interval, Duration::from_millis(5000));
        assert_eq!(config.detector.max_message_size, 64);
        assert_eq!(config.detector.lambda, 2.5);
        assert_eq!(config.relay.heartbeat_interval, Duration::from_millis(800));
        assert_eq!(config.relay.ping_timeout, Duration::from_millis(300));
        assert_eq!(config.detector.seed, 41);
        assert_eq!(config.relay.seed, 42);
        assert_eq!(config.bootstrap.len(), 1);

        let me = config.self_address(config.bind);
        assert_eq!(me.id().to_string(), "12@10.0.0.5:7000");
        assert_eq!(me.parents().map(|p| p.len()), Some(2));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(NodeConfig::from_lookup(lookup(&[("SWIM_NODE_ID", "x")])).is_err());
        assert!(NodeConfig::from_lookup(lookup(&[("SWIM_BOOTSTRAP", "nope")])).is_err());
        assert!(NodeConfig::from_lookup(lookup(&[("SWIM_OPEN", "false")])).is_err());
        assert!(NodeConfig::from_lookup(lookup(&[("SWIM_PING_TIMEOUT_MS", "0")])).is_err());
        assert!(NodeConfig::from_lookup(lookup(&[("SWIM_LAMBDA", "fast")])).is_err());
        assert!(NodeConfig::from_lookup(lookup(&[("SWIM_MAX_MESSAGE_SIZE", "0")])).is_err());
    }
}

//! Provisioning-time configuration for nodes and the gateway.
//!
//! Values come from `TRAP_*` environment variables. They are read once at
//! startup and never renegotiated.

use std::fmt::Display;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

/// Configuration of one sensor node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    /// Unique identifier of the node, fixed at provisioning.
    pub node_id: u8,
    /// Radio address of the gateway peer.
    pub gateway_addr: SocketAddr,
    /// Timer wake interval.
    pub sleep_interval: Duration,
    /// Send a status (or low battery) message on every Nth timer wake.
    pub status_every: u32,
    /// Below this voltage a low battery message replaces the status message.
    pub low_battery_volts: f32,
    /// Bounded wait for the send confirmation.
    pub send_timeout: Duration,
    pub debounce_window: Duration,
    pub stable_window: Duration,
    /// Delay between the end of a send and preparing to sleep.
    pub settle_delay: Duration,
    /// Line polling period while qualifying a trigger.
    pub sample_period: Duration,
}

impl NodeConfig {
    pub fn new(node_id: u8, gateway_addr: SocketAddr) -> Self {
        NodeConfig {
            node_id,
            gateway_addr,
            sleep_interval: Duration::from_secs(300),
            status_every: 10,
            low_battery_volts: 3.3,
            send_timeout: Duration::from_millis(1000),
            debounce_window: Duration::from_millis(50),
            stable_window: Duration::from_millis(200),
            settle_delay: Duration::from_millis(100),
            sample_period: Duration::from_millis(10),
        }
    }

    /// Create the node configuration from the environment variables.
    pub fn from_env() -> Result<NodeConfig, Error> {
        NodeConfig::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<NodeConfig, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);
        let defaults = NodeConfig::new(vars.required("TRAP_NODE_ID")?, vars.required("TRAP_GATEWAY_ADDR")?);

        Ok(NodeConfig {
            sleep_interval: vars.secs_within("TRAP_SLEEP_INTERVAL_SECS", defaults.sleep_interval, 1..=86_400)?,
            status_every: vars.within("TRAP_STATUS_EVERY", defaults.status_every, 1..=u32::MAX)?,
            low_battery_volts: vars.within("TRAP_LOW_BATTERY_VOLTS", defaults.low_battery_volts, 0.0..=10.0)?,
            send_timeout: vars.millis_within("TRAP_SEND_TIMEOUT_MS", defaults.send_timeout, 1..=60_000)?,
            debounce_window: vars.millis_within("TRAP_DEBOUNCE_MS", defaults.debounce_window, 1..=10_000)?,
            stable_window: vars.millis_within("TRAP_STABLE_MS", defaults.stable_window, 1..=10_000)?,
            settle_delay: vars.millis_within("TRAP_SETTLE_MS", defaults.settle_delay, 0..=10_000)?,
            sample_period: vars.millis_within("TRAP_SAMPLE_PERIOD_MS", defaults.sample_period, 1..=1_000)?,
            ..defaults
        })
    }
}

/// What the bridge does with a decoded message while the broker is unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundPolicy {
    /// Drop it. Messages received while disconnected are lost.
    Drop,
    /// Keep up to `capacity` messages, evicting the oldest, and flush on reconnect.
    Queue { capacity: usize },
}

/// Broker reconnection schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Fixed delay between two attempts.
    pub backoff: Duration,
    /// Attempts per retry window.
    pub max_attempts: u32,
    /// Pause after a window's attempts are exhausted.
    pub window: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            backoff: Duration::from_secs(5),
            max_attempts: 5,
            window: Duration::from_secs(60),
        }
    }
}

/// Settings of the bridge state machine.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub topic_prefix: String,
    pub status_topic: String,
    pub liveness_interval: Duration,
    pub reconnect: ReconnectPolicy,
    pub outbound: OutboundPolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            topic_prefix: "trap".to_string(),
            status_topic: "gateway/status".to_string(),
            liveness_interval: Duration::from_secs(60),
            reconnect: ReconnectPolicy::default(),
            outbound: OutboundPolicy::Drop,
        }
    }
}

/// Configuration of the gateway process.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub mqtt_server_uri: String,
    /// MQTT client id, also reported in the `gateway_id` user property.
    pub gateway_id: String,
    /// Local address the radio link listens on.
    pub radio_bind: SocketAddr,
    pub keepalive: Duration,
    pub bridge: BridgeConfig,
}

impl GatewayConfig {
    /// Create the gateway configuration from the environment variables.
    pub fn from_env() -> Result<GatewayConfig, Error> {
        GatewayConfig::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<GatewayConfig, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);
        let defaults = BridgeConfig::default();

        let queue: usize = vars.or("TRAP_OUTBOUND_QUEUE", 0)?;
        let outbound = match queue {
            0 => OutboundPolicy::Drop,
            capacity => OutboundPolicy::Queue { capacity },
        };

        let reconnect = ReconnectPolicy {
            backoff: vars.secs_within("TRAP_RECONNECT_BACKOFF_SECS", defaults.reconnect.backoff, 1..=3_600)?,
            max_attempts: vars.within("TRAP_RECONNECT_ATTEMPTS", defaults.reconnect.max_attempts, 1..=1_000)?,
            window: vars.secs_within("TRAP_RECONNECT_WINDOW_SECS", defaults.reconnect.window, 1..=86_400)?,
        };

        Ok(GatewayConfig {
            mqtt_server_uri: vars.required("TRAP_MQTT_SERVER_URI")?,
            gateway_id: vars.or("TRAP_GATEWAY_ID", "trap-gateway".to_string())?,
            radio_bind: vars.or("TRAP_RADIO_BIND", SocketAddr::from(([0, 0, 0, 0], 4210)))?,
            keepalive: vars.secs_within("TRAP_KEEPALIVE_SECS", Duration::from_secs(20), 1..=3_600)?,
            bridge: BridgeConfig {
                topic_prefix: vars.or("TRAP_TOPIC_PREFIX", defaults.topic_prefix)?,
                status_topic: vars.or("TRAP_STATUS_TOPIC", defaults.status_topic)?,
                liveness_interval: vars.secs_within("TRAP_LIVENESS_SECS", defaults.liveness_interval, 1..=86_400)?,
                reconnect,
                outbound,
            },
        })
    }
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn parse<T>(&self, key: &'static str, value: String) -> Result<T, Error>
    where
        T: FromStr,
        T::Err: Display,
    {
        let parsed = value.trim().parse::<T>();
        parsed.map_err(|e| Error::Invalid {
            key,
            reason: e.to_string(),
            value,
        })
    }

    fn required<T>(&self, key: &'static str) -> Result<T, Error>
    where
        T: FromStr,
        T::Err: Display,
    {
        let value = (self.0)(key).ok_or(Error::Missing(key))?;
        self.parse(key, value)
    }

    fn or<T>(&self, key: &'static str, default: T) -> Result<T, Error>
    where
        T: FromStr,
        T::Err: Display,
    {
        match (self.0)(key) {
            Some(value) => self.parse(key, value),
            None => Ok(default),
        }
    }

    /// Like [`or`](Self::or), rejecting values outside `range`.
    fn within<T>(&self, key: &'static str, default: T, range: RangeInclusive<T>) -> Result<T, Error>
    where
        T: FromStr + PartialOrd + Display,
        T::Err: Display,
    {
        let value = self.or(key, default)?;
        if !range.contains(&value) {
            return Err(Error::Invalid {
                key,
                value: value.to_string(),
                reason: format!("must be between {} and {}", range.start(), range.end()),
            });
        }
        Ok(value)
    }

    fn secs_within(&self, key: &'static str, default: Duration, range: RangeInclusive<u64>) -> Result<Duration, Error> {
        Ok(Duration::from_secs(self.within(key, default.as_secs(), range)?))
    }

    fn millis_within(&self, key: &'static str, default: Duration, range: RangeInclusive<u64>) -> Result<Duration, Error> {
        Ok(Duration::from_millis(self.within(key, default.as_millis() as u64, range)?))
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("{key}={value:?} is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use crate::relay::ReconnectPolicy;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub relay_host: String,
    pub relay_port: u16,
    pub listen_addr: SocketAddr,
    pub backend_url: String,
    pub default_model: String,
    pub backend_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub stats_interval: Duration,
    pub cache_capacity: Option<usize>,
    pub max_in_flight: Option<usize>,
}

impl BridgeConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self::from_lookup(|key| env::var(key).ok()))
    }

    /// Build a config from an arbitrary key lookup. Unparsable values fall
    /// back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        let relay_host = lookup("FEDERATION_HOST").unwrap_or_else(|| "localhost".to_string());
        let relay_port = lookup("FEDERATION_PORT")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(8810);

        let bridge_port = lookup("BRIDGE_PORT")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(8811);
        let listen_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), bridge_port);

        let backend_url = lookup("OLLAMA_URL")
            .unwrap_or_else(|| "http://localhost:11434".to_string())
            .trim_end_matches('/')
            .to_string();
        let default_model = lookup("OLLAMA_MODEL").unwrap_or_else(|| "mistral".to_string());

        let backend_timeout = Duration::from_secs(parsed("BACKEND_TIMEOUT_SECS").unwrap_or(60));

        let reconnect_delay = Duration::from_secs(parsed("RECONNECT_DELAY_SECS").unwrap_or(5));
        let reconnect = match lookup("RECONNECT_BACKOFF").as_deref().map(str::trim) {
            Some(mode) if mode.eq_ignore_ascii_case("exponential") => ReconnectPolicy::Exponential {
                base: reconnect_delay,
                max: Duration::from_secs(parsed("RECONNECT_MAX_DELAY_SECS").unwrap_or(60)),
            },
            _ => ReconnectPolicy::Fixed(reconnect_delay),
        };

        let stats_interval = Duration::from_secs(parsed("STATS_INTERVAL_SECS").unwrap_or(30));

        let cache_capacity = parsed("CACHE_CAPACITY")
            .filter(|&n| n > 0)
            .map(|n| n as usize);
        let max_in_flight = parsed("MAX_IN_FLIGHT")
            .filter(|&n| n > 0)
            .map(|n| n as usize);

        Self {
            relay_host,
            relay_port,
            listen_addr,
            backend_url,
            default_model,
            backend_timeout,
            reconnect,
            stats_interval,
            cache_capacity,
            max_in_flight,
        }
    }

    pub fn relay_url(&self) -> String {
        format!("ws://{}:{}", self.relay_host, self.relay_port)
    }
}

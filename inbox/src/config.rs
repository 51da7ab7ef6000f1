use std::net::SocketAddr;

use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "127.0.0.1:3000")]
    pub address: SocketAddr,

    #[envconfig(default = "300")]
    pub dedup_window_seconds: u64,

    #[envconfig(default = "50")]
    pub default_inbox_limit: usize,

    #[envconfig(default = "200")]
    pub max_inbox_limit: usize,

    #[envconfig(default = "100")]
    pub default_rate_limit_per_minute: u32,

    #[envconfig(default = "262144")]
    pub max_payload_bytes: usize,

    #[envconfig(default = "524288")]
    pub max_request_size_bytes: usize,

    #[envconfig(default = "30")]
    pub retention_days: i64,

    /// Active keys as `key_id:sha256(token)[:requests_per_minute]`,
    /// comma-delimited.
    pub api_keys: Option<String>,

    /// Cadence of the cache/limiter hygiene sweep. Not load-bearing;
    /// expiry is checked lazily on access.
    #[envconfig(default = "60")]
    pub sweep_interval_seconds: u64,

    // Used for integration tests
    #[envconfig(default = "true")]
    pub export_prometheus: bool,
}

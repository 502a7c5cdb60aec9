use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub jwt: JwtConfig,
    pub ticket: TicketConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

/// Connection-ticket issuance settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TicketConfig {
    /// Base64-encoded 32-byte sealing key.
    pub key: String,
    /// Seconds a ticket stays valid after issuance.
    #[serde(default = "default_ticket_ttl_secs")]
    pub ttl_secs: u64,
    /// Subject ids that may never be issued a ticket.
    #[serde(default)]
    pub denied_subjects: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Prefix for every key and channel this process touches.
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Liveness sweep interval in seconds (probe, then evict on the next tick)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Per-connection outbound channel capacity
    #[serde(default = "default_send_buffer")]
    pub send_buffer: usize,
    /// What send_to does when an identity owns several connections
    #[serde(default)]
    pub delivery_policy: DeliveryPolicy,
}

/// Multi-device delivery behavior for `send_to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryPolicy {
    /// Write to the first open connection found for the identity.
    FirstMatch,
    /// Write to every open connection the identity owns.
    AllConnections,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        DeliveryPolicy::FirstMatch
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    /// Bus backend: "memory" (single process) or "redis"
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Synchronous-style request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// How many delivered correlation ids the relay remembers for dedup
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_otel_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_ticket_ttl_secs() -> u64 {
    30
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_namespace() -> String {
    "roomcast".to_string()
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_send_buffer() -> usize {
    32
}

fn default_backend() -> String {
    "memory".to_string()
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_dedup_capacity() -> usize {
    1024
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_service_name() -> String {
    "roomcast-gateway".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Coded defaults, overridable by files and environment
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("redis.url", "redis://localhost:6379")?
            .set_default("redis.namespace", "roomcast")?
            .set_default("ticket.ttl_secs", 30)?
            .set_default("gateway.sweep_interval_secs", 30)?
            .set_default("gateway.send_buffer", 32)?
            .set_default("router.backend", "memory")?
            .set_default("router.request_timeout_ms", 5000)?
            .set_default("router.dedup_capacity", 1024)?
            // Optional files: default.toml, then the RUN_MODE overlay
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Environment wins: SERVER_PORT, JWT_SECRET, TICKET_KEY, REDIS_URL, ...
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true)
                    .list_separator(","),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            namespace: default_namespace(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            send_buffer: default_send_buffer(),
            delivery_policy: DeliveryPolicy::default(),
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            request_timeout_ms: default_request_timeout_ms(),
            dedup_capacity: default_dedup_capacity(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_otel_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 8080);

        let gateway = GatewayConfig::default();
        assert_eq!(gateway.sweep_interval_secs, 30);
        assert_eq!(gateway.delivery_policy, DeliveryPolicy::FirstMatch);

        let router = RouterConfig::default();
        assert_eq!(router.backend, "memory");
        assert_eq!(router.request_timeout_ms, 5000);
    }

    #[test]
    fn test_delivery_policy_parses_kebab_case() {
        let policy: DeliveryPolicy = serde_json::from_str("\"all-connections\"").unwrap();
        assert_eq!(policy, DeliveryPolicy::AllConnections);
    }
}

mod settings;

pub use settings::{
    DeliveryPolicy, GatewayConfig, JwtConfig, OtelConfig, RedisConfig, RouterConfig, ServerConfig,
    Settings, TicketConfig,
};

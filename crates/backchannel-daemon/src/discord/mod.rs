//! Discord adapter: REST delivery and the gateway listener.

pub mod gateway;
pub mod rest;

pub use gateway::{Gateway, GatewayError, ReconnectPolicy};
pub use rest::DiscordRest;

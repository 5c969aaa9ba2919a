mod client;
pub mod error;
mod raw;
mod server;

pub use client::{read_teamcity_build_id, used_for_from_environment};
pub use error::ConfigError;
pub use server::{LogFormat, ServerConfig, TeamCityConfig};

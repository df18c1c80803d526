use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Postgres {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    pub bind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Issuer {
    pub url: String,
    pub merchant_id: String,
    pub sign_key: String,
    pub timeout_secs: u64,
}

/// Card funding price doubles as the rollback refund: a rolled-back user
/// gets back exactly what the provisional debit took.
#[derive(Debug, Clone, Deserialize)]
pub struct Cards {
    pub price_base_cents: i64,
    pub price_vip_two_cents: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Schedule {
    pub open_card_secs: u64,
    pub card_status_secs: u64,
    pub second_track_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub postgres: Postgres,
    pub server: Server,
    pub issuer: Issuer,
    pub cards: Cards,
    pub schedule: Schedule,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config.toml"))
            .build()?;

        config.try_deserialize()
    }
}

// Declare the modules that make up this crate.
pub mod error;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use error::ConfigError;
pub use settings::{Account, Config, Server, Sync, Venue};

/// Loads the application configuration.
///
/// Reads `meridian.toml` from the working directory (optional — every field
/// has a default) and then applies `MERIDIAN_*` environment overrides, e.g.
/// `MERIDIAN_VENUE__PORT=4002` overrides `[venue] port`.
pub fn load_config() -> Result<Config, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name("meridian").required(false))
        .add_source(config::Environment::with_prefix("MERIDIAN").separator("__"))
        .build()?;

    let config = builder.try_deserialize::<Config>()?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.sync.reconnect_min_delay_secs == 0 {
        return Err(ConfigError::ValidationError(
            "sync.reconnect_min_delay_secs must be at least 1".to_string(),
        ));
    }
    if config.sync.reconnect_max_delay_secs < config.sync.reconnect_min_delay_secs {
        return Err(ConfigError::ValidationError(
            "sync.reconnect_max_delay_secs must be >= sync.reconnect_min_delay_secs".to_string(),
        ));
    }
    if config.sync.order_queue_max == 0 {
        return Err(ConfigError::ValidationError(
            "sync.order_queue_max must be at least 1".to_string(),
        ));
    }
    Ok(())
}

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Tuning knobs for one store instance. Every field has a working default, so
/// `StoreSettings::default()` is a valid production configuration.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreSettings {
    /// Maximum number of batches kept in flight concurrently by the executor.
    pub tune_speed: usize,
    /// Items requested per query page, clamped to the backend cap of 99.
    pub page_size: usize,
    /// Optional cap on the total number of rows fetched by one scan.
    pub max_items: Option<usize>,
    /// Appended to every physical table name; lets several deployments (or a
    /// test run) share one storage account without colliding.
    pub table_suffix: String,
    pub transport: TransportSettings,
}

/// Transport-level settings applied once per distinct backend endpoint.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TransportSettings {
    pub connection_limit: usize,
    pub disable_nagle: bool,
    pub disable_expect_continue: bool,
}

impl Default for StoreSettings {
    fn default() -> Self {
        StoreSettings {
            tune_speed: 200,
            page_size: 99,
            max_items: None,
            table_suffix: String::new(),
            transport: TransportSettings::default(),
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        TransportSettings {
            connection_limit: 100,
            disable_nagle: true,
            disable_expect_continue: true,
        }
    }
}

impl StoreSettings {
    /// Loads settings from an optional file, then lets `ROWBIT__`-prefixed
    /// environment variables override individual values.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("ROWBIT").try_parsing(true).separator("__"));
        builder.build()?.try_deserialize()
    }
}

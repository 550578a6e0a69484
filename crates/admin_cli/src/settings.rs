//! Settings for the admin binary.
//!
//! Sources, lowest priority first:
//!
//! - built-in defaults,
//! - `config/lessonbook.toml` (optional),
//! - `LESSONBOOK_*` environment variables (e.g. `LESSONBOOK_TIMEZONE`),
//! - command line flags.
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub database_url: String,
    /// IANA name of the business timezone.
    pub timezone: String,
    pub level: String,
}

/// Values given on the command line.
#[derive(Debug, Default)]
pub struct Overrides {
    pub database_url: Option<String>,
    pub timezone: Option<String>,
    pub level: Option<String>,
}

impl Settings {
    pub fn new(overrides: Overrides) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .set_default("database_url", "sqlite:./lessonbook.db?mode=rwc")?
            .set_default("timezone", "UTC")?
            .set_default("level", "info")?
            .add_source(File::with_name("config/lessonbook").required(false))
            .add_source(Environment::with_prefix("LESSONBOOK"))
            .set_override_option("database_url", overrides.database_url)?
            .set_override_option("timezone", overrides.timezone)?
            .set_override_option("level", overrides.level)?
            .build()?;

        settings.try_deserialize()
    }
}

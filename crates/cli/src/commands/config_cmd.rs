//! `kindred config`: Print the effective configuration.

use kindred_config::AppConfig;

/// Secrets are replaced with `[REDACTED]`.
pub fn show(config: &AppConfig) {
    println!("{}", config.redacted_toml());
}

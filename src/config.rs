use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::audio::queue::QueueSettings;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // YouTube Data API v3, en orden de rotación
    pub youtube_api_keys: Vec<String>,

    // Límites
    pub max_playlist_size: usize,
    pub disconnect_timeout_ms: u64,
    pub max_rejoin_attempts: u32,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Builds a configuration from any key/value source.
    ///
    /// Missing optional keys fall back to [`Config::default`]. Malformed
    /// numbers are reported with the offending variable name.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            // Discord
            discord_token: lookup("DISCORD_TOKEN").context("DISCORD_TOKEN no definido")?,
            application_id: lookup("APPLICATION_ID")
                .context("APPLICATION_ID no definido")?
                .parse()
                .context("APPLICATION_ID inválido")?,
            guild_id: lookup("GUILD_ID").and_then(|s| s.parse().ok()),

            youtube_api_keys: lookup("YOUTUBE_API_KEYS")
                .map(|keys| {
                    keys.split(',')
                        .map(str::trim)
                        .filter(|key| !key.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),

            // Límites
            max_playlist_size: parse_or(&lookup, "MAX_PLAYLIST_LENGTH", defaults.max_playlist_size)?,
            disconnect_timeout_ms: parse_or(&lookup, "DISCONNECT_TIMEOUT", defaults.disconnect_timeout_ms)?,
            max_rejoin_attempts: parse_or(&lookup, "MAX_REJOIN_ATTEMPTS", defaults.max_rejoin_attempts)?,
        };

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - The Discord token must not be empty
    /// - Playlists must allow at least one track
    /// - The auto-disconnect timeout must be greater than 0
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("Discord token must not be empty");
        }

        if self.max_playlist_size == 0 {
            anyhow::bail!("Max playlist length must be greater than 0");
        }

        if self.disconnect_timeout_ms == 0 {
            anyhow::bail!("Disconnect timeout must be greater than 0");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Tokens and API keys are never included, only how many keys there are.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            YouTube: {} API keys\n  \
            Limits: {} tracks per playlist, {}s idle disconnect, {} rejoin attempts",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.youtube_api_keys.len(),
            self.max_playlist_size,
            self.disconnect_timeout_ms / 1000,
            self.max_rejoin_attempts
        )
    }

    /// Tiempos y límites que reciben las colas
    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            disconnect_timeout: Duration::from_millis(self.disconnect_timeout_ms),
            max_rejoin_attempts: self.max_rejoin_attempts,
            ..QueueSettings::default()
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .with_context(|| format!("{} inválido: {}", key, value)),
        _ => Ok(default),
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            youtube_api_keys: Vec::new(),

            // Limit defaults
            max_playlist_size: 100,
            disconnect_timeout_ms: 300_000, // 5 minutos
            max_rejoin_attempts: 5,
        }
    }
}

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Procesos externos
    pub ytdlp_binary: String,

    // Tiempos
    pub connect_timeout_secs: u64, // Espera máxima a que la voz esté lista
    pub idle_timeout_secs: u64,    // Gracia tras vaciarse la cola
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")?,
            application_id: std::env::var("APPLICATION_ID")?.parse()?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            // Procesos externos
            ytdlp_binary: std::env::var("YTDLP_BINARY")
                .unwrap_or_else(|_| "yt-dlp".to_string()),

            // Tiempos
            connect_timeout_secs: std::env::var("CONNECT_TIMEOUT_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            idle_timeout_secs: std::env::var("IDLE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Comprobaciones de sanidad sobre los valores cargados.
    pub fn validate(&self) -> Result<()> {
        if self.ytdlp_binary.trim().is_empty() {
            anyhow::bail!("La ruta del binario yt-dlp no puede estar vacía");
        }

        if self.connect_timeout_secs == 0 {
            anyhow::bail!("El timeout de conexión debe ser mayor que 0");
        }

        if self.idle_timeout_secs == 0 {
            anyhow::bail!("El timeout de inactividad debe ser mayor que 0");
        }

        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Resumen apto para el log: sin token ni datos sensibles.
    pub fn summary(&self) -> String {
        format!(
            "Config: App ID {} (Guild: {}), yt-dlp: {}, conexión {}s, inactividad {}s",
            self.application_id,
            self.guild_id
                .map_or("global".to_string(), |id| id.to_string()),
            self.ytdlp_binary,
            self.connect_timeout_secs,
            self.idle_timeout_secs,
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (sin valores por defecto - deben proveerse)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            ytdlp_binary: "yt-dlp".to_string(),

            connect_timeout_secs: 5,
            idle_timeout_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_zero_timeouts_are_rejected() {
        let config = Config {
            idle_timeout_secs: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            connect_timeout_secs: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_binary_is_rejected() {
        let config = Config {
            ytdlp_binary: "  ".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}

//! # Bot Module
//!
//! Main Discord bot implementation for Melodía.
//!
//! This module contains the core bot logic, including:
//! - Command registration and handling
//! - Event handling (ready, interactions)
//!
//! ## Architecture
//!
//! The bot is built around the [`MelodiaBot`] struct which implements
//! Serenity's [`EventHandler`] trait and forwards every slash command to
//! the per-guild [`PlaybackOrchestrator`].

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, GuildId, Interaction, Ready},
    async_trait,
};
use std::sync::Arc;
use tracing::{error, info};

pub mod commands;
pub mod handlers;

use crate::{audio::PlaybackOrchestrator, config::Config};

/// Handler principal del bot.
pub struct MelodiaBot {
    /// Configuración cargada del entorno
    config: Arc<Config>,
    /// Orquestador de reproducción por servidor
    pub orchestrator: PlaybackOrchestrator,
}

impl MelodiaBot {
    pub fn new(config: Arc<Config>, orchestrator: PlaybackOrchestrator) -> Self {
        Self {
            config,
            orchestrator,
        }
    }

    /// Registra los comandos slash, globales o por guild según configuración.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        if let Some(guild_id) = self.config.guild_id {
            commands::register_guild_commands(ctx, GuildId::new(guild_id)).await?;
            info!("✅ Comandos registrados en la guild de desarrollo {}", guild_id);
        } else {
            commands::register_global_commands(ctx).await?;
            info!("✅ Comandos globales registrados");
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for MelodiaBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 Bot conectado como {}", ready.user.name);

        if let Err(e) = self.register_commands(&ctx).await {
            error!("❌ Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            // Red de seguridad global: un handler que falla se loguea,
            // nunca tumba el proceso
            if let Err(e) = handlers::handle_command(&ctx, command, self).await {
                error!("❌ Error manejando comando: {:?}", e);
            }
        }
    }
}

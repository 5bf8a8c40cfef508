use std::sync::Arc;

use anyhow::Result;
use serenity::{
    builder::{CreateInteractionResponse, CreateInteractionResponseMessage},
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use tracing::{error, info};

use crate::{
    audio::{Announcer, QueueSnapshot},
    bot::MelodiaBot,
};

/// Máximo de títulos pendientes que muestra /queue.
const QUEUE_PREVIEW: usize = 10;

/// Maneja comandos slash
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &MelodiaBot,
) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    match command.data.name.as_str() {
        "play" => handle_play(ctx, command, bot).await?,
        "stop" => handle_stop(ctx, command, bot).await?,
        "skip" => handle_skip(ctx, command, bot).await?,
        "queue" => handle_queue(ctx, command, bot).await?,
        _ => {
            reply(ctx, &command, "❌ Comando no reconocido").await?;
        }
    }

    Ok(())
}

// Handlers específicos para cada comando

async fn handle_play(ctx: &Context, command: CommandInteraction, bot: &MelodiaBot) -> Result<()> {
    let guild_id = command.guild_id.unwrap();
    let query = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "query")
        .and_then(|opt| opt.value.as_str())
        .ok_or_else(|| anyhow::anyhow!("Query no proporcionado"))?
        .to_string();

    // Defer la respuesta: resolver puede tomar tiempo
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let announcer = Arc::new(Announcer::new(ctx.clone(), command.clone()));

    let voice_channel = match get_user_voice_channel(ctx, guild_id, command.user.id) {
        Ok(channel) => channel,
        Err(_) => {
            announcer.ack("❌ Debes estar en un canal de voz").await;
            return Ok(());
        }
    };

    // La resolución sigue su curso aunque este handler ya haya terminado
    let orchestrator = bot.orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = orchestrator
            .play(guild_id, voice_channel, &query, announcer)
            .await
        {
            error!("❌ Petición de reproducción fallida en guild {}: {:#}", guild_id, e);
        }
    });

    Ok(())
}

async fn handle_stop(ctx: &Context, command: CommandInteraction, bot: &MelodiaBot) -> Result<()> {
    let guild_id = command.guild_id.unwrap();

    match bot.orchestrator.stop(guild_id).await {
        Ok(()) => {
            ctx.set_activity(None);
            reply(ctx, &command, "⏹️ Paré la reproducción y me desconecté.").await?;
        }
        Err(_) => {
            reply(ctx, &command, "❌ No estoy reproduciendo nada.").await?;
        }
    }

    Ok(())
}

async fn handle_skip(ctx: &Context, command: CommandInteraction, bot: &MelodiaBot) -> Result<()> {
    let guild_id = command.guild_id.unwrap();

    let count = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "cantidad")
        .and_then(|opt| opt.value.as_i64())
        .unwrap_or(1)
        .max(1) as usize;

    match bot.orchestrator.skip(guild_id, count).await {
        Ok(titles) => {
            reply(ctx, &command, &format_skip_message(count, &titles)).await?;
        }
        Err(_) => {
            reply(ctx, &command, "❌ No estoy reproduciendo nada.").await?;
        }
    }

    Ok(())
}

async fn handle_queue(ctx: &Context, command: CommandInteraction, bot: &MelodiaBot) -> Result<()> {
    let guild_id = command.guild_id.unwrap();

    let snapshot = bot.orchestrator.queue_snapshot(guild_id).await;
    reply(ctx, &command, &format_queue_message(&snapshot)).await?;

    Ok(())
}

// Funciones auxiliares

async fn reply(ctx: &Context, command: &CommandInteraction, message: &str) -> Result<()> {
    info!(
        "💬 Respuesta a {} en guild {:?}: {}",
        command.user.name, command.guild_id, message
    );
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new().content(message),
            ),
        )
        .await?;
    Ok(())
}

fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Result<ChannelId> {
    let guild = guild_id
        .to_guild_cached(&ctx.cache)
        .ok_or_else(|| anyhow::anyhow!("Guild no encontrada en caché"))?;

    let channel_id = guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
        .ok_or_else(|| anyhow::anyhow!("Debes estar en un canal de voz"))?;

    Ok(channel_id)
}

fn format_skip_message(count: usize, titles: &[String]) -> String {
    if count == 1 {
        format!("⏭️ Salté **{}**", titles[0])
    } else {
        let listed = titles
            .iter()
            .map(|title| format!("**{title}**"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("⏭️ Salté {count} canción(es): {listed}")
    }
}

fn format_queue_message(snapshot: &QueueSnapshot) -> String {
    let mut message = String::new();

    match &snapshot.current {
        Some(title) => message.push_str(&format!("**Sonando ahora:** {title}\n\n")),
        None => message.push_str("No estoy reproduciendo nada en este momento.\n\n"),
    }

    if snapshot.upcoming.is_empty() {
        message.push_str("**Cola vacía**");
    } else {
        message.push_str("**Próximas canciones:**\n");
        for (index, title) in snapshot.upcoming.iter().take(QUEUE_PREVIEW).enumerate() {
            message.push_str(&format!("{}. {}\n", index + 1, title));
        }
        if snapshot.upcoming.len() > QUEUE_PREVIEW {
            message.push_str(&format!(
                "... y {} canción(es) más",
                snapshot.upcoming.len() - QUEUE_PREVIEW
            ));
        }
    }

    message
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_format_skip_single() {
        let titles = vec!["X".to_string()];
        assert_eq!(format_skip_message(1, &titles), "⏭️ Salté **X**");
    }

    #[test]
    fn test_format_skip_multiple() {
        let titles = vec!["X".to_string(), "A".to_string(), "B".to_string()];
        assert_eq!(
            format_skip_message(3, &titles),
            "⏭️ Salté 3 canción(es): **X**, **A**, **B**"
        );
    }

    #[test]
    fn test_format_queue_empty() {
        let snapshot = QueueSnapshot::default();
        assert_eq!(
            format_queue_message(&snapshot),
            "No estoy reproduciendo nada en este momento.\n\n**Cola vacía**"
        );
    }

    #[test]
    fn test_format_queue_with_current_and_upcoming() {
        let snapshot = QueueSnapshot {
            current: Some("X".to_string()),
            upcoming: vec!["A".to_string(), "B".to_string()],
        };
        assert_eq!(
            format_queue_message(&snapshot),
            "**Sonando ahora:** X\n\n**Próximas canciones:**\n1. A\n2. B\n"
        );
    }

    #[test]
    fn test_format_queue_truncates_preview() {
        let snapshot = QueueSnapshot {
            current: Some("X".to_string()),
            upcoming: (0..12).map(|i| format!("T{i}")).collect(),
        };
        let message = format_queue_message(&snapshot);
        assert!(message.contains("10. T9\n"));
        assert!(!message.contains("T10"));
        assert!(message.ends_with("... y 2 canción(es) más"));
    }
}

use anyhow::Result;
use serenity::{
    builder::{
        CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse,
    },
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    audio::{player::ChannelNotifier, queue::NO_TRACKS, PlaybackQueue},
    bot::MusicBot,
};

const NOT_IN_VOICE: &str = "🔇 Debes estar en un canal de voz";

/// Maneja comandos slash
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &MusicBot) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    let name = command.data.name.as_str();
    if name == "play" {
        return handle_play(ctx, &command, bot, guild_id).await;
    }

    if !is_queue_command(name) {
        return respond(ctx, &command, "❌ Comando no reconocido").await;
    }

    let reply = match find_queue(ctx, &command, bot, guild_id) {
        Ok(queue) => {
            let count = command
                .data
                .options
                .iter()
                .find(|opt| opt.name == "count")
                .and_then(|opt| opt.value.as_i64());
            run_queue_command(name, count, &queue).await
        }
        Err(reply) => reply.to_string(),
    };

    respond(ctx, &command, reply).await
}

fn is_queue_command(name: &str) -> bool {
    matches!(
        name,
        "pause" | "unpause" | "skip" | "stop" | "repeat_current" | "norepeat" | "queue"
    )
}

/// Ejecuta un comando sobre una cola existente y devuelve la respuesta
pub(crate) async fn run_queue_command(name: &str, count: Option<i64>, queue: &PlaybackQueue) -> String {
    match name {
        "pause" => {
            if queue.pause().await {
                "⏸️ Reproducción pausada".to_string()
            } else {
                "❌ No hay nada sonando".to_string()
            }
        }
        "unpause" => {
            if queue.unpause().await {
                "▶️ Reproducción reanudada".to_string()
            } else {
                "❌ La reproducción no está pausada".to_string()
            }
        }
        "skip" => {
            let skipped = queue.skip_track(count.unwrap_or(1)).await;
            if skipped.is_empty() {
                NO_TRACKS.to_string()
            } else {
                format!("⏭️ Saltadas {} canciones: {}", skipped.len(), skipped.join(", "))
            }
        }
        "stop" => {
            queue.stop().await;
            "⏹️ Reproducción detenida".to_string()
        }
        "repeat_current" => {
            queue.repeat_current_track();
            "🔂 La canción actual se repetirá".to_string()
        }
        "norepeat" => {
            queue.cancel_repeating();
            "➡️ Repetición desactivada".to_string()
        }
        "queue" => queue.tracks_list(),
        _ => "❌ Comando no reconocido".to_string(),
    }
}

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &MusicBot,
    guild_id: GuildId,
) -> Result<()> {
    let query = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "query")
        .and_then(|opt| opt.value.as_str())
        .ok_or_else(|| anyhow::anyhow!("Query no proporcionado"))?;

    let Some(voice_channel_id) = get_user_voice_channel(ctx, guild_id, command.user.id) else {
        return respond(ctx, command, NOT_IN_VOICE).await;
    };

    // Defer la respuesta ya que puede tomar tiempo
    command.defer(&ctx.http).await?;

    let tracks = match bot.sources.resolve(query).await {
        Ok(tracks) => tracks,
        Err(e) => {
            warn!("❌ No se pudo resolver \"{}\": {:#}", query, e);
            return edit(ctx, command, "❌ No se pudo leer ese enlace").await;
        }
    };

    if tracks.len() > bot.config.max_playlist_size {
        return edit(
            ctx,
            command,
            format!(
                "📛 La playlist es demasiado larga (máximo {} canciones)",
                bot.config.max_playlist_size
            ),
        )
        .await;
    }

    if tracks.is_empty() {
        return edit(ctx, command, "🔍 No se encontraron canciones").await;
    }

    let queue = bot
        .queue_for(ctx, guild_id, voice_channel_id, command.channel_id)
        .await?;
    queue.set_text_channel(Arc::new(ChannelNotifier::new(
        ctx.http.clone(),
        command.channel_id,
    )));

    let count = tracks.len();
    // La primera canción se resuelve en segundo plano
    tokio::spawn(async move { queue.enqueue_all(tracks).await });

    edit(ctx, command, format!("✅ Agregadas {} canciones a la cola", count)).await
}

/// Cola del canal de voz del usuario, o la respuesta a dar si no hay
fn find_queue(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &MusicBot,
    guild_id: GuildId,
) -> std::result::Result<PlaybackQueue, &'static str> {
    let voice_channel_id = get_user_voice_channel(ctx, guild_id, command.user.id).ok_or(NOT_IN_VOICE)?;
    let queue = bot.registry.get(&voice_channel_id.to_string()).ok_or(NO_TRACKS)?;

    queue.set_text_channel(Arc::new(ChannelNotifier::new(
        ctx.http.clone(),
        command.channel_id,
    )));
    Ok(queue)
}

async fn respond(ctx: &Context, command: &CommandInteraction, content: impl Into<String>) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new().content(content),
            ),
        )
        .await?;

    Ok(())
}

async fn edit(ctx: &Context, command: &CommandInteraction, content: impl Into<String>) -> Result<()> {
    command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(content))
        .await?;

    Ok(())
}

fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;

    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}

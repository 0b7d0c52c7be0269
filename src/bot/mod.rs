//! # Bot Module
//!
//! Discord front-end for the playback queues.
//!
//! This module contains:
//! - Slash command registration ([`commands`]) and handling ([`handlers`])
//! - Voice driver event forwarding ([`events`])
//! - Creation of one [`PlaybackQueue`] per voice channel
//!
//! ## Architecture
//!
//! [`MusicBot`] implements Serenity's [`EventHandler`] trait and owns:
//!
//! - The bot configuration
//! - The [`SourceManager`] shared by every queue as its stream provider
//! - The [`QueueRegistry`] of active queues, keyed by voice channel id

use anyhow::Result;
use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

pub mod commands;
pub mod events;
pub mod handlers;

use crate::{
    audio::{
        backend::{ConnectionEvent, DisconnectReason, QueueBackend, SESSION_TAKEOVER_CLOSE_CODE},
        player::{ChannelNotifier, SongbirdConnection, SongbirdPlayer},
        PlaybackQueue, QueueRegistry,
    },
    config::Config,
    sources::SourceManager,
};

/// Main Discord bot handler.
///
/// ## Thread Safety
///
/// - [`Arc`] for the configuration and sources shared with every queue
/// - [`QueueRegistry`] is a concurrent map, cheap to clone
pub struct MusicBot {
    /// Bot configuration loaded from environment variables
    config: Arc<Config>,
    /// Query resolution and stream opening
    sources: Arc<SourceManager>,
    /// Active queues per voice channel
    registry: QueueRegistry,
}

impl MusicBot {
    pub fn new(config: Config, sources: SourceManager) -> Self {
        Self {
            config: Arc::new(config),
            sources: Arc::new(sources),
            registry: QueueRegistry::new(),
        }
    }

    /// Registers slash commands with Discord.
    ///
    /// Commands go to a single guild when `GUILD_ID` is set (fast propagation,
    /// useful for development) and globally otherwise.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");
        info!("🔧 Application ID: {}", self.config.application_id);

        match self.config.guild_id {
            Some(guild_id) => {
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);
                let guild_id = GuildId::from(guild_id);

                // Verificar que el bot esté en la guild
                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id)
                    .await
                    .map_err(|e| {
                        error!("❌ Error registrando comandos de guild: {:?}", e);
                        anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica que el bot tenga permisos de 'applications.commands' en la guild.")
                    })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica que el bot tenga permisos de 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }

    /// Returns the queue of a voice channel, creating and connecting it if
    /// there is none yet.
    ///
    /// New queues post their notifications to `text_channel_id`.
    pub async fn queue_for(
        &self,
        ctx: &Context,
        guild_id: GuildId,
        voice_channel_id: ChannelId,
        text_channel_id: ChannelId,
    ) -> Result<PlaybackQueue> {
        let key = voice_channel_id.to_string();
        if let Some(queue) = self.registry.get(&key) {
            return Ok(queue);
        }

        let manager = songbird::get(ctx)
            .await
            .ok_or_else(|| anyhow::anyhow!("Songbird no inicializado"))?;

        let call = manager.get_or_insert(guild_id);
        let (events, rx) = mpsc::unbounded_channel();
        {
            let mut handler = call.lock().await;
            // Songbird tiene un solo Call por guild
            handler.remove_all_global_events();
            events::register_voice_events(&mut handler, events.clone());
        }

        let backend = QueueBackend {
            player: Arc::new(SongbirdPlayer::new(call, events)),
            connection: Arc::new(SongbirdConnection::new(manager, guild_id, voice_channel_id)),
            provider: self.sources.clone(),
            notifier: Arc::new(ChannelNotifier::new(ctx.http.clone(), text_channel_id)),
        };

        let queue = self.registry.set(
            key.clone(),
            PlaybackQueue::new(key, backend, self.config.queue_settings()),
        );
        queue.listen(rx);
        info!("🆕 Cola creada para el canal de voz {}", voice_channel_id);

        queue.connect().await;
        Ok(queue)
    }
}

#[async_trait]
impl EventHandler for MusicBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command_interaction) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    /// Treats the bot being moved out of a channel like a session takeover:
    /// the queue waits briefly for the connection to come back and is
    /// destroyed otherwise.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id {
            return;
        }

        let Some(old_channel_id) = old.and_then(|state| state.channel_id) else {
            return;
        };
        if new.channel_id == Some(old_channel_id) {
            return;
        }

        if let Some(queue) = self.registry.get(&old_channel_id.to_string()) {
            info!("🔌 Bot sacado del canal de voz {}", old_channel_id);
            queue.handle_connection_event(ConnectionEvent::Disconnected(
                DisconnectReason::WebSocketClose(Some(SESSION_TAKEOVER_CLOSE_CODE)),
            ));
        }
    }
}

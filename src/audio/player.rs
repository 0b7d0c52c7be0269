use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::{
    http::Http,
    model::id::{ChannelId, GuildId},
};
use songbird::{
    error::JoinError,
    tracks::{PlayMode, TrackHandle},
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::{
    audio::backend::{
        AudioPlayer, AudioStream, Notifier, PlayerEvent, QueueEvent, VoiceConnection,
    },
    error::MusicError,
};

/// Reproductor sobre un `Call` de songbird
pub struct SongbirdPlayer {
    call: Arc<tokio::sync::Mutex<Call>>,
    current: Mutex<Option<TrackHandle>>,
    events: UnboundedSender<QueueEvent>,
}

impl SongbirdPlayer {
    pub fn new(call: Arc<tokio::sync::Mutex<Call>>, events: UnboundedSender<QueueEvent>) -> Self {
        Self {
            call,
            current: Mutex::new(None),
            events,
        }
    }
}

#[async_trait]
impl AudioPlayer for SongbirdPlayer {
    async fn play(&self, stream: AudioStream, play_id: u64) -> Result<(), MusicError> {
        let offset = stream.offset();
        let locator = stream.locator().to_string();
        let input = stream
            .into_input()
            .ok_or_else(|| MusicError::Player(format!("{} no tiene audio", locator)))?;

        let handle = {
            let mut call = self.call.lock().await;
            call.play_input(input)
        };

        for kind in [TrackEvent::Play, TrackEvent::End, TrackEvent::Error] {
            let forwarder = TrackEventForwarder {
                play_id,
                events: self.events.clone(),
            };
            if let Err(e) = handle.add_event(Event::Track(kind), forwarder) {
                warn!("⚠️ No se pudo escuchar {:?} de {}: {:?}", kind, locator, e);
            }
        }

        if !offset.is_zero() {
            // Las fuentes en vivo no permiten seek; arrancan desde el inicio
            let _ = handle.seek(offset);
        }

        if let Some(previous) = self.current.lock().replace(handle) {
            let _ = previous.stop();
        }

        Ok(())
    }

    fn stop(&self) {
        if let Some(handle) = self.current.lock().take() {
            let _ = handle.stop();
        }
    }

    fn pause(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .is_some_and(|handle| handle.pause().is_ok())
    }

    fn unpause(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .is_some_and(|handle| handle.play().is_ok())
    }
}

/// Reenvía el estado de una pista a la cola, etiquetado con su `play_id`
struct TrackEventForwarder {
    play_id: u64,
    events: UnboundedSender<QueueEvent>,
}

#[async_trait]
impl VoiceEventHandler for TrackEventForwarder {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let EventContext::Track(tracks) = ctx else {
            return None;
        };

        for (state, _handle) in *tracks {
            let event = match &state.playing {
                PlayMode::Play => PlayerEvent::Playing,
                PlayMode::Errored(e) => PlayerEvent::Error {
                    offset: state.position,
                    message: format!("{:?}", e),
                },
                PlayMode::End | PlayMode::Stop => PlayerEvent::Idle,
                _ => continue,
            };

            if self
                .events
                .send(QueueEvent::Player {
                    play_id: self.play_id,
                    event,
                })
                .is_err()
            {
                debug!("🔇 Cola cerrada, evento de pista {} descartado", self.play_id);
            }
        }

        None
    }
}

/// Conexión de voz administrada por songbird
pub struct SongbirdConnection {
    manager: Arc<Songbird>,
    guild_id: GuildId,
    channel_id: ChannelId,
}

impl SongbirdConnection {
    pub fn new(manager: Arc<Songbird>, guild_id: GuildId, channel_id: ChannelId) -> Self {
        Self {
            manager,
            guild_id,
            channel_id,
        }
    }

    /// El `Call` es único por guild: otra cola pudo moverlo a su canal
    fn serves_other_channel(&self, call: &Call) -> bool {
        call.current_channel()
            .is_some_and(|current| current != self.channel_id.into())
    }
}

fn connection_error(e: JoinError) -> MusicError {
    match e {
        JoinError::NoCall => MusicError::ConnectionDestroyed,
        other => MusicError::ConnectionLost(other.to_string()),
    }
}

#[async_trait]
impl VoiceConnection for SongbirdConnection {
    async fn join(&self) -> Result<(), MusicError> {
        self.manager
            .join(self.guild_id, self.channel_id)
            .await
            .map(|_| ())
            .map_err(connection_error)
    }

    async fn disconnect(&self) {
        let Some(call) = self.manager.get(self.guild_id) else {
            return;
        };

        let mut call = call.lock().await;
        if self.serves_other_channel(&call) {
            debug!("Canal {} ya no es el de la guild, no se sale", self.channel_id);
            return;
        }
        call.remove_all_global_events();
        if let Err(e) = call.leave().await {
            warn!("⚠️ Error al salir del canal {}: {}", self.channel_id, e);
        }
    }

    async fn destroy(&self) {
        if let Some(call) = self.manager.get(self.guild_id) {
            let busy = self.serves_other_channel(&*call.lock().await);
            if busy {
                debug!("Canal {} ya no es el de la guild, se conserva el Call", self.channel_id);
                return;
            }
        }

        if let Err(e) = self.manager.remove(self.guild_id).await {
            debug!("Conexión de {} ya liberada: {}", self.guild_id, e);
        }
    }
}

/// Anuncia canciones en un canal de texto
pub struct ChannelNotifier {
    http: Arc<Http>,
    channel_id: ChannelId,
}

impl ChannelNotifier {
    pub fn new(http: Arc<Http>, channel_id: ChannelId) -> Self {
        Self { http, channel_id }
    }
}

impl Notifier for ChannelNotifier {
    fn send(&self, text: &str) {
        let http = self.http.clone();
        let channel_id = self.channel_id;
        let text = text.to_string();

        tokio::spawn(async move {
            if let Err(e) = channel_id.say(&*http, text).await {
                warn!("⚠️ No se pudo enviar mensaje a {}: {:?}", channel_id, e);
            }
        });
    }
}

//! Contracts between the playback queue and the outside world.
//!
//! The queue never talks to songbird or to an HTTP API directly. It drives an
//! [`AudioPlayer`], a [`VoiceConnection`], a [`StreamProvider`] and a
//! [`Notifier`], and receives [`QueueEvent`]s back from the transport. The
//! songbird implementations live in [`crate::audio::player`]; tests use
//! in-memory fakes.

use async_trait::async_trait;
use songbird::input::Input;
use std::{sync::Arc, time::Duration};

use crate::error::MusicError;

/// Close code Discord sends when another session takes over the voice connection.
pub const SESSION_TAKEOVER_CLOSE_CODE: u16 = 4014;

/// Stream listo para entregar al reproductor
pub struct AudioStream {
    locator: String,
    offset: Duration,
    input: Option<Input>,
}

impl AudioStream {
    pub fn new(locator: impl Into<String>, offset: Duration, input: Input) -> Self {
        Self {
            locator: locator.into(),
            offset,
            input: Some(input),
        }
    }

    /// Stream sin audio real, para reproductores que no decodifican nada
    #[cfg(test)]
    pub fn detached(locator: impl Into<String>, offset: Duration) -> Self {
        Self {
            locator: locator.into(),
            offset,
            input: None,
        }
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn offset(&self) -> Duration {
        self.offset
    }

    pub fn into_input(self) -> Option<Input> {
        self.input
    }
}

impl std::fmt::Debug for AudioStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioStream")
            .field("locator", &self.locator)
            .field("offset", &self.offset)
            .field("has_input", &self.input.is_some())
            .finish()
    }
}

/// Estado del reproductor tal como lo ve la cola
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerStatus {
    Idle,
    Buffering,
    Playing,
    Paused,
}

impl PlayerStatus {
    pub fn is_idle(self) -> bool {
        self == PlayerStatus::Idle
    }
}

/// Eventos del reproductor, siempre asociados a un `play_id`
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    Playing,
    Idle,
    Error { offset: Duration, message: String },
}

/// Why the transport dropped the voice connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The voice websocket was closed, with the close code when known
    WebSocketClose(Option<u16>),
    /// Any other transport failure (timeouts, IO, protocol errors)
    Transport(String),
}

impl DisconnectReason {
    pub fn is_session_takeover(&self) -> bool {
        matches!(
            self,
            DisconnectReason::WebSocketClose(Some(code)) if *code == SESSION_TAKEOVER_CLOSE_CODE
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Signalling,
    Connecting,
    Ready,
    Disconnected,
    Destroyed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Signalling,
    Connecting,
    Ready,
    Disconnected(DisconnectReason),
    Destroyed,
}

/// Todo lo que el transporte le notifica a una cola
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    Player { play_id: u64, event: PlayerEvent },
    Connection(ConnectionEvent),
}

/// Reproductor de audio de un canal de voz.
///
/// `play` recibe un `play_id` que el reproductor debe adjuntar a todos los
/// eventos que emita para esa reproducción.
#[async_trait]
pub trait AudioPlayer: Send + Sync {
    async fn play(&self, stream: AudioStream, play_id: u64) -> Result<(), MusicError>;

    /// Detiene la reproducción actual de forma inmediata
    fn stop(&self);

    fn pause(&self) -> bool;

    fn unpause(&self) -> bool;
}

/// Conexión de voz con el canal de destino
#[async_trait]
pub trait VoiceConnection: Send + Sync {
    async fn join(&self) -> Result<(), MusicError>;

    async fn rejoin(&self) -> Result<(), MusicError> {
        self.join().await
    }

    /// Sale del canal sin liberar el transporte
    async fn disconnect(&self);

    /// Libera el transporte por completo
    async fn destroy(&self);
}

/// Resolves track names and opens audio streams.
#[async_trait]
pub trait StreamProvider: Send + Sync {
    /// Turns free text into a concrete locator (URL, video id...).
    async fn locate(&self, query: &str) -> Result<String, MusicError>;

    /// Opens a playable stream for `locator`, starting at `offset`.
    async fn open(&self, locator: &str, offset: Duration) -> Result<AudioStream, MusicError>;
}

/// Canal de texto donde se anuncian las canciones
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    fn send(&self, text: &str);
}

/// Colaboradores de una cola
#[derive(Clone)]
pub struct QueueBackend {
    pub player: Arc<dyn AudioPlayer>,
    pub connection: Arc<dyn VoiceConnection>,
    pub provider: Arc<dyn StreamProvider>,
    pub notifier: Arc<dyn Notifier>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_takeover_detection() {
        assert!(DisconnectReason::WebSocketClose(Some(4014)).is_session_takeover());
        assert!(!DisconnectReason::WebSocketClose(Some(4006)).is_session_takeover());
        assert!(!DisconnectReason::WebSocketClose(None).is_session_takeover());
        assert!(!DisconnectReason::Transport("timeout".into()).is_session_takeover());
    }
}

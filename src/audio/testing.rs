//! In-memory collaborators for exercising the playback queue.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::Notify;

use super::{
    backend::{
        AudioPlayer, AudioStream, MockNotifier, PlayerEvent, QueueBackend, StreamProvider,
        VoiceConnection,
    },
    queue::{PlaybackQueue, QueueSettings},
};
use crate::error::MusicError;

const LOCATOR_PREFIX: &str = "loc:";

#[derive(Default)]
pub struct FakePlayer {
    plays: Mutex<Vec<(String, u64, Duration)>>,
    stops: AtomicUsize,
}

impl FakePlayer {
    /// Nombres reproducidos, en orden
    pub fn played(&self) -> Vec<String> {
        self.plays
            .lock()
            .iter()
            .map(|(locator, _, _)| locator.trim_start_matches(LOCATOR_PREFIX).to_string())
            .collect()
    }

    pub fn offsets(&self) -> Vec<Duration> {
        self.plays.lock().iter().map(|(_, _, offset)| *offset).collect()
    }

    pub fn last_play_id(&self) -> Option<u64> {
        self.plays.lock().last().map(|(_, play_id, _)| *play_id)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Simula el fin natural de la canción actual
    pub async fn finish_current(&self, queue: &PlaybackQueue) {
        if let Some(play_id) = self.last_play_id() {
            queue.handle_player_event(play_id, PlayerEvent::Idle).await;
        }
    }
}

#[async_trait]
impl AudioPlayer for FakePlayer {
    async fn play(&self, stream: AudioStream, play_id: u64) -> Result<(), MusicError> {
        self.plays
            .lock()
            .push((stream.locator().to_string(), play_id, stream.offset()));
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn pause(&self) -> bool {
        true
    }

    fn unpause(&self) -> bool {
        true
    }
}

#[derive(Default)]
pub struct FakeConnection {
    joins: AtomicUsize,
    rejoins: AtomicUsize,
    disconnects: AtomicUsize,
    destroys: AtomicUsize,
}

impl FakeConnection {
    pub fn joins(&self) -> usize {
        self.joins.load(Ordering::SeqCst)
    }

    pub fn rejoins(&self) -> usize {
        self.rejoins.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn destroys(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoiceConnection for FakeConnection {
    async fn join(&self) -> Result<(), MusicError> {
        self.joins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rejoin(&self) -> Result<(), MusicError> {
        self.rejoins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    async fn destroy(&self) {
        self.destroys.fetch_add(1, Ordering::SeqCst);
    }
}

/// Resuelve `nombre` a `loc:nombre`, salvo los nombres marcados como rotos
#[derive(Default)]
pub struct FakeProvider {
    failing: Mutex<HashSet<String>>,
    held: Mutex<HashMap<String, Arc<Notify>>>,
    located: Mutex<Vec<String>>,
}

impl FakeProvider {
    pub fn fail(&self, name: &str) {
        self.failing.lock().insert(name.to_string());
    }

    /// Bloquea la resolución de `name` hasta que se notifique el `Notify`
    pub fn hold(&self, name: &str) -> Arc<Notify> {
        let release = Arc::new(Notify::new());
        self.held.lock().insert(name.to_string(), release.clone());
        release
    }

    pub fn located(&self) -> Vec<String> {
        self.located.lock().clone()
    }
}

#[async_trait]
impl StreamProvider for FakeProvider {
    async fn locate(&self, query: &str) -> Result<String, MusicError> {
        self.located.lock().push(query.to_string());

        let release = self.held.lock().get(query).cloned();
        if let Some(release) = release {
            release.notified().await;
        }

        if self.failing.lock().contains(query) {
            return Err(MusicError::Resolution(query.to_string()));
        }
        Ok(format!("{}{}", LOCATOR_PREFIX, query))
    }

    async fn open(&self, locator: &str, offset: Duration) -> Result<AudioStream, MusicError> {
        Ok(AudioStream::detached(locator, offset))
    }
}

impl MockNotifier {
    /// Notifier que acepta cualquier mensaje
    pub fn quiet() -> Self {
        let mut notifier = MockNotifier::new();
        notifier.expect_send().return_const(());
        notifier
    }
}

pub struct Harness {
    pub queue: PlaybackQueue,
    pub player: Arc<FakePlayer>,
    pub connection: Arc<FakeConnection>,
    pub provider: Arc<FakeProvider>,
}

pub fn harness() -> Harness {
    harness_with(MockNotifier::quiet(), QueueSettings::default())
}

pub fn harness_with(notifier: MockNotifier, settings: QueueSettings) -> Harness {
    let player = Arc::new(FakePlayer::default());
    let connection = Arc::new(FakeConnection::default());
    let provider = Arc::new(FakeProvider::default());

    let backend = QueueBackend {
        player: player.clone(),
        connection: connection.clone(),
        provider: provider.clone(),
        notifier: Arc::new(notifier),
    };

    Harness {
        queue: PlaybackQueue::new("test-channel", backend, settings),
        player,
        connection,
        provider,
    }
}

/// Deja correr las tareas pendientes del runtime
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

use parking_lot::{Mutex, RwLock};
use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    backend::{
        AudioPlayer, ConnectionStatus, Notifier, PlayerEvent, PlayerStatus, QueueBackend,
        QueueEvent, StreamProvider, VoiceConnection,
    },
    track::Track,
};

/// Canciones pendientes que se muestran en `/queue`
pub const QUEUE_PREVIEW_LEN: usize = 15;

/// Texto cuando no hay nada sonando ni en cola
pub const NO_TRACKS: &str = "📭 No hay canciones en la cola";

/// Tiempos y límites de una cola
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Inactividad antes de salir del canal
    pub disconnect_timeout: Duration,
    /// Reintentos de conexión antes de rendirse
    pub max_rejoin_attempts: u32,
    /// Paso del backoff lineal entre reintentos
    pub rejoin_backoff: Duration,
    /// Espera máxima para que la conexión quede lista
    pub ready_timeout: Duration,
    /// Espera tras un cierre por toma de sesión
    pub takeover_timeout: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            disconnect_timeout: Duration::from_millis(300_000),
            max_rejoin_attempts: 5,
            rejoin_backoff: Duration::from_secs(5),
            ready_timeout: Duration::from_secs(20),
            takeover_timeout: Duration::from_secs(5),
        }
    }
}

type DestroyCallback = Box<dyn FnOnce() + Send>;

/// Canción que se está resolviendo; ocupa el único hueco de avance
pub(super) struct InFlight {
    pub(super) attempt: u64,
    pub(super) name: String,
}

pub(super) struct QueueState {
    pub(super) tracks: VecDeque<Track>,
    pub(super) current: Option<Track>,
    pub(super) in_flight: Option<InFlight>,
    pub(super) player: PlayerStatus,
    pub(super) playing_id: Option<u64>,
    pub(super) next_attempt: u64,
    pub(super) repeat_track: bool,
    pub(super) rejoin_attempts: u32,
    pub(super) ready_wait: Option<CancellationToken>,
    pub(super) takeover_wait: Option<CancellationToken>,
    pub(super) destroying: bool,
    pub(super) destroyed: bool,
    pub(super) disconnect_timer: Option<CancellationToken>,
    pub(super) destroy_callback: Option<DestroyCallback>,
}

impl QueueState {
    fn new() -> Self {
        Self {
            tracks: VecDeque::new(),
            current: None,
            in_flight: None,
            player: PlayerStatus::Idle,
            playing_id: None,
            next_attempt: 0,
            repeat_track: false,
            rejoin_attempts: 0,
            ready_wait: None,
            takeover_wait: None,
            destroying: false,
            destroyed: false,
            disconnect_timer: None,
            destroy_callback: None,
        }
    }

    /// Ocupa el hueco de avance y devuelve el id del intento
    pub(super) fn begin_attempt(&mut self, name: &str) -> u64 {
        self.next_attempt += 1;
        self.in_flight = Some(InFlight {
            attempt: self.next_attempt,
            name: name.to_string(),
        });
        self.next_attempt
    }

    pub(super) fn is_shutting_down(&self) -> bool {
        self.destroyed || self.destroying
    }
}

pub(super) struct Inner {
    pub(super) destination: String,
    pub(super) settings: QueueSettings,
    pub(super) state: Mutex<QueueState>,
    pub(super) status: watch::Sender<ConnectionStatus>,
    /// Serializa todo lo que toca al reproductor
    pub(super) playback: tokio::sync::Mutex<()>,
    pub(super) player: Arc<dyn AudioPlayer>,
    pub(super) connection: Arc<dyn VoiceConnection>,
    pub(super) provider: Arc<dyn StreamProvider>,
    pub(super) notifier: RwLock<Arc<dyn Notifier>>,
}

/// Per-channel playback queue.
///
/// Owns the pending tracks of one voice destination, drives its audio player
/// and supervises its voice connection. Cloning is cheap: every clone is a
/// handle to the same queue.
///
/// State lives behind a synchronous mutex that is never held across an
/// await. Advancing is guarded by a single in-flight slot: a second advance
/// that finds the slot taken returns immediately and relies on the next idle
/// event to try again.
#[derive(Clone)]
pub struct PlaybackQueue {
    pub(super) inner: Arc<Inner>,
}

/// Referencia débil a una cola, para callbacks y tareas de fondo
#[derive(Clone)]
pub struct WeakQueue(Weak<Inner>);

impl WeakQueue {
    pub fn upgrade(&self) -> Option<PlaybackQueue> {
        self.0.upgrade().map(|inner| PlaybackQueue { inner })
    }
}

/// Resultado de un intento de reproducción
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum AttemptOutcome {
    Started,
    Failed,
    /// El intento quedó obsoleto (stop, skip o destrucción durante la espera)
    Discarded,
}

/// Foto de la cola para mostrar al usuario
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueueSnapshot {
    pub now_playing: Option<String>,
    pub loading: Option<String>,
    pub upcoming: Vec<String>,
    pub remaining: usize,
}

impl QueueSnapshot {
    pub fn is_empty(&self) -> bool {
        self.now_playing.is_none() && self.loading.is_none() && self.upcoming.is_empty()
    }
}

impl fmt::Display for QueueSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str(NO_TRACKS);
        }

        if let Some(name) = &self.now_playing {
            writeln!(f, "**Reproduciendo ahora:**\n{}", name)?;
        } else if let Some(name) = &self.loading {
            writeln!(f, "**Cargando:**\n{}", name)?;
        }

        writeln!(f, "**Cola:**")?;
        for name in &self.upcoming {
            writeln!(f, "{};", name)?;
        }
        if self.remaining > 0 {
            write!(f, "...(y {} canciones más)", self.remaining)?;
        }

        Ok(())
    }
}

/// Cuántas canciones consume un skip: `count < 1` vale 1, nunca más que las que hay
pub(super) fn skip_count(requested: i64, remaining: usize) -> usize {
    let requested = usize::try_from(requested.max(1)).unwrap_or(usize::MAX);
    requested.min(remaining)
}

impl PlaybackQueue {
    pub fn new(destination: impl Into<String>, backend: QueueBackend, settings: QueueSettings) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Signalling);

        Self {
            inner: Arc::new(Inner {
                destination: destination.into(),
                settings,
                state: Mutex::new(QueueState::new()),
                status,
                playback: tokio::sync::Mutex::new(()),
                player: backend.player,
                connection: backend.connection,
                provider: backend.provider,
                notifier: RwLock::new(backend.notifier),
            }),
        }
    }

    pub fn destination(&self) -> &str {
        &self.inner.destination
    }

    pub fn downgrade(&self) -> WeakQueue {
        WeakQueue(Arc::downgrade(&self.inner))
    }

    /// `true` si `other` apunta a esta misma cola
    pub fn is_same(&self, other: &WeakQueue) -> bool {
        std::ptr::eq(Arc::as_ptr(&self.inner), other.0.as_ptr())
    }

    /// Consume los eventos del transporte en orden de llegada.
    ///
    /// La tarea solo guarda una referencia débil y termina cuando la cola se
    /// destruye o el canal se cierra.
    pub fn listen(&self, mut events: mpsc::UnboundedReceiver<QueueEvent>) {
        let weak = self.downgrade();

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(queue) = weak.upgrade() else {
                    break;
                };
                queue.dispatch(event);
                if queue.is_destroyed() {
                    debug!("🔇 Dejando de escuchar eventos de la cola {}", queue.destination());
                    break;
                }
            }
        });
    }

    /// Entrega un evento sin esperar al avance de la cola.
    ///
    /// Los eventos de conexión se aplican en el acto. Los del reproductor
    /// corren en su propia tarea porque pueden disparar la resolución de la
    /// siguiente canción; los `play_id` descartan los que lleguen tarde.
    pub fn dispatch(&self, event: QueueEvent) {
        match event {
            QueueEvent::Player { play_id, event } => {
                let queue = self.clone();
                tokio::spawn(async move { queue.handle_player_event(play_id, event).await });
            }
            QueueEvent::Connection(event) => self.handle_connection_event(event),
        }
    }

    /// Registra el callback que se invoca una sola vez al destruirse la cola
    pub fn set_destroy_callback(&self, callback: impl FnOnce() + Send + 'static) {
        let mut state = self.inner.state.lock();
        if state.destroyed {
            drop(state);
            callback();
            return;
        }
        state.destroy_callback = Some(Box::new(callback));
    }

    /// Cambia el canal de texto donde se anuncian las canciones
    pub fn set_text_channel(&self, notifier: Arc<dyn Notifier>) {
        *self.inner.notifier.write() = notifier;
    }

    fn notifier(&self) -> Arc<dyn Notifier> {
        self.inner.notifier.read().clone()
    }

    /// Agrega una canción al final y dispara el avance
    pub async fn enqueue(&self, track: Track) {
        self.enqueue_all(vec![track]).await;
    }

    /// Agrega varias canciones con un solo avance
    pub async fn enqueue_all(&self, tracks: Vec<Track>) {
        {
            let mut state = self.inner.state.lock();
            if state.is_shutting_down() {
                warn!("⚠️ Cola {} destruida, se ignoran {} canciones", self.destination(), tracks.len());
                return;
            }
            for track in tracks {
                info!(
                    "➕ Agregada {} a la cola {}, largo actual {}",
                    track.name(),
                    self.destination(),
                    state.tracks.len() + 1
                );
                state.tracks.push_back(track);
            }
        }

        self.process_queue().await;
    }

    /// Skips up to `count` tracks, counting the interrupted one.
    ///
    /// Returns the names of the skipped tracks in queue order. Skipped tracks
    /// are consumed even when repeat is on.
    pub async fn skip_track(&self, count: i64) -> Vec<String> {
        let skipped = {
            let _playback = self.inner.playback.lock().await;

            let (skipped, was_playing) = {
                let mut state = self.inner.state.lock();
                let interrupted = state
                    .current
                    .as_ref()
                    .map(|track| track.name().to_string())
                    .or_else(|| state.in_flight.as_ref().map(|flight| flight.name.clone()));

                let remaining = usize::from(interrupted.is_some()) + state.tracks.len();
                let count = skip_count(count, remaining);
                if count == 0 {
                    return Vec::new();
                }

                let was_playing = state.current.take().is_some();
                state.in_flight = None;
                state.playing_id = None;
                state.player = PlayerStatus::Idle;

                let mut skipped = Vec::with_capacity(count);
                skipped.extend(interrupted);
                while skipped.len() < count {
                    match state.tracks.pop_front() {
                        Some(track) => skipped.push(track.name().to_string()),
                        None => break,
                    }
                }

                (skipped, was_playing)
            };

            if was_playing {
                self.inner.player.stop();
            }
            skipped
        };

        info!("⏭️ Saltadas {} canciones en la cola {}", skipped.len(), self.destination());
        self.finish_playback(None).await;
        skipped
    }

    pub fn repeat_current_track(&self) {
        let mut state = self.inner.state.lock();
        state.repeat_track = true;
        info!(
            "🔂 La canción {} se repetirá",
            state.current.as_ref().map(Track::name).unwrap_or_default()
        );
    }

    pub fn cancel_repeating(&self) {
        let mut state = self.inner.state.lock();
        state.repeat_track = false;
        info!(
            "➡️ La canción {} ya no se repetirá",
            state.current.as_ref().map(Track::name).unwrap_or_default()
        );
    }

    #[cfg(test)]
    pub fn is_repeating(&self) -> bool {
        self.inner.state.lock().repeat_track
    }

    /// Vacía la cola y detiene el reproductor. Idempotente.
    ///
    /// Una resolución en curso no se cancela; su resultado se descarta.
    pub async fn stop(&self) {
        let _playback = self.inner.playback.lock().await;

        {
            let mut state = self.inner.state.lock();
            state.tracks.clear();
            let was_active = state.current.take().is_some() | state.in_flight.take().is_some();
            state.playing_id = None;
            state.player = PlayerStatus::Idle;
            if was_active {
                self.arm_disconnect_timer(&mut state);
            }
        }

        self.inner.player.stop();
        info!("⏹️ Cola {} detenida", self.destination());
    }

    pub async fn pause(&self) -> bool {
        let _playback = self.inner.playback.lock().await;

        let status = self.inner.state.lock().player;
        if !matches!(status, PlayerStatus::Playing | PlayerStatus::Buffering) {
            return false;
        }

        let paused = self.inner.player.pause();
        if paused {
            self.inner.state.lock().player = PlayerStatus::Paused;
            info!("⏸️ Cola {} en pausa", self.destination());
        }
        paused
    }

    pub async fn unpause(&self) -> bool {
        let _playback = self.inner.playback.lock().await;

        let status = self.inner.state.lock().player;
        if status != PlayerStatus::Paused {
            return false;
        }

        let resumed = self.inner.player.unpause();
        if resumed {
            self.inner.state.lock().player = PlayerStatus::Playing;
            info!("▶️ Cola {} reanudada", self.destination());
        }
        resumed
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.inner.state.lock();

        QueueSnapshot {
            now_playing: state.current.as_ref().map(|track| track.name().to_string()),
            loading: state.in_flight.as_ref().map(|flight| flight.name.clone()),
            upcoming: state
                .tracks
                .iter()
                .take(QUEUE_PREVIEW_LEN)
                .map(|track| track.name().to_string())
                .collect(),
            remaining: state.tracks.len().saturating_sub(QUEUE_PREVIEW_LEN),
        }
    }

    /// Lista legible: canción actual, las próximas 15 y cuántas quedan
    pub fn tracks_list(&self) -> String {
        self.snapshot().to_string()
    }

    #[cfg(test)]
    pub fn current_track_name(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .current
            .as_ref()
            .map(|track| track.name().to_string())
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.inner.state.lock().tracks.len()
    }

    #[cfg(test)]
    pub fn player_status(&self) -> PlayerStatus {
        self.inner.state.lock().player
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.state.lock().destroyed
    }

    pub async fn handle_player_event(&self, play_id: u64, event: PlayerEvent) {
        match event {
            PlayerEvent::Playing => {
                let mut state = self.inner.state.lock();
                if state.playing_id == Some(play_id) && state.player == PlayerStatus::Buffering {
                    state.player = PlayerStatus::Playing;
                }
            }
            PlayerEvent::Idle => {
                let finished = {
                    let mut state = self.inner.state.lock();
                    if state.playing_id != Some(play_id) {
                        debug!("🔕 Evento idle obsoleto ({}) en la cola {}", play_id, self.destination());
                        return;
                    }
                    state.playing_id = None;
                    state.player = PlayerStatus::Idle;
                    state.current.take()
                };
                self.finish_playback(finished).await;
            }
            PlayerEvent::Error { offset, message } => {
                self.handle_player_error(play_id, offset, message).await;
            }
        }
    }

    /// Error del reproductor: un solo intento de reanudar, después se salta
    async fn handle_player_error(&self, play_id: u64, offset: Duration, message: String) {
        let resume = {
            let mut state = self.inner.state.lock();
            if state.playing_id != Some(play_id) {
                return;
            }
            error!("💥 Error del reproductor en la cola {}: {}", self.destination(), message);

            let Some(mut track) = state.current.take() else {
                return;
            };

            if track.tried_to_replay() {
                info!("⏭️ Saltando {} por error", track.name());
                state.current = Some(track);
                None
            } else {
                track.mark_replayed();
                state.playing_id = None;
                state.player = PlayerStatus::Idle;
                let attempt = state.begin_attempt(track.name());
                Some((attempt, track))
            }
        };

        match resume {
            Some((attempt, track)) => {
                warn!("🔁 Reanudando {} desde {}s", track.name(), offset.as_secs());
                self.inner.player.stop();
                if self.run_attempt(attempt, track, offset).await == AttemptOutcome::Failed {
                    self.finish_playback(None).await;
                }
            }
            None => {
                {
                    let _playback = self.inner.playback.lock().await;
                    {
                        let mut state = self.inner.state.lock();
                        if state.playing_id != Some(play_id) {
                            return;
                        }
                        state.playing_id = None;
                        state.player = PlayerStatus::Idle;
                        state.current = None;
                    }
                    self.inner.player.stop();
                }
                // Una canción que no se puede reproducir no se repite
                self.finish_playback(None).await;
            }
        }
    }

    /// Cierre de una reproducción: temporizador, repetición y avance
    async fn finish_playback(&self, finished: Option<Track>) {
        {
            let mut state = self.inner.state.lock();
            if state.is_shutting_down() {
                return;
            }

            if let Some(track) = &finished {
                info!(
                    "✅ Reproducida {} en la cola {}, largo actual {}",
                    track.name(),
                    self.destination(),
                    state.tracks.len()
                );
            }

            self.arm_disconnect_timer(&mut state);

            if state.repeat_track {
                if let Some(mut track) = finished {
                    track.reset_replay();
                    info!("🔂 Repitiendo {} en la cola {}", track.name(), self.destination());
                    state.tracks.push_front(track);
                }
            }
        }

        self.process_queue().await;
    }

    /// Avanza la cola: saca la primera canción y la reproduce.
    ///
    /// No hace nada si hay un avance en curso, si el reproductor no está
    /// ocioso o si no quedan canciones. Las canciones que fallan se descartan
    /// y se prueba la siguiente.
    pub(super) async fn process_queue(&self) {
        let mut failures = 0usize;

        loop {
            let (attempt, track) = {
                let mut state = self.inner.state.lock();
                if state.is_shutting_down() || state.in_flight.is_some() || !state.player.is_idle() {
                    return;
                }

                let Some(track) = state.tracks.pop_front() else {
                    if failures > 0 {
                        self.arm_disconnect_timer(&mut state);
                    }
                    return;
                };

                let attempt = state.begin_attempt(track.name());
                (attempt, track)
            };

            match self.run_attempt(attempt, track, Duration::ZERO).await {
                AttemptOutcome::Failed => failures += 1,
                AttemptOutcome::Started | AttemptOutcome::Discarded => return,
            }
        }
    }

    /// Resuelve y reproduce una canción que ya ocupa el hueco de avance
    pub(super) async fn run_attempt(&self, attempt: u64, mut track: Track, offset: Duration) -> AttemptOutcome {
        let name = track.name().to_string();
        let provider = self.inner.provider.clone();
        let produced = track.produce_stream(provider.as_ref(), offset).await;

        let _playback = self.inner.playback.lock().await;

        let stream = {
            let mut state = self.inner.state.lock();
            if state.in_flight.as_ref().map(|flight| flight.attempt) != Some(attempt) {
                debug!("🗑️ Descartando resultado obsoleto de {} en la cola {}", name, self.destination());
                return AttemptOutcome::Discarded;
            }
            state.in_flight = None;

            match produced {
                Ok(stream) => {
                    state.current = Some(track);
                    state.playing_id = Some(attempt);
                    state.player = PlayerStatus::Buffering;
                    Self::cancel_disconnect_timer(&mut state);
                    stream
                }
                Err(e) => {
                    warn!("❌ No se pudo reproducir {}: {}", name, e);
                    return AttemptOutcome::Failed;
                }
            }
        };

        info!("🎵 Reproduciendo {} en la cola {}", name, self.destination());
        self.notifier().send(&format!("🎶 Reproduciendo **{}**", name));

        if let Err(e) = self.inner.player.play(stream, attempt).await {
            error!("❌ El reproductor rechazó {}: {}", name, e);
            let mut state = self.inner.state.lock();
            if state.playing_id == Some(attempt) {
                state.current = None;
                state.playing_id = None;
                state.player = PlayerStatus::Idle;
            }
            return AttemptOutcome::Failed;
        }

        // La cola pudo destruirse mientras se iniciaba el audio
        let superseded = self.inner.state.lock().playing_id != Some(attempt);
        if superseded {
            debug!("🛑 {} ya no corresponde, deteniendo", name);
            self.inner.player.stop();
        }

        AttemptOutcome::Started
    }

    /// (Re)inicia el temporizador de auto-desconexión
    pub(super) fn arm_disconnect_timer(&self, state: &mut QueueState) {
        Self::cancel_disconnect_timer(state);
        if state.is_shutting_down() {
            return;
        }

        let token = CancellationToken::new();
        state.disconnect_timer = Some(token.clone());

        let weak = self.downgrade();
        let timeout = self.inner.settings.disconnect_timeout;
        debug!("⏲️ Auto-desconexión de {} en {:?}", self.destination(), timeout);

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    if let Some(queue) = weak.upgrade() {
                        queue.on_disconnect_timeout(&token).await;
                    }
                }
            }
        });
    }

    pub(super) fn cancel_disconnect_timer(state: &mut QueueState) {
        if let Some(token) = state.disconnect_timer.take() {
            token.cancel();
        }
    }

    async fn on_disconnect_timeout(&self, token: &CancellationToken) {
        {
            let mut state = self.inner.state.lock();
            if token.is_cancelled() || state.is_shutting_down() {
                return;
            }
            state.disconnect_timer = None;
            state.destroying = true;
        }

        info!("👋 Cola {} inactiva, saliendo del canal", self.destination());
        self.inner.connection.disconnect().await;
        self.finalize_destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        backend::{AudioStream, ConnectionEvent, MockNotifier},
        testing::{harness, harness_with, settle, Harness},
    };
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|name| name.to_string()).collect()
    }

    #[tokio::test]
    async fn test_tracks_play_in_insertion_order() {
        let Harness { queue, player, .. } = harness();

        queue.enqueue(Track::search("A")).await;
        queue.enqueue(Track::search("B")).await;
        queue.enqueue(Track::search("C")).await;
        assert_eq!(player.played(), names(&["A"]));
        assert_eq!(queue.current_track_name().as_deref(), Some("A"));
        assert_eq!(queue.pending_len(), 2);

        player.finish_current(&queue).await;
        assert_eq!(queue.current_track_name().as_deref(), Some("B"));

        player.finish_current(&queue).await;
        player.finish_current(&queue).await;
        assert_eq!(player.played(), names(&["A", "B", "C"]));
        assert_eq!(queue.current_track_name(), None);
        assert_eq!(queue.player_status(), PlayerStatus::Idle);
        assert_eq!(queue.tracks_list(), NO_TRACKS);
    }

    #[tokio::test]
    async fn test_failing_track_is_skipped() {
        let Harness { queue, player, provider, .. } = harness();
        provider.fail("A");

        queue
            .enqueue_all(vec![Track::search("A"), Track::search("B")])
            .await;

        assert_eq!(player.played(), names(&["B"]));
        assert_eq!(provider.located(), names(&["A", "B"]));
        assert_eq!(queue.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_skip_counts_interrupted_track() {
        let Harness { queue, player, .. } = harness();
        queue
            .enqueue_all(vec![
                Track::search("A"),
                Track::search("B"),
                Track::search("C"),
                Track::search("D"),
            ])
            .await;

        let skipped = queue.skip_track(2).await;

        assert_eq!(skipped, names(&["A", "B"]));
        assert_eq!(player.played(), names(&["A", "C"]));
        assert_eq!(queue.current_track_name().as_deref(), Some("C"));
        assert_eq!(queue.pending_len(), 1);
        assert_eq!(player.stops(), 1);
    }

    #[tokio::test]
    async fn test_skip_clamps_to_remaining() {
        let Harness { queue, player, .. } = harness();
        queue
            .enqueue_all(vec![Track::search("A"), Track::search("B"), Track::search("C")])
            .await;

        let skipped = queue.skip_track(10).await;

        assert_eq!(skipped, names(&["A", "B", "C"]));
        assert_eq!(player.played(), names(&["A"]));
        assert_eq!(queue.current_track_name(), None);
        assert_eq!(queue.pending_len(), 0);
        assert_eq!(queue.tracks_list(), NO_TRACKS);
    }

    #[tokio::test]
    async fn test_skip_non_positive_count_skips_one() {
        let Harness { queue, player, .. } = harness();
        queue
            .enqueue_all(vec![Track::search("A"), Track::search("B")])
            .await;

        assert_eq!(queue.skip_track(0).await, names(&["A"]));
        assert_eq!(queue.skip_track(-3).await, names(&["B"]));
        assert_eq!(player.played(), names(&["A", "B"]));
        assert!(queue.skip_track(1).await.is_empty());
    }

    #[tokio::test]
    async fn test_skip_does_not_repeat_skipped_track() {
        let Harness { queue, player, .. } = harness();
        queue
            .enqueue_all(vec![Track::search("A"), Track::search("B")])
            .await;
        queue.repeat_current_track();

        queue.skip_track(1).await;

        assert_eq!(player.played(), names(&["A", "B"]));
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn test_skip_count_contract() {
        assert_eq!(skip_count(1, 3), 1);
        assert_eq!(skip_count(0, 3), 1);
        assert_eq!(skip_count(-1, 3), 1);
        assert_eq!(skip_count(5, 3), 3);
        assert_eq!(skip_count(2, 0), 0);
    }

    #[tokio::test]
    async fn test_stop_then_enqueue_starts_fresh() {
        let Harness { queue, player, .. } = harness();
        queue
            .enqueue_all(vec![Track::search("A"), Track::search("B")])
            .await;

        queue.stop().await;
        queue.stop().await;
        assert_eq!(queue.tracks_list(), NO_TRACKS);
        assert_eq!(queue.current_track_name(), None);

        queue.enqueue(Track::search("C")).await;
        assert_eq!(player.played(), names(&["A", "C"]));
        assert_eq!(queue.current_track_name().as_deref(), Some("C"));
        assert_eq!(queue.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_repeat_replays_current_once_more() {
        let Harness { queue, player, .. } = harness();
        queue
            .enqueue_all(vec![Track::search("A"), Track::search("B")])
            .await;

        queue.repeat_current_track();
        assert!(queue.is_repeating());
        player.finish_current(&queue).await;
        assert_eq!(queue.current_track_name().as_deref(), Some("A"));

        queue.cancel_repeating();
        player.finish_current(&queue).await;
        player.finish_current(&queue).await;

        assert_eq!(player.played(), names(&["A", "A", "B"]));
        assert_eq!(queue.current_track_name(), None);
    }

    #[tokio::test]
    async fn test_second_advance_is_rejected_while_resolving() {
        let Harness { queue, player, provider, .. } = harness();
        let release = provider.hold("A");

        let first = queue.clone();
        tokio::spawn(async move { first.enqueue(Track::search("A")).await });
        settle().await;

        queue.enqueue(Track::search("B")).await;
        assert!(player.played().is_empty());
        assert_eq!(queue.snapshot().loading.as_deref(), Some("A"));
        assert_eq!(queue.pending_len(), 1);

        release.notify_one();
        settle().await;

        assert_eq!(player.played(), names(&["A"]));
        assert_eq!(queue.pending_len(), 1);
    }

    #[tokio::test]
    async fn test_stale_resolution_is_discarded_after_stop() {
        let Harness { queue, player, provider, .. } = harness();
        let release = provider.hold("A");

        let first = queue.clone();
        tokio::spawn(async move { first.enqueue(Track::search("A")).await });
        settle().await;

        queue.stop().await;
        queue.enqueue(Track::search("B")).await;
        assert_eq!(player.played(), names(&["B"]));

        release.notify_one();
        settle().await;

        assert_eq!(player.played(), names(&["B"]));
        assert_eq!(queue.current_track_name().as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn test_player_error_resumes_once_then_moves_on() {
        let Harness { queue, player, .. } = harness();
        queue
            .enqueue_all(vec![Track::search("A"), Track::search("B")])
            .await;

        let first = player.last_play_id().unwrap();
        queue
            .handle_player_event(
                first,
                PlayerEvent::Error {
                    offset: Duration::from_millis(42_700),
                    message: "stream cortado".into(),
                },
            )
            .await;

        assert_eq!(player.played(), names(&["A", "A"]));
        assert_eq!(player.offsets().last().copied(), Some(Duration::from_secs(42)));
        assert_eq!(queue.current_track_name().as_deref(), Some("A"));

        let second = player.last_play_id().unwrap();
        queue
            .handle_player_event(
                second,
                PlayerEvent::Error {
                    offset: Duration::from_secs(50),
                    message: "stream cortado otra vez".into(),
                },
            )
            .await;

        assert_eq!(player.played(), names(&["A", "A", "B"]));
        assert_eq!(queue.current_track_name().as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn test_stale_player_events_are_ignored() {
        let Harness { queue, player, .. } = harness();
        queue
            .enqueue_all(vec![Track::search("A"), Track::search("B")])
            .await;
        let first = player.last_play_id().unwrap();

        queue.handle_player_event(first, PlayerEvent::Idle).await;
        queue.handle_player_event(first, PlayerEvent::Idle).await;
        queue
            .handle_player_event(
                first,
                PlayerEvent::Error {
                    offset: Duration::ZERO,
                    message: "tarde".into(),
                },
            )
            .await;

        assert_eq!(player.played(), names(&["A", "B"]));
        assert_eq!(queue.current_track_name().as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn test_pause_blocks_advance_until_unpause() {
        let Harness { queue, player, .. } = harness();
        assert!(!queue.pause().await);

        queue.enqueue(Track::search("A")).await;
        queue
            .handle_player_event(player.last_play_id().unwrap(), PlayerEvent::Playing)
            .await;
        assert_eq!(queue.player_status(), PlayerStatus::Playing);

        assert!(queue.pause().await);
        assert_eq!(queue.player_status(), PlayerStatus::Paused);
        assert!(!queue.pause().await);

        queue.enqueue(Track::search("B")).await;
        assert_eq!(player.played(), names(&["A"]));

        assert!(queue.unpause().await);
        assert!(!queue.unpause().await);
        assert_eq!(queue.player_status(), PlayerStatus::Playing);
    }

    #[tokio::test]
    async fn test_tracks_list_shows_fifteen_and_remainder() {
        let Harness { queue, .. } = harness();
        let tracks = (0..20).map(|i| Track::search(format!("T{}", i))).collect();
        queue.enqueue_all(tracks).await;

        let snapshot = queue.snapshot();
        assert_eq!(snapshot.now_playing.as_deref(), Some("T0"));
        assert_eq!(snapshot.upcoming.len(), QUEUE_PREVIEW_LEN);
        assert_eq!(snapshot.upcoming.first().map(String::as_str), Some("T1"));
        assert_eq!(snapshot.upcoming.last().map(String::as_str), Some("T15"));
        assert_eq!(snapshot.remaining, 4);

        let list = queue.tracks_list();
        assert!(list.starts_with("**Reproduciendo ahora:**\nT0\n**Cola:**\nT1;\n"));
        assert!(list.ends_with("...(y 4 canciones más)"));
    }

    #[tokio::test]
    async fn test_now_playing_is_announced() {
        let mut notifier = MockNotifier::new();
        notifier
            .expect_send()
            .withf(|text: &str| text.contains("Himno"))
            .times(1)
            .return_const(());
        let Harness { queue, .. } = harness_with(notifier, QueueSettings::default());

        queue.enqueue(Track::direct("https://cdn.example.com/himno.mp3", Some("Himno".into()))).await;
    }

    #[tokio::test]
    async fn test_events_are_pumped_in_order() {
        let Harness { queue, player, .. } = harness();
        let (tx, rx) = mpsc::unbounded_channel();
        queue.listen(rx);

        queue
            .enqueue_all(vec![Track::search("A"), Track::search("B")])
            .await;
        let first = player.last_play_id().unwrap();
        tx.send(QueueEvent::Player {
            play_id: first,
            event: PlayerEvent::Playing,
        })
        .unwrap();
        tx.send(QueueEvent::Player {
            play_id: first,
            event: PlayerEvent::Idle,
        })
        .unwrap();
        settle().await;

        assert_eq!(player.played(), names(&["A", "B"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_is_applied_while_next_track_resolves() {
        let Harness { queue, player, provider, connection } = harness();
        let (tx, rx) = mpsc::unbounded_channel();
        queue.listen(rx);

        queue.enqueue(Track::search("A")).await;
        queue.handle_connection_event(ConnectionEvent::Connecting);
        let release = provider.hold("B");
        queue.enqueue(Track::search("B")).await;

        tx.send(QueueEvent::Player {
            play_id: player.last_play_id().unwrap(),
            event: PlayerEvent::Idle,
        })
        .unwrap();
        settle().await;
        assert_eq!(queue.snapshot().loading.as_deref(), Some("B"));

        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(QueueEvent::Connection(ConnectionEvent::Ready)).unwrap();
        settle().await;
        assert_eq!(queue.connection_status(), ConnectionStatus::Ready);

        tokio::time::sleep(Duration::from_secs(30)).await;
        settle().await;
        assert!(!queue.is_destroyed());
        assert_eq!(connection.destroys(), 0);

        release.notify_one();
        settle().await;
        assert_eq!(player.played(), names(&["A", "B"]));
    }

    #[tokio::test]
    async fn test_skip_while_resolving_discards_late_result() {
        let Harness { queue, player, provider, .. } = harness();
        let release = provider.hold("A");

        let first = queue.clone();
        tokio::spawn(async move { first.enqueue(Track::search("A")).await });
        settle().await;
        queue.enqueue(Track::search("B")).await;

        assert_eq!(queue.skip_track(1).await, names(&["A"]));
        assert_eq!(player.played(), names(&["B"]));

        release.notify_one();
        settle().await;

        assert_eq!(player.played(), names(&["B"]));
        assert_eq!(queue.current_track_name().as_deref(), Some("B"));
        assert_eq!(queue.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_repeat_does_not_loop_an_unplayable_track() {
        let Harness { queue, player, .. } = harness();
        queue
            .enqueue_all(vec![Track::search("A"), Track::search("B")])
            .await;
        queue.repeat_current_track();

        for message in ["corte", "corte otra vez"] {
            queue
                .handle_player_event(
                    player.last_play_id().unwrap(),
                    PlayerEvent::Error {
                        offset: Duration::from_secs(10),
                        message: message.into(),
                    },
                )
                .await;
        }

        assert_eq!(player.played(), names(&["A", "A", "B"]));
        assert_eq!(queue.current_track_name().as_deref(), Some("B"));
        assert_eq!(queue.pending_len(), 0);

        // La repetición sigue activa para la siguiente canción
        player.finish_current(&queue).await;
        assert_eq!(player.played(), names(&["A", "A", "B", "B"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_queue_disconnects_after_timeout() {
        let Harness { queue, player, connection, .. } = harness();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        queue.set_destroy_callback(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        queue.enqueue(Track::search("A")).await;
        player.finish_current(&queue).await;

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(connection.disconnects(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(connection.disconnects(), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(queue.is_destroyed());

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_track_cancels_disconnect_timer() {
        let Harness { queue, player, connection, .. } = harness();

        queue.enqueue(Track::search("A")).await;
        player.finish_current(&queue).await;
        tokio::time::sleep(Duration::from_secs(200)).await;

        queue.enqueue(Track::search("B")).await;
        tokio::time::sleep(Duration::from_secs(400)).await;
        settle().await;

        assert_eq!(connection.disconnects(), 0);
        assert!(!queue.is_destroyed());
        assert_eq!(queue.current_track_name().as_deref(), Some("B"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unplayable_queue_still_times_out() {
        let settings = QueueSettings {
            disconnect_timeout: Duration::from_secs(10),
            ..QueueSettings::default()
        };
        let Harness { queue, player, provider, connection } =
            harness_with(MockNotifier::quiet(), settings);
        provider.fail("A");

        queue.enqueue(Track::search("A")).await;
        assert!(player.played().is_empty());

        tokio::time::sleep(Duration::from_secs(11)).await;
        settle().await;
        assert_eq!(connection.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_detached_stream_reports_offset() {
        let stream = AudioStream::detached("loc:A", Duration::from_secs(3));
        assert_eq!(stream.locator(), "loc:A");
        assert_eq!(stream.offset(), Duration::from_secs(3));
        assert!(stream.into_input().is_none());
    }
}

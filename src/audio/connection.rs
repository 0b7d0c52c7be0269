//! Voice connection supervision for a [`PlaybackQueue`].
//!
//! Transport events arrive through [`PlaybackQueue::handle_connection_event`],
//! which never blocks: waits and rejoins run on their own tasks and report
//! back through the queue's status channel.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    backend::{ConnectionEvent, ConnectionStatus, PlayerStatus},
    queue::PlaybackQueue,
};

impl PlaybackQueue {
    /// Se une al canal de voz y espera a que la conexión quede lista
    pub async fn connect(&self) {
        self.handle_connection_event(ConnectionEvent::Signalling);

        if let Err(e) = self.inner.connection.join().await {
            // La espera de conexión decide si la cola sobrevive
            warn!("⚠️ No se pudo unir al canal {}: {}", self.destination(), e);
        }
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    pub fn handle_connection_event(&self, event: ConnectionEvent) {
        let mut state = self.inner.state.lock();
        if state.is_shutting_down() {
            debug!("🔕 Evento {:?} ignorado, cola {} destruida", event, self.destination());
            return;
        }

        match event {
            ConnectionEvent::Signalling | ConnectionEvent::Connecting => {
                let status = if event == ConnectionEvent::Signalling {
                    ConnectionStatus::Signalling
                } else {
                    ConnectionStatus::Connecting
                };
                self.inner.status.send_replace(status);
                cancel(&mut state.takeover_wait);

                if state.ready_wait.is_none() {
                    let token = CancellationToken::new();
                    state.ready_wait = Some(token.clone());
                    drop(state);
                    self.spawn_watchdog(token, self.inner.settings.ready_timeout, "no quedó lista");
                }
            }
            ConnectionEvent::Ready => {
                self.inner.status.send_replace(ConnectionStatus::Ready);
                cancel(&mut state.ready_wait);
                cancel(&mut state.takeover_wait);
                state.rejoin_attempts = 0;
                info!("🔊 Conexión de {} lista", self.destination());
            }
            ConnectionEvent::Disconnected(reason) => {
                self.inner.status.send_replace(ConnectionStatus::Disconnected);

                if reason.is_session_takeover() {
                    warn!("🔀 Otra sesión tomó la conexión de {}", self.destination());
                    cancel(&mut state.takeover_wait);
                    let token = CancellationToken::new();
                    state.takeover_wait = Some(token.clone());
                    drop(state);
                    self.spawn_watchdog(token, self.inner.settings.takeover_timeout, "no se recuperó");
                } else if state.rejoin_attempts < self.inner.settings.max_rejoin_attempts {
                    let attempt = state.rejoin_attempts;
                    state.rejoin_attempts += 1;
                    drop(state);
                    warn!("🔌 Conexión de {} perdida: {:?}", self.destination(), reason);
                    self.spawn_rejoin(attempt);
                } else {
                    drop(state);
                    error!(
                        "❌ Conexión de {} perdida tras {} reintentos, destruyendo",
                        self.destination(),
                        self.inner.settings.max_rejoin_attempts
                    );
                    let queue = self.clone();
                    tokio::spawn(async move { queue.destroy().await });
                }
            }
            ConnectionEvent::Destroyed => {
                drop(state);
                self.finalize_destroy();
            }
        }
    }

    /// Destruye la cola si `token` no se cancela antes de `timeout`
    fn spawn_watchdog(&self, token: CancellationToken, timeout: Duration, reason: &'static str) {
        let weak = self.downgrade();

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    let Some(queue) = weak.upgrade() else {
                        return;
                    };
                    if token.is_cancelled() || queue.is_destroyed() {
                        return;
                    }
                    warn!("⏰ La conexión de {} {} en {:?}", queue.destination(), reason, timeout);
                    queue.destroy().await;
                }
            }
        });
    }

    fn spawn_rejoin(&self, attempt: u32) {
        let queue = self.clone();
        let delay = self.inner.settings.rejoin_backoff * (attempt + 1);
        info!(
            "🔄 Reintento {}/{} de {} en {:?}",
            attempt + 1,
            self.inner.settings.max_rejoin_attempts,
            self.destination(),
            delay
        );

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            if queue.connection_status() != ConnectionStatus::Disconnected {
                debug!("🔕 Reintento de {} innecesario", queue.destination());
                return;
            }

            queue.handle_connection_event(ConnectionEvent::Connecting);
            if let Err(e) = queue.inner.connection.rejoin().await {
                warn!("⚠️ Reintento de {} fallido: {}", queue.destination(), e);
            }
        });
    }

    /// Libera la conexión y la cola. Idempotente.
    pub async fn destroy(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.is_shutting_down() {
                return;
            }
            state.destroying = true;
        }

        warn!("💥 Destruyendo la conexión de {}", self.destination());
        self.inner.connection.destroy().await;
        self.finalize_destroy();
    }

    /// Deja la cola en estado terminal e invoca el callback una sola vez
    pub(super) fn finalize_destroy(&self) {
        let (callback, was_active) = {
            let mut state = self.inner.state.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.destroying = false;
            state.tracks.clear();
            let was_active = state.current.take().is_some() | state.in_flight.take().is_some();
            state.playing_id = None;
            state.player = PlayerStatus::Idle;
            Self::cancel_disconnect_timer(&mut state);
            cancel(&mut state.ready_wait);
            cancel(&mut state.takeover_wait);
            (state.destroy_callback.take(), was_active)
        };

        self.inner.status.send_replace(ConnectionStatus::Destroyed);
        if was_active {
            self.inner.player.stop();
        }
        info!("🪦 Cola {} destruida", self.destination());

        if let Some(callback) = callback {
            callback();
        }
    }
}

fn cancel(slot: &mut Option<CancellationToken>) {
    if let Some(token) = slot.take() {
        token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use crate::audio::{
        backend::{ConnectionEvent, ConnectionStatus, DisconnectReason},
        testing::{harness, settle, Harness},
        track::Track,
    };
    use pretty_assertions::assert_eq;
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    fn lost() -> ConnectionEvent {
        ConnectionEvent::Disconnected(DisconnectReason::Transport("timeout".into()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_times_out_without_ready() {
        let Harness { queue, connection, .. } = harness();

        queue.connect().await;
        assert_eq!(connection.joins(), 1);
        assert_eq!(queue.connection_status(), ConnectionStatus::Signalling);

        tokio::time::sleep(Duration::from_secs(21)).await;
        settle().await;

        assert!(queue.is_destroyed());
        assert_eq!(connection.destroys(), 1);
        assert_eq!(queue.connection_status(), ConnectionStatus::Destroyed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_in_time_keeps_queue() {
        let Harness { queue, connection, .. } = harness();

        queue.connect().await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        queue.handle_connection_event(ConnectionEvent::Ready);
        tokio::time::sleep(Duration::from_secs(30)).await;
        settle().await;

        assert!(!queue.is_destroyed());
        assert_eq!(connection.destroys(), 0);
        assert_eq!(queue.connection_status(), ConnectionStatus::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoin_uses_linear_backoff() {
        let Harness { queue, connection, .. } = harness();
        queue.handle_connection_event(ConnectionEvent::Ready);

        queue.handle_connection_event(lost());
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(connection.rejoins(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(connection.rejoins(), 1);
        assert_eq!(queue.connection_status(), ConnectionStatus::Connecting);

        queue.handle_connection_event(lost());
        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(connection.rejoins(), 1);
        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(connection.rejoins(), 2);

        // Ready reinicia el contador
        queue.handle_connection_event(ConnectionEvent::Ready);
        queue.handle_connection_event(lost());
        tokio::time::sleep(Duration::from_secs(6)).await;
        settle().await;
        assert_eq!(connection.rejoins(), 3);
        assert!(!queue.is_destroyed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoin_skipped_when_connection_recovers() {
        let Harness { queue, connection, .. } = harness();

        queue.handle_connection_event(lost());
        queue.handle_connection_event(ConnectionEvent::Ready);
        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;

        assert_eq!(connection.rejoins(), 0);
        assert_eq!(queue.connection_status(), ConnectionStatus::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_too_many_disconnects_destroy_once() {
        let Harness { queue, connection, .. } = harness();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        queue.set_destroy_callback(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        for _ in 0..6 {
            queue.handle_connection_event(lost());
        }
        settle().await;

        assert!(queue.is_destroyed());
        assert_eq!(connection.destroys(), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Los reintentos pendientes ya no hacen nada
        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(connection.rejoins(), 0);
        assert_eq!(connection.destroys(), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_takeover_without_recovery_destroys() {
        let Harness { queue, connection, .. } = harness();
        queue.handle_connection_event(ConnectionEvent::Ready);

        queue.handle_connection_event(ConnectionEvent::Disconnected(
            DisconnectReason::WebSocketClose(Some(4014)),
        ));
        tokio::time::sleep(Duration::from_secs(6)).await;
        settle().await;

        assert!(queue.is_destroyed());
        assert_eq!(connection.destroys(), 1);
        assert_eq!(connection.rejoins(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_takeover_with_recovery_survives() {
        let Harness { queue, connection, .. } = harness();
        queue.handle_connection_event(ConnectionEvent::Ready);

        queue.handle_connection_event(ConnectionEvent::Disconnected(
            DisconnectReason::WebSocketClose(Some(4014)),
        ));
        tokio::time::sleep(Duration::from_secs(2)).await;
        queue.handle_connection_event(ConnectionEvent::Connecting);
        queue.handle_connection_event(ConnectionEvent::Ready);
        tokio::time::sleep(Duration::from_secs(30)).await;
        settle().await;

        assert!(!queue.is_destroyed());
        assert_eq!(connection.destroys(), 0);
    }

    #[tokio::test]
    async fn test_transport_destroyed_clears_queue() {
        let Harness { queue, player, connection, .. } = harness();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        queue.set_destroy_callback(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        queue
            .enqueue_all(vec![Track::search("A"), Track::search("B")])
            .await;

        queue.handle_connection_event(ConnectionEvent::Destroyed);
        queue.handle_connection_event(ConnectionEvent::Destroyed);
        queue.destroy().await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(player.stops(), 1);
        assert_eq!(connection.destroys(), 0);
        assert_eq!(queue.tracks_list(), crate::audio::queue::NO_TRACKS);

        queue.enqueue(Track::search("C")).await;
        queue.handle_connection_event(ConnectionEvent::Ready);
        assert_eq!(player.played(), vec!["A".to_string()]);
        assert_eq!(queue.connection_status(), ConnectionStatus::Destroyed);
    }

    #[tokio::test]
    async fn test_destroy_callback_after_destruction_runs_immediately() {
        let Harness { queue, .. } = harness();
        queue.destroy().await;

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        queue.set_destroy_callback(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}

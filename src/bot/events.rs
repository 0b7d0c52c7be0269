use serenity::async_trait;
use songbird::{
    events::context_data::DisconnectReason as DriverDisconnectReason,
    model::CloseCode,
    CoreEvent, Event as VoiceEvent, EventContext, EventHandler as VoiceEventHandler,
};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::audio::backend::{
    ConnectionEvent, DisconnectReason, QueueEvent, SESSION_TAKEOVER_CLOSE_CODE,
};

/// Traduce los eventos del driver de voz a eventos de conexión de la cola
pub struct DriverEventForwarder {
    pub events: UnboundedSender<QueueEvent>,
}

#[async_trait]
impl VoiceEventHandler for DriverEventForwarder {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        let event = match ctx {
            EventContext::DriverConnect(_) | EventContext::DriverReconnect(_) => ConnectionEvent::Ready,
            EventContext::DriverDisconnect(data) => match &data.reason {
                Some(reason) => ConnectionEvent::Disconnected(disconnect_reason(reason)),
                None => {
                    // Salida pedida por nosotros mismos
                    debug!("🔌 Desconexión solicitada en guild {}", data.guild_id.0);
                    return None;
                }
            },
            _ => return None,
        };

        if self.events.send(QueueEvent::Connection(event)).is_err() {
            debug!("🔇 Cola cerrada, evento de conexión descartado");
        }
        None
    }
}

fn disconnect_reason(reason: &DriverDisconnectReason) -> DisconnectReason {
    match reason {
        DriverDisconnectReason::WsClosed(Some(CloseCode::Disconnected)) => {
            DisconnectReason::WebSocketClose(Some(SESSION_TAKEOVER_CLOSE_CODE))
        }
        DriverDisconnectReason::WsClosed(_) => DisconnectReason::WebSocketClose(None),
        other => DisconnectReason::Transport(format!("{:?}", other)),
    }
}

/// Registra los eventos del driver que necesita la cola de este `Call`
pub fn register_voice_events(handler: &mut songbird::Call, events: UnboundedSender<QueueEvent>) {
    for event in [
        CoreEvent::DriverConnect,
        CoreEvent::DriverReconnect,
        CoreEvent::DriverDisconnect,
    ] {
        handler.add_global_event(
            VoiceEvent::Core(event),
            DriverEventForwarder {
                events: events.clone(),
            },
        );
    }
}

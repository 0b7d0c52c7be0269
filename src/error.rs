use thiserror::Error;

/// Errores del motor de reproducción.
///
/// Ninguno de ellos llega al usuario como tal: la cola los registra y
/// degrada a "probar la siguiente canción" o "limpiar y desaparecer".
#[derive(Debug, Error)]
pub enum MusicError {
    /// La búsqueda no devolvió ninguna coincidencia
    #[error("sin resultados para \"{0}\"")]
    Resolution(String),

    /// La fuente existe pero no se puede reproducir
    #[error("no se pudo abrir el stream {locator}: {reason}")]
    StreamOpen { locator: String, reason: String },

    /// Fallo del reproductor a mitad de la canción
    #[error("error del reproductor: {0}")]
    Player(String),

    /// Caída transitoria de la conexión de voz
    #[error("conexión de voz perdida: {0}")]
    ConnectionLost(String),

    /// La conexión de voz ya no existe
    #[error("la conexión de voz fue destruida")]
    ConnectionDestroyed,

    /// Todas las API keys configuradas fueron rechazadas
    #[error("todas las API keys están agotadas")]
    CredentialsExhausted,
}

impl MusicError {
    pub fn stream_open(locator: impl Into<String>, reason: impl ToString) -> Self {
        Self::StreamOpen {
            locator: locator.into(),
            reason: reason.to_string(),
        }
    }
}

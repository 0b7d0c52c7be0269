use parking_lot::Mutex;
use tracing::{info, warn};

/// Ordered API keys with explicit rotation.
///
/// A key is only retired by the caller that saw it fail. Several requests
/// failing with the same key advance the rotation once.
#[derive(Debug)]
pub struct KeyRotation {
    keys: Vec<String>,
    index: Mutex<usize>,
}

impl KeyRotation {
    pub fn new(keys: Vec<String>) -> Self {
        if keys.is_empty() {
            warn!("🔑 No hay API keys configuradas, las búsquedas fallarán");
        }

        Self {
            keys,
            index: Mutex::new(0),
        }
    }

    /// Key en uso, o `None` si ya no quedan
    pub fn current(&self) -> Option<String> {
        self.keys.get(*self.index.lock()).cloned()
    }

    /// Retira `failed` si sigue siendo la key en uso y devuelve la siguiente
    pub fn advance_from(&self, failed: &str) -> Option<String> {
        let mut index = self.index.lock();

        if self.keys.get(*index).is_some_and(|key| key == failed) {
            *index += 1;
            match self.keys.get(*index) {
                Some(_) => info!("🔑 API key rotada ({}/{})", *index + 1, self.keys.len()),
                None => warn!("🔑 Todas las API keys están agotadas"),
            }
        }

        self.keys.get(*index).cloned()
    }

    #[cfg(test)]
    pub fn is_exhausted(&self) -> bool {
        *self.index.lock() >= self.keys.len()
    }
}

use std::time::Duration;
use tracing::debug;

use super::backend::{AudioStream, StreamProvider};
use crate::error::MusicError;

/// Canción que todavía hay que buscar por nombre
#[derive(Debug, Clone, PartialEq)]
pub struct SearchTrack {
    name: String,
    locator: Option<String>,
    tried_to_replay: bool,
}

/// Canción ya ligada a una fuente concreta
#[derive(Debug, Clone, PartialEq)]
pub struct DirectTrack {
    locator: String,
    name: Option<String>,
    tried_to_replay: bool,
}

/// A piece of music that can eventually become audio.
///
/// Tracks never retry on their own; the playback queue decides whether a
/// failed track is resumed, skipped or replayed.
#[derive(Debug, Clone, PartialEq)]
pub enum Track {
    Search(SearchTrack),
    Direct(DirectTrack),
}

impl Track {
    pub fn search(name: impl Into<String>) -> Self {
        Track::Search(SearchTrack {
            name: name.into(),
            locator: None,
            tried_to_replay: false,
        })
    }

    pub fn direct(locator: impl Into<String>, name: Option<String>) -> Self {
        Track::Direct(DirectTrack {
            locator: locator.into(),
            name,
            tried_to_replay: false,
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Track::Search(track) => &track.name,
            Track::Direct(track) => track.name.as_deref().unwrap_or(&track.locator),
        }
    }

    /// Locator ya conocido (resuelto o directo)
    #[cfg(test)]
    pub fn locator(&self) -> Option<&str> {
        match self {
            Track::Search(track) => track.locator.as_deref(),
            Track::Direct(track) => Some(&track.locator),
        }
    }

    pub fn tried_to_replay(&self) -> bool {
        match self {
            Track::Search(track) => track.tried_to_replay,
            Track::Direct(track) => track.tried_to_replay,
        }
    }

    pub fn mark_replayed(&mut self) {
        match self {
            Track::Search(track) => track.tried_to_replay = true,
            Track::Direct(track) => track.tried_to_replay = true,
        }
    }

    /// Una repetición cuenta como un intento nuevo
    pub fn reset_replay(&mut self) {
        match self {
            Track::Search(track) => track.tried_to_replay = false,
            Track::Direct(track) => track.tried_to_replay = false,
        }
    }

    /// Produces a playable stream starting at `offset`.
    ///
    /// The offset is truncated to whole seconds. A search track resolves its
    /// name the first time and keeps the locator for later attempts.
    pub async fn produce_stream(
        &mut self,
        provider: &dyn StreamProvider,
        offset: Duration,
    ) -> Result<AudioStream, MusicError> {
        let offset = Duration::from_secs(offset.as_secs());

        match self {
            Track::Search(track) => {
                let locator = match &track.locator {
                    Some(locator) => locator.clone(),
                    None => {
                        let locator = provider.locate(&track.name).await?;
                        debug!("🔎 \"{}\" resuelto a {}", track.name, locator);
                        track.locator = Some(locator.clone());
                        locator
                    }
                };
                provider.open(&locator, offset).await
            }
            Track::Direct(track) => provider.open(&track.locator, offset).await,
        }
    }
}

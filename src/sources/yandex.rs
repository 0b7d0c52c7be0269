use anyhow::Result;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use tracing::{debug, error, info};

const YANDEX_BASE_URL: &str = "https://music.yandex.ru";

static PLAYLIST_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://music\.yandex\.ru/users/([^/]*)/playlists/([0-9]*)$")
        .expect("Regex de playlist de Yandex inválida")
});

#[derive(Debug, Deserialize)]
struct PlaylistResponse {
    playlist: Playlist,
}

#[derive(Debug, Deserialize)]
struct Playlist {
    #[serde(default)]
    tracks: Vec<YandexTrack>,
}

#[derive(Debug, Deserialize)]
struct YandexTrack {
    title: String,
    #[serde(default)]
    artists: Vec<Artist>,
}

#[derive(Debug, Deserialize)]
struct Artist {
    name: String,
}

impl YandexTrack {
    /// "artista1, artista2 - título", listo para buscar
    fn search_name(&self) -> String {
        let artists: Vec<&str> = self.artists.iter().map(|a| a.name.as_str()).collect();
        format!("{} - {}", artists.join(", "), self.title)
    }
}

/// Playlist pública de Yandex Music
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistRef {
    pub owner: String,
    pub kind: String,
}

/// Reconoce `https://music.yandex.ru/users/<owner>/playlists/<id>`
pub fn parse_playlist_url(url: &str) -> Option<PlaylistRef> {
    let captures = PLAYLIST_URL.captures(url)?;
    let owner = urlencoding::decode(&captures[1]).ok()?.into_owned();

    Some(PlaylistRef {
        owner,
        kind: captures[2].to_string(),
    })
}

pub fn is_yandex_url(url: &str) -> bool {
    url.starts_with(YANDEX_BASE_URL)
}

pub struct YandexMusicClient {
    client: reqwest::Client,
    base_url: String,
}

impl YandexMusicClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: YANDEX_BASE_URL.to_string(),
        }
    }

    #[cfg(test)]
    fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Nombres de búsqueda de las canciones de la playlist, en orden
    pub async fn playlist_tracks(&self, playlist: &PlaylistRef) -> Result<Vec<String>> {
        debug!("🔍 Playlist de Yandex {}/{}", playlist.owner, playlist.kind);

        let response = self
            .client
            .get(format!("{}/handlers/playlist.jsx", self.base_url))
            .query(&[
                ("owner", playlist.owner.as_str()),
                ("kinds", playlist.kind.as_str()),
                ("light", "true"),
                ("lang", "ru"),
                ("external-domain", "music.yandex.ru"),
                ("overembed", "false"),
            ])
            .header("Sec-Fetch-Dest", "empty")
            .header("Sec-Fetch-Mode", "cors")
            .header("Sec-Fetch-Site", "same-origin")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            error!("❌ Yandex Music error: {}", status);
            anyhow::bail!("Yandex Music error: {}", status);
        }

        let body: PlaylistResponse = response.json().await?;
        let names: Vec<String> = body.playlist.tracks.iter().map(YandexTrack::search_name).collect();

        info!("✅ Yandex: {} canciones en {}/{}", names.len(), playlist.owner, playlist.kind);
        Ok(names)
    }
}

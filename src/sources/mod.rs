//! # Sources
//!
//! Turns user queries into [`Track`]s and tracks into playable streams.
//!
//! | Query                                         | Result                               |
//! |-----------------------------------------------|--------------------------------------|
//! | `https://music.yandex.ru/users/<u>/playlists/<id>` | one search track per song ("artists - title") |
//! | YouTube playlist URL                          | direct tracks with their titles      |
//! | YouTube video URL                             | one direct track with its title      |
//! | any other http(s) URL                         | one direct track                     |
//! | free text                                     | one search track                     |
//!
//! Search tracks are resolved lazily through the YouTube Data API v3, rotating
//! API keys when one is rejected.

pub mod credentials;
pub mod direct_url;
pub mod yandex;
pub mod youtube_api_v3;

use anyhow::Result;
use async_trait::async_trait;
use songbird::input::{HttpRequest, Input, YoutubeDl};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    audio::{
        backend::{AudioStream, StreamProvider},
        track::Track,
    },
    config::Config,
    error::MusicError,
};
use credentials::KeyRotation;
use yandex::{PlaylistRef, YandexMusicClient};
use youtube_api_v3::YouTubeAPIv3Client;

/// Títulos que la API usa para videos que ya no se pueden ver
const UNAVAILABLE_TITLES: [&str; 2] = ["Deleted video", "Private video"];

/// Qué pidió el usuario
#[derive(Debug, Clone, PartialEq)]
pub enum QueryKind {
    YandexPlaylist(PlaylistRef),
    YouTubePlaylist(String),
    YouTubeVideo(String),
    DirectUrl(String),
    Search(String),
    /// Enlace de una plataforma conocida que no sabemos leer
    Unsupported,
    Empty,
}

pub fn classify(query: &str) -> QueryKind {
    let query = query.trim();
    if query.is_empty() {
        return QueryKind::Empty;
    }

    if yandex::is_yandex_url(query) {
        return yandex::parse_playlist_url(query)
            .map(QueryKind::YandexPlaylist)
            .unwrap_or(QueryKind::Unsupported);
    }

    match direct_url::parse_http_url(query) {
        Some(url) => youtube_target(&url).unwrap_or_else(|| QueryKind::DirectUrl(query.to_string())),
        None => QueryKind::Search(query.to_string()),
    }
}

fn youtube_host(url: &Url) -> Option<&str> {
    let host = url.host_str()?;
    let host = host
        .strip_prefix("www.")
        .or_else(|| host.strip_prefix("m."))
        .or_else(|| host.strip_prefix("music."))
        .unwrap_or(host);

    matches!(host, "youtube.com" | "youtu.be").then_some(host)
}

fn query_value(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

fn youtube_target(url: &Url) -> Option<QueryKind> {
    match youtube_host(url)? {
        "youtu.be" => url
            .path_segments()?
            .next()
            .filter(|id| !id.is_empty())
            .map(|id| QueryKind::YouTubeVideo(id.to_string())),
        _ => match url.path() {
            "/playlist" => query_value(url, "list").map(QueryKind::YouTubePlaylist),
            "/watch" => query_value(url, "v").map(QueryKind::YouTubeVideo),
            path => path
                .strip_prefix("/shorts/")
                .filter(|id| !id.is_empty())
                .map(|id| QueryKind::YouTubeVideo(id.to_string())),
        },
    }
}

pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}

/// Resolver de consultas y proveedor de streams de las colas
pub struct SourceManager {
    stream_client: reqwest::Client,
    youtube: YouTubeAPIv3Client,
    yandex: YandexMusicClient,
    max_playlist_size: usize,
}

impl SourceManager {
    pub fn new(config: &Config) -> Result<Self> {
        let api_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        // Sin timeout total: los streams duran lo que dura la canción
        let stream_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let keys = Arc::new(KeyRotation::new(config.youtube_api_keys.clone()));

        Ok(Self {
            stream_client,
            youtube: YouTubeAPIv3Client::new(api_client.clone(), keys),
            yandex: YandexMusicClient::new(api_client),
            max_playlist_size: config.max_playlist_size,
        })
    }

    /// Convierte una consulta en canciones; vacío si no hay nada que reproducir.
    ///
    /// Las playlists se piden con un elemento de más para que quien llama
    /// pueda detectar que superan el límite.
    pub async fn resolve(&self, query: &str) -> Result<Vec<Track>> {
        let tracks = match classify(query) {
            QueryKind::Search(text) => vec![Track::search(text)],
            QueryKind::DirectUrl(url) => {
                let name = direct_url::display_name(&url);
                vec![Track::direct(url, name)]
            }
            QueryKind::YouTubeVideo(id) => {
                let title = match self.youtube.video_title(&id).await {
                    Ok(title) => title,
                    Err(e) => {
                        warn!("⚠️ No se pudo obtener el título de {}: {:#}", id, e);
                        None
                    }
                };
                vec![Track::direct(watch_url(&id), title)]
            }
            QueryKind::YouTubePlaylist(id) => self
                .youtube
                .playlist_items(&id, self.max_playlist_size + 1)
                .await?
                .into_iter()
                .filter(|entry| !UNAVAILABLE_TITLES.contains(&entry.title.as_str()))
                .map(|entry| Track::direct(watch_url(&entry.video_id), Some(entry.title)))
                .collect(),
            QueryKind::YandexPlaylist(playlist) => self
                .yandex
                .playlist_tracks(&playlist)
                .await?
                .into_iter()
                .map(Track::search)
                .collect(),
            QueryKind::Unsupported => {
                warn!("⚠️ Enlace no soportado: {}", query);
                Vec::new()
            }
            QueryKind::Empty => Vec::new(),
        };

        info!("🎼 \"{}\" resuelto a {} canciones", query, tracks.len());
        Ok(tracks)
    }
}

#[async_trait]
impl StreamProvider for SourceManager {
    async fn locate(&self, query: &str) -> Result<String, MusicError> {
        match self.youtube.search_first(query).await {
            Ok(Some(video_id)) => Ok(watch_url(&video_id)),
            Ok(None) => Err(MusicError::Resolution(query.to_string())),
            Err(e) => {
                warn!("❌ Búsqueda de \"{}\" falló: {:#}", query, e);
                Err(e
                    .downcast::<MusicError>()
                    .unwrap_or_else(|e| MusicError::Resolution(format!("{}: {}", query, e))))
            }
        }
    }

    async fn open(&self, locator: &str, offset: Duration) -> Result<AudioStream, MusicError> {
        let url = direct_url::parse_http_url(locator)
            .ok_or_else(|| MusicError::stream_open(locator, "no es una URL http(s)"))?;

        let input: Input = if youtube_host(&url).is_some() {
            YoutubeDl::new(self.stream_client.clone(), locator.to_string()).into()
        } else {
            HttpRequest::new(self.stream_client.clone(), locator.to_string()).into()
        };

        debug!("🔗 Stream abierto para {} desde {:?}", locator, offset);
        Ok(AudioStream::new(locator, offset, input))
    }
}

use anyhow::Result;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::credentials::KeyRotation;
use crate::error::MusicError;

const API_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

/// La API no devuelve más de 50 elementos por página
const MAX_PAGE_SIZE: usize = 50;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchItemId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItemId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideosResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
struct VideoItem {
    snippet: VideoSnippet,
}

#[derive(Debug, Deserialize)]
struct VideoSnippet {
    title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistResponse {
    #[serde(default)]
    items: Vec<PlaylistItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    snippet: PlaylistSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistSnippet {
    title: String,
    resource_id: ResourceId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceId {
    video_id: String,
}

/// Video de una playlist
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistEntry {
    pub video_id: String,
    pub title: String,
}

/// Motivo que la API adjunta a sus errores (`quotaExceeded`, `keyInvalid`...)
fn api_error_reason(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let error = value.get("error")?;

    error
        .pointer("/errors/0/reason")
        .or_else(|| error.get("message"))
        .and_then(|reason| reason.as_str())
        .map(str::to_string)
}

/// Cliente de la YouTube Data API v3 que rota las API keys ante un 403
pub struct YouTubeAPIv3Client {
    client: reqwest::Client,
    keys: Arc<KeyRotation>,
    base_url: String,
}

impl YouTubeAPIv3Client {
    pub fn new(client: reqwest::Client, keys: Arc<KeyRotation>) -> Self {
        Self {
            client,
            keys,
            base_url: API_BASE_URL.to_string(),
        }
    }

    #[cfg(test)]
    fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Id del primer video que coincide con `query`
    pub async fn search_first(&self, query: &str) -> Result<Option<String>> {
        debug!("🔍 Búsqueda YouTube API v3: {}", query);

        let response: SearchResponse = self
            .get(
                "search",
                &[
                    ("part", "id".to_string()),
                    ("type", "video".to_string()),
                    ("safeSearch", "none".to_string()),
                    ("maxResults", "5".to_string()),
                    ("q", query.to_string()),
                ],
            )
            .await?;

        Ok(response.items.into_iter().find_map(|item| item.id.video_id))
    }

    pub async fn video_title(&self, video_id: &str) -> Result<Option<String>> {
        let response: VideosResponse = self
            .get(
                "videos",
                &[("part", "snippet".to_string()), ("id", video_id.to_string())],
            )
            .await?;

        Ok(response.items.into_iter().next().map(|video| video.snippet.title))
    }

    /// Hasta `limit` videos de la playlist, paginando si hace falta
    pub async fn playlist_items(&self, playlist_id: &str, limit: usize) -> Result<Vec<PlaylistEntry>> {
        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;

        while entries.len() < limit {
            let page_size = (limit - entries.len()).min(MAX_PAGE_SIZE);
            let mut params = vec![
                ("part", "snippet".to_string()),
                ("playlistId", playlist_id.to_string()),
                ("maxResults", page_size.to_string()),
            ];
            if let Some(token) = &page_token {
                params.push(("pageToken", token.clone()));
            }

            let page: PlaylistResponse = self.get("playlistItems", &params).await?;
            entries.extend(page.items.into_iter().map(|item| PlaylistEntry {
                video_id: item.snippet.resource_id.video_id,
                title: item.snippet.title,
            }));

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        entries.truncate(limit);
        info!("✅ Playlist {}: {} videos", playlist_id, entries.len());
        Ok(entries)
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str, params: &[(&str, String)]) -> Result<T> {
        let url = format!("{}/{}", self.base_url, endpoint);

        loop {
            let key = self.keys.current().ok_or(MusicError::CredentialsExhausted)?;

            let response = self
                .client
                .get(&url)
                .query(params)
                .query(&[("key", &key)])
                .send()
                .await?;

            let status = response.status();
            if status == StatusCode::FORBIDDEN {
                let body = response.text().await.unwrap_or_default();
                warn!(
                    "🔑 API key rechazada por YouTube (403): {}",
                    api_error_reason(&body).unwrap_or_else(|| "sin motivo".to_string())
                );
                if self.keys.advance_from(&key).is_none() {
                    return Err(MusicError::CredentialsExhausted.into());
                }
                continue;
            }

            if !status.is_success() {
                let error_text = response.text().await.unwrap_or_default();
                error!("❌ YouTube API error: {} - {}", status, error_text);
                anyhow::bail!("YouTube API error: {} - {}", status, error_text);
            }

            return Ok(response.json().await?);
        }
    }
}

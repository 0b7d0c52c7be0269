use url::Url;

/// URL http(s) válida
pub fn parse_http_url(text: &str) -> Option<Url> {
    let url = Url::parse(text.trim()).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}

/// Nombre legible de un enlace directo: el último segmento de la ruta
pub fn display_name(url: &str) -> Option<String> {
    let url = parse_http_url(url)?;
    let segment = url.path_segments()?.filter(|s| !s.is_empty()).last()?;

    Some(
        urlencoding::decode(segment)
            .map(|name| name.into_owned())
            .unwrap_or_else(|_| segment.to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_only_http_schemes() {
        assert!(parse_http_url("https://cdn.example.com/a.mp3").is_some());
        assert!(parse_http_url("http://radio.example.com:8000/stream").is_some());
        assert!(parse_http_url("ftp://example.com/a.mp3").is_none());
        assert!(parse_http_url("daft punk").is_none());
    }

    #[test]
    fn test_display_name_uses_last_segment() {
        assert_eq!(
            display_name("https://cdn.example.com/music/Mi%20Canci%C3%B3n.mp3").as_deref(),
            Some("Mi Canción.mp3")
        );
        assert_eq!(
            display_name("https://radio.example.com/live/").as_deref(),
            Some("live")
        );
        assert_eq!(display_name("https://radio.example.com"), None);
    }
}

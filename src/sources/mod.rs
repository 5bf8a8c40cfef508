pub mod ytdlp;

use url::Url;

pub use ytdlp::YtDlpResolver;

/// Entrada resuelta y lista para reproducir.
///
/// Inmutable una vez construida: título, URL canónica de la página,
/// URL directa del stream de audio y pistas de contenedor/códec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntry {
    title: String,
    page_url: String,
    stream_url: String,
    container: String,
    codec: String,
}

impl ResolvedEntry {
    pub fn new(
        title: String,
        page_url: String,
        stream_url: String,
        container: String,
        codec: String,
    ) -> Self {
        Self {
            title,
            page_url,
            stream_url,
            container,
            codec,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    #[allow(dead_code)]
    pub fn page_url(&self) -> &str {
        &self.page_url
    }

    pub fn stream_url(&self) -> &str {
        &self.stream_url
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    #[allow(dead_code)]
    pub fn codec(&self) -> &str {
        &self.codec
    }

    /// Verifica que el stream tenga un esquema HTTP reproducible.
    pub fn has_playable_stream(&self) -> bool {
        is_http_url(&self.stream_url)
    }
}

/// Evento incremental de una resolución en curso.
///
/// El canal se cierra cuando el proceso resolutor termina; `NoEntries`
/// distingue "no se encontró nada" de "todavía están llegando".
#[derive(Debug, Clone)]
pub enum Resolution {
    Entry {
        entry: ResolvedEntry,
        is_first: bool,
        playlist_title: Option<String>,
    },
    NoEntries,
}

/// Verifica que una URL use esquema http o https.
pub fn is_http_url(raw: &str) -> bool {
    match Url::parse(raw) {
        Ok(url) => matches!(url.scheme(), "http" | "https"),
        Err(_) => false,
    }
}

/// Detecta si la consulta apunta a una playlist (parámetro `list` en la URL).
///
/// Es un criterio puramente sintáctico sobre la consulta del usuario;
/// sólo afecta a los mensajes, nunca al encolado.
pub fn is_playlist_query(query: &str) -> bool {
    match Url::parse(query) {
        Ok(url) => {
            matches!(url.scheme(), "http" | "https")
                && url.query_pairs().any(|(key, _)| key == "list")
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_http_url() {
        assert!(is_http_url("https://cdn.example.com/audio.webm?x=1"));
        assert!(is_http_url("http://example.com/a"));
        assert!(!is_http_url("not-a-url"));
        assert!(!is_http_url("ftp://example.com/a"));
        assert!(!is_http_url(""));
    }

    #[test]
    fn test_playable_stream_check() {
        let good = ResolvedEntry::new(
            "Canción".into(),
            "https://youtube.com/watch?v=abc".into(),
            "https://cdn.example.com/abc.webm".into(),
            "webm".into(),
            "opus".into(),
        );
        assert!(good.has_playable_stream());

        let bad = ResolvedEntry::new(
            "Canción".into(),
            "https://youtube.com/watch?v=abc".into(),
            "not-a-url".into(),
            "webm".into(),
            "opus".into(),
        );
        assert!(!bad.has_playable_stream());
    }

    #[test]
    fn test_playlist_query_detection() {
        assert!(is_playlist_query(
            "https://www.youtube.com/watch?v=abc&list=PL123"
        ));
        assert!(is_playlist_query(
            "https://www.youtube.com/playlist?list=PL123"
        ));
        assert!(!is_playlist_query("https://www.youtube.com/watch?v=abc"));
        // Un término de búsqueda nunca es playlist aunque contenga "list="
        assert!(!is_playlist_query("mi list= favorita"));
    }
}

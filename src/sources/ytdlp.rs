use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use super::{is_http_url, ResolvedEntry, Resolution};

/// Marcador con el que el resolutor prefija cada entrada imprimible.
const ENTRY_MARKER: &str = "ENTRY=";
/// Separador entre campos de una entrada.
const FIELD_SEPARATOR: &str = "|||";
/// Separador clave-valor dentro de un campo.
const KEY_VALUE_SEPARATOR: &str = "->";
/// Tope duro de entradas aceptadas por resolución; el resto se ignora.
const MAX_ENTRIES: usize = 25;
/// Valor centinela de yt-dlp para campos sin dato.
const MISSING_FIELD: &str = "NA";

/// Plantilla de --print: una línea por entrada con todos los campos que
/// necesita la reproducción.
const PRINT_TEMPLATE: &str = "ENTRY=TITLE->%(title)s|||VIDEO_URL->%(webpage_url)s|||AUDIO_URL->%(url)s|||EXT->%(ext)s|||ACODEC->%(acodec)s|||PLAYLIST->%(playlist_title)s";

/// Adaptador sobre el proceso yt-dlp que entrega entradas de forma
/// incremental: cada línea parseada se emite en cuanto llega, sin esperar
/// a que el proceso termine.
#[derive(Clone)]
pub struct YtDlpResolver {
    binary: String,
}

impl YtDlpResolver {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Resuelve una consulta en una secuencia perezosa de entradas.
    ///
    /// El canal devuelto entrega `Resolution::Entry` por cada entrada
    /// aceptada y un único `Resolution::NoEntries` si no hubo ninguna
    /// (incluidos los fallos del proceso); se cierra al terminar.
    pub fn resolve(&self, query: &str) -> flume::Receiver<Resolution> {
        let (tx, rx) = flume::unbounded();
        let binary = self.binary.clone();
        let target = normalize_query(query);

        tokio::spawn(async move {
            if let Err(e) = run_resolution(&binary, &target, &tx).await {
                warn!("⚠️ Resolución fallida para \"{}\": {:#}", target, e);
                let _ = tx.send(Resolution::NoEntries);
            }
        });

        rx
    }
}

/// Una URL se resuelve tal cual; cualquier otra cosa pasa por búsqueda.
fn normalize_query(query: &str) -> String {
    if query.starts_with("http") {
        query.to_string()
    } else {
        format!("ytsearch:{query}")
    }
}

async fn run_resolution(
    binary: &str,
    target: &str,
    tx: &flume::Sender<Resolution>,
) -> Result<()> {
    let mut child = tokio::process::Command::new(binary)
        .args(["-f", "bestaudio", "--print", PRINT_TEMPLATE, target])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("no se pudo lanzar {binary}"))?;

    let stdout = child
        .stdout
        .take()
        .context("el resolutor no expuso stdout")?;

    // stderr es sólo diagnóstico, nunca control
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("yt-dlp stderr: {}", line.trim());
            }
        });
    }

    let mut parser = EntryParser::new();
    let mut lines = BufReader::new(stdout).lines();
    while let Some(line) = lines.next_line().await? {
        if let Some(event) = parser.feed_line(&line) {
            // El receptor puede haberse ido (stop); seguimos drenando stdout
            let _ = tx.send(event);
        }
    }

    let status = child.wait().await?;
    debug!(
        "Resolutor terminó con {} ({} entradas aceptadas)",
        status,
        parser.accepted()
    );

    if let Some(event) = parser.finish() {
        let _ = tx.send(event);
    }

    Ok(())
}

/// Parser incremental del stream de salida del resolutor.
///
/// Mantiene el conteo de entradas aceptadas y el título de playlist
/// observado; se alimenta línea a línea.
struct EntryParser {
    accepted: usize,
    playlist_title: Option<String>,
}

impl EntryParser {
    fn new() -> Self {
        Self {
            accepted: 0,
            playlist_title: None,
        }
    }

    fn accepted(&self) -> usize {
        self.accepted
    }

    /// Procesa una línea; devuelve un evento si produjo una entrada aceptada.
    fn feed_line(&mut self, line: &str) -> Option<Resolution> {
        let line = line.trim();
        let payload = line.strip_prefix(ENTRY_MARKER)?;

        let mut title = None;
        let mut page_url = None;
        let mut stream_url = None;
        let mut container = None;
        let mut codec = None;

        for field in payload.split(FIELD_SEPARATOR) {
            // Campo malformado o sin dato: se descarta, nunca es fatal
            let Some((key, value)) = field.split_once(KEY_VALUE_SEPARATOR) else {
                continue;
            };
            if value.is_empty() || value == MISSING_FIELD {
                continue;
            }
            match key {
                "TITLE" => title = Some(value.to_string()),
                "VIDEO_URL" => page_url = Some(value.to_string()),
                "AUDIO_URL" => stream_url = Some(value.to_string()),
                "EXT" => container = Some(value.to_string()),
                "ACODEC" => codec = Some(value.to_string()),
                "PLAYLIST" => {
                    if self.playlist_title.is_none() {
                        self.playlist_title = Some(value.to_string());
                    }
                }
                _ => {}
            }
        }

        let title = title?;
        let stream_url = stream_url.filter(|url| is_http_url(url))?;

        if self.accepted >= MAX_ENTRIES {
            debug!("Entrada ignorada por tope de {MAX_ENTRIES}: {title}");
            return None;
        }
        self.accepted += 1;

        Some(Resolution::Entry {
            entry: ResolvedEntry::new(
                title,
                page_url.unwrap_or_default(),
                stream_url,
                container.unwrap_or_else(|| "webm".to_string()),
                codec.unwrap_or_else(|| "opus".to_string()),
            ),
            is_first: self.accepted == 1,
            playlist_title: self.playlist_title.clone(),
        })
    }

    /// Cierre de la secuencia: sin entradas aceptadas se señala `NoEntries`.
    fn finish(&self) -> Option<Resolution> {
        (self.accepted == 0).then_some(Resolution::NoEntries)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn line(title: &str, audio: &str, playlist: &str) -> String {
        format!(
            "ENTRY=TITLE->{title}|||VIDEO_URL->https://youtube.com/watch?v=x|||AUDIO_URL->{audio}|||EXT->webm|||ACODEC->opus|||PLAYLIST->{playlist}"
        )
    }

    #[test]
    fn test_parse_complete_entry() {
        let mut parser = EntryParser::new();
        let event = parser
            .feed_line(&line("Mi canción", "https://cdn.example.com/a.webm", "NA"))
            .expect("entrada válida");

        match event {
            Resolution::Entry {
                entry,
                is_first,
                playlist_title,
            } => {
                assert_eq!(entry.title(), "Mi canción");
                assert_eq!(entry.stream_url(), "https://cdn.example.com/a.webm");
                assert_eq!(entry.container(), "webm");
                assert_eq!(entry.codec(), "opus");
                assert!(is_first);
                assert_eq!(playlist_title, None);
            }
            Resolution::NoEntries => panic!("no debería señalar NoEntries"),
        }
    }

    #[test]
    fn test_lines_without_marker_are_ignored() {
        let mut parser = EntryParser::new();
        assert!(parser.feed_line("[download] 10% of ...").is_none());
        assert!(parser.feed_line("").is_none());
        assert!(parser
            .feed_line("TITLE->x|||AUDIO_URL->https://a.com/b")
            .is_none());
        assert_eq!(parser.accepted(), 0);
    }

    #[test]
    fn test_malformed_fields_are_dropped_not_fatal() {
        let mut parser = EntryParser::new();
        // EXT sin separador clave-valor y ACODEC vacío: ambos se descartan
        let event = parser.feed_line(
            "ENTRY=TITLE->Tema|||AUDIO_URL->https://cdn.example.com/t.m4a|||EXTwebm|||ACODEC->",
        );
        match event.expect("la entrada sigue siendo válida") {
            Resolution::Entry { entry, .. } => {
                assert_eq!(entry.container(), "webm");
                assert_eq!(entry.codec(), "opus");
            }
            Resolution::NoEntries => panic!("no debería señalar NoEntries"),
        }
    }

    #[test]
    fn test_entry_without_valid_stream_is_rejected() {
        let mut parser = EntryParser::new();
        assert!(parser
            .feed_line(&line("Tema", "not-a-url", "NA"))
            .is_none());
        assert!(parser.feed_line(&line("Tema", "NA", "NA")).is_none());
        // Sin título tampoco se acepta
        assert!(parser
            .feed_line("ENTRY=AUDIO_URL->https://cdn.example.com/a.webm")
            .is_none());
        assert_eq!(parser.accepted(), 0);
        assert!(matches!(parser.finish(), Some(Resolution::NoEntries)));
    }

    #[test]
    fn test_cap_at_25_entries() {
        let mut parser = EntryParser::new();
        let mut delivered = 0;
        for i in 0..30 {
            let l = line(
                &format!("Tema {i}"),
                &format!("https://cdn.example.com/{i}.webm"),
                "NA",
            );
            if let Some(Resolution::Entry { is_first, .. }) = parser.feed_line(&l) {
                assert_eq!(is_first, delivered == 0);
                delivered += 1;
            }
        }
        assert_eq!(delivered, 25);
        assert_eq!(parser.accepted(), 25);
        // Con entradas aceptadas el cierre no señala NoEntries
        assert!(parser.finish().is_none());
    }

    #[test]
    fn test_playlist_title_arrives_late() {
        let mut parser = EntryParser::new();

        // La primera línea aún no trae título de playlist
        let first = parser.feed_line(&line("Uno", "https://cdn.example.com/1.webm", "NA"));
        match first.unwrap() {
            Resolution::Entry {
                is_first,
                playlist_title,
                ..
            } => {
                assert!(is_first);
                assert_eq!(playlist_title, None);
            }
            Resolution::NoEntries => panic!(),
        }

        // Las siguientes lo descubren y lo llevan adjunto
        let second = parser.feed_line(&line("Dos", "https://cdn.example.com/2.webm", "Mix 2024"));
        match second.unwrap() {
            Resolution::Entry {
                is_first,
                playlist_title,
                ..
            } => {
                assert!(!is_first);
                assert_eq!(playlist_title.as_deref(), Some("Mix 2024"));
            }
            Resolution::NoEntries => panic!(),
        }
    }

    #[test]
    fn test_title_with_embedded_arrow_survives() {
        let mut parser = EntryParser::new();
        let event = parser.feed_line(
            "ENTRY=TITLE->A -> B|||AUDIO_URL->https://cdn.example.com/a.webm",
        );
        match event.unwrap() {
            Resolution::Entry { entry, .. } => assert_eq!(entry.title(), "A -> B"),
            Resolution::NoEntries => panic!(),
        }
    }

    #[test]
    fn test_title_with_field_separator_corrupts_siblings() {
        // Limitación conocida del formato: el separador de campos dentro de
        // un título parte la línea; el resto de campos se pierde y la
        // entrada queda sin stream válido.
        let mut parser = EntryParser::new();
        let event = parser.feed_line(
            "ENTRY=TITLE->A|||B|||AUDIO_URL->https://cdn.example.com/a.webm",
        );
        match event.unwrap() {
            Resolution::Entry { entry, .. } => {
                assert_eq!(entry.title(), "A");
                assert_eq!(entry.stream_url(), "https://cdn.example.com/a.webm");
            }
            Resolution::NoEntries => panic!(),
        }
    }

    #[test]
    fn test_normalize_query() {
        assert_eq!(
            normalize_query("https://youtube.com/watch?v=abc"),
            "https://youtube.com/watch?v=abc"
        );
        assert_eq!(normalize_query("lofi beats"), "ytsearch:lofi beats");
    }
}

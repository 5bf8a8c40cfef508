use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use dashmap::DashMap;
use serenity::model::id::GuildId;
use songbird::input::{AudioStream, Input, LiveInput};
use symphonia::core::io::{MediaSource, ReadOnlySource};
use symphonia::core::probe::Hint;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::io::SyncIoBridge;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::audio::PlaybackError;
use crate::sources::ResolvedEntry;

/// Supervisa el proceso de descarga en streaming de cada servidor.
///
/// Invariante: a lo sumo un proceso vivo por servidor; arrancar uno nuevo
/// mata incondicionalmente al anterior antes de lanzarlo. Clonar el
/// supervisor comparte el registro.
#[derive(Clone)]
pub struct StreamSupervisor {
    binary: String,
    next_id: Arc<AtomicU64>,
    procs: Arc<DashMap<GuildId, StreamHandle>>,
}

struct StreamHandle {
    id: u64,
    token: CancellationToken,
}

impl StreamSupervisor {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            next_id: Arc::new(AtomicU64::new(0)),
            procs: Arc::new(DashMap::new()),
        }
    }

    /// Lanza el proceso de descarga para una entrada y devuelve su stdout
    /// envuelto como input de reproducción.
    ///
    /// Una entrada sin stream HTTP válido se rechaza sin lanzar nada.
    pub async fn start(&self, guild_id: GuildId, entry: &ResolvedEntry) -> Result<Input> {
        if !entry.has_playable_stream() {
            return Err(PlaybackError::InvalidStreamRef(entry.stream_url().to_string()).into());
        }

        self.kill(guild_id);

        let mut child = tokio::process::Command::new(&self.binary)
            .args(["-o", "-", entry.stream_url()])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("no se pudo lanzar {} para streaming", self.binary))?;

        let stdout = child
            .stdout
            .take()
            .context("el proceso de streaming no expuso stdout")?;

        // stderr es sólo diagnóstico, nunca control
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("streaming stderr: {}", line.trim());
                }
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.procs.insert(
            guild_id,
            StreamHandle {
                id,
                token: token.clone(),
            },
        );

        debug!(
            "🎬 Streaming iniciado para guild {}: {}",
            guild_id,
            entry.title()
        );

        let procs = Arc::clone(&self.procs);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    let _ = child.kill().await;
                    debug!("Proceso de streaming matado para guild {}", guild_id);
                }
                status = child.wait() => {
                    // Salida natural con cualquier código: sólo se retira del
                    // registro; los eventos del track son los que mandan.
                    procs.remove_if(&guild_id, |_, handle| handle.id == id);
                    match status {
                        Ok(s) => debug!("Proceso de streaming terminó para guild {}: {}", guild_id, s),
                        Err(e) => warn!("Error esperando proceso de streaming: {}", e),
                    }
                }
            }
        });

        let mut hint = Hint::new();
        hint.with_extension(entry.container());

        let reader = ReadOnlySource::new(SyncIoBridge::new(stdout));
        let stream = AudioStream {
            input: Box::new(reader) as Box<dyn MediaSource>,
            hint: Some(hint),
        };
        Ok(Input::Live(LiveInput::Raw(stream), None))
    }

    /// Mata el proceso vivo del servidor, si lo hay.
    pub fn kill(&self, guild_id: GuildId) {
        if let Some((_, handle)) = self.procs.remove(&guild_id) {
            handle.token.cancel();
        }
    }

    /// Indica si hay un proceso de streaming vivo para el servidor.
    #[allow(dead_code)]
    pub fn is_live(&self, guild_id: GuildId) -> bool {
        self.procs.contains_key(&guild_id)
    }
}

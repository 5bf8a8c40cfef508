pub mod orchestrator;
pub mod queue;
pub mod stream;

use thiserror::Error;

pub use orchestrator::{Announcer, PlaybackOrchestrator};
pub use queue::QueueSnapshot;

/// Errores tipados de la capa de reproducción.
///
/// Los fallos de resolución nunca llegan aquí: el adaptador los convierte
/// en `Resolution::NoEntries`. Los errores del motor de audio se reportan
/// por eventos de track y quedan en el log.
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// La referencia de stream no pasa la comprobación de esquema; la
    /// entrada se descarta sin llegar nunca al proceso de streaming.
    #[error("referencia de stream inválida: {0}")]
    InvalidStreamRef(String),

    /// La conexión de voz no quedó lista dentro del plazo acotado.
    #[error("timeout esperando la conexión de voz")]
    ConnectionTimeout,

    /// stop/skip sin sesión activa (o sin canción sonando) en el servidor.
    #[error("no hay ninguna sesión de reproducción activa")]
    NoActiveSession,
}

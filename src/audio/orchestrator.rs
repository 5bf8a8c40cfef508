use std::sync::Arc;

use anyhow::{anyhow, Result};
use dashmap::DashMap;
use serenity::{
    builder::{CreateInteractionResponseFollowup, EditInteractionResponse},
    gateway::ActivityData,
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId},
    },
    prelude::Context,
};
use songbird::{
    tracks::{PlayMode, TrackHandle},
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        queue::{PlayQueue, QueueSnapshot},
        stream::StreamSupervisor,
        PlaybackError,
    },
    config::Config,
    sources::{is_playlist_query, Resolution, ResolvedEntry, YtDlpResolver},
};

/// Tope de reintentos por sesión; ver el TODO sobre `retry_count`.
#[allow(dead_code)]
const MAX_RETRIES: u32 = 3;

/// Sesión de reproducción de un servidor: conexión de voz, track activo,
/// cola pendiente y entrada actual.
///
/// Toda mutación pasa por el lock de la sesión; eso serializa los comandos
/// explícitos (stop/skip) con el avance automático del mismo servidor.
struct GuildSession {
    call: Arc<Mutex<Call>>,
    current_track: Option<TrackHandle>,
    queue: PlayQueue,
    /// Se incrementa en cada arranque; el timer de inactividad lo captura
    /// al armarse y lo revalida al disparar.
    plays_started: u64,
    // TODO: política de reintentos acotada; hoy ningún camino lo incrementa.
    #[allow(dead_code)]
    retry_count: u32,
}

impl GuildSession {
    fn new(call: Arc<Mutex<Call>>) -> Self {
        Self {
            call,
            current_track: None,
            queue: PlayQueue::new(),
            plays_started: 0,
            retry_count: 0,
        }
    }
}

/// Máquina de estados central: consume entradas resueltas, arranca el
/// streaming y el track por servidor, reacciona a fin de track y a los
/// comandos del usuario.
///
/// Clonar el orquestador comparte todo el estado; los clones son baratos.
#[derive(Clone)]
pub struct PlaybackOrchestrator {
    config: Arc<Config>,
    songbird: Arc<Songbird>,
    resolver: YtDlpResolver,
    streams: StreamSupervisor,
    sessions: Arc<DashMap<GuildId, Arc<Mutex<GuildSession>>>>,
    /// Generación de stop por servidor: un stop la avanza y con eso gana
    /// sobre cualquier resolución todavía en vuelo.
    stop_marks: Arc<DashMap<GuildId, u64>>,
}

impl PlaybackOrchestrator {
    pub fn new(config: Arc<Config>, songbird: Arc<Songbird>) -> Self {
        let resolver = YtDlpResolver::new(config.ytdlp_binary.clone());
        let streams = StreamSupervisor::new(config.ytdlp_binary.clone());
        Self {
            config,
            songbird,
            resolver,
            streams,
            sessions: Arc::new(DashMap::new()),
            stop_marks: Arc::new(DashMap::new()),
        }
    }

    /// Atiende una petición de reproducción completa.
    ///
    /// Consume el canal del resolutor: la primera entrada arranca de
    /// inmediato (mientras el resto sigue llegando) y las demás se encolan
    /// en silencio.
    pub async fn play(
        &self,
        guild_id: GuildId,
        voice_channel: ChannelId,
        query: &str,
        announcer: Arc<Announcer>,
    ) -> Result<()> {
        let is_playlist = is_playlist_query(query);
        let mark = self.stop_mark(guild_id);
        info!(
            "▶️ Petición en guild {}: \"{}\" (playlist: {})",
            guild_id, query, is_playlist
        );

        let rx = self.resolver.resolve(query);
        let mut first_handled = false;

        while let Ok(event) = rx.recv_async().await {
            match event {
                Resolution::Entry {
                    entry,
                    is_first,
                    playlist_title,
                } => {
                    if self.stop_mark(guild_id) != mark {
                        debug!("Entrada descartada tras stop: {}", entry.title());
                        continue;
                    }
                    if is_first {
                        first_handled = true;
                        let announce = if is_playlist {
                            Announce::FirstOfPlaylist {
                                playlist: playlist_title,
                            }
                        } else {
                            Announce::FirstOfSingle
                        };
                        if let Err(e) = self
                            .start_entry(guild_id, voice_channel, entry, announce, &announcer)
                            .await
                        {
                            error!(
                                "❌ No se pudo iniciar la reproducción en guild {}: {:#}",
                                guild_id, e
                            );
                        }
                    } else {
                        self.enqueue(guild_id, entry).await;
                    }
                }
                Resolution::NoEntries => {
                    // Las playlists degradan en silencio a "nada agregado"
                    if !first_handled && !is_playlist {
                        announcer
                            .ack("❌ No pude obtener información del audio.")
                            .await;
                    }
                }
            }
        }

        Ok(())
    }

    /// Detiene todo y destruye la sesión del servidor de inmediato.
    pub async fn stop(&self, guild_id: GuildId) -> Result<(), PlaybackError> {
        self.bump_stop_mark(guild_id);

        let Some((_, session)) = self.sessions.remove(&guild_id) else {
            // Sin sesión no hay nada que parar; cualquier proceso suelto cae
            self.streams.kill(guild_id);
            return Err(PlaybackError::NoActiveSession);
        };

        let mut guard = session.lock().await;
        // El lock serializa con un avance en vuelo: el proceso que se mata
        // es el que quedó comprometido, nunca uno a medio arrancar.
        self.streams.kill(guild_id);
        if let Some(track) = guard.current_track.take() {
            let _ = track.stop();
        }
        guard.queue.clear();
        drop(guard);

        if let Err(e) = self.songbird.remove(guild_id).await {
            debug!(
                "La conexión de voz ya no existía en guild {}: {}",
                guild_id, e
            );
        }
        info!("⏹️ Sesión destruida en guild {}", guild_id);
        Ok(())
    }

    /// Salta la canción actual y descarta `count - 1` de la cola.
    ///
    /// Devuelve los títulos saltados; parar el track dispara el evento de
    /// fin que encadena la siguiente canción.
    pub async fn skip(
        &self,
        guild_id: GuildId,
        count: usize,
    ) -> Result<Vec<String>, PlaybackError> {
        let session = self
            .session(guild_id)
            .ok_or(PlaybackError::NoActiveSession)?;
        let mut guard = session.lock().await;

        if guard.current_track.is_none() {
            return Err(PlaybackError::NoActiveSession);
        }
        let titles = guard
            .queue
            .collect_skipped(count.max(1))
            .ok_or(PlaybackError::NoActiveSession)?;

        if let Some(track) = &guard.current_track {
            let _ = track.stop();
        }
        info!("⏭️ Saltadas {} canciones en guild {}", titles.len(), guild_id);
        Ok(titles)
    }

    /// Instantánea de la cola para mostrarla al usuario.
    pub async fn queue_snapshot(&self, guild_id: GuildId) -> QueueSnapshot {
        match self.session(guild_id) {
            Some(session) => session.lock().await.queue.snapshot(),
            None => QueueSnapshot::default(),
        }
    }

    // Transición NoSession → Active para la primera entrada, o reemplazo
    // directo del track vigente si la sesión ya existe.
    async fn start_entry(
        &self,
        guild_id: GuildId,
        voice_channel: ChannelId,
        entry: ResolvedEntry,
        announce: Announce,
        announcer: &Arc<Announcer>,
    ) -> Result<()> {
        let session = match self.session(guild_id) {
            Some(existing) => existing,
            None => self.create_session(guild_id, voice_channel).await?,
        };

        let mut guard = session.lock().await;
        self.play_now(&mut guard, guild_id, entry, announce, announcer)
            .await
    }

    /// Crea la sesión uniéndose al canal de voz, con espera acotada a que
    /// la conexión esté lista. El fallo es fatal para este intento.
    async fn create_session(
        &self,
        guild_id: GuildId,
        voice_channel: ChannelId,
    ) -> Result<Arc<Mutex<GuildSession>>> {
        info!(
            "🔊 Conectando al canal de voz {} en guild {}",
            voice_channel, guild_id
        );

        let join = self.songbird.join(guild_id, voice_channel);
        let call = match timeout(self.config.connect_timeout(), join).await {
            Ok(Ok(call)) => call,
            Ok(Err(e)) => {
                let _ = self.songbird.remove(guild_id).await;
                return Err(anyhow!("fallo al unirse al canal de voz: {e}"));
            }
            Err(_) => {
                let _ = self.songbird.remove(guild_id).await;
                return Err(PlaybackError::ConnectionTimeout.into());
            }
        };

        // Si otra petición se adelantó durante el join, ambas convergen en
        // la misma sesión; la conexión es la misma de todos modos.
        let session = self
            .sessions
            .entry(guild_id)
            .or_insert_with(|| Arc::new(Mutex::new(GuildSession::new(call))))
            .clone();
        Ok(session)
    }

    /// Arranca streaming + track para una entrada, reemplazando lo que
    /// hubiera. La entrada queda fijada como actual antes del arranque.
    async fn play_now(
        &self,
        session: &mut GuildSession,
        guild_id: GuildId,
        entry: ResolvedEntry,
        announce: Announce,
        announcer: &Arc<Announcer>,
    ) -> Result<()> {
        let input = self.streams.start(guild_id, &entry).await?;

        session.queue.set_current(entry.clone());
        session.plays_started += 1;

        let track = {
            let mut call = session.call.lock().await;
            if let Some(previous) = session.current_track.take() {
                let _ = previous.stop();
            }
            let track = call.play_input(input);
            track
                .add_event(
                    Event::Track(TrackEvent::End),
                    TrackEndNotifier {
                        orchestrator: self.clone(),
                        guild_id,
                        announcer: Arc::clone(announcer),
                    },
                )
                .map_err(|e| anyhow!("no se pudo registrar el evento de fin: {e}"))?;
            track
                .add_event(
                    Event::Track(TrackEvent::Error),
                    TrackErrorNotifier { guild_id },
                )
                .map_err(|e| anyhow!("no se pudo registrar el evento de error: {e}"))?;
            track
        };
        session.current_track = Some(track);

        info!("🎵 Reproduciendo \"{}\" en guild {}", entry.title(), guild_id);
        announcer.set_listening(entry.title());
        announcer.announce(&announce, entry.title()).await;
        Ok(())
    }

    /// Encola una entrada posterior; sin sesión (arranque fallido o sesión
    /// ya destruida) la entrada se descarta en silencio.
    async fn enqueue(&self, guild_id: GuildId, entry: ResolvedEntry) {
        match self.session(guild_id) {
            Some(session) => session.lock().await.queue.push(entry),
            None => debug!(
                "Sin sesión en guild {}; entrada descartada: {}",
                guild_id,
                entry.title()
            ),
        }
    }

    /// Avance automático al terminar un track: siguiente de la cola, o
    /// drenaje con timer de inactividad si no queda nada.
    async fn advance(&self, guild_id: GuildId, ended: &TrackHandle, announcer: &Arc<Announcer>) {
        let Some(session) = self.session(guild_id) else {
            return;
        };
        let mut guard = session.lock().await;

        // Sólo el track vigente avanza la cola; el evento tardío de un
        // track reemplazado llega aquí y se ignora.
        let is_current =
            guard.current_track.as_ref().map(TrackHandle::uuid) == Some(ended.uuid());
        if !is_current {
            return;
        }

        self.streams.kill(guild_id);

        match guard.queue.pop_next() {
            Some(next) => {
                if let Err(e) = self
                    .play_now(&mut guard, guild_id, next, Announce::SubsequentAuto, announcer)
                    .await
                {
                    error!("❌ Error al avanzar la cola en guild {}: {:#}", guild_id, e);
                }
            }
            None => {
                announcer.clear_activity();
                let seen = guard.plays_started;
                drop(guard);

                let idle = self.config.idle_timeout();
                info!(
                    "📭 Cola vacía en guild {}; desconexión en {:?} si sigue inactiva",
                    guild_id, idle
                );
                let orchestrator = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(idle).await;
                    orchestrator.teardown_if_idle(guild_id, seen).await;
                });
            }
        }
    }

    /// Disparo del timer de inactividad, revalidando su precondición: la
    /// cola sigue vacía y nadie arrancó nada durante la espera. No hay
    /// cancelación explícita; un timer obsoleto simplemente no pasa la
    /// revalidación. Un lock ocupado cuenta como actividad.
    async fn teardown_if_idle(&self, guild_id: GuildId, seen: u64) {
        let removed = self
            .sessions
            .remove_if(&guild_id, |_, session| match session.try_lock() {
                Ok(guard) => guard.plays_started == seen && guard.queue.is_empty(),
                Err(_) => false,
            });

        let Some((_, session)) = removed else {
            return;
        };
        info!(
            "💤 Inactividad agotada en guild {}; liberando la sesión",
            guild_id
        );

        let mut guard = session.lock().await;
        self.streams.kill(guild_id);
        if let Some(track) = guard.current_track.take() {
            let _ = track.stop();
        }
        guard.queue.clear();
        drop(guard);

        if let Err(e) = self.songbird.remove(guild_id).await {
            debug!(
                "La conexión de voz ya no existía en guild {}: {}",
                guild_id, e
            );
        }
    }

    fn session(&self, guild_id: GuildId) -> Option<Arc<Mutex<GuildSession>>> {
        self.sessions
            .get(&guild_id)
            .map(|session| Arc::clone(session.value()))
    }

    fn stop_mark(&self, guild_id: GuildId) -> u64 {
        self.stop_marks
            .get(&guild_id)
            .map(|mark| *mark)
            .unwrap_or(0)
    }

    fn bump_stop_mark(&self, guild_id: GuildId) {
        *self.stop_marks.entry(guild_id).or_insert(0) += 1;
    }
}

/// Qué clase de anuncio corresponde a un arranque de reproducción.
#[derive(Debug, Clone)]
pub enum Announce {
    /// Primera (y única) canción de una consulta normal.
    FirstOfSingle,
    /// Primera canción de una consulta con forma de playlist.
    FirstOfPlaylist { playlist: Option<String> },
    /// Encadenada automáticamente tras un fin de track o un salto.
    SubsequentAuto,
}

/// Canal de mensajes hacia el usuario que originó la petición: respuesta
/// diferida, follow-up y mensajes sueltos al canal, más la actividad
/// mostrada por el bot.
pub struct Announcer {
    ctx: Context,
    interaction: CommandInteraction,
}

impl Announcer {
    pub fn new(ctx: Context, interaction: CommandInteraction) -> Self {
        Self { ctx, interaction }
    }

    fn audit(&self, message: &str) {
        info!(
            "💬 Respuesta a {} en guild {:?}: {}",
            self.interaction.user.name, self.interaction.guild_id, message
        );
    }

    /// Edita la respuesta diferida del comando original.
    pub async fn ack(&self, message: impl Into<String>) {
        let message = message.into();
        self.audit(&message);
        if let Err(e) = self
            .interaction
            .edit_response(
                &self.ctx.http,
                EditInteractionResponse::new().content(message),
            )
            .await
        {
            warn!("No se pudo editar la respuesta diferida: {}", e);
        }
    }

    /// Envía un follow-up sobre la respuesta ya publicada.
    pub async fn follow_up(&self, message: impl Into<String>) {
        let message = message.into();
        self.audit(&message);
        if let Err(e) = self
            .interaction
            .create_followup(
                &self.ctx.http,
                CreateInteractionResponseFollowup::new().content(message),
            )
            .await
        {
            warn!("No se pudo enviar el follow-up: {}", e);
        }
    }

    /// Mensaje suelto al canal del comando original.
    pub async fn say(&self, message: impl Into<String>) {
        let message = message.into();
        self.audit(&message);
        if let Err(e) = self
            .interaction
            .channel_id
            .say(&self.ctx.http, message)
            .await
        {
            warn!("No se pudo enviar el mensaje al canal: {}", e);
        }
    }

    pub fn set_listening(&self, title: &str) {
        self.ctx
            .set_activity(Some(ActivityData::listening(format!("🎵 {title}"))));
    }

    pub fn clear_activity(&self) {
        self.ctx.set_activity(None);
    }

    /// Único punto de anuncio de arranques de reproducción.
    pub async fn announce(&self, kind: &Announce, title: &str) {
        match kind {
            Announce::FirstOfSingle => {
                self.ack(format!("🎵 Reproduciendo: **{title}**")).await;
            }
            Announce::FirstOfPlaylist {
                playlist: Some(playlist),
            } => {
                self.ack(format!("➕ Playlist **{playlist}** agregada a la cola"))
                    .await;
                self.follow_up(format!("🎵 Reproduciendo: **{title}**"))
                    .await;
            }
            // Consulta con forma de playlist pero sin título descubierto:
            // no se anuncia nada (asimetría asumida)
            Announce::FirstOfPlaylist { playlist: None } => {}
            Announce::SubsequentAuto => {
                self.say(format!("🎵 Reproduciendo: **{title}**")).await;
            }
        }
    }
}

/// Notificador de fin de track: encadena la siguiente canción.
struct TrackEndNotifier {
    orchestrator: PlaybackOrchestrator,
    guild_id: GuildId,
    announcer: Arc<Announcer>,
}

#[async_trait::async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::Track(tracks) = ctx {
            for &(state, handle) in tracks.iter() {
                // Un track que murió con error no avanza la cola
                if state.playing != PlayMode::End && state.playing != PlayMode::Stop {
                    continue;
                }
                self.orchestrator
                    .advance(self.guild_id, handle, &self.announcer)
                    .await;
            }
        }
        None
    }
}

/// Notificador de error del motor: detiene el track y deja diagnóstico.
/// Sin reintento, sin avance, sin mensaje al usuario.
struct TrackErrorNotifier {
    guild_id: GuildId,
}

#[async_trait::async_trait]
impl VoiceEventHandler for TrackErrorNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::Track(tracks) = ctx {
            for &(state, handle) in tracks.iter() {
                error!(
                    "❌ Error del motor de reproducción en guild {}: {:?}",
                    self.guild_id, state.playing
                );
                let _ = handle.stop();
            }
        }
        None
    }
}

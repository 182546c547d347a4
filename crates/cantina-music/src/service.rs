use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use cantina_core::config::MusicConfig;
use cantina_core::payloads::{
    now_timestamp, DjAction, DjCommandPayload, EventPayload, MusicAction, MusicCommandPayload,
    ProgressPayload,
};
use cantina_core::service::{Service, ServiceCore, ServiceStatus};
use cantina_core::{EventBus, EventTopic, Result, SystemMode, Track};

use crate::library::{DurationProbe, MusicLibrary};
use crate::player::{PlayerBackend, PlayerHandle};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

struct Playback {
    handle: Box<dyn PlayerHandle>,
    track: Track,
    started_at: Instant,
    paused_since: Option<Instant>,
    paused_total: Duration,
}

impl Playback {
    fn position(&self) -> f32 {
        let paused = self.paused_total
            + self
                .paused_since
                .map(|since| since.elapsed())
                .unwrap_or_default();
        self.started_at.elapsed().saturating_sub(paused).as_secs_f32()
    }
}

#[derive(Debug, Clone)]
struct DjSettings {
    active: bool,
    auto_transition: bool,
    transition_duration: f32,
    genre_preference: Option<String>,
    queued: Option<String>,
}

impl Default for DjSettings {
    fn default() -> Self {
        Self {
            active: false,
            auto_transition: true,
            transition_duration: 5.0,
            genre_preference: None,
            queued: None,
        }
    }
}

struct MusicState {
    config: MusicConfig,
    backend: Arc<dyn PlayerBackend>,
    probe: Arc<dyn DurationProbe>,
    library: Mutex<MusicLibrary>,
    playback: Mutex<Option<Playback>>,
    ducking: AtomicBool,
    normal_volume: Mutex<u8>,
    mode: Mutex<SystemMode>,
    dj: Mutex<DjSettings>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl MusicState {
    fn respond(&self, core: &ServiceCore, message: impl Into<String>, is_error: bool) {
        core.emit(
            EventTopic::CliResponse,
            EventPayload::CliResponse {
                message: message.into(),
                is_error,
            },
        );
    }

    fn effective_volume(&self) -> f32 {
        let normal = *self.normal_volume.lock().unwrap_or_else(|p| p.into_inner());
        let level = if self.ducking.load(Ordering::Acquire) {
            self.config.ducking_volume
        } else {
            normal
        };
        f32::from(level) / 100.0
    }

    /// Release the current player if any. Returns the stopped track name.
    fn release_player(&self) -> Option<String> {
        let mut playback = self.playback.lock().unwrap_or_else(|p| p.into_inner());
        playback.take().map(|mut p| {
            p.handle.stop();
            p.track.name
        })
    }

    fn stop_playback(&self, core: &ServiceCore) -> Option<String> {
        let stopped = self.release_player();
        if let Some(name) = &stopped {
            info!(track = %name, "playback stopped");
            core.emit(
                EventTopic::MusicPlaybackStopped,
                EventPayload::PlaybackStopped {
                    track_name: Some(name.clone()),
                },
            );
        }
        stopped
    }

    fn start_track(&self, core: &ServiceCore, track: Track) -> Result<()> {
        // Single-player invariant: whatever is playing goes away first.
        self.stop_playback(core);

        let handle = self.backend.play(&track, self.effective_volume())?;
        {
            let mut playback = self.playback.lock().unwrap_or_else(|p| p.into_inner());
            *playback = Some(Playback {
                handle,
                track: track.clone(),
                started_at: Instant::now(),
                paused_since: None,
                paused_total: Duration::ZERO,
            });
        }
        info!(track = %track.name, "playback started");
        core.emit(
            EventTopic::MusicPlaybackStarted,
            EventPayload::PlaybackStarted {
                duration: track.duration_seconds,
                start_timestamp: now_timestamp(),
                track,
            },
        );
        Ok(())
    }

    fn play_query(&self, core: &ServiceCore, query: &str) {
        let track = {
            let library = self.library.lock().unwrap_or_else(|p| p.into_inner());
            library.resolve(query).cloned()
        };
        match track {
            Some(track) => {
                let name = track.name.clone();
                match self.start_track(core, track) {
                    Ok(()) => self.respond(core, format!("Playing: {name}"), false),
                    Err(e) => {
                        warn!(error = %e, "failed to start playback");
                        self.respond(core, format!("Failed to play {name}: {e}"), true);
                    }
                }
            }
            None => self.respond(core, format!("Track not found: {query}"), true),
        }
    }

    fn play_next(&self, core: &ServiceCore) {
        let queued = self
            .dj
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .queued
            .take();
        let current = self
            .playback
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .map(|p| p.track.name.clone());

        let next = {
            let library = self.library.lock().unwrap_or_else(|p| p.into_inner());
            match queued {
                Some(name) => library.resolve(&name).cloned(),
                None => library.random_track(current.as_deref()).cloned(),
            }
        };
        match next {
            Some(track) => {
                if let Err(e) = self.start_track(core, track) {
                    warn!(error = %e, "failed to start next track");
                }
            }
            None => debug!("no track available for next"),
        }
    }

    fn set_paused(&self, paused: bool) {
        let mut playback = self.playback.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(p) = playback.as_mut() {
            if paused && p.paused_since.is_none() {
                p.handle.pause();
                p.paused_since = Some(Instant::now());
            } else if !paused {
                if let Some(since) = p.paused_since.take() {
                    p.paused_total += since.elapsed();
                    p.handle.resume();
                }
            }
        }
    }

    fn apply_volume(&self) {
        let volume = self.effective_volume();
        let mut playback = self.playback.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(p) = playback.as_mut() {
            p.handle.set_volume(volume);
        }
    }

    fn handle_command(&self, core: &ServiceCore, cmd: &MusicCommandPayload) {
        match cmd.action {
            MusicAction::Play => {
                let query = cmd.song_query.clone().unwrap_or_default();
                if query.trim().is_empty() {
                    self.respond(core, "Play what? Give me a track name or number.", true);
                } else {
                    self.play_query(core, &query);
                }
            }
            MusicAction::Stop => {
                if self.stop_playback(core).is_none() {
                    self.respond(core, "No music is playing.", false);
                } else {
                    self.respond(core, "Music stopped.", false);
                }
            }
            MusicAction::Pause => self.set_paused(true),
            MusicAction::Resume => self.set_paused(false),
            MusicAction::Next => self.play_next(core),
            MusicAction::Queue => {
                let Some(query) = cmd.song_query.clone().filter(|q| !q.trim().is_empty()) else {
                    self.respond(core, "Queue what? Give me a track name.", true);
                    return;
                };
                let known = {
                    let library = self.library.lock().unwrap_or_else(|p| p.into_inner());
                    library.resolve(&query).map(|t| t.name.clone())
                };
                match known {
                    Some(name) => {
                        self.dj.lock().unwrap_or_else(|p| p.into_inner()).queued = Some(name.clone());
                        self.respond(core, format!("Queued: {name}"), false);
                    }
                    None => self.respond(core, format!("Track not found: {query}"), true),
                }
            }
            MusicAction::Volume => {
                let Some(volume) = cmd.volume else {
                    self.respond(core, "Volume command needs a level.", true);
                    return;
                };
                let level = (volume.clamp(0.0, 1.0) * 100.0).round() as u8;
                *self.normal_volume.lock().unwrap_or_else(|p| p.into_inner()) = level;
                if !self.ducking.load(Ordering::Acquire) {
                    self.apply_volume();
                }
                self.respond(core, format!("Volume set to {level}."), false);
            }
            MusicAction::List => {
                let listing = {
                    let library = self.library.lock().unwrap_or_else(|p| p.into_inner());
                    if library.is_empty() {
                        "The music library is empty.".to_string()
                    } else {
                        library
                            .tracks()
                            .iter()
                            .enumerate()
                            .map(|(i, t)| {
                                let mins = (t.duration_seconds / 60.0).floor() as u32;
                                let secs = (t.duration_seconds % 60.0).round() as u32;
                                format!("{}. {} ({mins}:{secs:02})", i + 1, t.name)
                            })
                            .collect::<Vec<_>>()
                            .join("\n")
                    }
                };
                self.respond(core, listing, false);
            }
            MusicAction::Install => {
                let Some(dir) = cmd.install_dir.clone() else {
                    self.respond(core, "Install command needs a source directory.", true);
                    return;
                };
                match self.install_and_reload(std::path::Path::new(&dir)) {
                    Ok(count) => {
                        self.announce_library(core);
                        self.respond(core, format!("Installed {count} track(s)."), false);
                    }
                    Err(e) => self.respond(core, format!("Install failed: {e}"), true),
                }
            }
        }
    }

    fn announce_library(&self, core: &ServiceCore) {
        let tracks = {
            let library = self.library.lock().unwrap_or_else(|p| p.into_inner());
            library.tracks().to_vec()
        };
        core.emit(EventTopic::MusicLibraryUpdated, EventPayload::Library { tracks });
    }

    fn install_and_reload(&self, source: &std::path::Path) -> Result<usize> {
        let mut library = self.library.lock().unwrap_or_else(|p| p.into_inner());
        let directory = library.directory().to_path_buf();
        let count = library.install_from(source)?;
        *library = MusicLibrary::scan(&directory, &self.config.fallback_dirs, self.probe.as_ref())?;
        Ok(count)
    }

    fn handle_dj_command(&self, core: &ServiceCore, cmd: &DjCommandPayload) {
        match cmd.action {
            DjAction::Start => {
                {
                    let mut dj = self.dj.lock().unwrap_or_else(|p| p.into_inner());
                    dj.active = true;
                    if let Some(auto) = cmd.auto_transition {
                        dj.auto_transition = auto;
                    }
                    if let Some(duration) = cmd.transition_duration {
                        dj.transition_duration = duration;
                    }
                    if cmd.genre_preference.is_some() {
                        dj.genre_preference = cmd.genre_preference.clone();
                    }
                }
                core.emit(EventTopic::DjModeChanged, EventPayload::DjMode { active: true });
                let playing = self
                    .playback
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .is_some();
                if !playing {
                    self.play_next(core);
                }
                info!("DJ mode started");
            }
            DjAction::Stop => {
                self.dj.lock().unwrap_or_else(|p| p.into_inner()).active = false;
                core.emit(EventTopic::DjModeChanged, EventPayload::DjMode { active: false });
                info!("DJ mode stopped");
            }
            DjAction::Next => self.play_next(core),
            DjAction::UpdateSettings => {
                let mut dj = self.dj.lock().unwrap_or_else(|p| p.into_inner());
                if let Some(auto) = cmd.auto_transition {
                    dj.auto_transition = auto;
                }
                if let Some(duration) = cmd.transition_duration {
                    dj.transition_duration = duration;
                }
                if cmd.genre_preference.is_some() {
                    dj.genre_preference = cmd.genre_preference.clone();
                }
                debug!(?dj, "DJ settings updated");
            }
        }
    }

    fn duck(&self) {
        let interactive = *self.mode.lock().unwrap_or_else(|p| p.into_inner())
            == SystemMode::Interactive;
        let playing = self
            .playback
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_some();
        if interactive && playing && !self.ducking.swap(true, Ordering::AcqRel) {
            debug!("ducking music for speech");
            self.apply_volume();
        }
    }

    fn unduck(&self) {
        if self.ducking.swap(false, Ordering::AcqRel) {
            debug!("restoring music volume");
            self.apply_volume();
        }
    }

    /// One progress tick: publish position or handle natural end-of-track.
    fn tick(&self, core: &ServiceCore) {
        let finished_track = {
            let mut playback = self.playback.lock().unwrap_or_else(|p| p.into_inner());
            let finished = match playback.as_ref() {
                None => return,
                Some(p) => p.handle.is_finished(),
            };
            if finished {
                playback.take().map(|p| p.track.name)
            } else {
                if let Some(p) = playback.as_ref() {
                    if p.paused_since.is_none() {
                        let position = p.position();
                        let duration = p.track.duration_seconds;
                        let progress = if duration > 0.0 {
                            (position / duration).clamp(0.0, 1.0)
                        } else {
                            0.0
                        };
                        core.emit(
                            EventTopic::MusicProgress,
                            EventPayload::Progress(ProgressPayload {
                                track_name: p.track.name.clone(),
                                position,
                                duration,
                                progress,
                            }),
                        );
                    }
                }
                None
            }
        };

        if let Some(name) = finished_track {
            info!(track = %name, "track ended");
            core.emit(
                EventTopic::MusicPlaybackStopped,
                EventPayload::PlaybackStopped {
                    track_name: Some(name.clone()),
                },
            );
            core.emit(EventTopic::TrackEnded, EventPayload::Empty);
            let dj = self.dj.lock().unwrap_or_else(|p| p.into_inner()).clone();
            if dj.active && dj.auto_transition {
                self.play_next(core);
            }
        }
    }
}

/// Music controller service.
///
/// Exclusive owner of playback state: at most one player exists, volume
/// has exactly two levels (normal and ducking), and every external change
/// request arrives as an event.
pub struct MusicControllerService {
    core: Arc<ServiceCore>,
    state: Arc<MusicState>,
}

impl MusicControllerService {
    pub const NAME: &'static str = "music_controller";

    pub fn new(
        bus: EventBus,
        config: MusicConfig,
        backend: Arc<dyn PlayerBackend>,
        probe: Arc<dyn DurationProbe>,
    ) -> Result<Self> {
        let library = MusicLibrary::scan(&config.directory, &config.fallback_dirs, probe.as_ref())?;
        let normal_volume = config.normal_volume;
        Ok(Self {
            core: ServiceCore::new(Self::NAME, bus),
            state: Arc::new(MusicState {
                config,
                backend,
                probe,
                library: Mutex::new(library),
                playback: Mutex::new(None),
                ducking: AtomicBool::new(false),
                normal_volume: Mutex::new(normal_volume),
                mode: Mutex::new(SystemMode::Startup),
                dj: Mutex::new(DjSettings::default()),
                ticker: Mutex::new(None),
            }),
        })
    }
}

#[async_trait]
impl Service for MusicControllerService {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn start(&self) -> Result<()> {
        let core = Arc::clone(&self.core);
        let state = Arc::clone(&self.state);
        self.core
            .run_start(async move {
                core.subscribe(
                    EventTopic::MusicCommand,
                    (Arc::clone(&state), Arc::clone(&core)),
                    |(state, core), event| async move {
                        if let EventPayload::MusicCommand(cmd) = &event.payload {
                            state.handle_command(&core, cmd);
                        }
                        Ok(())
                    },
                );
                core.subscribe(
                    EventTopic::DjCommand,
                    (Arc::clone(&state), Arc::clone(&core)),
                    |(state, core), event| async move {
                        if let EventPayload::DjCommand(cmd) = &event.payload {
                            state.handle_dj_command(&core, cmd);
                        }
                        Ok(())
                    },
                );
                core.subscribe(
                    EventTopic::DjNextTrack,
                    (Arc::clone(&state), Arc::clone(&core)),
                    |(state, core), _event| async move {
                        state.play_next(&core);
                        Ok(())
                    },
                );
                core.subscribe(
                    EventTopic::SpeechSynthesisStarted,
                    Arc::clone(&state),
                    |state, _event| async move {
                        state.duck();
                        Ok(())
                    },
                );
                core.subscribe(
                    EventTopic::SpeechSynthesisEnded,
                    Arc::clone(&state),
                    |state, _event| async move {
                        state.unduck();
                        Ok(())
                    },
                );
                core.subscribe(
                    EventTopic::SpeechSynthesisCompleted,
                    Arc::clone(&state),
                    |state, _event| async move {
                        state.unduck();
                        Ok(())
                    },
                );
                core.subscribe(
                    EventTopic::SystemModeChange,
                    (Arc::clone(&state), Arc::clone(&core)),
                    |(state, core), event| async move {
                        if let EventPayload::ModeChange { new_mode, .. } = &event.payload {
                            *state.mode.lock().unwrap_or_else(|p| p.into_inner()) = *new_mode;
                            if *new_mode == SystemMode::Idle {
                                state.stop_playback(&core);
                            }
                        }
                        Ok(())
                    },
                );

                // 1 Hz progress ticker, lives for the service lifetime.
                let ticker_state = Arc::clone(&state);
                let ticker_core = Arc::clone(&core);
                let ticker = tokio::spawn(async move {
                    let mut interval = tokio::time::interval(PROGRESS_INTERVAL);
                    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                    loop {
                        interval.tick().await;
                        ticker_state.tick(&ticker_core);
                    }
                });
                *state.ticker.lock().unwrap_or_else(|p| p.into_inner()) = Some(ticker);
                Ok(())
            })
            .await?;

        // Give the dashboard its first library snapshot.
        self.state.announce_library(&self.core);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let state = Arc::clone(&self.state);
        self.core
            .run_stop(async move {
                if let Some(ticker) = state
                    .ticker
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .take()
                {
                    ticker.abort();
                }
                // Mandatory release on every path.
                state.release_player();
                Ok(())
            })
            .await
    }

    fn status(&self) -> ServiceStatus {
        self.core.status()
    }
}

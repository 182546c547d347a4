use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use cantina_core::{CantinaError, Result, Track};

use crate::library::DurationProbe;

/// Abstraction over the audio output backend so the controller logic is
/// testable without a sound device.
pub trait PlayerBackend: Send + Sync {
    /// Start playing `track` at `volume` (0.0-1.0).
    fn play(&self, track: &Track, volume: f32) -> Result<Box<dyn PlayerHandle>>;
}

/// Control surface for one playing track. Dropping the handle releases
/// the underlying player.
pub trait PlayerHandle: Send {
    fn set_volume(&mut self, volume: f32);
    fn pause(&mut self);
    fn resume(&mut self);
    fn stop(&mut self);
    /// Whether the track reached its natural end.
    fn is_finished(&self) -> bool;
}

enum PlayerCommand {
    SetVolume(f32),
    Pause,
    Resume,
    Stop,
}

/// rodio-backed playback.
///
/// The `OutputStream` is not `Send`, so each play spawns a dedicated
/// thread that owns the stream and sink and drains a command channel; the
/// handle only talks to that thread.
pub struct RodioBackend;

impl PlayerBackend for RodioBackend {
    fn play(&self, track: &Track, volume: f32) -> Result<Box<dyn PlayerHandle>> {
        let (command_tx, command_rx) = std_mpsc::channel::<PlayerCommand>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();
        let finished = Arc::new(AtomicBool::new(false));
        let finished_for_thread = Arc::clone(&finished);
        let path = track.path.clone();

        std::thread::Builder::new()
            .name("music-player".to_string())
            .spawn(move || {
                run_player_thread(path, volume, command_rx, ready_tx, finished_for_thread);
            })
            .map_err(|e| {
                CantinaError::ResourceUnavailable(format!("failed to spawn player thread: {e}"))
            })?;

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => Ok(Box::new(RodioHandle {
                command_tx,
                finished,
            })),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CantinaError::ResourceUnavailable(
                "timed out opening audio output".to_string(),
            )),
        }
    }
}

fn run_player_thread(
    path: std::path::PathBuf,
    volume: f32,
    command_rx: std_mpsc::Receiver<PlayerCommand>,
    ready_tx: std_mpsc::Sender<Result<()>>,
    finished: Arc<AtomicBool>,
) {
    let setup = (|| -> Result<(rodio::OutputStream, rodio::Sink)> {
        let (stream, handle) = rodio::OutputStream::try_default().map_err(|e| {
            CantinaError::ResourceUnavailable(format!("no audio output device: {e}"))
        })?;
        let sink = rodio::Sink::try_new(&handle)
            .map_err(|e| CantinaError::ResourceUnavailable(format!("sink error: {e}")))?;

        let file = File::open(&path)?;
        let source = rodio::Decoder::new(BufReader::new(file)).map_err(|e| {
            CantinaError::ResourceUnavailable(format!("cannot decode {}: {e}", path.display()))
        })?;
        sink.set_volume(volume);
        sink.append(source);
        Ok((stream, sink))
    })();

    let (stream, sink) = match setup {
        Ok(pair) => {
            let _ = ready_tx.send(Ok(()));
            pair
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    loop {
        match command_rx.recv_timeout(Duration::from_millis(200)) {
            Ok(PlayerCommand::SetVolume(volume)) => sink.set_volume(volume),
            Ok(PlayerCommand::Pause) => sink.pause(),
            Ok(PlayerCommand::Resume) => sink.play(),
            Ok(PlayerCommand::Stop) | Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                sink.stop();
                break;
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                if sink.empty() {
                    finished.store(true, Ordering::Release);
                    break;
                }
            }
        }
    }

    drop(stream);
    debug!("player thread exiting");
}

struct RodioHandle {
    command_tx: std_mpsc::Sender<PlayerCommand>,
    finished: Arc<AtomicBool>,
}

impl PlayerHandle for RodioHandle {
    fn set_volume(&mut self, volume: f32) {
        let _ = self.command_tx.send(PlayerCommand::SetVolume(volume));
    }

    fn pause(&mut self) {
        let _ = self.command_tx.send(PlayerCommand::Pause);
    }

    fn resume(&mut self) {
        let _ = self.command_tx.send(PlayerCommand::Resume);
    }

    fn stop(&mut self) {
        let _ = self.command_tx.send(PlayerCommand::Stop);
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

impl DurationProbe for RodioBackend {
    fn probe(&self, path: &Path) -> Option<f32> {
        use rodio::Source;
        let file = File::open(path).ok()?;
        let decoder = match rodio::Decoder::new(BufReader::new(file)) {
            Ok(d) => d,
            Err(e) => {
                error!(path = %path.display(), error = %e, "cannot probe track duration");
                return None;
            }
        };
        decoder.total_duration().map(|d| d.as_secs_f32())
    }
}

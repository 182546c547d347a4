use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use cantina_core::payloads::{
    DjAction, DjCommandPayload, EventPayload, EyeCommandPayload, MusicAction, MusicCommandPayload,
};
use cantina_core::service::{Service, ServiceCore, ServiceStatus};
use cantina_core::{Command, EventBus, EventTopic, Result, SystemMode};

/// One-letter (and short) expansions for the terminal surface.
const SHORTCUTS: [(&str, &str); 11] = [
    ("e", "engage"),
    ("a", "ambient"),
    ("d", "disengage"),
    ("h", "help"),
    ("st", "status"),
    ("r", "reset"),
    ("q", "quit"),
    ("l", "list music"),
    ("p", "play music"),
    ("s", "stop music"),
    ("rec", "record"),
];

/// Known compound commands: the second token is a subcommand, not an arg.
const COMPOUND_COMMANDS: [(&str, &str); 12] = [
    ("play", "music"),
    ("stop", "music"),
    ("list", "music"),
    ("install", "music"),
    ("eye", "pattern"),
    ("eye", "test"),
    ("eye", "status"),
    ("debug", "level"),
    ("debug", "trace"),
    ("dj", "start"),
    ("dj", "stop"),
    ("dj", "next"),
];

/// Parse one terminal line into the normalized command form.
///
/// Shortcut expansion happens before tokenization so `p cantina band`
/// reads as `play music cantina band`.
pub fn parse_line(line: &str) -> Option<Command> {
    let raw_input = line.trim();
    if raw_input.is_empty() {
        return None;
    }

    let mut tokens: Vec<String> = raw_input.split_whitespace().map(str::to_string).collect();
    let first = tokens[0].to_lowercase();
    if let Some((_, expansion)) = SHORTCUTS.iter().find(|(short, _)| *short == first) {
        let mut expanded: Vec<String> =
            expansion.split_whitespace().map(str::to_string).collect();
        expanded.extend(tokens.drain(1..));
        tokens = expanded;
    } else {
        tokens[0] = first;
    }

    let command = tokens[0].clone();
    let mut rest = tokens.into_iter().skip(1).peekable();

    let subcommand = match rest.peek() {
        Some(second) => {
            let second = second.to_lowercase();
            if COMPOUND_COMMANDS
                .iter()
                .any(|(cmd, sub)| *cmd == command && *sub == second)
            {
                rest.next();
                Some(second)
            } else {
                None
            }
        }
        None => None,
    };

    let mut cmd = Command::new(command, raw_input).with_args(rest.collect());
    if let Some(subcommand) = subcommand {
        cmd = cmd.with_subcommand(subcommand);
    }
    Some(cmd)
}

struct DispatchState {
    statuses: Mutex<HashMap<String, ServiceStatus>>,
    mode: Mutex<SystemMode>,
}

impl DispatchState {
    fn respond(&self, core: &ServiceCore, message: impl Into<String>, is_error: bool) {
        core.emit(
            EventTopic::CliResponse,
            EventPayload::CliResponse {
                message: message.into(),
                is_error,
            },
        );
    }

    /// Route a normalized command to its topic.
    fn route(&self, core: &ServiceCore, cmd: Command) {
        debug!(command = %cmd.command, subcommand = ?cmd.subcommand, "dispatching command");
        match (cmd.command.as_str(), cmd.subcommand.as_deref()) {
            ("engage", _) => self.request_mode(core, SystemMode::Interactive),
            ("ambient", _) => self.request_mode(core, SystemMode::Ambient),
            ("disengage", _) => self.request_mode(core, SystemMode::Idle),
            ("record", _) => core.emit(EventTopic::MicRecordingStart, EventPayload::Empty),
            ("done", _) => core.emit(EventTopic::MicRecordingStop, EventPayload::Empty),
            ("quit", _) | ("exit", _) => {
                info!("shutdown requested from terminal");
                core.emit(EventTopic::SystemShutdown, EventPayload::Empty);
            }
            ("reset", _) => {
                core.emit(EventTopic::LlmMemoryReset, EventPayload::Empty);
                self.respond(core, "Conversation memory cleared.", false);
            }
            ("help", _) => self.respond(core, help_text(), false),
            ("status", _) => self.respond(core, self.status_text(), false),
            ("play", Some("music")) => {
                core.emit(
                    EventTopic::MusicCommand,
                    EventPayload::MusicCommand(MusicCommandPayload::play(cmd.arg_text())),
                );
            }
            ("stop", Some("music")) => {
                core.emit(
                    EventTopic::MusicCommand,
                    EventPayload::MusicCommand(MusicCommandPayload::action(MusicAction::Stop)),
                );
            }
            ("list", Some("music")) => {
                core.emit(
                    EventTopic::MusicCommand,
                    EventPayload::MusicCommand(MusicCommandPayload::action(MusicAction::List)),
                );
            }
            ("install", Some("music")) => {
                let mut payload = MusicCommandPayload::action(MusicAction::Install);
                payload.install_dir = Some(cmd.arg_text());
                core.emit(EventTopic::MusicCommand, EventPayload::MusicCommand(payload));
            }
            ("dj", Some("start")) => {
                core.emit(
                    EventTopic::DjCommand,
                    EventPayload::DjCommand(DjCommandPayload {
                        action: DjAction::Start,
                        auto_transition: None,
                        transition_duration: None,
                        genre_preference: None,
                    }),
                );
            }
            ("dj", Some("stop")) => {
                core.emit(
                    EventTopic::DjCommand,
                    EventPayload::DjCommand(DjCommandPayload {
                        action: DjAction::Stop,
                        auto_transition: None,
                        transition_duration: None,
                        genre_preference: None,
                    }),
                );
            }
            ("dj", Some("next")) => {
                core.emit(EventTopic::DjNextTrack, EventPayload::Empty);
            }
            ("eye", Some("pattern")) => {
                let pattern = cmd.arg_text();
                if pattern.is_empty() {
                    self.respond(core, "Usage: eye pattern <name>", true);
                } else {
                    core.emit(
                        EventTopic::EyeCommand,
                        EventPayload::EyeCommand(EyeCommandPayload {
                            pattern,
                            color: None,
                            intensity: 1.0,
                        }),
                    );
                }
            }
            ("eye", Some(_)) => {
                core.emit(EventTopic::CliCommand, EventPayload::Command(cmd));
            }
            ("debug", Some("level")) => {
                if cmd.args.len() < 2 {
                    self.respond(core, "Usage: debug level <component|all> <LEVEL>", true);
                } else {
                    core.emit(EventTopic::DebugCommand, EventPayload::Command(cmd));
                }
            }
            ("debug", Some(_)) => {
                core.emit(EventTopic::DebugCommand, EventPayload::Command(cmd));
            }
            _ => {
                // Anything unrecognized still reaches the bus for services
                // with their own verbs, and the operator hears about it.
                core.emit(EventTopic::CliCommand, EventPayload::Command(cmd.clone()));
                self.respond(
                    core,
                    format!("Unknown command: {}. Type 'help' for commands.", cmd.command),
                    true,
                );
            }
        }
    }

    fn request_mode(&self, core: &ServiceCore, mode: SystemMode) {
        core.emit(
            EventTopic::SystemSetModeRequest,
            EventPayload::ModeRequest { mode },
        );
    }

    fn status_text(&self) -> String {
        let mode = *self.mode.lock().unwrap_or_else(|p| p.into_inner());
        let statuses = self.statuses.lock().unwrap_or_else(|p| p.into_inner());
        let mut lines = vec![format!("Mode: {mode}")];
        let mut services: Vec<(&String, &ServiceStatus)> = statuses.iter().collect();
        services.sort_by_key(|(name, _)| (*name).clone());
        for (name, status) in services {
            lines.push(format!("  {name}: {status}"));
        }
        lines.join("\n")
    }
}

fn help_text() -> String {
    [
        "Available commands:",
        "  engage (e), ambient (a), disengage (d) - mode transitions",
        "  status (st), help (h), reset (r), quit (q)",
        "  list music (l), play music <n> (p), stop music (s)",
        "  install music <dir>",
        "  record (rec), done - voice capture",
        "  dj start | dj stop | dj next",
        "  eye pattern <name>",
        "  debug level <component|all> <LEVEL>",
    ]
    .join("\n")
}

/// Terminal-side half of the command pipeline.
///
/// Parses raw lines into the normalized command form, expands shortcuts,
/// extracts compound subcommands and routes each command to its topic.
/// Status answers come from caches fed by the authoritative change
/// topics; the dispatcher never calls another service.
pub struct CommandDispatcherService {
    core: Arc<ServiceCore>,
    state: Arc<DispatchState>,
}

impl CommandDispatcherService {
    pub const NAME: &'static str = "command_dispatcher";

    pub fn new(bus: EventBus) -> Self {
        Self {
            core: ServiceCore::new(Self::NAME, bus),
            state: Arc::new(DispatchState {
                statuses: Mutex::new(HashMap::new()),
                mode: Mutex::new(SystemMode::Startup),
            }),
        }
    }

    /// Entry point for the terminal reader: one line per call.
    pub fn dispatch_line(&self, line: &str) {
        if let Some(cmd) = parse_line(line) {
            let command = cmd.command.clone();
            let started = std::time::Instant::now();
            self.state.route(&self.core, cmd);
            self.core.emit(
                EventTopic::DebugCommandTrace,
                EventPayload::CommandTrace {
                    command,
                    service: Self::NAME.to_string(),
                    execution_time_ms: started.elapsed().as_secs_f64() * 1_000.0,
                    status: "dispatched".to_string(),
                },
            );
        }
    }
}

#[async_trait]
impl Service for CommandDispatcherService {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn start(&self) -> Result<()> {
        let core = Arc::clone(&self.core);
        let state = Arc::clone(&self.state);
        self.core
            .run_start(async move {
                core.subscribe(
                    EventTopic::ServiceStatusUpdate,
                    Arc::clone(&state),
                    |state, event| async move {
                        if let EventPayload::ServiceStatus(update) = &event.payload {
                            state
                                .statuses
                                .lock()
                                .unwrap_or_else(|p| p.into_inner())
                                .insert(update.service.clone(), update.status);
                        }
                        Ok(())
                    },
                );
                core.subscribe(
                    EventTopic::SystemModeChange,
                    Arc::clone(&state),
                    |state, event| async move {
                        if let EventPayload::ModeChange { new_mode, .. } = &event.payload {
                            *state.mode.lock().unwrap_or_else(|p| p.into_inner()) = *new_mode;
                        }
                        Ok(())
                    },
                );
                Ok(())
            })
            .await
    }

    async fn stop(&self) -> Result<()> {
        self.core.run_stop(async { Ok(()) }).await
    }

    fn status(&self) -> ServiceStatus {
        self.core.status()
    }
}

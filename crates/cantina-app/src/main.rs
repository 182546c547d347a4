mod cli;
mod vendors;

use anyhow::Context;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter};

use cantina_audio::MicInputService;
use cantina_core::config::{AppConfig, Secrets};
use cantina_core::payloads::{EventPayload, LogLevel};
use cantina_core::stt::SttStream;
use cantina_core::{CantinaError, EventBus, EventTopic, SystemMode};
use cantina_llm::{IntentRouterService, LlmService};
use cantina_music::{MusicControllerService, RodioBackend};
use cantina_runtime::{
    CommandDispatcherService, DebugService, EyePeripheralService, LevelControl, LoggingService,
    ModeManagerService, ModeSoundService, ServiceRegistry,
};
use cantina_speech::SpeechSynthesisService;
use cantina_stt::TranscriptionService;
use cantina_web::WebBridgeService;

use crate::cli::CliSurface;
use crate::vendors::{CannedChatClient, PulseTtsSynthesizer, SilentSttStream};

fn load_config() -> anyhow::Result<AppConfig> {
    if let Some(path) = std::env::args().nth(1) {
        return AppConfig::load_from_file(&path)
            .with_context(|| format!("loading config from {path}"));
    }
    match AppConfig::default_config_file() {
        Ok(path) if path.exists() => {
            AppConfig::load_from_file(&path).with_context(|| format!("loading {}", path.display()))
        }
        _ => Ok(AppConfig::default()),
    }
}

fn tracing_level(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warning => "warn",
        LogLevel::Error => "error",
    }
}

/// Map a service name from `debug level <component>` onto the crate
/// target its diagnostics are emitted under. Unknown names pass through
/// so raw targets still work.
fn target_for_component(component: &str) -> &str {
    match component {
        "mic_input" | "mouse_input" => "cantina_audio",
        "transcription" => "cantina_stt",
        "llm" | "intent_router" => "cantina_llm",
        "speech_synthesis" => "cantina_speech",
        "music_controller" => "cantina_music",
        "web_bridge" => "cantina_web",
        "mode_manager" | "command_dispatcher" | "logging" | "debug" | "eye_peripheral"
        | "mode_sound" | "runtime" => "cantina_runtime",
        "core" => "cantina_core",
        other => other,
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    let secrets = Secrets::from_env().context("vendor secrets are required at startup")?;

    let bus = EventBus::new();
    let (logging_service, capture_layer) = LoggingService::new(bus.clone(), &config.logging);

    // Reloadable filter so `debug level` commands mutate the logging
    // facade instead of the global logger.
    let base_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter_layer, reload_handle) = reload::Layer::new(base_filter);
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(capture_layer)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let default_level = Arc::new(Mutex::new(config.debug.default_level));
    let overrides = Arc::new(Mutex::new(config.debug.component_levels.clone()));
    let level_control: LevelControl = Arc::new(move |component, level| {
        {
            if component.eq_ignore_ascii_case("all") {
                *default_level.lock().unwrap_or_else(|p| p.into_inner()) = level;
            } else {
                overrides
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .insert(target_for_component(component).to_string(), level);
            }
        }
        let mut directives =
            tracing_level(*default_level.lock().unwrap_or_else(|p| p.into_inner())).to_string();
        let overrides: HashMap<String, LogLevel> = overrides
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        for (component, level) in overrides {
            directives.push_str(&format!(",{component}={}", tracing_level(level)));
        }
        let filter = EnvFilter::try_new(&directives)
            .map_err(|e| CantinaError::Validation(format!("bad filter '{directives}': {e}")))?;
        reload_handle
            .reload(filter)
            .map_err(|e| CantinaError::InvalidState(e.to_string()))
    });

    info!("bootstrapping CantinaOS runtime");

    // Vendor clients behind the core contracts.
    let stt_key = secrets.stt_api_key.clone();
    let stt_factory: cantina_stt::SttStreamFactory =
        Arc::new(move || Box::new(SilentSttStream::new(stt_key.clone())) as Box<dyn SttStream>);
    let chat_client = Arc::new(CannedChatClient::new(secrets.llm_api_key.clone()));
    let tts_client = Arc::new(PulseTtsSynthesizer::new(secrets.tts_api_key.clone()));
    let rodio = Arc::new(RodioBackend);

    let mode_manager = Arc::new(ModeManagerService::new(bus.clone(), config.mode.clone()));
    let dispatcher = Arc::new(CommandDispatcherService::new(bus.clone()));
    let music = MusicControllerService::new(
        bus.clone(),
        config.music.clone(),
        rodio.clone(),
        rodio.clone(),
    )
    .context("building music controller")?;

    let mut registry = ServiceRegistry::new();
    registry.register(Arc::new(logging_service));
    registry.register(Arc::clone(&mode_manager) as Arc<dyn cantina_core::Service>);
    registry.register(Arc::new(MicInputService::new(
        bus.clone(),
        config.audio.clone(),
    )));
    registry.register(Arc::new(TranscriptionService::new(
        bus.clone(),
        config.stt.clone(),
        stt_factory,
    )));
    registry.register(Arc::new(LlmService::new(
        bus.clone(),
        config.llm.clone(),
        chat_client,
    )));
    registry.register(Arc::new(IntentRouterService::new(bus.clone())));
    registry.register(Arc::new(SpeechSynthesisService::new(
        bus.clone(),
        tts_client,
    )));
    registry.register(Arc::new(music));
    registry.register(Arc::clone(&dispatcher) as Arc<dyn cantina_core::Service>);
    registry.register(Arc::new(WebBridgeService::new(
        bus.clone(),
        config.web.clone(),
    )));
    registry.register(Arc::new(DebugService::new(
        bus.clone(),
        config.debug.clone(),
        level_control,
    )));
    registry.register(Arc::new(EyePeripheralService::new(bus.clone())));
    registry.register(Arc::new(ModeSoundService::new(bus.clone())));
    #[cfg(feature = "mouse-input")]
    registry.register(Arc::new(cantina_audio::MouseInputService::new(bus.clone())));

    // Shutdown can come from the CLI (`quit`), a web system command or
    // Ctrl-C; all of them land on the same watch channel.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_for_bus = shutdown_tx.clone();
    let _shutdown_sub = bus.subscribe(
        EventTopic::SystemShutdown,
        "host",
        move |_event| {
            let shutdown = shutdown_for_bus.clone();
            async move {
                let _ = shutdown.send(true);
                Ok(())
            }
        },
    );

    registry.start_all().await.context("startup failed")?;
    bus.emit(EventTopic::SystemStartup, EventPayload::Empty);

    // STARTUP auto-advances to IDLE once everything is up.
    mode_manager.set_mode(SystemMode::Idle).await;

    let cli = CliSurface::new(Arc::clone(&dispatcher), bus.clone());
    cli.attach_response_printer();

    let mut shutdown_for_main = shutdown_rx.clone();
    tokio::select! {
        _ = cli.run(shutdown_rx) => {}
        _ = shutdown_for_main.changed() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received");
        }
    }

    info!("shutting down");
    // Forced back to IDLE so AMBIENT/INTERACTIVE behaviors wind down
    // before their services stop.
    mode_manager.set_mode(SystemMode::Idle).await;
    registry.stop_all().await;
    bus.stop();
    Ok(())
}

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

use cantina_core::config::ModeConfig;
use cantina_core::mode::TransitionStatus;
use cantina_core::payloads::{EventPayload, ModeTransitionPayload};
use cantina_core::service::{Service, ServiceCore, ServiceStatus};
use cantina_core::{CantinaError, EventBus, EventTopic, Result, SystemMode};

struct ModeState {
    current: Mutex<SystemMode>,
    grace: Duration,
}

impl ModeState {
    fn current(&self) -> SystemMode {
        *self.current.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Full transition protocol: started event, grace period, state
    /// mutation, mode-change event, grace period, completion event. Any
    /// failure reverts the state and completes with `status=failed`.
    async fn transition(&self, core: &Arc<ServiceCore>, new_mode: SystemMode) {
        let old_mode = self.current();
        if old_mode == new_mode {
            core.emit(
                EventTopic::CliResponse,
                EventPayload::CliResponse {
                    message: format!("Already in {new_mode} mode."),
                    is_error: false,
                },
            );
            return;
        }

        info!(%old_mode, %new_mode, "mode transition started");
        core.emit(
            EventTopic::ModeTransitionStarted,
            EventPayload::ModeTransition(ModeTransitionPayload {
                old_mode,
                new_mode,
                status: TransitionStatus::Success,
            }),
        );

        match self.apply(core, old_mode, new_mode).await {
            Ok(()) => {
                core.emit(
                    EventTopic::ModeTransitionComplete,
                    EventPayload::ModeTransition(ModeTransitionPayload {
                        old_mode,
                        new_mode,
                        status: TransitionStatus::Success,
                    }),
                );
                core.emit(
                    EventTopic::CliResponse,
                    EventPayload::CliResponse {
                        message: format!("Mode changed to {new_mode}."),
                        is_error: false,
                    },
                );
                info!(%new_mode, "mode transition complete");
            }
            Err(e) => {
                // Revert so subscribers never observe a half-applied mode.
                *self.current.lock().unwrap_or_else(|p| p.into_inner()) = old_mode;
                warn!(error = %e, "mode transition failed, state reverted");
                core.emit(
                    EventTopic::ModeTransitionComplete,
                    EventPayload::ModeTransition(ModeTransitionPayload {
                        old_mode,
                        new_mode,
                        status: TransitionStatus::Failed {
                            reason: e.to_string(),
                        },
                    }),
                );
                core.set_status(ServiceStatus::Error, "mode transition failed");
            }
        }
    }

    async fn apply(
        &self,
        core: &Arc<ServiceCore>,
        old_mode: SystemMode,
        new_mode: SystemMode,
    ) -> Result<()> {
        // Let subscribers prepare before the state flips.
        tokio::time::sleep(self.grace).await;

        if !core.bus().is_running() {
            return Err(CantinaError::InvalidState("event bus is stopped".into()));
        }
        *self.current.lock().unwrap_or_else(|p| p.into_inner()) = new_mode;
        core.emit(
            EventTopic::SystemModeChange,
            EventPayload::ModeChange { old_mode, new_mode },
        );

        // And let the change propagate before completion is announced.
        tokio::time::sleep(self.grace).await;
        Ok(())
    }
}

/// Finite-state mode manager: STARTUP → IDLE ↔ AMBIENT ↔ INTERACTIVE.
///
/// Exactly one mode is current; every change is event-sourced as
/// `mode.transition.started` → `system.mode.change` →
/// `mode.transition.complete`, with a configurable grace period between
/// the steps.
pub struct ModeManagerService {
    core: Arc<ServiceCore>,
    state: Arc<ModeState>,
}

impl ModeManagerService {
    pub const NAME: &'static str = "mode_manager";

    pub fn new(bus: EventBus, config: ModeConfig) -> Self {
        Self {
            core: ServiceCore::new(Self::NAME, bus),
            state: Arc::new(ModeState {
                current: Mutex::new(SystemMode::Startup),
                grace: Duration::from_millis(config.grace_period_ms),
            }),
        }
    }

    pub fn current_mode(&self) -> SystemMode {
        self.state.current()
    }

    /// Request a transition directly (used by the host for the STARTUP →
    /// IDLE advance and the shutdown force-to-IDLE).
    pub async fn set_mode(&self, mode: SystemMode) {
        self.state.transition(&self.core, mode).await;
    }
}

#[async_trait]
impl Service for ModeManagerService {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn start(&self) -> Result<()> {
        let core = Arc::clone(&self.core);
        let state = Arc::clone(&self.state);
        self.core
            .run_start(async move {
                core.subscribe(
                    EventTopic::SystemSetModeRequest,
                    (Arc::clone(&state), Arc::clone(&core)),
                    |(state, core), event| async move {
                        if let EventPayload::ModeRequest { mode } = &event.payload {
                            state.transition(&core, *mode).await;
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

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::bus::{EventBus, Subscription};
use crate::error::{CantinaError, Result};
use crate::payloads::{Event, EventPayload, ServiceStatusPayload};
use crate::topics::EventTopic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceStatus {
    Initializing,
    Starting,
    Running,
    Degraded,
    Error,
    Stopping,
    Stopped,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Initializing => "INITIALIZING",
            ServiceStatus::Starting => "STARTING",
            ServiceStatus::Running => "RUNNING",
            ServiceStatus::Degraded => "DEGRADED",
            ServiceStatus::Error => "ERROR",
            ServiceStatus::Stopping => "STOPPING",
            ServiceStatus::Stopped => "STOPPED",
        }
    }

    /// Whether the service may publish domain events in this state.
    pub fn can_emit(&self) -> bool {
        matches!(self, ServiceStatus::Running | ServiceStatus::Degraded)
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform lifecycle contract every service implements.
#[async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &str;

    /// Idempotent startup: acquire resources, register subscriptions,
    /// transition to RUNNING and announce it.
    async fn start(&self) -> Result<()>;

    /// Idempotent shutdown: cancel in-flight work, remove subscriptions,
    /// release resources, announce STOPPED.
    async fn stop(&self) -> Result<()>;

    fn status(&self) -> ServiceStatus;
}

/// Shared lifecycle core embedded by every service.
///
/// Tracks status, owns the subscriptions registered through it (removed
/// automatically on [`ServiceCore::remove_subscriptions`]), and gates
/// domain emits to the RUNNING/DEGRADED states. Handler failures demote
/// the service to DEGRADED instead of killing it.
pub struct ServiceCore {
    name: &'static str,
    bus: EventBus,
    status: Mutex<ServiceStatus>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl ServiceCore {
    pub fn new(name: &'static str, bus: EventBus) -> Arc<Self> {
        Arc::new(Self {
            name,
            bus,
            status: Mutex::new(ServiceStatus::Initializing),
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn status(&self) -> ServiceStatus {
        *self
            .status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Update status and announce it on `service.status.update`.
    pub fn set_status(&self, status: ServiceStatus, message: &str) {
        {
            let mut current = self
                .status
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *current = status;
        }
        info!(service = self.name, %status, "{message}");
        self.bus.emit(
            EventTopic::ServiceStatusUpdate,
            EventPayload::ServiceStatus(ServiceStatusPayload {
                service: self.name.to_string(),
                status,
                message: message.to_string(),
            }),
        );
    }

    /// Subscribe through the core so the handler is fault-wrapped and the
    /// subscription is removed on stop. A handler error logs the fault and
    /// demotes the service to DEGRADED; the bus keeps running.
    pub fn subscribe<S, F, Fut>(self: &Arc<Self>, topic: EventTopic, state: S, handler: F)
    where
        S: Clone + Send + Sync + 'static,
        F: Fn(S, Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let core = Arc::clone(self);
        let sub = self.bus.subscribe(topic, self.name, move |event| {
            let core = Arc::clone(&core);
            let state = state.clone();
            let fut = handler(state, event);
            async move {
                if let Err(e) = fut.await {
                    warn!(service = core.name, error = %e, "handler fault, degrading service");
                    core.set_status(ServiceStatus::Degraded, "handler fault");
                    return Err(CantinaError::HandlerFault(e.to_string()));
                }
                Ok(())
            }
        });
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(sub);
    }

    /// Publish a domain event, gated on the emit invariant. Status updates
    /// bypass the gate via [`ServiceCore::set_status`].
    pub fn emit(&self, topic: EventTopic, payload: EventPayload) {
        if !self.status().can_emit() {
            tracing::debug!(
                service = self.name,
                %topic,
                "emit suppressed outside RUNNING/DEGRADED"
            );
            return;
        }
        self.bus.emit(topic, payload);
    }

    /// Publish a domain event stamped with a conversation id.
    pub fn emit_in_conversation(
        &self,
        topic: EventTopic,
        payload: EventPayload,
        conversation_id: &str,
    ) {
        if !self.status().can_emit() {
            return;
        }
        self.bus.emit_in_conversation(topic, payload, conversation_id);
    }

    /// Drop every subscription registered through this core. After this
    /// returns no handler registered here is invoked again.
    pub fn remove_subscriptions(&self) {
        let subs: Vec<Subscription> = {
            let mut guard = self
                .subscriptions
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.drain(..).collect()
        };
        for sub in subs {
            self.bus.unsubscribe(sub);
        }
    }

    /// Standard start wrapper: STARTING → run the hook → RUNNING on
    /// success, ERROR (with subscription rollback) on failure. Idempotent.
    pub async fn run_start<Fut>(self: &Arc<Self>, hook: Fut) -> Result<()>
    where
        Fut: Future<Output = Result<()>>,
    {
        if self.status() == ServiceStatus::Running {
            return Ok(());
        }
        self.set_status(ServiceStatus::Starting, "starting");
        match hook.await {
            Ok(()) => {
                self.set_status(ServiceStatus::Running, "started");
                Ok(())
            }
            Err(e) => {
                self.remove_subscriptions();
                self.set_status(ServiceStatus::Error, "start failed");
                Err(CantinaError::ServiceStartFailed {
                    service: self.name.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Standard stop wrapper: STOPPING → run the hook → remove
    /// subscriptions → STOPPED. Idempotent.
    pub async fn run_stop<Fut>(self: &Arc<Self>, hook: Fut) -> Result<()>
    where
        Fut: Future<Output = Result<()>>,
    {
        if self.status() == ServiceStatus::Stopped {
            return Ok(());
        }
        self.set_status(ServiceStatus::Stopping, "stopping");
        let result = hook.await;
        self.remove_subscriptions();
        self.set_status(ServiceStatus::Stopped, "stopped");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn start_transitions_to_running() {
        let bus = EventBus::new();
        let core = ServiceCore::new("test_service", bus);
        core.run_start(async { Ok(()) }).await.unwrap();
        assert_eq!(core.status(), ServiceStatus::Running);
    }

    #[tokio::test]
    async fn failed_start_reports_error_status() {
        let bus = EventBus::new();
        let core = ServiceCore::new("test_service", bus);
        let err = core
            .run_start(async { Err(CantinaError::ResourceUnavailable("no device".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, CantinaError::ServiceStartFailed { .. }));
        assert_eq!(core.status(), ServiceStatus::Error);
    }

    #[tokio::test]
    async fn no_handler_runs_after_stop() {
        let bus = EventBus::new();
        let core = ServiceCore::new("test_service", bus.clone());
        let count = Arc::new(AtomicUsize::new(0));
        core.run_start(async { Ok(()) }).await.unwrap();

        core.subscribe(EventTopic::CliCommand, Arc::clone(&count), |count, _| async move {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        core.run_stop(async { Ok(()) }).await.unwrap();
        bus.emit(
            EventTopic::CliCommand,
            EventPayload::Command(crate::command::Command::new("status", "status")),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(core.status(), ServiceStatus::Stopped);
    }

    #[tokio::test]
    async fn handler_fault_degrades_service() {
        let bus = EventBus::new();
        let core = ServiceCore::new("test_service", bus.clone());
        core.run_start(async { Ok(()) }).await.unwrap();

        core.subscribe(EventTopic::CliCommand, (), |_, _| async {
            Err(CantinaError::InvalidState("broken handler".into()))
        });
        bus.emit(
            EventTopic::CliCommand,
            EventPayload::Command(crate::command::Command::new("status", "status")),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(core.status(), ServiceStatus::Degraded);
    }

    #[tokio::test]
    async fn emit_gate_blocks_before_running() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        let _sub = bus.subscribe(EventTopic::TtsRequest, "probe", move |_| {
            let seen = Arc::clone(&seen_clone);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let core = ServiceCore::new("test_service", bus.clone());
        core.emit(
            EventTopic::TtsRequest,
            EventPayload::TtsRequest { text: "hi".into() },
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 0);

        core.run_start(async { Ok(()) }).await.unwrap();
        core.emit(
            EventTopic::TtsRequest,
            EventPayload::TtsRequest { text: "hi".into() },
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}

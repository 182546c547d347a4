use std::sync::Arc;
use tracing::{error, info};

use cantina_core::service::{Service, ServiceStatus};
use cantina_core::Result;

/// Ordered service container.
///
/// Services start in registration (dependency) order and stop in reverse.
/// A start failure rolls back everything already started before the error
/// propagates.
#[derive(Default)]
pub struct ServiceRegistry {
    services: Vec<Arc<dyn Service>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, service: Arc<dyn Service>) {
        self.services.push(service);
    }

    pub async fn start_all(&self) -> Result<()> {
        for (index, service) in self.services.iter().enumerate() {
            info!(service = service.name(), "starting service");
            if let Err(e) = service.start().await {
                error!(service = service.name(), error = %e, "service failed to start");
                // Unwind in reverse so dependents go down before their
                // dependencies.
                for started in self.services[..index].iter().rev() {
                    if let Err(stop_err) = started.stop().await {
                        error!(
                            service = started.name(),
                            error = %stop_err,
                            "error stopping service during rollback"
                        );
                    }
                }
                return Err(e);
            }
        }
        info!(count = self.services.len(), "all services running");
        Ok(())
    }

    pub async fn stop_all(&self) {
        for service in self.services.iter().rev() {
            info!(service = service.name(), "stopping service");
            if let Err(e) = service.stop().await {
                error!(service = service.name(), error = %e, "error stopping service");
            }
        }
    }

    pub fn statuses(&self) -> Vec<(String, ServiceStatus)> {
        self.services
            .iter()
            .map(|s| (s.name().to_string(), s.status()))
            .collect()
    }
}

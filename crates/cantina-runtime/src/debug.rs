use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use cantina_core::config::DebugConfig;
use cantina_core::payloads::{EventPayload, LogLevel, MetricPayload};
use cantina_core::service::{Service, ServiceCore, ServiceStatus};
use cantina_core::{CantinaError, EventBus, EventTopic, Result};

/// Mutates the logging facade's level filter. Installed by the host with
/// a handle to the reloadable subscriber filter, so no service touches
/// the global logger directly.
pub type LevelControl = Arc<dyn Fn(&str, LogLevel) -> Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricAggregate {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub sum: f64,
}

impl MetricAggregate {
    fn fold(&mut self, value: f64) {
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
    }

    fn seed(value: f64) -> Self {
        Self {
            count: 1,
            min: value,
            max: value,
            sum: value,
        }
    }
}

struct DebugState {
    config: DebugConfig,
    level_control: LevelControl,
    metrics: Mutex<HashMap<String, MetricAggregate>>,
}

impl DebugState {
    fn respond(&self, core: &ServiceCore, message: impl Into<String>, is_error: bool) {
        core.emit(
            EventTopic::CliResponse,
            EventPayload::CliResponse {
                message: message.into(),
                is_error,
            },
        );
    }

    fn handle_level_command(&self, core: &ServiceCore, args: &[String]) {
        let (component, level_text) = match args {
            [component, level] => (component.as_str(), level.as_str()),
            _ => {
                self.respond(core, "Usage: debug level <component|all> <LEVEL>", true);
                return;
            }
        };
        let level = match parse_level(level_text) {
            Some(level) => level,
            None => {
                self.respond(
                    core,
                    format!("Unknown level '{level_text}'. Use DEBUG, INFO, WARNING or ERROR."),
                    true,
                );
                return;
            }
        };
        match (self.level_control)(component, level) {
            Ok(()) => {
                info!(component, level = level.as_str(), "log level changed");
                self.respond(
                    core,
                    format!("Log level for {component} set to {}.", level.as_str()),
                    false,
                );
            }
            Err(e) => self.respond(core, format!("Failed to set level: {e}"), true),
        }
    }

    fn fold_metric(&self, metric: &MetricPayload) {
        if !self.config.metrics_enabled {
            return;
        }
        {
            let mut metrics = self.metrics.lock().unwrap_or_else(|p| p.into_inner());
            metrics
                .entry(metric.name.clone())
                .and_modify(|agg| agg.fold(metric.value))
                .or_insert_with(|| MetricAggregate::seed(metric.value));
        }
        if let Some(threshold) = self.config.metric_thresholds.get(&metric.name) {
            if metric.value > *threshold {
                warn!(
                    metric = %metric.name,
                    value = metric.value,
                    threshold,
                    component = %metric.component,
                    "metric exceeded configured threshold"
                );
            }
        }
    }
}

fn parse_level(text: &str) -> Option<LogLevel> {
    match text.to_uppercase().as_str() {
        "DEBUG" => Some(LogLevel::Debug),
        "INFO" => Some(LogLevel::Info),
        "WARNING" | "WARN" => Some(LogLevel::Warning),
        "ERROR" => Some(LogLevel::Error),
        _ => None,
    }
}

/// Operator-facing debug service.
///
/// Applies `debug level` commands through the logging facade, aggregates
/// `performance.metric` events (count/min/max/sum per operation) and
/// mirrors complete LLM responses to the console so the operator can
/// follow along when synthesis is silent.
pub struct DebugService {
    core: Arc<ServiceCore>,
    state: Arc<DebugState>,
}

impl DebugService {
    pub const NAME: &'static str = "debug";

    pub fn new(bus: EventBus, config: DebugConfig, level_control: LevelControl) -> Self {
        Self {
            core: ServiceCore::new(Self::NAME, bus),
            state: Arc::new(DebugState {
                config,
                level_control,
                metrics: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn metric(&self, name: &str) -> Option<MetricAggregate> {
        self.state
            .metrics
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
            .copied()
    }
}

#[async_trait]
impl Service for DebugService {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn start(&self) -> Result<()> {
        let core = Arc::clone(&self.core);
        let state = Arc::clone(&self.state);
        self.core
            .run_start(async move {
                core.subscribe(
                    EventTopic::DebugCommand,
                    (Arc::clone(&state), Arc::clone(&core)),
                    |(state, core), event| async move {
                        if let EventPayload::Command(cmd) = &event.payload {
                            match cmd.subcommand.as_deref() {
                                Some("level") => state.handle_level_command(&core, &cmd.args),
                                other => {
                                    debug!(?other, "unsupported debug subcommand");
                                    state.respond(
                                        core.as_ref(),
                                        "Supported: debug level <component|all> <LEVEL>",
                                        true,
                                    );
                                }
                            }
                        }
                        Ok(())
                    },
                );
                core.subscribe(
                    EventTopic::PerformanceMetric,
                    Arc::clone(&state),
                    |state, event| async move {
                        if let EventPayload::Metric(metric) = &event.payload {
                            state.fold_metric(metric);
                        }
                        Ok(())
                    },
                );
                core.subscribe(
                    EventTopic::DebugCommandTrace,
                    Arc::clone(&state),
                    |state, event| async move {
                        if state.config.trace_enabled {
                            if let EventPayload::CommandTrace {
                                command,
                                service,
                                execution_time_ms,
                                status,
                            } = &event.payload
                            {
                                debug!(%command, %service, execution_time_ms, %status, "command trace");
                            }
                        }
                        Ok(())
                    },
                );
                core.subscribe(EventTopic::LlmResponse, (), |_, event| async move {
                    if let EventPayload::LlmResponse(response) = &event.payload {
                        if response.is_complete && !response.text.trim().is_empty() {
                            println!("\nDJ R3X: {}\n", response.text);
                        }
                    }
                    Ok(())
                });
                Ok(())
            })
            .await
    }

    async fn stop(&self) -> Result<()> {
        let state = Arc::clone(&self.state);
        self.core
            .run_stop(async move {
                state
                    .metrics
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .clear();
                Ok(())
            })
            .await
    }

    fn status(&self) -> ServiceStatus {
        self.core.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cantina_core::payloads::MetricPayload;
    use cantina_core::Command;
    use std::time::Duration;

    fn noop_control() -> (LevelControl, Arc<Mutex<Vec<(String, LogLevel)>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let calls_clone = Arc::clone(&calls);
        let control: LevelControl = Arc::new(move |component, level| {
            calls_clone
                .lock()
                .unwrap()
                .push((component.to_string(), level));
            Ok(())
        });
        (control, calls)
    }

    #[tokio::test]
    async fn level_command_reaches_the_facade() {
        let bus = EventBus::new();
        let (control, calls) = noop_control();
        let service = DebugService::new(bus.clone(), DebugConfig::default(), control);
        service.start().await.unwrap();

        let cmd = Command::new("debug", "debug level music_controller DEBUG")
            .with_subcommand("level")
            .with_args(vec!["music_controller".into(), "DEBUG".into()]);
        bus.emit(EventTopic::DebugCommand, EventPayload::Command(cmd));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let calls = calls.lock().unwrap();
        assert_eq!(calls.as_slice(), &[("music_controller".to_string(), LogLevel::Debug)]);
    }

    #[tokio::test]
    async fn bad_level_is_rejected_without_facade_call() {
        let bus = EventBus::new();
        let (control, calls) = noop_control();
        let service = DebugService::new(bus.clone(), DebugConfig::default(), control);
        service.start().await.unwrap();

        let cmd = Command::new("debug", "debug level all LOUD")
            .with_subcommand("level")
            .with_args(vec!["all".into(), "LOUD".into()]);
        bus.emit(EventTopic::DebugCommand, EventPayload::Command(cmd));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn metrics_aggregate_count_min_max_sum() {
        let bus = EventBus::new();
        let (control, _) = noop_control();
        let service = DebugService::new(bus.clone(), DebugConfig::default(), control);
        service.start().await.unwrap();

        for value in [10.0, 30.0, 20.0] {
            bus.emit(
                EventTopic::PerformanceMetric,
                EventPayload::Metric(MetricPayload {
                    name: "transcription_latency".into(),
                    value,
                    unit: "ms".into(),
                    component: "transcription".into(),
                }),
            );
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let agg = service.metric("transcription_latency").unwrap();
        assert_eq!(agg.count, 3);
        assert!((agg.min - 10.0).abs() < f64::EPSILON);
        assert!((agg.max - 30.0).abs() < f64::EPSILON);
        assert!((agg.sum - 60.0).abs() < f64::EPSILON);
    }
}

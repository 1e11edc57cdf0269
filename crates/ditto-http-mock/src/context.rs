//! Process-scoped state shared by the transport and control plane.

use crate::action::{ActionDispatcher, CallbackRegistry};
use crate::config::Config;
use crate::event_log::EventLog;
use crate::expectation::ExpectationRegistry;
use crate::initializer;
use crate::persistence::ExpectationPersistence;
use crate::scheduler::Scheduler;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

/// Everything one mock server instance owns. Several can coexist in a process.
pub struct MockServerContext {
    pub config: Config,
    pub scheduler: Arc<Scheduler>,
    pub registry: Arc<ExpectationRegistry>,
    pub event_log: Arc<EventLog>,
    pub dispatcher: Arc<ActionDispatcher>,
}

impl MockServerContext {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let scheduler = Arc::new(Scheduler::new(&config.scheduler).context("Failed to start scheduler")?);
        let registry = Arc::new(ExpectationRegistry::new(config.registry.clone(), scheduler.clone()));
        let event_log = Arc::new(EventLog::new(&config.event_log));
        let dispatcher = ActionDispatcher::new(scheduler.clone(), Arc::new(CallbackRegistry::new()), &config.timeouts)
            .context("Failed to create action dispatcher")?;

        if config.persist_expectations {
            info!(
                "Persisting expectations to {}",
                config.persisted_expectations_path.display()
            );
            registry.register_listener(Arc::new(ExpectationPersistence::new(
                config.persisted_expectations_path.clone(),
            )));
        }
        if let Some(path) = &config.initialization_json_path {
            initializer::initialize(&registry, path)?;
        }

        Ok(Self {
            config,
            scheduler,
            registry,
            event_log,
            dispatcher: Arc::new(dispatcher),
        })
    }

    pub fn callbacks(&self) -> &Arc<CallbackRegistry> {
        self.dispatcher.callbacks()
    }

    /// Clear the registry and the event log.
    pub fn reset(&self) {
        self.registry.reset();
        self.event_log.reset();
    }

    pub fn shutdown(&self) {
        self.registry.shutdown();
        self.scheduler.shutdown();
    }
}

use std::sync::Arc;

use crate::config::{AdmissionConfig, TicketConfig};
use crate::services::{
    Clock, EngineObserver, EnrollmentNotifier, EnrollmentScheduler, LogNotifier, NoopObserver,
    SystemClock, TicketService,
};
use crate::store::EngineStore;

/// Collaborators injected into the engine.
#[derive(Clone)]
pub struct EngineDeps {
    pub clock: Arc<dyn Clock>,
    pub observer: Arc<dyn EngineObserver>,
    pub notifier: Arc<dyn EnrollmentNotifier>,
}

impl Default for EngineDeps {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            observer: Arc::new(NoopObserver),
            notifier: Arc::new(LogNotifier),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<EnrollmentScheduler>,
    pub tickets: Arc<TicketService>,
}

impl AppState {
    /// Wires both services onto a single backend.
    pub fn build<S: EngineStore>(
        store: Arc<S>,
        ticket_config: &TicketConfig,
        admission_config: &AdmissionConfig,
        deps: EngineDeps,
    ) -> Result<Self, regex::Error> {
        let tickets = Arc::new(TicketService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            ticket_config,
            Arc::clone(&deps.clock),
            Arc::clone(&deps.observer),
        )?);

        let scheduler = Arc::new(EnrollmentScheduler::new(
            store.clone(),
            store.clone(),
            store,
            Arc::clone(&tickets),
            deps.notifier,
            deps.observer,
            deps.clock,
            admission_config.max_attempts,
        ));

        Ok(Self { scheduler, tickets })
    }
}

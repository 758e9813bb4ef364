//! Process-wide component wiring.

use std::sync::Arc;

use warden_core::{
    AuditSink, ConfigError, FanoutAuditSink, MemoryAuditLog, TracingAuditSink, WardenConfig,
};
use warden_gateway::ToolGateway;
use warden_guard::InjectionGuard;
use warden_protocol::{ActionExecutor, Anonymizer, ConsentEngine, DocumentSubmission};

/// Every component, built once at start-up and shared by reference.
pub struct AppState {
    pub config: WardenConfig,
    pub audit_log: Arc<MemoryAuditLog>,
    pub consent: Arc<ConsentEngine>,
    pub submissions: ActionExecutor<DocumentSubmission>,
    pub anonymizer: Anonymizer,
    pub guard: InjectionGuard,
    pub gateway: ToolGateway,
}

impl AppState {
    pub fn new(config: WardenConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let audit_log = Arc::new(MemoryAuditLog::new(config.audit.capacity));
        let sinks: Vec<Arc<dyn AuditSink>> = vec![audit_log.clone(), Arc::new(TracingAuditSink)];
        let audit: Arc<dyn AuditSink> = Arc::new(FanoutAuditSink::new(sinks));

        let consent =
            Arc::new(ConsentEngine::from_settings(&config.consent)?.with_audit(audit.clone()));
        let submissions = ActionExecutor::new(consent.clone(), DocumentSubmission::new())
            .with_audit(audit.clone());
        let guard = InjectionGuard::new(&config.guard, audit.clone())?;
        let gateway = ToolGateway::new(&config.gateway, audit);

        Ok(Self {
            config,
            audit_log,
            consent,
            submissions,
            anonymizer: Anonymizer::new(),
            guard,
            gateway,
        })
    }
}

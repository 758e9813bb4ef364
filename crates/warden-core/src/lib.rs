//! Warden core: error taxonomy, configuration, audit trail.

pub mod audit;
pub mod config;
pub mod error;

pub use audit::{
    AuditAction, AuditEvent, AuditOutcome, AuditSink, FanoutAuditSink, MemoryAuditLog,
    RequestContext, TracingAuditSink,
};
pub use config::{AuditSettings, ConsentSettings, GatewaySettings, GuardSettings, WardenConfig};
pub use error::{
    AuditError, BoxError, ConfigError, ConsentError, Error, ExecutionError, Result, ToolError,
};
